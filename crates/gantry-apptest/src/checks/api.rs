use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use gantry_core::{
    process, reserve_port, CommandKind, FailureKind, Invocation, Resolution, ServerProcess,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{process_failure, resolve, Check, CheckContext};
use crate::report::{CheckCategory, CheckOutcome};

/// Paths probed on every HTTP application, before any declared endpoints.
pub const DEFAULT_PROBE_PATHS: &[&str] = &["/", "/health", "/api", "/api/health"];

/// One HTTP request made against the running application.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProbeResult {
    pub method: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Any response below 500 counts; 404 still proves the server answers.
    pub reachable: bool,
}

/// Starts the application on a local port and probes it over HTTP.
#[derive(Debug, Clone)]
pub struct ApiCheck {
    port_lock: Arc<Mutex<()>>,
}

impl ApiCheck {
    /// `port_lock` is held for the whole phase when a fixed port is configured.
    pub fn new(port_lock: Arc<Mutex<()>>) -> Self {
        Self { port_lock }
    }
}

impl Default for ApiCheck {
    fn default() -> Self {
        Self::new(Arc::new(Mutex::new(())))
    }
}

/// (method, path) pairs to probe, deduplicated, defaults first.
fn probe_plan(ctx: &CheckContext) -> Vec<(String, String)> {
    let mut seen = HashSet::new();
    DEFAULT_PROBE_PATHS
        .iter()
        .map(|p| ("GET".to_string(), p.to_string()))
        .chain(
            ctx.target
                .endpoints
                .iter()
                .map(|ep| (ep.method.clone(), ep.concrete_path())),
        )
        .filter(|pair| seen.insert(pair.clone()))
        .collect()
}

async fn probe(
    client: &reqwest::Client,
    base: &str,
    method: &str,
    path: &str,
    payload: Option<&Value>,
) -> ProbeResult {
    let url = format!("{base}{path}");
    let mut request = match reqwest::Method::from_bytes(method.as_bytes()) {
        Ok(m) => client.request(m, &url),
        Err(e) => {
            return ProbeResult {
                method: method.to_string(),
                path: path.to_string(),
                status: None,
                error: Some(e.to_string()),
                reachable: false,
            }
        }
    };
    if matches!(method, "POST" | "PUT" | "PATCH") {
        if let Some(body) = payload {
            request = request.json(body);
        }
    }

    match request.send().await {
        Ok(resp) => {
            let status = resp.status().as_u16();
            debug!(%method, %path, status, "probe answered");
            ProbeResult {
                method: method.to_string(),
                path: path.to_string(),
                status: Some(status),
                error: None,
                reachable: status < 500,
            }
        }
        Err(e) => ProbeResult {
            method: method.to_string(),
            path: path.to_string(),
            status: None,
            error: Some(e.to_string()),
            reachable: false,
        },
    }
}

fn render_probes(probes: &[ProbeResult]) -> String {
    probes
        .iter()
        .map(|p| match (p.status, &p.error) {
            (Some(status), _) => format!("{} {} -> {}", p.method, p.path, status),
            (None, Some(err)) => format!("{} {} -> error: {}", p.method, p.path, err),
            (None, None) => format!("{} {} -> no response", p.method, p.path),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl Check for ApiCheck {
    fn category(&self) -> CheckCategory {
        CheckCategory::Api
    }

    async fn run(&self, ctx: &CheckContext) -> CheckOutcome {
        let start = Instant::now();
        let category = self.category();

        if !ctx.target.serves_http() {
            return CheckOutcome::skip(
                category,
                format!("application type '{}' does not serve HTTP", ctx.target.app_type),
                start.elapsed(),
            );
        }

        let invocations = match resolve(ctx, CommandKind::RunServer) {
            Resolution::Skip { reason } => {
                return CheckOutcome::skip(category, reason, start.elapsed())
            }
            Resolution::Run(invs) => invs,
        };
        let Some((server_inv, prepare)) = invocations.split_last() else {
            return CheckOutcome::skip(category, "no server command", start.elapsed());
        };

        // a fixed port can only be held by one validation at a time
        let _port_guard = if ctx.config.api_test_port != 0 {
            Some(self.port_lock.lock().await)
        } else {
            None
        };

        let mut output = String::new();
        if !prepare.is_empty() {
            match process::run_sequence(prepare, &ctx.target.path, ctx.config.step_timeout()).await {
                Ok(seq) if seq.success => output.push_str(&seq.output),
                Ok(seq) => {
                    return CheckOutcome::fail(
                        category,
                        format!(
                            "server preparation failed: {}",
                            seq.failure_reason.unwrap_or_default()
                        ),
                        FailureKind::ExecutionFailure,
                        start.elapsed(),
                    )
                    .with_output(seq.output)
                }
                Err(e) if e.kind() == FailureKind::ToolchainMissing => {
                    return CheckOutcome::skip(category, e.to_string(), start.elapsed())
                }
                Err(e) => return process_failure(category, e, start),
            }
        }

        let port = match reserve_port(ctx.config.api_test_port) {
            Ok(port) => port,
            Err(e) => {
                return CheckOutcome::fail(
                    category,
                    format!("no free port: {e}"),
                    FailureKind::EngineFault,
                    start.elapsed(),
                )
                .with_output(output)
            }
        };
        let inv: Invocation = server_inv
            .clone()
            .with_port(port)
            .with_env("PORT", port.to_string());

        let mut server = match ServerProcess::start(
            &inv,
            &ctx.target.path,
            ctx.config.server_grace(),
            ctx.config.stop_grace(),
        )
        .await
        {
            Ok(server) => server,
            Err(e) if e.kind() == FailureKind::ToolchainMissing => {
                return CheckOutcome::skip(category, e.to_string(), start.elapsed())
            }
            Err(e) => return process_failure(category, e, start),
        };
        info!(port, pid = ?server.pid(), "probing application");

        let probes = match probe_all(ctx, port, ctx.config.probe_timeout()).await {
            Ok(probes) => probes,
            Err(e) => {
                server.stop().await;
                return CheckOutcome::fail(
                    category,
                    format!("http client unavailable: {e}"),
                    FailureKind::EngineFault,
                    start.elapsed(),
                );
            }
        };
        server.stop().await;
        output.push_str(&format!("$ {inv}\n"));
        output.push_str(&server.output());

        let reachable = probes.iter().filter(|p| p.reachable).count();
        let summary = format!("{reachable}/{} probes reachable", probes.len());
        let report = format!("{summary}\n{}\n\n{output}", render_probes(&probes));
        let details = serde_json::json!({ "port": port, "probes": probes });

        if reachable == 0 {
            CheckOutcome::fail(
                category,
                format!("application did not answer on port {port} ({summary})"),
                FailureKind::ExecutionFailure,
                start.elapsed(),
            )
            .with_output(report)
            .with_details(details)
        } else {
            CheckOutcome::pass(category, report, start.elapsed()).with_details(details)
        }
    }
}

async fn probe_all(
    ctx: &CheckContext,
    port: u16,
    timeout: Duration,
) -> Result<Vec<ProbeResult>, reqwest::Error> {
    let client = reqwest::Client::builder().timeout(timeout).build()?;
    let base = format!("http://127.0.0.1:{port}");
    let payload = ctx.target.sample_payload();

    let mut probes = Vec::new();
    for (method, path) in probe_plan(ctx) {
        probes.push(probe(&client, &base, &method, &path, payload.as_ref()).await);
    }
    Ok(probes)
}
