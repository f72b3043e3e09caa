//! Ephemeral process management: bounded one-shot runs and scoped servers.
//!
//! Every child is spawned in its own process group (unix) so that a timeout
//! or a stop can signal the whole tree the tool may have forked.

use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::ProcessError;
use crate::resolver::Invocation;

/// How long to keep draining pipes after the process itself exited.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Result of a process that ran to completion (successfully or not).
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// Interleaved stdout and stderr.
    pub output: String,
    /// Exit code; `None` when terminated by a signal.
    pub exit_code: Option<i32>,
    pub success: bool,
    pub duration: Duration,
}

impl ProcessOutput {
    pub fn duration_ms(&self) -> u64 {
        self.duration.as_millis() as u64
    }

    /// Human-readable reason for a non-zero exit.
    pub fn failure_reason(&self) -> Option<String> {
        if self.success {
            return None;
        }
        Some(match self.exit_code {
            Some(code) => format!("exit status {code}"),
            None => "terminated by signal".to_string(),
        })
    }
}

type SharedBuffer = Arc<Mutex<String>>;

fn append(buffer: &SharedBuffer, chunk: &str) {
    let mut guard = buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    guard.push_str(chunk);
}

fn snapshot(buffer: &SharedBuffer) -> String {
    buffer
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
}

fn drain<R>(reader: Option<R>, buffer: SharedBuffer) -> Option<JoinHandle<()>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let reader = reader?;
    Some(tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut line = Vec::new();
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line).await {
                Ok(0) | Err(_) => break,
                Ok(_) => append(&buffer, &String::from_utf8_lossy(&line)),
            }
        }
    }))
}

fn build_command(inv: &Invocation, work_dir: &Path) -> Result<Command, ProcessError> {
    if inv.program.trim().is_empty() {
        return Err(ProcessError::EmptyProgram);
    }
    if !work_dir.is_dir() {
        return Err(ProcessError::Io {
            program: inv.program.clone(),
            source: std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("working directory {} does not exist", work_dir.display()),
            ),
        });
    }

    let mut cmd = Command::new(&inv.program);
    cmd.args(&inv.args)
        .envs(inv.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .current_dir(work_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);
    Ok(cmd)
}

fn spawn(mut cmd: Command, program: &str) -> Result<Child, ProcessError> {
    cmd.spawn().map_err(|source| match source.kind() {
        std::io::ErrorKind::NotFound => ProcessError::NotFound {
            program: program.to_string(),
        },
        _ => ProcessError::Launch {
            program: program.to_string(),
            source,
        },
    })
}

/// Signal every process in the group led by `pid`.
#[cfg(unix)]
fn signal_group(pid: Option<u32>, signal: libc::c_int) {
    let Some(pid) = pid.filter(|p| *p > 1) else {
        return;
    };
    // negative pid addresses the process group
    unsafe {
        libc::kill(-(pid as libc::pid_t), signal);
    }
}

#[cfg(unix)]
fn kill_tree(pid: Option<u32>) {
    signal_group(pid, libc::SIGKILL);
}

/// Kill what is left of the group once its leader has been reaped.
///
/// A reaped leader's pid stays reserved only while the group still has
/// members, so an empty group is left alone: its id may already name an
/// unrelated group.
#[cfg(unix)]
fn sweep_group(pid: Option<u32>) {
    if group_has_members(pid) {
        signal_group(pid, libc::SIGKILL);
    }
}

#[cfg(unix)]
fn group_has_members(pid: Option<u32>) -> bool {
    let Some(pid) = pid.filter(|p| *p > 1) else {
        return false;
    };
    unsafe { libc::kill(-(pid as libc::pid_t), 0) == 0 }
}

#[cfg(not(unix))]
fn kill_tree(_pid: Option<u32>) {}

#[cfg(not(unix))]
fn sweep_group(_pid: Option<u32>) {}

async fn join_drains(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        let abort = handle.abort_handle();
        if tokio::time::timeout(DRAIN_GRACE, handle).await.is_err() {
            abort.abort();
        }
    }
}

/// Run `inv` in `work_dir`, bounded by `timeout`.
///
/// A non-zero exit is returned as `Ok` with `success == false`. Launch
/// failures and timeouts are errors; on timeout the process group is killed
/// and the output captured so far travels with the error.
pub async fn run(
    inv: &Invocation,
    work_dir: &Path,
    timeout: Duration,
) -> Result<ProcessOutput, ProcessError> {
    let start = Instant::now();
    let cmd = build_command(inv, work_dir)?;
    debug!(command = %inv, work_dir = %work_dir.display(), timeout_ms = timeout.as_millis() as u64, "spawning process");
    let mut child = spawn(cmd, &inv.program)?;
    let pid = child.id();

    let buffer: SharedBuffer = Arc::default();
    let drains: Vec<JoinHandle<()>> = [
        drain(child.stdout.take(), buffer.clone()),
        drain(child.stderr.take(), buffer.clone()),
    ]
    .into_iter()
    .flatten()
    .collect();

    let waited = tokio::time::timeout(timeout, child.wait()).await;
    match waited {
        Ok(Ok(status)) => {
            join_drains(drains).await;
            sweep_group(pid);
            let output = ProcessOutput {
                output: snapshot(&buffer),
                exit_code: status.code(),
                success: status.success(),
                duration: start.elapsed(),
            };
            debug!(command = %inv, success = output.success, exit_code = ?output.exit_code, duration_ms = output.duration_ms(), "process exited");
            Ok(output)
        }
        Ok(Err(source)) => {
            sweep_group(pid);
            Err(ProcessError::Io {
                program: inv.program.clone(),
                source,
            })
        }
        Err(_) => {
            kill_tree(pid);
            let _ = child.kill().await;
            join_drains(drains).await;
            warn!(command = %inv, limit_ms = timeout.as_millis() as u64, "process timed out and was killed");
            Err(ProcessError::Timeout {
                program: inv.program.clone(),
                limit_ms: timeout.as_millis() as u64,
                output: snapshot(&buffer),
            })
        }
    }
}

/// Combined result of running a [`Resolution`](crate::resolver::Resolution)'s commands in order.
#[derive(Debug, Clone)]
pub struct SequenceOutput {
    /// Output of every command run, each preceded by a `$ command` header.
    pub output: String,
    pub success: bool,
    /// The command that exited non-zero, if any.
    pub failed_command: Option<String>,
    pub failure_reason: Option<String>,
    pub duration: Duration,
}

impl SequenceOutput {
    pub fn duration_ms(&self) -> u64 {
        self.duration.as_millis() as u64
    }
}

/// Run `invocations` one after another, stopping at the first failure.
///
/// `timeout` bounds the whole sequence, not each command. Errors carry the
/// output of the commands that already ran.
pub async fn run_sequence(
    invocations: &[Invocation],
    work_dir: &Path,
    timeout: Duration,
) -> Result<SequenceOutput, ProcessError> {
    let start = Instant::now();
    let mut combined = String::new();

    for inv in invocations {
        let remaining = timeout.saturating_sub(start.elapsed());
        combined.push_str(&format!("$ {inv}\n"));
        match run(inv, work_dir, remaining).await {
            Ok(out) => {
                combined.push_str(&out.output);
                if !out.success {
                    return Ok(SequenceOutput {
                        output: combined,
                        success: false,
                        failed_command: Some(inv.to_string()),
                        failure_reason: out.failure_reason(),
                        duration: start.elapsed(),
                    });
                }
            }
            Err(ProcessError::Timeout {
                program, output, ..
            }) => {
                combined.push_str(&output);
                return Err(ProcessError::Timeout {
                    program,
                    limit_ms: timeout.as_millis() as u64,
                    output: combined,
                });
            }
            Err(other) => return Err(other),
        }
    }

    Ok(SequenceOutput {
        output: combined,
        success: true,
        failed_command: None,
        failure_reason: None,
        duration: start.elapsed(),
    })
}

/// Pick the port a server under test should bind.
///
/// A non-zero `preferred` port is returned as is. `0` binds an ephemeral
/// port on the loopback interface, reads it back and releases it.
pub fn reserve_port(preferred: u16) -> std::io::Result<u16> {
    if preferred != 0 {
        return Ok(preferred);
    }
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}

/// A long-lived process, such as an application under test acting as a server.
///
/// The process is terminated by [`ServerProcess::stop`] or, failing that,
/// when the handle is dropped, so every exit path of the owner cleans up.
#[derive(Debug)]
pub struct ServerProcess {
    child: Option<Child>,
    pid: Option<u32>,
    program: String,
    output: SharedBuffer,
    stop_grace: Duration,
}

impl ServerProcess {
    /// Launch `inv` and return once `grace` has elapsed.
    pub async fn start(
        inv: &Invocation,
        work_dir: &Path,
        grace: Duration,
        stop_grace: Duration,
    ) -> Result<Self, ProcessError> {
        let cmd = build_command(inv, work_dir)?;
        let mut child = spawn(cmd, &inv.program)?;
        let pid = child.id();
        info!(command = %inv, pid = ?pid, "server process started");

        let output: SharedBuffer = Arc::default();
        drain(child.stdout.take(), output.clone());
        drain(child.stderr.take(), output.clone());

        let mut server = Self {
            child: Some(child),
            pid,
            program: inv.program.clone(),
            output,
            stop_grace,
        };

        tokio::time::sleep(grace).await;
        if server.has_exited() {
            warn!(command = %inv, "server process exited during startup grace period");
        }
        Ok(server)
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Output produced so far.
    pub fn output(&self) -> String {
        snapshot(&self.output)
    }

    /// Whether the process has already terminated (or was stopped).
    pub fn has_exited(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => !matches!(child.try_wait(), Ok(None)),
            None => true,
        }
    }

    /// Terminate the server: SIGTERM to the group, then SIGKILL after the stop grace.
    ///
    /// Idempotent; safe to call after the process already exited.
    pub async fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };

        // only a live leader pins the group id
        if matches!(child.try_wait(), Ok(None)) {
            #[cfg(unix)]
            signal_group(self.pid, libc::SIGTERM);
            #[cfg(not(unix))]
            let _ = child.start_kill();

            if tokio::time::timeout(self.stop_grace, child.wait())
                .await
                .is_err()
            {
                debug!(program = %self.program, "server ignored SIGTERM, killing");
                kill_tree(self.pid);
                let _ = child.kill().await;
            }
        }
        sweep_group(self.pid);
        info!(program = %self.program, pid = ?self.pid, "server process stopped");
    }
}

impl Drop for ServerProcess {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if matches!(child.try_wait(), Ok(None)) {
                kill_tree(self.pid);
                let _ = child.start_kill();
            } else {
                sweep_group(self.pid);
            }
            debug!(program = %self.program, "server process killed on drop");
        }
    }
}
