//! Runtime configuration for the engine and the application tester.
//!
//! Values come from built-in defaults, optionally overlaid by a JSON file,
//! and finally by `GANTRY_*` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

/// Default per-step timeout ceiling (seconds).
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 300;
/// Default grace period before probing a freshly started server (milliseconds).
pub const DEFAULT_SERVER_GRACE_MS: u64 = 2_000;
/// Default timeout for a single HTTP probe (seconds).
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 10;
/// Default delay between SIGTERM and SIGKILL when stopping a server (milliseconds).
pub const DEFAULT_STOP_GRACE_MS: u64 = 1_000;

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default = "GantryConfig::builtin")]
pub struct GantryConfig {
    /// Timeout applied to steps that do not declare their own.
    pub step_timeout_secs: u64,
    /// Port the API check binds the application to. `0` asks the OS for a free port.
    pub api_test_port: u16,
    /// Wait after starting a server before the first probe.
    pub server_grace_ms: u64,
    /// Timeout for each HTTP probe.
    pub probe_timeout_secs: u64,
    /// Wait between SIGTERM and SIGKILL when stopping a server.
    pub stop_grace_ms: u64,
    /// Parent directory for ephemeral workspaces (system temp dir when unset).
    pub workspace_root: Option<PathBuf>,
}

impl Default for GantryConfig {
    fn default() -> Self {
        let mut config = Self::builtin();
        // Malformed variables are ignored here; `load` reports them.
        let _ = config.apply_env();
        config
    }
}

impl GantryConfig {
    /// Built-in defaults, ignoring the environment.
    pub fn builtin() -> Self {
        Self {
            step_timeout_secs: DEFAULT_STEP_TIMEOUT_SECS,
            api_test_port: 0,
            server_grace_ms: DEFAULT_SERVER_GRACE_MS,
            probe_timeout_secs: DEFAULT_PROBE_TIMEOUT_SECS,
            stop_grace_ms: DEFAULT_STOP_GRACE_MS,
            workspace_root: None,
        }
    }

    /// Create a config from environment variables.
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Load configuration: defaults, then `path` (if it exists), then env vars.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) if p.exists() => Self::from_file(p)?,
            _ => Self::builtin(),
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Parse a JSON config file. Missing keys take built-in defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Write the config as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data).map_err(|source| ConfigError::Write {
            path: path.display().to_string(),
            source,
        })
    }

    /// Override fields from `GANTRY_*` environment variables.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(v) = env_parse::<u64>("GANTRY_STEP_TIMEOUT_SECS")? {
            self.step_timeout_secs = v;
        }
        if let Some(v) = env_parse::<u16>("GANTRY_API_TEST_PORT")? {
            self.api_test_port = v;
        }
        if let Some(v) = env_parse::<u64>("GANTRY_SERVER_GRACE_MS")? {
            self.server_grace_ms = v;
        }
        if let Some(v) = env_parse::<u64>("GANTRY_PROBE_TIMEOUT_SECS")? {
            self.probe_timeout_secs = v;
        }
        if let Some(v) = env_parse::<u64>("GANTRY_STOP_GRACE_MS")? {
            self.stop_grace_ms = v;
        }
        if let Ok(root) = std::env::var("GANTRY_WORKSPACE_ROOT") {
            if !root.is_empty() {
                self.workspace_root = Some(PathBuf::from(root));
            }
        }
        Ok(())
    }

    pub fn with_step_timeout_secs(mut self, secs: u64) -> Self {
        self.step_timeout_secs = secs;
        self
    }

    pub fn with_api_test_port(mut self, port: u16) -> Self {
        self.api_test_port = port;
        self
    }

    pub fn with_server_grace_ms(mut self, ms: u64) -> Self {
        self.server_grace_ms = ms;
        self
    }

    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = Some(root.into());
        self
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    pub fn server_grace(&self) -> Duration {
        Duration::from_millis(self.server_grace_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            debug!(key = %key, value = %raw, "config override from environment");
            raw.trim()
                .parse::<T>()
                .map(Some)
                .map_err(|_| ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: raw,
                })
        }
        _ => Ok(None),
    }
}
