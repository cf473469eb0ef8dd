use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{GraphkError, Result};

/// Top-level graphk configuration (`graphk.toml`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub runtime: RuntimeSettings,
    #[serde(default)]
    pub log: LogSettings,
}

/// Defaults applied to every run started from this configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeSettings {
    /// Maximum nested-pipeline depth.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Run independent frontier nodes concurrently.
    #[serde(default)]
    pub parallel_frontier: bool,
    /// Maximum iterations of a single loop activation.
    #[serde(default = "default_max_loop_iterations")]
    pub max_loop_iterations: usize,
    /// What happens to an in-flight node when the run is cancelled.
    #[serde(default)]
    pub in_flight: InFlightPolicy,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            parallel_frontier: false,
            max_loop_iterations: default_max_loop_iterations(),
            in_flight: InFlightPolicy::default(),
        }
    }
}

impl RuntimeSettings {
    /// Per-run configuration seeded from these settings.
    pub fn to_run_config(&self) -> RunConfig {
        RunConfig {
            max_depth: self.max_depth,
            cancellation: None,
            parallel_frontier: self.parallel_frontier,
            max_loop_iterations: self.max_loop_iterations,
            in_flight: self.in_flight,
        }
    }
}

fn default_max_depth() -> usize {
    64
}

fn default_max_loop_iterations() -> usize {
    1000
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    /// `tracing-subscriber` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String {
    "graphk=info,warn".to_string()
}

/// Cancellation handling for a node that is running when the abort arrives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InFlightPolicy {
    /// Let the node finish, then stop before starting anything else.
    Finish,
    /// Drop the node's future immediately and treat it as aborted.
    #[default]
    Abandon,
}

/// Options for a single `run`.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub max_depth: usize,
    /// External cancellation signal. The run derives a child token from it.
    pub cancellation: Option<CancellationToken>,
    pub parallel_frontier: bool,
    pub max_loop_iterations: usize,
    pub in_flight: InFlightPolicy,
}

impl Default for RunConfig {
    fn default() -> Self {
        RuntimeSettings::default().to_run_config()
    }
}

impl RunConfig {
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn with_parallel_frontier(mut self, parallel: bool) -> Self {
        self.parallel_frontier = parallel;
        self
    }

    pub fn with_max_loop_iterations(mut self, limit: usize) -> Self {
        self.max_loop_iterations = limit;
        self
    }

    pub fn with_in_flight(mut self, policy: InFlightPolicy) -> Self {
        self.in_flight = policy;
        self
    }
}

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| GraphkError::ConfigNotFound(path.display().to_string()))?;

        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded).map_err(|e| GraphkError::Config(e.to_string()))
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                // Unset variables are left as written
                Err(_) => result.push_str(&format!("${{{}}}", var_name)),
            }
        } else {
            result.push(c);
        }
    }
    result
}
