//! Configuration types

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Runner configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Script sandbox limits
    #[serde(default)]
    pub scripting: ScriptingConfig,

    /// HTTP transport settings
    #[serde(default)]
    pub transport: TransportConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Script sandbox limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptingConfig {
    /// Wall-clock budget for a single script evaluation
    #[serde(default = "default_script_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Heap limit per sandbox in bytes
    #[serde(default = "default_memory_limit")]
    pub memory_limit: usize,

    /// Interpreter stack limit in bytes
    #[serde(default = "default_max_stack_size")]
    pub max_stack_size: usize,

    /// Longest single `bru.sleep` / `setTimeout` delay honoured
    #[serde(default = "default_max_sleep", with = "humantime_serde")]
    pub max_sleep: Duration,
}

impl Default for ScriptingConfig {
    fn default() -> Self {
        Self {
            timeout: default_script_timeout(),
            memory_limit: default_memory_limit(),
            max_stack_size: default_max_stack_size(),
            max_sleep: default_max_sleep(),
        }
    }
}

/// HTTP transport settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Default request timeout (a request's own setting wins)
    #[serde(default = "default_transport_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Follow 3xx responses
    #[serde(default = "default_true")]
    pub follow_redirects: bool,

    /// Maximum redirects followed
    #[serde(default = "default_max_redirects")]
    pub max_redirects: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: default_transport_timeout(),
            follow_redirects: true,
            max_redirects: default_max_redirects(),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (`RUST_LOG` overrides)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Text,
        }
    }
}

fn default_script_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_memory_limit() -> usize {
    64 * 1024 * 1024
}

fn default_max_stack_size() -> usize {
    1024 * 1024
}

fn default_max_sleep() -> Duration {
    Duration::from_secs(10)
}

fn default_transport_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_true() -> bool {
    true
}

fn default_max_redirects() -> u32 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}
