//! Configuration builder

use crate::types::{LogFormat, RunnerConfig};
use crate::validate_config;
use std::time::Duration;

/// Builder for constructing configuration programmatically
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: RunnerConfig,
}

impl ConfigBuilder {
    /// Create a new configuration builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-script timeout
    pub fn script_timeout(mut self, timeout: Duration) -> Self {
        self.config.scripting.timeout = timeout;
        self
    }

    /// Set the sandbox heap limit
    pub fn memory_limit(mut self, bytes: usize) -> Self {
        self.config.scripting.memory_limit = bytes;
        self
    }

    /// Set the longest honoured sleep
    pub fn max_sleep(mut self, max_sleep: Duration) -> Self {
        self.config.scripting.max_sleep = max_sleep;
        self
    }

    /// Set the default transport timeout
    pub fn transport_timeout(mut self, timeout: Duration) -> Self {
        self.config.transport.timeout = timeout;
        self
    }

    /// Enable or disable redirect following
    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.config.transport.follow_redirects = follow;
        self
    }

    /// Set the log level filter
    pub fn log_level<S: Into<String>>(mut self, level: S) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// Set the log format
    pub fn log_format(mut self, format: LogFormat) -> Self {
        self.config.logging.format = format;
        self
    }

    /// Validate and build the configuration
    pub fn build(self) -> oc_core::Result<RunnerConfig> {
        validate_config(&self.config)?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_overrides() {
        let config = ConfigBuilder::new()
            .script_timeout(Duration::from_millis(250))
            .follow_redirects(false)
            .log_format(LogFormat::Json)
            .build()
            .unwrap();

        assert_eq!(config.scripting.timeout, Duration::from_millis(250));
        assert!(!config.transport.follow_redirects);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.transport.max_redirects, 5);
    }

    #[test]
    fn test_builder_validates() {
        assert!(ConfigBuilder::new()
            .script_timeout(Duration::ZERO)
            .build()
            .is_err());
    }
}
