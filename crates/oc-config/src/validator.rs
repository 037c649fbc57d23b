//! Configuration validation

use crate::RunnerConfig;
use oc_core::{Error, Result};

const MIN_MEMORY_LIMIT: usize = 1024 * 1024;
const MIN_STACK_SIZE: usize = 64 * 1024;

/// Validate configuration
pub fn validate_config(config: &RunnerConfig) -> Result<()> {
    validate_scripting(config)?;
    validate_transport(config)?;
    validate_logging(config)?;
    Ok(())
}

fn validate_scripting(config: &RunnerConfig) -> Result<()> {
    let scripting = &config.scripting;

    if scripting.timeout.is_zero() {
        return Err(Error::Config("scripting.timeout must be > 0".to_string()));
    }

    if scripting.timeout.as_secs() > 300 {
        tracing::warn!("scripting.timeout is very high (>5 minutes)");
    }

    if scripting.memory_limit < MIN_MEMORY_LIMIT {
        return Err(Error::Config(format!(
            "scripting.memory_limit must be at least {MIN_MEMORY_LIMIT} bytes"
        )));
    }

    if scripting.max_stack_size < MIN_STACK_SIZE {
        return Err(Error::Config(format!(
            "scripting.max_stack_size must be at least {MIN_STACK_SIZE} bytes"
        )));
    }

    if scripting.max_sleep > scripting.timeout {
        tracing::warn!("scripting.max_sleep exceeds scripting.timeout; long sleeps will time out");
    }

    Ok(())
}

fn validate_transport(config: &RunnerConfig) -> Result<()> {
    if config.transport.timeout.is_zero() {
        return Err(Error::Config("transport.timeout must be > 0".to_string()));
    }

    if config.transport.follow_redirects && config.transport.max_redirects == 0 {
        tracing::warn!("transport.follow_redirects is set but max_redirects is 0");
    }

    Ok(())
}

fn validate_logging(config: &RunnerConfig) -> Result<()> {
    if config.logging.level.trim().is_empty() {
        return Err(Error::Config("logging.level cannot be empty".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&RunnerConfig::default()).is_ok());
    }

    #[test]
    fn test_zero_transport_timeout() {
        let mut config = RunnerConfig::default();
        config.transport.timeout = Duration::ZERO;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_memory_limit_floor() {
        let mut config = RunnerConfig::default();
        config.scripting.memory_limit = 1024;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("memory_limit"));
    }

    #[test]
    fn test_empty_log_level() {
        let mut config = RunnerConfig::default();
        config.logging.level = " ".to_string();
        assert!(validate_config(&config).is_err());
    }
}
