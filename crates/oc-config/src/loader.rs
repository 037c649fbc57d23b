//! Configuration loading

use crate::{validate_config, ConfigFormat, RunnerConfig};
use oc_core::{Error, Result};
use regex::Regex;
use std::env;
use std::fs;
use std::path::Path;

/// Load configuration from a file
pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<RunnerConfig> {
    let path = path.as_ref();

    let content = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read config file: {e}")))?;

    let format = ConfigFormat::from_path(path)?;

    load_from_str(&content, format)
}

/// Expand environment variables in configuration string
/// Supports syntax: ${VAR} and ${VAR:-default}
fn expand_env_vars(content: &str) -> Result<String> {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(:-([^}]*))?\}")
        .map_err(|e| Error::Config(format!("Invalid regex: {e}")))?;

    let mut result = String::with_capacity(content.len());
    let mut last_match = 0;

    for cap in re.captures_iter(content) {
        let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
            continue;
        };
        let var_name = var_name.as_str();
        let default_value = cap.get(3).map(|m| m.as_str());

        let value = match (env::var(var_name), default_value) {
            (Ok(val), _) => val,
            (Err(_), Some(default)) => default.to_string(),
            (Err(_), None) => {
                return Err(Error::Config(format!(
                    "Environment variable '{var_name}' not set and no default provided"
                )));
            }
        };

        result.push_str(&content[last_match..full_match.start()]);
        result.push_str(&value);
        last_match = full_match.end();
    }

    result.push_str(&content[last_match..]);

    Ok(result)
}

/// Load configuration from a string
pub fn load_from_str(content: &str, format: ConfigFormat) -> Result<RunnerConfig> {
    let expanded_content = expand_env_vars(content)?;

    let config: RunnerConfig = match format {
        ConfigFormat::Yaml => serde_yaml::from_str(&expanded_content)
            .map_err(|e| Error::Config(format!("Failed to parse YAML: {e}")))?,
        ConfigFormat::Toml => toml::from_str(&expanded_content)
            .map_err(|e| Error::Config(format!("Failed to parse TOML: {e}")))?,
        ConfigFormat::Json => serde_json::from_str(&expanded_content)
            .map_err(|e| Error::Config(format!("Failed to parse JSON: {e}")))?,
    };

    validate_config(&config)?;

    Ok(config)
}

/// Load configuration from an optional path, falling back to defaults
pub fn load_config(path: Option<&Path>) -> Result<RunnerConfig> {
    match path {
        Some(path) => {
            tracing::debug!(path = %path.display(), "Loading runner configuration");
            load_from_file(path)
        }
        None => Ok(RunnerConfig::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LogFormat;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_load_yaml_config() {
        let yaml = r#"
scripting:
  timeout: 2s
  memory_limit: 8388608
transport:
  timeout: 5s
  follow_redirects: false
logging:
  level: debug
  format: json
"#;

        let config = load_from_str(yaml, ConfigFormat::Yaml).unwrap();
        assert_eq!(config.scripting.timeout, Duration::from_secs(2));
        assert_eq!(config.scripting.memory_limit, 8 * 1024 * 1024);
        assert_eq!(config.scripting.max_sleep, Duration::from_secs(10));
        assert!(!config.transport.follow_redirects);
        assert_eq!(config.transport.max_redirects, 5);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_load_toml_config() {
        let toml = r#"
[scripting]
timeout = "500ms"

[logging]
level = "warn"
"#;

        let config = load_from_str(toml, ConfigFormat::Toml).unwrap();
        assert_eq!(config.scripting.timeout, Duration::from_millis(500));
        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.transport.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_env_var_expansion() {
        env::set_var("OC_TEST_SCRIPT_TIMEOUT", "3s");

        let yaml = r#"
scripting:
  timeout: ${OC_TEST_SCRIPT_TIMEOUT}
logging:
  level: ${OC_TEST_UNSET_LEVEL:-trace}
"#;

        let config = load_from_str(yaml, ConfigFormat::Yaml).unwrap();
        assert_eq!(config.scripting.timeout, Duration::from_secs(3));
        assert_eq!(config.logging.level, "trace");

        env::remove_var("OC_TEST_SCRIPT_TIMEOUT");
    }

    #[test]
    fn test_missing_env_var_without_default() {
        let yaml = "logging:\n  level: ${OC_TEST_DEFINITELY_UNSET}\n";
        let err = load_from_str(yaml, ConfigFormat::Yaml).unwrap_err();
        assert!(err.to_string().contains("OC_TEST_DEFINITELY_UNSET"));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let yaml = "scripting:\n  timeout: 0s\n";
        assert!(load_from_str(yaml, ConfigFormat::Yaml).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".json")
            .tempfile()
            .unwrap();
        write!(file, r#"{{"transport": {{"max_redirects": 2}}}}"#).unwrap();

        let config = load_from_file(file.path()).unwrap();
        assert_eq!(config.transport.max_redirects, 2);
    }

    #[test]
    fn test_load_config_defaults_without_path() {
        assert_eq!(load_config(None).unwrap(), RunnerConfig::default());
    }
}
