//! Script engine trait and script sources

use crate::context::ScriptInvocationContext;
use crate::error::{Result, ScriptError};
use crate::sandbox::SandboxExecutor;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Script source (inline or file-based)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScriptSource {
    /// Inline script code
    Inline {
        /// Script code
        code: String,
        /// Optional name for logging
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    /// File-based script
    File {
        /// Path to script file
        path: PathBuf,
    },
}

impl ScriptSource {
    /// Create inline script source
    pub fn inline<S: Into<String>>(code: S) -> Self {
        Self::Inline {
            code: code.into(),
            name: None,
        }
    }

    /// Create inline script with name
    pub fn inline_named<S: Into<String>, N: Into<String>>(code: S, name: N) -> Self {
        Self::Inline {
            code: code.into(),
            name: Some(name.into()),
        }
    }

    /// Create file-based script source
    pub fn file<P: Into<PathBuf>>(path: P) -> Self {
        Self::File { path: path.into() }
    }

    /// Get script code (loads from file if needed)
    pub async fn get_code(&self) -> Result<String> {
        match self {
            Self::Inline { code, .. } => Ok(code.clone()),
            Self::File { path } => {
                tokio::fs::read_to_string(path)
                    .await
                    .map_err(|e| ScriptError::Load {
                        message: format!("{}: {}", path.display(), e),
                    })
            }
        }
    }

    /// Get a descriptive name for this script
    pub fn name(&self) -> String {
        match self {
            Self::Inline { name, .. } => name.clone().unwrap_or_else(|| "inline".to_string()),
            Self::File { path } => path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("unknown")
                .to_string(),
        }
    }
}

/// Script engine trait
///
/// Implementations evaluate one script against one invocation context and
/// write `req`/`res` changes back into it.
#[async_trait]
pub trait ScriptEngine: Send + Sync + fmt::Debug {
    /// Engine name for logs
    fn name(&self) -> &'static str;

    /// Evaluate script code
    async fn execute(&self, code: &str, ctx: &mut ScriptInvocationContext) -> Result<()>;
}

#[async_trait]
impl ScriptEngine for SandboxExecutor {
    fn name(&self) -> &'static str {
        "quickjs"
    }

    async fn execute(&self, code: &str, ctx: &mut ScriptInvocationContext) -> Result<()> {
        SandboxExecutor::execute(self, code, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_source_names() {
        assert_eq!(ScriptSource::inline("1").name(), "inline");
        assert_eq!(ScriptSource::inline_named("1", "pre").name(), "pre");
        assert_eq!(ScriptSource::file("/tmp/tests.js").name(), "tests.js");
    }

    #[test]
    fn test_untagged_serde() {
        let source: ScriptSource = serde_json::from_str(r#"{"path": "a.js"}"#).unwrap();
        assert_eq!(source, ScriptSource::file("a.js"));

        let source: ScriptSource = serde_json::from_str(r#"{"code": "x"}"#).unwrap();
        assert_eq!(source, ScriptSource::inline("x"));
    }

    #[tokio::test]
    async fn test_file_source_is_loaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "bru.setVar('a', 1)").unwrap();

        let code = ScriptSource::file(file.path()).get_code().await.unwrap();
        assert_eq!(code, "bru.setVar('a', 1)");

        let err = ScriptSource::file("/definitely/not/here.js")
            .get_code()
            .await
            .unwrap_err();
        assert!(matches!(err, ScriptError::Load { .. }));
    }
}
