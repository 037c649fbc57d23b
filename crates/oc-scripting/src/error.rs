//! Script execution error types

/// Script execution result type
pub type Result<T, E = ScriptError> = std::result::Result<T, E>;

/// Script execution error
#[derive(Debug, Clone, thiserror::Error)]
pub enum ScriptError {
    /// Script text failed to parse
    #[error("{message}")]
    Compilation {
        /// Engine message, including the error name
        message: String,
    },

    /// Uncaught throw or rejected top-level promise
    #[error("{message}")]
    Execution {
        /// Message of the thrown value
        message: String,
    },

    /// Script exceeded its wall-clock budget
    #[error("Script timed out after {timeout_ms}ms")]
    Timeout {
        /// Budget in milliseconds
        timeout_ms: u64,
    },

    /// A value could not cross the sandbox boundary
    #[error(transparent)]
    Marshal(#[from] MarshalError),

    /// Variable validation failed
    #[error(transparent)]
    Variable(#[from] VariableError),

    /// Script source could not be read
    #[error("Failed to load script: {message}")]
    Load {
        /// Underlying I/O message
        message: String,
    },

    /// The engine could not be set up
    #[error("Script engine initialization failed: {0}")]
    Init(String),

    /// The run was cancelled by the caller
    #[error("Script execution cancelled")]
    Cancelled,
}

impl ScriptError {
    /// Create a compilation error
    pub fn compilation<S: Into<String>>(message: S) -> Self {
        Self::Compilation {
            message: message.into(),
        }
    }

    /// Create an execution error
    pub fn execution<S: Into<String>>(message: S) -> Self {
        Self::Execution {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    /// Create an initialization error
    pub fn init<S: Into<String>>(message: S) -> Self {
        Self::Init(message.into())
    }

    /// Whether this error was caused by cancellation
    pub fn is_cancel(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<ScriptError> for oc_core::Error {
    fn from(err: ScriptError) -> Self {
        match err {
            ScriptError::Cancelled => oc_core::Error::Cancelled,
            other => oc_core::Error::Script(other.to_string()),
        }
    }
}

/// Variable store validation error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VariableError {
    /// Name does not match `^[\w\-.]*$`
    #[error("Variable name: \"{name}\" contains invalid characters! Names must only contain alpha-numeric characters, \"-\", \"_\", \".\"")]
    InvalidName {
        /// Offending name
        name: String,
    },

    /// Setter called with an empty or missing name
    #[error("Creating a {kind}variable without specifying a name is not allowed.")]
    MissingName {
        /// `"env "` for environment variables, empty otherwise
        kind: &'static str,
    },

    /// Persisted environment variable with a non-string value
    #[error("Persistent environment variables must be strings. Received {type_name} for key \"{name}\".")]
    PersistedType {
        /// Variable name
        name: String,
        /// Script-facing type of the rejected value
        type_name: &'static str,
    },
}

/// Host/sandbox marshalling error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarshalError {
    /// The value has no host representation
    #[error("Cannot marshal a value of type {type_name} across the sandbox boundary")]
    Unsupported {
        /// Engine type name
        type_name: &'static str,
    },

    /// Nesting exceeded the marshalling depth (usually a cycle)
    #[error("Value nested deeper than {limit} levels cannot be marshalled")]
    TooDeep {
        /// Depth limit
        limit: usize,
    },

    /// The value holds more nodes than the marshalling budget (shared
    /// sub-objects are copied once per reference)
    #[error("Value with more than {limit} nodes cannot be marshalled")]
    TooLarge {
        /// Node limit
        limit: usize,
    },

    /// Engine-level failure while building or reading a value
    #[error("Engine error while marshalling: {0}")]
    Engine(String),
}

impl From<rquickjs::Error> for MarshalError {
    fn from(err: rquickjs::Error) -> Self {
        Self::Engine(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variable_error_messages() {
        let err = VariableError::InvalidName {
            name: "bad name!".into(),
        };
        assert_eq!(
            err.to_string(),
            "Variable name: \"bad name!\" contains invalid characters! Names must only contain alpha-numeric characters, \"-\", \"_\", \".\""
        );

        assert_eq!(
            VariableError::MissingName { kind: "" }.to_string(),
            "Creating a variable without specifying a name is not allowed."
        );
        assert_eq!(
            VariableError::MissingName { kind: "env " }.to_string(),
            "Creating a env variable without specifying a name is not allowed."
        );

        let err = VariableError::PersistedType {
            name: "k".into(),
            type_name: "number",
        };
        assert_eq!(
            err.to_string(),
            "Persistent environment variables must be strings. Received number for key \"k\"."
        );
    }

    #[test]
    fn test_script_error_converts_to_core_error() {
        let err: oc_core::Error = ScriptError::execution("boom").into();
        assert_eq!(err.to_string(), "boom");

        let err: oc_core::Error = ScriptError::Cancelled.into();
        assert!(err.is_cancel());
    }
}
