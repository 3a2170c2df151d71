//! Error types for the agent core.
//!
//! Uses thiserror for ergonomic error definition. Only [`Error`] crosses the
//! session boundary; everything that happens while handling a single trigger
//! is folded into an [`ActionResult`](crate::command::ActionResult) instead.

use std::time::Duration;

/// Main error type for the agent core
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transport-related error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Memory store error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// LLM output could not be turned into a decision
    #[error("Decision error: {0}")]
    Decision(#[from] DecisionError),

    /// Decision named an unknown command or carried bad arguments
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Command handler failure
    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    /// LLM provider error
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// A pending confirmation expired before the player confirmed it
    #[error("Confirmation for '{command}' from {player} expired after {after:?}")]
    ConfirmationTimeout {
        player: String,
        command: String,
        after: Duration,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML configuration parse error
    #[error("Config parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Errors from the game connection
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Could not establish the session
    #[error("Connection to {address} failed: {reason}")]
    Connect { address: String, reason: String },

    /// Sending a chat line failed
    #[error("Failed to send chat: {reason}")]
    Send { reason: String },

    /// The connection dropped
    #[error("Disconnected: {reason}")]
    Disconnected { reason: String },
}

/// Errors from the memory store
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// No record under this key
    #[error("No record '{key}' in namespace '{namespace}'")]
    NotFound { namespace: String, key: String },

    /// Backend cannot be reached
    #[error("Storage unavailable: {reason}")]
    Unavailable { reason: String },

    /// Persisted data could not be read back
    #[error("Corrupt data in {path}: {reason}")]
    Corrupt { path: String, reason: String },

    /// The store has been closed
    #[error("Store is closed")]
    Closed,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    /// Whether this is a plain missing-key lookup rather than a failure
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}

/// Errors turning raw model output into a [`Decision`](crate::decision::Decision)
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecisionError {
    /// No JSON object could be extracted
    #[error("Unparseable response: {reason}")]
    Unparseable { reason: String },

    /// The model named an action that is not offered
    #[error("Unknown action: {name}")]
    UnknownAction { name: String },

    /// The arguments were not a JSON object
    #[error("Malformed arguments: {reason}")]
    MalformedArguments { reason: String },
}

/// Errors validating a decision against the command registry
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    /// No such command registered
    #[error("Unknown command: {name}")]
    UnknownCommand { name: String },

    /// Required argument absent
    #[error("{command}: missing required argument '{arg}'")]
    MissingArgument { command: String, arg: String },

    /// Argument has the wrong JSON type
    #[error("{command}: argument '{arg}' must be {expected}")]
    WrongType {
        command: String,
        arg: String,
        expected: &'static str,
    },

    /// Argument value outside the declared constraint
    #[error("{command}: argument '{arg}' {reason}")]
    ConstraintViolated {
        command: String,
        arg: String,
        reason: String,
    },

    /// Argument not declared by the command
    #[error("{command}: unexpected argument '{arg}'")]
    UnexpectedArgument { command: String, arg: String },
}

/// Errors raised by command handlers
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// The game connection failed while performing the action
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Memory access failed while performing the action
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The action's target is not valid right now
    #[error("Invalid target: {reason}")]
    InvalidTarget { reason: String },

    /// Any other handler failure
    #[error("{reason}")]
    Failed { reason: String },
}

/// LLM provider errors
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// API error from provider
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Network/connection error
    #[error("Network error: {0}")]
    Network(String),

    /// Response parsing error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Rate limited
    #[error("Rate limited")]
    RateLimited,

    /// Authentication failed
    #[error("Authentication failed")]
    AuthenticationFailed,
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, Error>;

/// Result type for transport operations
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Result type for memory operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Result type for validation
pub type ValidationResult<T> = std::result::Result<T, ValidationError>;

/// Result type for command handlers
pub type CommandResult<T> = std::result::Result<T, CommandError>;

/// Result type for LLM operations
pub type LlmResult<T> = std::result::Result<T, LlmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Config("agent name is empty".to_string());
        assert_eq!(err.to_string(), "Configuration error: agent name is empty");
    }

    #[test]
    fn test_error_conversion() {
        let err: Error = ValidationError::UnknownCommand {
            name: "teleport_admin".to_string(),
        }
        .into();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(
            err.to_string(),
            "Validation error: Unknown command: teleport_admin"
        );
    }

    #[test]
    fn test_not_found_is_distinguishable() {
        let missing = StorageError::NotFound {
            namespace: "Steve".to_string(),
            key: "home".to_string(),
        };
        assert!(missing.is_not_found());
        assert!(!StorageError::Closed.is_not_found());
    }
}
