//! Error types for the context compiler and execution engine.

use colloquy_types::error::RepositoryError;
use thiserror::Error;

use crate::model::ModelError;

/// Errors from context policy validation and compilation.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// Demand exceeded the budget under the `Error` overflow strategy.
    #[error("context budget exceeded: {demand} tokens demanded, {budget} available")]
    BudgetExceeded { demand: u32, budget: u32 },

    /// Non-truncatable content alone exceeds the hard context window.
    #[error("context window exceeded: {protected} protected tokens, window is {window}")]
    WindowExceeded { protected: u32, window: u32 },

    #[error("invalid context policy: {0}")]
    Invalid(String),
}

/// Errors from engine configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error("compact overflow strategy requires a counting token estimator")]
    NoopEstimatorWithCompact,

    #[error("agent '{0}' is already registered")]
    DuplicateAgent(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors from tool execution.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("tool execution failed: {0}")]
    Execution(String),

    #[error("unknown agent '{name}', available: {available}")]
    UnknownAgent { name: String, available: String },

    #[error("delegation depth {depth} exceeds maximum {max}")]
    DepthExceeded { depth: u8, max: u8 },

    #[error("sub-agent '{agent}' requested user input during delegation")]
    ChildInterrupt { agent: String },
}

/// Errors from turn execution.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("tool '{name}' failed: {source}")]
    ToolFailed {
        name: String,
        #[source]
        source: ToolError,
    },

    #[error("session not found")]
    SessionNotFound,

    #[error("checkpoint not found")]
    CheckpointNotFound,

    #[error("session has a turn in flight")]
    SessionLocked,

    #[error("turn reached the iteration limit of {0}")]
    MaxIterations(u32),

    #[error("invalid interrupt payload: {0}")]
    InvalidInterrupt(String),

    #[error("missing answer for question '{0}'")]
    MissingAnswer(String),

    #[error("turn cancelled")]
    Cancelled,

    #[error("turn deadline exceeded")]
    DeadlineExceeded,

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_error_display() {
        let err = PolicyError::BudgetExceeded {
            demand: 1200,
            budget: 1000,
        };
        assert_eq!(
            err.to_string(),
            "context budget exceeded: 1200 tokens demanded, 1000 available"
        );
    }

    #[test]
    fn test_engine_error_wraps_tool_error() {
        let err = EngineError::ToolFailed {
            name: "search".to_string(),
            source: ToolError::Execution("socket closed".to_string()),
        };
        assert!(err.to_string().contains("search"));
    }
}
