//! Error types surfaced by the orchestrator.
//!
//! Resolution errors abort a run before anything touches the network.
//! Execution errors are attached to the unit that failed and halt the run there.

use std::fmt;

/// Errors raised while building the registry, selecting units or ordering them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("unit '{0}' is already registered")]
    DuplicateName(String),

    #[error("invalid unit name '{0}': names must be non-empty and must not contain path separators")]
    InvalidName(String),

    #[error("unit '{0}' depends on itself")]
    SelfDependency(String),

    #[error("unknown unit '{0}'")]
    UnknownUnit(String),

    /// The cycle is listed in dependency order: each unit depends on the next,
    /// and the last one depends on the first.
    #[error("cyclic dependency: {}", CycleDisplay(.0))]
    CyclicDependency(Vec<String>),

    #[error("selection matched no units")]
    EmptySelection,
}

struct CycleDisplay<'a>(&'a [String]);

impl fmt::Display for CycleDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for name in self.0 {
            write!(f, "{} -> ", name)?;
        }
        match self.0.first() {
            Some(first) => write!(f, "{}", first),
            None => Ok(()),
        }
    }
}

/// Classification of a unit failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum ExecutionErrorKind {
    /// Arguments could not be resolved or do not match the contract interface.
    /// Raised before anything is submitted.
    Argument,
    /// The chain client rejected the transaction or failed to talk to the node.
    Submission,
    /// The transaction was not confirmed within the configured timeout.
    Timeout,
    /// The transaction was mined but reverted.
    Reverted,
    /// The transaction was confirmed but its record could not be persisted.
    Store,
}

/// Failure of a single unit.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ExecutionError {
    pub kind: ExecutionErrorKind,
    pub message: String,
}

impl ExecutionError {
    pub fn new(kind: ExecutionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn argument(message: impl Into<String>) -> Self {
        Self::new(ExecutionErrorKind::Argument, message)
    }

    /// Wrap an `anyhow` error, keeping its whole context chain in the message.
    pub fn from_anyhow(kind: ExecutionErrorKind, err: &anyhow::Error) -> Self {
        Self::new(kind, format!("{:#}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_display_closes_the_loop() {
        let err = ResolveError::CyclicDependency(vec![
            "Controller".to_string(),
            "Storage".to_string(),
        ]);
        assert_eq!(
            err.to_string(),
            "cyclic dependency: Controller -> Storage -> Controller"
        );
    }

    #[test]
    fn test_execution_error_display() {
        let err = ExecutionError::new(ExecutionErrorKind::Timeout, "no receipt after 120s");
        assert_eq!(err.to_string(), "timeout: no receipt after 120s");
    }

    #[test]
    fn test_from_anyhow_keeps_context() {
        let err = anyhow::anyhow!("connection refused").context("Failed to send transaction");
        let exec = ExecutionError::from_anyhow(ExecutionErrorKind::Submission, &err);
        assert_eq!(exec.kind, ExecutionErrorKind::Submission);
        assert_eq!(exec.message, "Failed to send transaction: connection refused");
    }
}
