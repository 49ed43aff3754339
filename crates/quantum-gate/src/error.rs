//! Error types for the Quorum Gate
//!
//! Protocol-level failures (late votes, checker failures, stale signals,
//! callback failures) are recovered in place and never surface here. These
//! errors are reserved for caller mistakes: bad configuration, malformed
//! proposals, and capacity limits.

use std::time::Duration;
use thiserror::Error;

/// Quorum Gate errors
#[derive(Debug, Error)]
pub enum GateError {
    /// Configuration failed bounds validation
    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    /// Proposed action parameters are malformed
    #[error("Invalid action: {reason}")]
    InvalidAction { reason: String },

    /// Required checker is not wired into the gate
    #[error("Unknown checker: {checker_id}")]
    UnknownChecker { checker_id: String },

    /// Two checkers were registered under the same id
    #[error("Duplicate checker: {checker_id}")]
    DuplicateChecker { checker_id: String },

    /// A signal cannot be created without at least one required checker
    #[error("Required checker set is empty")]
    EmptyQuorum,

    /// Live signal map is full
    #[error("Live signal capacity exceeded: {live} live, limit {limit}")]
    CapacityExceeded { live: usize, limit: usize },
}

/// Result type for gate operations
pub type GateResult<T> = Result<T, GateError>;

/// Failure inside a checker.
///
/// Only produced and consumed by checker adapters, which convert it into a
/// forced vote. It never reaches the registry.
#[derive(Debug, Clone, Error)]
pub enum CheckerError {
    /// Backing service could not be reached
    #[error("Checker unavailable: {reason}")]
    Unavailable { reason: String },

    /// Evaluation did not finish within the adapter deadline
    #[error("Checker timed out after {elapsed:?}")]
    Timeout { elapsed: Duration },

    /// Evaluation returned a verdict that cannot be recorded
    #[error("Invalid verdict: {reason}")]
    InvalidVerdict { reason: String },

    /// Anything else, including a panicking evaluation task
    #[error("Checker internal error: {reason}")]
    Internal { reason: String },
}

/// Failure returned by an execution callback. Logged and counted only.
#[derive(Debug, Clone, Error)]
pub enum ExecutionError {
    /// Downstream venue rejected the action
    #[error("Execution rejected by venue: {reason}")]
    Rejected { reason: String },

    /// Downstream venue could not be reached
    #[error("Execution transport failure: {reason}")]
    Transport { reason: String },

    /// Callback panicked or failed in an unclassified way
    #[error("Execution callback failed: {reason}")]
    Failed { reason: String },
}
