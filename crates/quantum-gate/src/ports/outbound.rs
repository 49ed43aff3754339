//! Driven Ports (SPI - Outbound Dependencies)
//!
//! Checkers, execution callbacks, event publishing and time are all supplied
//! by the embedding application. The protocol core only sees these traits.

use crate::domain::{ActionParams, CheckerId, SignalId, Timestamp, Vote};
use crate::error::{CheckerError, ExecutionError};
use crate::events::GateEvent;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What a checker returns for a proposed action
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckerVerdict {
    pub approved: bool,
    /// Confidence in `[0, 1]`
    pub confidence: f64,
    pub auxiliary: Option<serde_json::Value>,
}

impl CheckerVerdict {
    pub fn approve(confidence: f64) -> Self {
        Self {
            approved: true,
            confidence,
            auxiliary: None,
        }
    }

    pub fn reject(confidence: f64) -> Self {
        Self {
            approved: false,
            confidence,
            auxiliary: None,
        }
    }

    pub fn with_auxiliary(mut self, auxiliary: serde_json::Value) -> Self {
        self.auxiliary = Some(auxiliary);
        self
    }
}

/// Independent evaluator casting one vote per signal.
///
/// Implementations may block on I/O; the gate bounds each call with
/// `checker_timeout` and converts any failure into a forced vote.
#[async_trait]
pub trait Checker: Send + Sync {
    /// Stable identifier used as the ledger key
    fn id(&self) -> CheckerId;

    /// Evaluate a proposed action
    async fn evaluate(&self, params: &ActionParams) -> Result<CheckerVerdict, CheckerError>;
}

/// Payload handed to execution callbacks once a signal collapses
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub signal_id: SignalId,
    pub params: ActionParams,
    pub coherence: f64,
    pub votes: BTreeMap<CheckerId, Vote>,
    pub collapsed_at: Timestamp,
}

impl ExecutionRequest {
    /// Number of votes in the final ledger that were forced fallbacks.
    pub fn forced_votes(&self) -> usize {
        self.votes.values().filter(|v| v.forced).count()
    }
}

/// Side effect run when a signal is approved.
///
/// Invoked at most once per signal. Retries inside the callback are the
/// callback's own concern.
#[async_trait]
pub trait ExecutionCallback: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str {
        "execution-callback"
    }

    async fn execute(&self, request: &ExecutionRequest) -> Result<(), ExecutionError>;
}

/// Best-effort notification sink for gate events.
#[async_trait]
pub trait VoteRequestPublisher: Send + Sync {
    /// Publish an event, returning the number of receivers reached.
    async fn publish(&self, event: GateEvent) -> Result<usize, String>;
}

/// Clock abstraction so expiry can be tested deterministically.
pub trait TimeSource: Send + Sync {
    /// Milliseconds since the Unix epoch
    fn now(&self) -> Timestamp;
}
