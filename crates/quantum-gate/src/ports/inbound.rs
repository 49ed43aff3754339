//! Driving Ports (API - Inbound)

use crate::domain::{ActionParams, CheckerId, Signal, SignalId, SignalOutcome};
use crate::error::GateResult;
use crate::health::{GateStats, HealthReport};
use crate::ports::outbound::ExecutionCallback;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Primary Quorum Gate API
///
/// Proposals enter here, votes are fanned out to the configured checkers, and
/// approved signals are handed to the registered execution callbacks exactly
/// once.
#[async_trait]
pub trait QuorumGateApi: Send + Sync {
    /// Create a signal requiring every configured checker and fan out to them.
    ///
    /// Returns once every checker has voted (or been forced).
    async fn propose(&self, params: ActionParams) -> GateResult<SignalId>;

    /// Same as `propose` with a subset of checkers, for degraded operation.
    async fn propose_with_quorum(
        &self,
        params: ActionParams,
        required: BTreeSet<CheckerId>,
    ) -> GateResult<SignalId>;

    /// Record a vote from an out-of-band checker.
    ///
    /// `None` means the signal is unknown or already terminal; the vote is
    /// ignored.
    async fn check_in(
        &self,
        signal_id: SignalId,
        checker_id: CheckerId,
        approved: bool,
        confidence: f64,
        auxiliary: Option<serde_json::Value>,
    ) -> Option<Signal>;

    /// Substitute an optimistic vote for an unavailable checker.
    async fn force_check_in(
        &self,
        signal_id: SignalId,
        checker_id: CheckerId,
        reason: &str,
    ) -> Option<Signal>;

    /// Expire signals older than `max_signal_age`. Returns how many.
    async fn sweep_stale(&self) -> usize;

    /// Add a side effect run for every approved signal.
    fn register_execution_callback(&self, callback: Arc<dyn ExecutionCallback>);

    /// Signal still waiting for votes
    fn live_signal(&self, signal_id: &SignalId) -> Option<Signal>;

    /// Terminal outcome, if still in the history window
    fn outcome(&self, signal_id: &SignalId) -> Option<SignalOutcome>;

    fn stats(&self) -> GateStats;

    fn health(&self) -> HealthReport;
}
