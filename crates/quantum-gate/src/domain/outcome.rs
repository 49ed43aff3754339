//! Terminal decision record
//!
//! Signals leave the live map the moment they reach a terminal state. The
//! registry keeps a bounded trail of these records for monitoring.

use super::collapse::DecisionReason;
use super::signal::{CheckerId, Signal, SignalId, SignalState, Timestamp};
use serde::{Deserialize, Serialize};

/// How a signal ended
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignalOutcome {
    pub signal_id: SignalId,
    pub action: String,
    pub asset: String,
    pub state: SignalState,
    pub reason: DecisionReason,
    pub coherence: f64,
    pub approvals: usize,
    pub total_votes: usize,
    pub forced_votes: usize,
    pub missing_checkers: Vec<CheckerId>,
    pub decided_at: Timestamp,
}

impl SignalOutcome {
    pub fn from_signal(signal: &Signal, reason: DecisionReason, decided_at: Timestamp) -> Self {
        Self {
            signal_id: signal.id,
            action: signal.params.action.clone(),
            asset: signal.params.asset.clone(),
            state: signal.state,
            reason,
            coherence: signal.coherence,
            approvals: signal.approvals(),
            total_votes: signal.total_votes(),
            forced_votes: signal.forced_votes(),
            missing_checkers: signal.missing_checkers(),
            decided_at,
        }
    }

    pub fn executed(&self) -> bool {
        self.state == SignalState::Executed
    }
}
