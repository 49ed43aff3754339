//! Events published by the Quorum Gate
//!
//! Both events are best-effort notifications: listeners (message buses,
//! dashboards, remote checkers) may miss them without affecting decisions.

use crate::domain::{ActionParams, CheckerId, SignalId, SignalOutcome, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Emitted when a signal is created and votes are wanted
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VoteRequestedEvent {
    pub signal_id: SignalId,
    pub params: ActionParams,
    pub required_checkers: BTreeSet<CheckerId>,
    pub created_at: Timestamp,
    /// Deadline after which the signal is swept as stale
    pub expires_at: Timestamp,
}

/// Emitted when a signal reaches a terminal state
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignalDecidedEvent {
    pub outcome: SignalOutcome,
}

/// Everything the gate publishes
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum GateEvent {
    VoteRequested(VoteRequestedEvent),
    SignalDecided(SignalDecidedEvent),
}

impl GateEvent {
    pub fn signal_id(&self) -> SignalId {
        match self {
            GateEvent::VoteRequested(event) => event.signal_id,
            GateEvent::SignalDecided(event) => event.outcome.signal_id,
        }
    }

    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            GateEvent::VoteRequested(_) => "vote_requested",
            GateEvent::SignalDecided(_) => "signal_decided",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_tag() {
        let event = GateEvent::VoteRequested(VoteRequestedEvent {
            signal_id: SignalId::new(),
            params: ActionParams::new("BUY", "SOL-USD", "binance", 10.0, 150.0, 0.7),
            required_checkers: [CheckerId::from("risk_limits")].into_iter().collect(),
            created_at: 1_000,
            expires_at: 31_000,
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "VoteRequested");
        assert_eq!(json["payload"]["params"]["asset"], "SOL-USD");
        assert_eq!(event.kind(), "vote_requested");
    }
}
