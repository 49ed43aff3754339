//! Collapse rule
//!
//! Pure decision applied once a signal's quorum is complete. Kept free of
//! locks and clocks so every branch is testable in isolation.

use super::signal::{Signal, SignalState};
use serde::{Deserialize, Serialize};

/// Default minimum coherence (exclusive) for a collapse to succeed.
pub const DEFAULT_COHERENCE_THRESHOLD: f64 = 0.30;

/// Why a signal ended where it did
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecisionReason {
    /// Majority approved and coherence cleared the threshold
    Approved,
    /// Approvals were not a strict majority of recorded votes
    NoMajority,
    /// Majority approved but coherence was at or below the threshold
    LowCoherence,
    /// Signal aged out before its quorum completed
    Expired,
}

/// Result of applying the collapse rule
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CollapseDecision {
    pub state: SignalState,
    pub reason: DecisionReason,
    pub approvals: usize,
    pub total: usize,
    pub coherence: f64,
}

impl CollapseDecision {
    pub fn is_approved(&self) -> bool {
        self.state == SignalState::Collapsed
    }
}

/// Majority plus coherence threshold
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CollapseRule {
    coherence_threshold: f64,
}

impl CollapseRule {
    pub fn new(coherence_threshold: f64) -> Self {
        Self {
            coherence_threshold,
        }
    }

    pub fn coherence_threshold(&self) -> f64 {
        self.coherence_threshold
    }

    /// `approvals > total / 2` and `coherence > threshold` → Collapsed,
    /// otherwise Decoherent.
    pub fn decide(&self, approvals: usize, total: usize, coherence: f64) -> CollapseDecision {
        // Integer form of approvals > total / 2
        let majority = total > 0 && approvals * 2 > total;

        let (state, reason) = if !majority {
            (SignalState::Decoherent, DecisionReason::NoMajority)
        } else if coherence > self.coherence_threshold {
            (SignalState::Collapsed, DecisionReason::Approved)
        } else {
            (SignalState::Decoherent, DecisionReason::LowCoherence)
        };

        CollapseDecision {
            state,
            reason,
            approvals,
            total,
            coherence,
        }
    }

    pub fn decide_signal(&self, signal: &Signal) -> CollapseDecision {
        self.decide(signal.approvals(), signal.total_votes(), signal.coherence)
    }
}

impl Default for CollapseRule {
    fn default() -> Self {
        Self::new(DEFAULT_COHERENCE_THRESHOLD)
    }
}
