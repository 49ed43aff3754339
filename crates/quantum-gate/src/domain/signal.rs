//! Signal entity
//!
//! A Signal is one proposed action moving through the quorum protocol. It
//! owns its vote ledger and its coherence accumulator; the registry is the
//! only thing that mutates it.
//!
//! ```text
//! [SUPERPOSITION] ──quorum complete──→ [COLLAPSING] ──majority && coherence──→ [COLLAPSED] ──dispatch──→ [EXECUTED]
//!        │                                   │
//!        │                                   └──────────otherwise──────────→ [DECOHERENT]
//!        │                                                                        ↑
//!        └───────────────────────── age > max_signal_age ─────────────────────────┘
//! ```

use crate::error::{GateError, GateResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;

/// Coherence of a freshly created signal.
pub const INITIAL_COHERENCE: f64 = 1.0;

/// Coherence never drops below this, so it stays strictly positive.
pub const COHERENCE_FLOOR: f64 = 1e-9;

/// Opaque unique signal identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SignalId(pub Uuid);

impl SignalId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SignalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a checker casting votes
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckerId(String);

impl CheckerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CheckerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for CheckerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ids of the checker families a full deployment wires in.
pub mod well_known {
    pub const PATTERN_DETECTION: &str = "pattern_detection";
    pub const FREQUENCY_ALIGNMENT: &str = "frequency_alignment";
    pub const GEOMETRIC_ANALYSIS: &str = "geometric_analysis";
    pub const NETWORK_CONSENSUS: &str = "network_consensus";
    pub const FORECAST_PROBABILITY: &str = "forecast_probability";
    pub const RISK_LIMITS: &str = "risk_limits";

    pub const ALL: [&str; 6] = [
        PATTERN_DETECTION,
        FREQUENCY_ALIGNMENT,
        GEOMETRIC_ANALYSIS,
        NETWORK_CONSENSUS,
        FORECAST_PROBABILITY,
        RISK_LIMITS,
    ];
}

/// Immutable parameters of a proposed action
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionParams {
    /// What to do, e.g. `BUY` or `SELL`
    pub action: String,
    /// Instrument the action applies to
    pub asset: String,
    /// Venue the action would be sent to
    pub venue: String,
    /// Quantity in asset units
    pub amount: f64,
    /// Limit or reference price
    pub price: f64,
    /// Confidence the proposer attached to the action
    pub proposed_confidence: f64,
}

impl ActionParams {
    pub fn new(
        action: impl Into<String>,
        asset: impl Into<String>,
        venue: impl Into<String>,
        amount: f64,
        price: f64,
        proposed_confidence: f64,
    ) -> Self {
        Self {
            action: action.into(),
            asset: asset.into(),
            venue: venue.into(),
            amount,
            price,
            proposed_confidence,
        }
    }

    /// Amount times price.
    pub fn notional(&self) -> f64 {
        self.amount * self.price
    }

    /// Reject malformed proposals before they enter the registry.
    pub fn validate(&self) -> GateResult<()> {
        let invalid = |reason: &str| {
            Err(GateError::InvalidAction {
                reason: reason.to_string(),
            })
        };

        if self.action.trim().is_empty() {
            return invalid("action is empty");
        }
        if self.asset.trim().is_empty() {
            return invalid("asset is empty");
        }
        if self.venue.trim().is_empty() {
            return invalid("venue is empty");
        }
        if !self.amount.is_finite() || self.amount <= 0.0 {
            return invalid("amount must be finite and positive");
        }
        if !self.price.is_finite() || self.price < 0.0 {
            return invalid("price must be finite and non-negative");
        }
        if !(0.0..=1.0).contains(&self.proposed_confidence) {
            return invalid("proposed_confidence must be within [0, 1]");
        }
        Ok(())
    }
}

/// One checker's entry in a signal's ledger
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub approved: bool,
    pub confidence: f64,
    pub timestamp: Timestamp,
    pub auxiliary: Option<serde_json::Value>,
    /// Synthetic optimistic vote substituted for an unavailable checker
    pub forced: bool,
}

impl Vote {
    /// Multiplier this vote applies to coherence.
    pub fn coherence_factor(&self) -> f64 {
        if self.approved {
            self.confidence
        } else {
            1.0 - self.confidence
        }
    }
}

/// Clamp a reported confidence into `[0, 1]`.
///
/// Returns the sanitized value and whether it had to be changed. NaN maps to 0.
pub fn sanitize_confidence(confidence: f64) -> (f64, bool) {
    if confidence.is_nan() {
        return (0.0, true);
    }
    let clamped = confidence.clamp(0.0, 1.0);
    (clamped, clamped != confidence)
}

/// Protocol state of a signal
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalState {
    /// Accepting votes
    Superposition,
    /// Quorum complete, decision being computed under the registry lock
    Collapsing,
    /// Approved, execution dispatch pending
    Collapsed,
    /// Rejected or timed out
    Decoherent,
    /// Execution callbacks have run
    Executed,
}

impl SignalState {
    /// States a signal may be in while it sits in the live map.
    pub fn is_live(&self) -> bool {
        matches!(self, SignalState::Superposition | SignalState::Collapsing)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SignalState::Decoherent | SignalState::Executed)
    }
}

impl fmt::Display for SignalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SignalState::Superposition => "superposition",
            SignalState::Collapsing => "collapsing",
            SignalState::Collapsed => "collapsed",
            SignalState::Decoherent => "decoherent",
            SignalState::Executed => "executed",
        };
        f.write_str(name)
    }
}

/// A proposed action and its vote ledger
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Signal {
    pub id: SignalId,
    pub params: ActionParams,
    pub created_at: Timestamp,
    pub state: SignalState,
    pub required_checkers: BTreeSet<CheckerId>,
    pub votes: BTreeMap<CheckerId, Vote>,
    pub coherence: f64,
    /// Votes that overwrote an earlier ledger entry from the same checker
    pub revote_count: u32,
}

impl Signal {
    pub fn new(
        params: ActionParams,
        required_checkers: BTreeSet<CheckerId>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id: SignalId::new(),
            params,
            created_at,
            state: SignalState::Superposition,
            required_checkers,
            votes: BTreeMap::new(),
            coherence: INITIAL_COHERENCE,
            revote_count: 0,
        }
    }

    /// Age in milliseconds at `now`.
    pub fn age(&self, now: Timestamp) -> u64 {
        now.saturating_sub(self.created_at)
    }

    pub fn is_expired(&self, now: Timestamp, max_age_ms: u64) -> bool {
        self.age(now) > max_age_ms
    }

    /// Every required checker has a ledger entry.
    pub fn quorum_complete(&self) -> bool {
        self.required_checkers
            .iter()
            .all(|checker| self.votes.contains_key(checker))
    }

    /// Required checkers that have not voted yet.
    pub fn missing_checkers(&self) -> Vec<CheckerId> {
        self.required_checkers
            .iter()
            .filter(|checker| !self.votes.contains_key(*checker))
            .cloned()
            .collect()
    }

    pub fn approvals(&self) -> usize {
        self.votes.values().filter(|v| v.approved).count()
    }

    pub fn total_votes(&self) -> usize {
        self.votes.len()
    }

    pub fn forced_votes(&self) -> usize {
        self.votes.values().filter(|v| v.forced).count()
    }

    /// Write a vote into the ledger and fold it into coherence.
    ///
    /// The ledger keeps the last vote per checker, but coherence is multiplied
    /// on every call, so a checker voting twice counts twice. Returns `true`
    /// when an earlier entry was overwritten.
    pub(crate) fn record_vote(&mut self, checker_id: CheckerId, vote: Vote) -> bool {
        let factor = vote.coherence_factor();
        self.coherence = (self.coherence * factor).clamp(COHERENCE_FLOOR, INITIAL_COHERENCE);

        let revote = self.votes.insert(checker_id, vote).is_some();
        if revote {
            self.revote_count += 1;
        }
        revote
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ActionParams {
        ActionParams::new("BUY", "BTC-USD", "coinbase", 0.5, 60_000.0, 0.8)
    }

    fn required(ids: &[&str]) -> BTreeSet<CheckerId> {
        ids.iter().map(|id| CheckerId::from(*id)).collect()
    }

    fn vote(approved: bool, confidence: f64) -> Vote {
        Vote {
            approved,
            confidence,
            timestamp: 0,
            auxiliary: None,
            forced: false,
        }
    }

    #[test]
    fn test_new_signal_is_superposition() {
        let signal = Signal::new(params(), required(&["a", "b"]), 1_000);
        assert_eq!(signal.state, SignalState::Superposition);
        assert_eq!(signal.coherence, INITIAL_COHERENCE);
        assert!(signal.votes.is_empty());
        assert!(!signal.quorum_complete());
    }

    #[test]
    fn test_quorum_requires_every_member() {
        let mut signal = Signal::new(params(), required(&["a", "b"]), 0);

        signal.record_vote("a".into(), vote(true, 0.9));
        assert!(!signal.quorum_complete());
        assert_eq!(signal.missing_checkers(), vec![CheckerId::from("b")]);

        // A repeated vote from the same member does not complete the set
        signal.record_vote("a".into(), vote(true, 0.9));
        assert!(!signal.quorum_complete());

        signal.record_vote("b".into(), vote(false, 0.2));
        assert!(signal.quorum_complete());
        assert!(signal.missing_checkers().is_empty());
    }

    #[test]
    fn test_coherence_factors() {
        let mut signal = Signal::new(params(), required(&["a", "b"]), 0);
        signal.record_vote("a".into(), vote(true, 0.8));
        signal.record_vote("b".into(), vote(false, 0.25));

        // 0.8 * (1 - 0.25)
        assert!((signal.coherence - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_revote_overwrites_ledger_but_multiplies_again() {
        let mut signal = Signal::new(params(), required(&["a", "b"]), 0);

        assert!(!signal.record_vote("a".into(), vote(true, 0.5)));
        assert!(signal.record_vote("a".into(), vote(true, 0.9)));

        assert_eq!(signal.votes.len(), 1);
        assert_eq!(signal.votes[&CheckerId::from("a")].confidence, 0.9);
        assert_eq!(signal.revote_count, 1);
        // Both votes are folded in: 0.5 * 0.9
        assert!((signal.coherence - 0.45).abs() < 1e-12);
    }

    #[test]
    fn test_coherence_stays_positive() {
        let mut signal = Signal::new(params(), required(&["a", "b"]), 0);
        signal.record_vote("a".into(), vote(true, 0.0));
        assert!(signal.coherence > 0.0);
        assert_eq!(signal.coherence, COHERENCE_FLOOR);

        signal.record_vote("b".into(), vote(false, 1.0));
        assert!(signal.coherence > 0.0);
    }

    #[test]
    fn test_sanitize_confidence() {
        assert_eq!(sanitize_confidence(0.4), (0.4, false));
        assert_eq!(sanitize_confidence(1.7), (1.0, true));
        assert_eq!(sanitize_confidence(-0.1), (0.0, true));
        assert_eq!(sanitize_confidence(f64::NAN), (0.0, true));
    }

    #[test]
    fn test_expiry_is_strictly_after_max_age() {
        let signal = Signal::new(params(), required(&["a"]), 1_000);
        assert!(!signal.is_expired(31_000, 30_000));
        assert!(signal.is_expired(31_001, 30_000));
        assert_eq!(signal.age(500), 0);
    }

    #[test]
    fn test_action_validation() {
        assert!(params().validate().is_ok());

        let mut bad = params();
        bad.amount = 0.0;
        assert!(matches!(bad.validate(), Err(GateError::InvalidAction { .. })));

        let mut bad = params();
        bad.price = f64::INFINITY;
        assert!(bad.validate().is_err());

        let mut bad = params();
        bad.proposed_confidence = 1.5;
        assert!(bad.validate().is_err());

        let mut bad = params();
        bad.venue = "  ".into();
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_state_classification() {
        assert!(SignalState::Superposition.is_live());
        assert!(SignalState::Collapsing.is_live());
        assert!(!SignalState::Collapsed.is_live());
        assert!(SignalState::Decoherent.is_terminal());
        assert!(SignalState::Executed.is_terminal());
        assert!(!SignalState::Collapsed.is_terminal());
    }
}
