//! Domain module for the Quorum Gate
//!
//! ## Core Modules
//! - signal: Signal entity, vote ledger, coherence accumulator
//! - collapse: Majority + coherence decision rule
//! - outcome: Terminal decision records

pub mod collapse;
pub mod outcome;
pub mod signal;

pub use collapse::{CollapseDecision, CollapseRule, DecisionReason, DEFAULT_COHERENCE_THRESHOLD};
pub use outcome::SignalOutcome;
pub use signal::{
    sanitize_confidence, well_known, ActionParams, CheckerId, Signal, SignalId, SignalState,
    Timestamp, Vote, COHERENCE_FLOOR, INITIAL_COHERENCE,
};
