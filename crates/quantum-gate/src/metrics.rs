//! # Quorum Metrics
//!
//! Prometheus metrics for monitoring the gate.
//!
//! ## Usage
//!
//! Enable with the `metrics` feature:
//! ```toml
//! quantum-gate = { path = "...", features = ["metrics"] }
//! ```
//!
//! ## Metrics Exported
//!
//! - `quorum_signals_created_total` - Counter of signals created
//! - `quorum_signals_collapsed_total` - Counter of approved collapses
//! - `quorum_signals_decoherent_total` - Counter of rejected signals (by reason)
//! - `quorum_signals_executed_total` - Counter of signals whose callbacks ran
//! - `quorum_votes_total` - Counter of votes (by checker, forced)
//! - `quorum_callback_failures_total` - Counter of failed execution callbacks
//! - `quorum_live_signals` - Gauge of signals awaiting quorum

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, IntCounter,
    IntCounterVec, IntGauge,
};

#[cfg(feature = "metrics")]
lazy_static! {
    pub static ref SIGNALS_CREATED: IntCounter = register_int_counter!(
        "quorum_signals_created_total",
        "Total number of signals created"
    )
    .expect("Failed to create SIGNALS_CREATED metric");

    pub static ref SIGNALS_COLLAPSED: IntCounter = register_int_counter!(
        "quorum_signals_collapsed_total",
        "Total number of signals that collapsed to an approval"
    )
    .expect("Failed to create SIGNALS_COLLAPSED metric");

    pub static ref SIGNALS_DECOHERENT: IntCounterVec = register_int_counter_vec!(
        "quorum_signals_decoherent_total",
        "Total number of signals rejected or expired",
        &["reason"]
    )
    .expect("Failed to create SIGNALS_DECOHERENT metric");

    pub static ref SIGNALS_EXECUTED: IntCounter = register_int_counter!(
        "quorum_signals_executed_total",
        "Total number of signals whose execution callbacks ran"
    )
    .expect("Failed to create SIGNALS_EXECUTED metric");

    pub static ref VOTES: IntCounterVec = register_int_counter_vec!(
        "quorum_votes_total",
        "Total number of votes recorded",
        &["checker", "forced"]
    )
    .expect("Failed to create VOTES metric");

    pub static ref CALLBACK_FAILURES: IntCounter = register_int_counter!(
        "quorum_callback_failures_total",
        "Total number of failed execution callbacks"
    )
    .expect("Failed to create CALLBACK_FAILURES metric");

    pub static ref LIVE_SIGNALS: IntGauge = register_int_gauge!(
        "quorum_live_signals",
        "Number of signals awaiting quorum"
    )
    .expect("Failed to create LIVE_SIGNALS metric");
}

// =============================================================================
// METRIC RECORDING FUNCTIONS
// =============================================================================

#[cfg(feature = "metrics")]
pub fn record_signal_created() {
    SIGNALS_CREATED.inc();
}

#[cfg(feature = "metrics")]
pub fn record_signal_collapsed() {
    SIGNALS_COLLAPSED.inc();
}

#[cfg(feature = "metrics")]
pub fn record_signal_decoherent(reason: &str) {
    SIGNALS_DECOHERENT.with_label_values(&[reason]).inc();
}

#[cfg(feature = "metrics")]
pub fn record_signal_executed() {
    SIGNALS_EXECUTED.inc();
}

#[cfg(feature = "metrics")]
pub fn record_vote(checker: &str, forced: bool) {
    VOTES
        .with_label_values(&[checker, if forced { "true" } else { "false" }])
        .inc();
}

#[cfg(feature = "metrics")]
pub fn record_callback_failure() {
    CALLBACK_FAILURES.inc();
}

#[cfg(feature = "metrics")]
pub fn set_live_signals(count: usize) {
    LIVE_SIGNALS.set(count as i64);
}

// =============================================================================
// NO-OP IMPLEMENTATIONS (when metrics feature disabled)
// =============================================================================

#[cfg(not(feature = "metrics"))]
pub fn record_signal_created() {}

#[cfg(not(feature = "metrics"))]
pub fn record_signal_collapsed() {}

#[cfg(not(feature = "metrics"))]
pub fn record_signal_decoherent(_reason: &str) {}

#[cfg(not(feature = "metrics"))]
pub fn record_signal_executed() {}

#[cfg(not(feature = "metrics"))]
pub fn record_vote(_checker: &str, _forced: bool) {}

#[cfg(not(feature = "metrics"))]
pub fn record_callback_failure() {}

#[cfg(not(feature = "metrics"))]
pub fn set_live_signals(_count: usize) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_callable_in_any_build() {
        record_signal_created();
        record_signal_collapsed();
        record_signal_decoherent("expired");
        record_signal_executed();
        record_vote("risk_limits", true);
        record_callback_failure();
        set_live_signals(3);
    }
}
