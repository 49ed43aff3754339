//! # Health and Stats
//!
//! Read-only view over registry activity for external monitoring.
//!
//! Aggregate counters are atomics and per-checker entries sit behind their
//! own lock, so snapshots never contend with the registry's decision lock and
//! may be momentarily stale. Nothing in here is read by the decision logic.

use crate::domain::{CheckerId, DecisionReason, Timestamp};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Vote history of one checker
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckerHealth {
    pub last_vote_time: Option<Timestamp>,
    pub total_votes: u64,
    pub approvals: u64,
    pub rejections: u64,
    /// Forced fallback votes substituted for this checker
    pub forced_votes: u64,
    /// Votes that overwrote an earlier vote on the same signal
    pub revotes: u64,
}

impl CheckerHealth {
    /// `approvals / total_votes`, 0 before the first vote.
    pub fn approval_rate(&self) -> f64 {
        ratio(self.approvals, self.total_votes)
    }

    /// Milliseconds since the last vote, `None` if it never voted.
    pub fn staleness(&self, now: Timestamp) -> Option<u64> {
        self.last_vote_time.map(|t| now.saturating_sub(t))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckerStatus {
    Healthy,
    /// Last vote is older than `checker_stale_after`
    Stale,
    /// Never voted
    Silent,
}

/// Per-checker entry of a `HealthReport`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckerHealthView {
    pub checker_id: CheckerId,
    #[serde(flatten)]
    pub health: CheckerHealth,
    pub approval_rate: f64,
    pub staleness_ms: Option<u64>,
    pub status: CheckerStatus,
}

/// Aggregate counters
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GateStats {
    pub signals_created: u64,
    pub signals_collapsed: u64,
    pub signals_decoherent: u64,
    /// Subset of `signals_decoherent` removed by the stale sweep
    pub signals_expired: u64,
    pub signals_executed: u64,
    pub total_votes_received: u64,
    pub forced_votes: u64,
    pub late_votes_ignored: u64,
    pub callback_failures: u64,
    pub live_signals: usize,
    pub execution_rate: f64,
    pub coherence_rate: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub generated_at: Timestamp,
    pub checkers: Vec<CheckerHealthView>,
    pub stats: GateStats,
}

impl HealthReport {
    pub fn checker(&self, checker_id: &CheckerId) -> Option<&CheckerHealthView> {
        self.checkers.iter().find(|c| &c.checker_id == checker_id)
    }
}

#[derive(Debug, Default)]
struct Counters {
    signals_created: AtomicU64,
    signals_collapsed: AtomicU64,
    signals_decoherent: AtomicU64,
    signals_expired: AtomicU64,
    signals_executed: AtomicU64,
    total_votes_received: AtomicU64,
    forced_votes: AtomicU64,
    late_votes_ignored: AtomicU64,
    callback_failures: AtomicU64,
}

/// Collects counters as the registry works
#[derive(Debug)]
pub struct HealthTracker {
    counters: Counters,
    checkers: RwLock<BTreeMap<CheckerId, CheckerHealth>>,
    stale_after_ms: u64,
}

impl HealthTracker {
    pub fn new(stale_after_ms: u64) -> Self {
        Self {
            counters: Counters::default(),
            checkers: RwLock::new(BTreeMap::new()),
            stale_after_ms,
        }
    }

    /// Make a checker visible in reports before its first vote.
    pub fn register_checker(&self, checker_id: &CheckerId) {
        self.checkers.write().entry(checker_id.clone()).or_default();
    }

    pub fn record_created(&self) {
        self.counters.signals_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_vote(
        &self,
        checker_id: &CheckerId,
        approved: bool,
        forced: bool,
        revote: bool,
        now: Timestamp,
    ) {
        self.counters
            .total_votes_received
            .fetch_add(1, Ordering::Relaxed);
        if forced {
            self.counters.forced_votes.fetch_add(1, Ordering::Relaxed);
        }

        let mut checkers = self.checkers.write();
        let entry = checkers.entry(checker_id.clone()).or_default();
        entry.last_vote_time = Some(now);
        entry.total_votes += 1;
        if approved {
            entry.approvals += 1;
        } else {
            entry.rejections += 1;
        }
        if forced {
            entry.forced_votes += 1;
        }
        if revote {
            entry.revotes += 1;
        }
    }

    pub fn record_late_vote(&self) {
        self.counters
            .late_votes_ignored
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_collapsed(&self) {
        self.counters
            .signals_collapsed
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decoherent(&self, reason: DecisionReason) {
        self.counters
            .signals_decoherent
            .fetch_add(1, Ordering::Relaxed);
        if reason == DecisionReason::Expired {
            self.counters.signals_expired.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_executed(&self) {
        self.counters.signals_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_callback_failure(&self) {
        self.counters
            .callback_failures
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn checker(&self, checker_id: &CheckerId) -> Option<CheckerHealth> {
        self.checkers.read().get(checker_id).cloned()
    }

    pub fn stats(&self, live_signals: usize) -> GateStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        let created = load(&self.counters.signals_created);
        let collapsed = load(&self.counters.signals_collapsed);
        let executed = load(&self.counters.signals_executed);

        GateStats {
            signals_created: created,
            signals_collapsed: collapsed,
            signals_decoherent: load(&self.counters.signals_decoherent),
            signals_expired: load(&self.counters.signals_expired),
            signals_executed: executed,
            total_votes_received: load(&self.counters.total_votes_received),
            forced_votes: load(&self.counters.forced_votes),
            late_votes_ignored: load(&self.counters.late_votes_ignored),
            callback_failures: load(&self.counters.callback_failures),
            live_signals,
            execution_rate: ratio(executed, created),
            coherence_rate: ratio(collapsed, created),
        }
    }

    pub fn report(&self, now: Timestamp, live_signals: usize) -> HealthReport {
        let checkers = self
            .checkers
            .read()
            .iter()
            .map(|(checker_id, health)| {
                let staleness_ms = health.staleness(now);
                let status = match staleness_ms {
                    None => CheckerStatus::Silent,
                    Some(ms) if ms > self.stale_after_ms => CheckerStatus::Stale,
                    Some(_) => CheckerStatus::Healthy,
                };
                CheckerHealthView {
                    checker_id: checker_id.clone(),
                    approval_rate: health.approval_rate(),
                    staleness_ms,
                    status,
                    health: health.clone(),
                }
            })
            .collect();

        HealthReport {
            generated_at: now,
            checkers,
            stats: self.stats(live_signals),
        }
    }
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checker_rates() {
        let tracker = HealthTracker::new(1_000);
        let checker = CheckerId::from("forecast_probability");

        tracker.record_vote(&checker, true, false, false, 100);
        tracker.record_vote(&checker, true, true, false, 200);
        tracker.record_vote(&checker, false, false, true, 300);

        let health = tracker.checker(&checker).unwrap();
        assert_eq!(health.total_votes, 3);
        assert_eq!(health.approvals, 2);
        assert_eq!(health.rejections, 1);
        assert_eq!(health.forced_votes, 1);
        assert_eq!(health.revotes, 1);
        assert!((health.approval_rate() - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(health.staleness(1_300), Some(1_000));
    }

    #[test]
    fn test_report_statuses() {
        let tracker = HealthTracker::new(1_000);
        let silent = CheckerId::from("geometric_analysis");
        let fresh = CheckerId::from("risk_limits");
        let stale = CheckerId::from("network_consensus");

        tracker.register_checker(&silent);
        tracker.record_vote(&fresh, true, false, false, 9_500);
        tracker.record_vote(&stale, true, false, false, 5_000);

        let report = tracker.report(10_000, 0);
        assert_eq!(report.checker(&silent).unwrap().status, CheckerStatus::Silent);
        assert_eq!(report.checker(&fresh).unwrap().status, CheckerStatus::Healthy);
        assert_eq!(report.checker(&stale).unwrap().status, CheckerStatus::Stale);
        assert_eq!(report.checker(&silent).unwrap().approval_rate, 0.0);
    }

    #[test]
    fn test_aggregate_rates() {
        let tracker = HealthTracker::new(1_000);
        for _ in 0..4 {
            tracker.record_created();
        }
        tracker.record_collapsed();
        tracker.record_executed();
        tracker.record_decoherent(DecisionReason::NoMajority);
        tracker.record_decoherent(DecisionReason::Expired);

        let stats = tracker.stats(1);
        assert_eq!(stats.signals_created, 4);
        assert_eq!(stats.signals_decoherent, 2);
        assert_eq!(stats.signals_expired, 1);
        assert_eq!(stats.execution_rate, 0.25);
        assert_eq!(stats.coherence_rate, 0.25);
        assert_eq!(stats.live_signals, 1);
    }

    #[test]
    fn test_empty_stats_have_zero_rates() {
        let stats = HealthTracker::new(1_000).stats(0);
        assert_eq!(stats.execution_rate, 0.0);
        assert_eq!(stats.coherence_rate, 0.0);
    }
}
