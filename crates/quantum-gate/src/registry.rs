//! # Quorum Registry
//!
//! The protocol engine. Owns the live signal map, the default required
//! checker set, the stale-sweep timeout and the mutation lock.
//!
//! ## Concurrency
//!
//! Every mutation of a signal (ledger, coherence, state) happens inside one
//! coarse `parking_lot::Mutex`. A signal is removed from the live map in the
//! same critical section that decides it, so exactly one caller ever observes
//! a given collapse and only that caller dispatches execution. Callbacks and
//! event publishing run after the lock is released, on a detached task the
//! caller awaits. Dropping the caller does not cancel settlement, so a
//! collapsed signal always reaches `Executed`.
//!
//! A collapsed signal is recorded in the outcome history as `Collapsed` while
//! its callbacks run and is updated in place once they finish.
//!
//! ## Stale Sweep
//!
//! ```text
//! [SUPERPOSITION] ──age > max_signal_age──→ [DECOHERENT] (removed, missing checkers logged)
//! ```
//!
//! `sweep_stale` is public for external schedulers; `start_sweeper` runs it on
//! `sweep_interval` from a tokio task that only holds a `Weak` reference.

use crate::config::GateConfig;
use crate::dispatch::{panic_message, ExecutionDispatcher};
use crate::domain::{
    sanitize_confidence, ActionParams, CheckerId, CollapseDecision, CollapseRule,
    DecisionReason, Signal, SignalId, SignalOutcome, SignalState, Timestamp, Vote,
};
use crate::error::{GateError, GateResult};
use crate::events::{GateEvent, SignalDecidedEvent, VoteRequestedEvent};
use crate::health::{GateStats, HealthReport, HealthTracker};
use crate::metrics;
use crate::ports::outbound::{ExecutionRequest, TimeSource, VoteRequestPublisher};
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Mutable registry state, only touched under the lock
struct RegistryState {
    live: HashMap<SignalId, Signal>,
    outcomes: VecDeque<SignalOutcome>,
}

/// What applying a vote did
enum VoteApplication {
    /// Signal unknown or already terminal
    Ignored,
    /// Vote recorded, quorum still incomplete
    Pending { snapshot: Signal, revote: bool },
    /// Vote completed the quorum and the signal left the live map
    Decided {
        signal: Signal,
        decision: CollapseDecision,
        revote: bool,
        live: usize,
    },
}

/// Running sweeper task
struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
        self.task.abort();
    }
}

/// The quorum protocol engine
pub struct QuorumRegistry {
    config: GateConfig,
    rule: CollapseRule,
    default_required: BTreeSet<CheckerId>,
    state: Arc<Mutex<RegistryState>>,
    health: Arc<HealthTracker>,
    dispatcher: Arc<ExecutionDispatcher>,
    publisher: Arc<dyn VoteRequestPublisher>,
    clock: Arc<dyn TimeSource>,
    sweeper: Mutex<Option<SweeperHandle>>,
}

impl QuorumRegistry {
    pub fn new(
        config: GateConfig,
        default_required: BTreeSet<CheckerId>,
        dispatcher: Arc<ExecutionDispatcher>,
        publisher: Arc<dyn VoteRequestPublisher>,
        clock: Arc<dyn TimeSource>,
    ) -> Self {
        let stale_after_ms =
            u64::try_from(config.checker_stale_after.as_millis()).unwrap_or(u64::MAX);
        let health = Arc::new(HealthTracker::new(stale_after_ms));
        for checker in &default_required {
            health.register_checker(checker);
        }

        Self {
            rule: CollapseRule::new(config.coherence_threshold),
            config,
            default_required,
            state: Arc::new(Mutex::new(RegistryState {
                live: HashMap::new(),
                outcomes: VecDeque::new(),
            })),
            health,
            dispatcher,
            publisher,
            clock,
            sweeper: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn default_required(&self) -> &BTreeSet<CheckerId> {
        &self.default_required
    }

    pub fn dispatcher(&self) -> &Arc<ExecutionDispatcher> {
        &self.dispatcher
    }

    // =========================================================================
    // PROTOCOL OPERATIONS
    // =========================================================================

    /// Create a signal requiring the default checker set.
    pub async fn create(&self, params: ActionParams) -> GateResult<SignalId> {
        self.create_with_quorum(params, self.default_required.clone())
            .await
    }

    /// Create a signal requiring `required`.
    ///
    /// Publishes a `VoteRequested` event afterwards; publish failures are
    /// logged and swallowed.
    pub async fn create_with_quorum(
        &self,
        params: ActionParams,
        required: BTreeSet<CheckerId>,
    ) -> GateResult<SignalId> {
        params.validate()?;
        if required.is_empty() {
            return Err(GateError::EmptyQuorum);
        }

        let now = self.clock.now();
        let signal = Signal::new(params, required, now);
        let signal_id = signal.id;
        let event = VoteRequestedEvent {
            signal_id,
            params: signal.params.clone(),
            required_checkers: signal.required_checkers.clone(),
            created_at: now,
            expires_at: now.saturating_add(self.config.max_signal_age_ms()),
        };

        let live = {
            let mut state = self.state.lock();
            if state.live.len() >= self.config.max_live_signals {
                return Err(GateError::CapacityExceeded {
                    live: state.live.len(),
                    limit: self.config.max_live_signals,
                });
            }
            state.live.insert(signal_id, signal);
            state.live.len()
        };

        self.health.record_created();
        metrics::record_signal_created();
        metrics::set_live_signals(live);
        info!(
            %signal_id,
            action = %event.params.action,
            asset = %event.params.asset,
            required = event.required_checkers.len(),
            "[gate] Signal created in superposition"
        );

        self.publish(GateEvent::VoteRequested(event)).await;
        Ok(signal_id)
    }

    /// Record a vote.
    ///
    /// Returns `None` for unknown or already-terminal signals (late vote,
    /// ignored). Otherwise returns the signal as it stands after the vote,
    /// which is terminal when this vote completed the quorum.
    pub async fn check_in(
        &self,
        signal_id: SignalId,
        checker_id: CheckerId,
        approved: bool,
        confidence: f64,
        auxiliary: Option<serde_json::Value>,
    ) -> Option<Signal> {
        self.record(signal_id, checker_id, approved, confidence, auxiliary, false)
            .await
    }

    /// Optimistic stand-in vote for an unavailable checker, using
    /// `forced_confidence`.
    ///
    /// Keeps the quorum completable while a collaborator is down, at the cost
    /// of assuming approval. The vote is tagged `forced` in the ledger,
    /// in health stats and in metrics.
    pub async fn force_check_in(
        &self,
        signal_id: SignalId,
        checker_id: CheckerId,
        reason: &str,
    ) -> Option<Signal> {
        self.force_check_in_with_confidence(
            signal_id,
            checker_id,
            self.config.forced_confidence,
            reason,
        )
        .await
    }

    pub async fn force_check_in_with_confidence(
        &self,
        signal_id: SignalId,
        checker_id: CheckerId,
        confidence: f64,
        reason: &str,
    ) -> Option<Signal> {
        warn!(
            %signal_id,
            checker = %checker_id,
            confidence,
            reason,
            "[gate] Forced check-in substituted for unavailable checker"
        );
        let auxiliary = json!({ "forced": true, "reason": reason });
        self.record(signal_id, checker_id, true, confidence, Some(auxiliary), true)
            .await
    }

    /// Expire every live signal older than `max_signal_age`.
    ///
    /// Returns how many were expired.
    pub async fn sweep_stale(&self) -> usize {
        let now = self.clock.now();
        let (expired, live) = self.expire_stale(now);

        if expired.is_empty() {
            return 0;
        }

        metrics::set_live_signals(live);
        for outcome in &expired {
            self.health.record_decoherent(DecisionReason::Expired);
            metrics::record_signal_decoherent("expired");
            let missing: Vec<&str> = outcome
                .missing_checkers
                .iter()
                .map(CheckerId::as_str)
                .collect();
            warn!(
                signal_id = %outcome.signal_id,
                votes = outcome.total_votes,
                missing = ?missing,
                "[gate] Stale signal decohered before quorum"
            );
        }

        let count = expired.len();
        for outcome in expired {
            self.publish(GateEvent::SignalDecided(SignalDecidedEvent { outcome }))
                .await;
        }
        count
    }

    // =========================================================================
    // SWEEPER
    // =========================================================================

    /// Run `sweep_stale` every `sweep_interval` on the current tokio runtime.
    ///
    /// Returns `false` when already running or when called outside a runtime.
    pub fn start_sweeper(self: &Arc<Self>) -> bool {
        let mut slot = self.sweeper.lock();
        if slot.is_some() {
            return false;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("[gate] No tokio runtime; stale sweep must be driven by the caller");
                return false;
            }
        };

        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self.config.sweep_interval;
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let task = runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let Some(registry) = weak.upgrade() else {
                            break;
                        };
                        let sweep = AssertUnwindSafe(registry.sweep_stale()).catch_unwind();
                        if let Err(panic) = sweep.await {
                            warn!(
                                panic = %panic_message(panic.as_ref()),
                                "[gate] Stale sweep panicked; retrying next tick"
                            );
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
            debug!("[gate] Stale sweeper stopped");
        });

        info!(interval = ?period, "[gate] Stale sweeper started");
        *slot = Some(SweeperHandle { shutdown, task });
        true
    }

    /// Stop the sweeper. Returns `false` if it was not running.
    pub fn stop_sweeper(&self) -> bool {
        self.sweeper.lock().take().is_some()
    }

    pub fn sweeper_running(&self) -> bool {
        self.sweeper
            .lock()
            .as_ref()
            .map(|handle| !handle.task.is_finished())
            .unwrap_or(false)
    }

    // =========================================================================
    // READ-ONLY VIEWS
    // =========================================================================

    pub fn live_signal(&self, signal_id: &SignalId) -> Option<Signal> {
        self.state.lock().live.get(signal_id).cloned()
    }

    pub fn live_count(&self) -> usize {
        self.state.lock().live.len()
    }

    pub fn outcome(&self, signal_id: &SignalId) -> Option<SignalOutcome> {
        self.state
            .lock()
            .outcomes
            .iter()
            .rev()
            .find(|o| &o.signal_id == signal_id)
            .cloned()
    }

    /// Retained outcomes, oldest first.
    pub fn recent_outcomes(&self) -> Vec<SignalOutcome> {
        self.state.lock().outcomes.iter().cloned().collect()
    }

    pub fn stats(&self) -> GateStats {
        self.health.stats(self.live_count())
    }

    pub fn health(&self) -> HealthReport {
        self.health.report(self.clock.now(), self.live_count())
    }

    pub fn health_tracker(&self) -> &HealthTracker {
        &self.health
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    async fn record(
        &self,
        signal_id: SignalId,
        checker_id: CheckerId,
        approved: bool,
        confidence: f64,
        auxiliary: Option<serde_json::Value>,
        forced: bool,
    ) -> Option<Signal> {
        let (confidence, adjusted) = sanitize_confidence(confidence);
        if adjusted {
            warn!(
                %signal_id,
                checker = %checker_id,
                confidence,
                "[gate] Confidence outside [0, 1] clamped"
            );
        }

        let now = self.clock.now();
        let vote = Vote {
            approved,
            confidence,
            timestamp: now,
            auxiliary,
            forced,
        };

        match self.apply_vote(signal_id, &checker_id, vote) {
            VoteApplication::Ignored => {
                self.health.record_late_vote();
                debug!(
                    %signal_id,
                    checker = %checker_id,
                    "Vote for unknown or terminal signal ignored"
                );
                None
            }
            VoteApplication::Pending { snapshot, revote } => {
                self.note_vote(&snapshot, &checker_id, approved, forced, revote, now);
                Some(snapshot)
            }
            VoteApplication::Decided {
                signal,
                decision,
                revote,
                live,
            } => {
                self.note_vote(&signal, &checker_id, approved, forced, revote, now);
                metrics::set_live_signals(live);
                Some(self.finish(signal, decision, now).await)
            }
        }
    }

    /// The critical section: ledger write, coherence update, collapse.
    fn apply_vote(&self, signal_id: SignalId, checker_id: &CheckerId, vote: Vote) -> VoteApplication {
        let mut state = self.state.lock();

        let (revote, decision) = match state.live.get_mut(&signal_id) {
            None => return VoteApplication::Ignored,
            Some(signal) => {
                let revote = signal.record_vote(checker_id.clone(), vote);
                if !signal.quorum_complete() {
                    return VoteApplication::Pending {
                        snapshot: signal.clone(),
                        revote,
                    };
                }
                signal.state = SignalState::Collapsing;
                (revote, self.rule.decide_signal(signal))
            }
        };

        let Some(mut signal) = state.live.remove(&signal_id) else {
            return VoteApplication::Ignored;
        };
        signal.state = decision.state;

        // Collapsed entries are updated to Executed once settlement finishes
        let outcome = SignalOutcome::from_signal(&signal, decision.reason, self.clock.now());
        push_outcome(&mut state.outcomes, outcome, self.config.outcome_history);

        VoteApplication::Decided {
            signal,
            decision,
            revote,
            live: state.live.len(),
        }
    }

    fn note_vote(
        &self,
        signal: &Signal,
        checker_id: &CheckerId,
        approved: bool,
        forced: bool,
        revote: bool,
        now: Timestamp,
    ) {
        self.health
            .record_vote(checker_id, approved, forced, revote, now);
        metrics::record_vote(checker_id.as_str(), forced);

        if revote {
            // Ledger keeps the last vote but coherence has now folded in both
            warn!(
                signal_id = %signal.id,
                checker = %checker_id,
                coherence = signal.coherence,
                "[gate] Checker voted twice; coherence counts both votes"
            );
        }
        if !signal.required_checkers.contains(checker_id) {
            debug!(
                signal_id = %signal.id,
                checker = %checker_id,
                "Vote from checker outside the required set"
            );
        }
        debug!(
            signal_id = %signal.id,
            checker = %checker_id,
            approved,
            forced,
            coherence = signal.coherence,
            votes = signal.total_votes(),
            required = signal.required_checkers.len(),
            "Vote recorded"
        );
    }

    /// Post-lock handling of a decided signal. Only ever reached by the
    /// caller whose vote removed the signal from the live map.
    ///
    /// Runs on its own task so cancelling the caller cannot strand the signal
    /// between `Collapsed` and `Executed`.
    async fn finish(&self, signal: Signal, decision: CollapseDecision, now: Timestamp) -> Signal {
        let settlement = self.settlement();
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => return settlement.settle(signal, decision, now).await,
        };

        let fallback = signal.clone();
        match runtime.spawn(settlement.settle(signal, decision, now)).await {
            Ok(settled) => settled,
            Err(e) => {
                warn!(
                    signal_id = %fallback.id,
                    error = %e,
                    "[gate] Settlement task did not complete"
                );
                fallback
            }
        }
    }

    fn settlement(&self) -> Settlement {
        Settlement {
            state: Arc::clone(&self.state),
            health: Arc::clone(&self.health),
            dispatcher: Arc::clone(&self.dispatcher),
            publisher: Arc::clone(&self.publisher),
            clock: Arc::clone(&self.clock),
            outcome_history: self.config.outcome_history,
        }
    }

    /// Remove expired signals under the lock.
    fn expire_stale(&self, now: Timestamp) -> (Vec<SignalOutcome>, usize) {
        let max_age_ms = self.config.max_signal_age_ms();
        let mut state = self.state.lock();

        let expired_ids: Vec<SignalId> = state
            .live
            .iter()
            .filter(|(_, signal)| {
                signal.state == SignalState::Superposition && signal.is_expired(now, max_age_ms)
            })
            .map(|(id, _)| *id)
            .collect();

        let mut expired = Vec::with_capacity(expired_ids.len());
        for signal_id in expired_ids {
            if let Some(mut signal) = state.live.remove(&signal_id) {
                signal.state = SignalState::Decoherent;
                let outcome = SignalOutcome::from_signal(&signal, DecisionReason::Expired, now);
                push_outcome(&mut state.outcomes, outcome.clone(), self.config.outcome_history);
                expired.push(outcome);
            }
        }

        (expired, state.live.len())
    }

    async fn publish(&self, event: GateEvent) {
        publish_event(self.publisher.as_ref(), event).await;
    }
}

/// Owned handles for settling a decided signal off the caller's task
struct Settlement {
    state: Arc<Mutex<RegistryState>>,
    health: Arc<HealthTracker>,
    dispatcher: Arc<ExecutionDispatcher>,
    publisher: Arc<dyn VoteRequestPublisher>,
    clock: Arc<dyn TimeSource>,
    outcome_history: usize,
}

impl Settlement {
    async fn settle(self, mut signal: Signal, decision: CollapseDecision, now: Timestamp) -> Signal {
        match decision.state {
            SignalState::Collapsed => {
                self.health.record_collapsed();
                metrics::record_signal_collapsed();
                info!(
                    signal_id = %signal.id,
                    approvals = decision.approvals,
                    total = decision.total,
                    coherence = decision.coherence,
                    "[gate] Signal collapsed; dispatching execution"
                );

                let request = ExecutionRequest {
                    signal_id: signal.id,
                    params: signal.params.clone(),
                    coherence: signal.coherence,
                    votes: signal.votes.clone(),
                    collapsed_at: now,
                };
                let report = self.dispatcher.dispatch(&request).await;
                for _ in 0..report.failed {
                    self.health.record_callback_failure();
                    metrics::record_callback_failure();
                }

                signal.state = SignalState::Executed;
                self.health.record_executed();
                metrics::record_signal_executed();
                info!(
                    signal_id = %signal.id,
                    callbacks = report.invoked,
                    failed = report.failed,
                    "[gate] Signal executed"
                );

                let outcome =
                    SignalOutcome::from_signal(&signal, DecisionReason::Approved, self.clock.now());
                replace_outcome(
                    &mut self.state.lock().outcomes,
                    outcome.clone(),
                    self.outcome_history,
                );
                let event = GateEvent::SignalDecided(SignalDecidedEvent { outcome });
                publish_event(self.publisher.as_ref(), event).await;
            }
            _ => {
                self.health.record_decoherent(decision.reason);
                metrics::record_signal_decoherent(reason_label(decision.reason));
                info!(
                    signal_id = %signal.id,
                    reason = reason_label(decision.reason),
                    approvals = decision.approvals,
                    total = decision.total,
                    coherence = decision.coherence,
                    "[gate] Signal decohered"
                );

                let outcome = SignalOutcome::from_signal(&signal, decision.reason, now);
                let event = GateEvent::SignalDecided(SignalDecidedEvent { outcome });
                publish_event(self.publisher.as_ref(), event).await;
            }
        }
        signal
    }
}

/// Best-effort broadcast. Errors and panics from the publisher are logged.
async fn publish_event(publisher: &dyn VoteRequestPublisher, event: GateEvent) {
    let kind = event.kind();
    let signal_id = event.signal_id();
    match AssertUnwindSafe(publisher.publish(event)).catch_unwind().await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => {
            warn!(kind, %signal_id, error = %e, "[gate] Event publish failed (ignored)");
        }
        Err(panic) => {
            warn!(
                kind,
                %signal_id,
                panic = %panic_message(panic.as_ref()),
                "[gate] Event publisher panicked (ignored)"
            );
        }
    }
}

fn push_outcome(outcomes: &mut VecDeque<SignalOutcome>, outcome: SignalOutcome, capacity: usize) {
    if capacity == 0 {
        return;
    }
    while outcomes.len() >= capacity {
        outcomes.pop_front();
    }
    outcomes.push_back(outcome);
}

/// Overwrite the entry for the same signal, or append if it was evicted.
fn replace_outcome(outcomes: &mut VecDeque<SignalOutcome>, outcome: SignalOutcome, capacity: usize) {
    match outcomes
        .iter_mut()
        .rev()
        .find(|o| o.signal_id == outcome.signal_id)
    {
        Some(slot) => *slot = outcome,
        None => push_outcome(outcomes, outcome, capacity),
    }
}

fn reason_label(reason: DecisionReason) -> &'static str {
    match reason {
        DecisionReason::Approved => "approved",
        DecisionReason::NoMajority => "no_majority",
        DecisionReason::LowCoherence => "low_coherence",
        DecisionReason::Expired => "expired",
    }
}
