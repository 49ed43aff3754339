//! # Gate Fan-Out Tests
//!
//! End-to-end behaviour through `QuorumGate`: failing checkers, fan-out
//! modes, execution callbacks, published events and the self-scheduled
//! stale sweep.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use quantum_gate::{
    ActionParams, Checker, CheckerError, CheckerId, CheckerVerdict, DecisionReason,
    ExecutionCallback, ExecutionError, ExecutionRequest, FanOutMode, FnExecutionCallback,
    GateConfig, GateEvent, InMemoryVoteRequestBus, ManualTimeSource, NoopVoteRequestPublisher,
    ProposalConfidenceChecker, QuorumGate, QuorumGateApi, RiskLimitChecker, SignalState,
};

// =============================================================================
// TEST CHECKERS
// =============================================================================

struct ScriptedChecker {
    id: String,
    verdict: Result<CheckerVerdict, CheckerError>,
    delay: Duration,
    calls: Arc<Mutex<Vec<String>>>,
}

impl ScriptedChecker {
    fn approving(id: &str, confidence: f64) -> Self {
        Self {
            id: id.to_string(),
            verdict: Ok(CheckerVerdict::approve(confidence)),
            delay: Duration::ZERO,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn failing(id: &str) -> Self {
        Self {
            verdict: Err(CheckerError::Unavailable {
                reason: format!("{id} model server down"),
            }),
            ..Self::approving(id, 1.0)
        }
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn recording(mut self, calls: &Arc<Mutex<Vec<String>>>) -> Self {
        self.calls = Arc::clone(calls);
        self
    }
}

#[async_trait]
impl Checker for ScriptedChecker {
    fn id(&self) -> CheckerId {
        CheckerId::new(self.id.clone())
    }

    async fn evaluate(&self, _params: &ActionParams) -> Result<CheckerVerdict, CheckerError> {
        self.calls.lock().push(self.id.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.verdict.clone()
    }
}

struct PanickingCallback;

#[async_trait]
impl ExecutionCallback for PanickingCallback {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn execute(&self, _request: &ExecutionRequest) -> Result<(), ExecutionError> {
        panic!("order router crashed");
    }
}

fn shared<C: Checker + 'static>(checker: C) -> Arc<dyn Checker> {
    Arc::new(checker)
}

fn config(fan_out: FanOutMode) -> GateConfig {
    GateConfig {
        fan_out,
        self_scheduled_sweep: false,
        ..GateConfig::default()
    }
}

fn gate_with(config: GateConfig, checkers: Vec<Arc<dyn Checker>>) -> QuorumGate {
    QuorumGate::new(
        config,
        checkers,
        Arc::new(NoopVoteRequestPublisher),
        Arc::new(ManualTimeSource::new(0)),
    )
    .unwrap()
}

fn order() -> ActionParams {
    ActionParams::new("BUY", "BTC-USD", "coinbase", 0.5, 64_000.0, 0.85)
}

fn counting_callback(name: &str, hits: &Arc<AtomicUsize>) -> Arc<dyn ExecutionCallback> {
    let hits = Arc::clone(hits);
    Arc::new(FnExecutionCallback::new(
        name,
        move |_: &ExecutionRequest| {
            hits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        },
    ))
}

// =============================================================================
// LIVENESS UNDER FAILURE
// =============================================================================

#[tokio::test]
async fn test_five_failed_checkers_are_forced_and_coherence_decides() {
    let mut checkers: Vec<Arc<dyn Checker>> = (0..5)
        .map(|i| shared(ScriptedChecker::failing(&format!("failing_{i}"))))
        .collect();
    checkers.push(shared(ScriptedChecker::approving("healthy", 0.9)));

    let gate = gate_with(config(FanOutMode::Concurrent), checkers);
    let executions = Arc::new(AtomicUsize::new(0));
    gate.register_execution_callback(counting_callback("count", &executions));

    let signal_id = gate.propose(order()).await.unwrap();
    let outcome = gate.outcome(&signal_id).unwrap();

    // Quorum completes on forced votes: 6/6 approve, coherence 0.5^5 * 0.9
    let expected = 0.5_f64.powi(5) * 0.9;
    assert!((outcome.coherence - expected).abs() < 1e-12);
    assert!(expected < 0.30);
    assert_eq!(outcome.total_votes, 6);
    assert_eq!(outcome.approvals, 6);
    assert_eq!(outcome.forced_votes, 5);
    assert_eq!(outcome.state, SignalState::Decoherent);
    assert_eq!(outcome.reason, DecisionReason::LowCoherence);
    assert_eq!(executions.load(Ordering::SeqCst), 0);

    let health = gate.health();
    assert_eq!(health.stats.forced_votes, 5);
    assert_eq!(
        health
            .checker(&CheckerId::from("failing_0"))
            .unwrap()
            .health
            .forced_votes,
        1
    );
}

#[tokio::test]
async fn test_single_forced_vote_can_still_collapse() {
    let gate = gate_with(
        config(FanOutMode::Concurrent),
        vec![
            shared(ScriptedChecker::failing("flaky")),
            shared(ScriptedChecker::approving("steady", 0.9)),
        ],
    );
    let executions = Arc::new(AtomicUsize::new(0));
    gate.register_execution_callback(counting_callback("count", &executions));

    let signal_id = gate.propose(order()).await.unwrap();
    let outcome = gate.outcome(&signal_id).unwrap();
    assert!(outcome.executed());
    assert!((outcome.coherence - 0.45).abs() < 1e-12);
    assert_eq!(executions.load(Ordering::SeqCst), 1);
}

// =============================================================================
// FAN-OUT MODES
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_concurrent_fan_out_overlaps_checkers() {
    let checkers: Vec<Arc<dyn Checker>> = (0..4)
        .map(|i| {
            shared(ScriptedChecker::approving(&format!("c{i}"), 0.95).slow(Duration::from_secs(1)))
        })
        .collect();
    let gate = gate_with(config(FanOutMode::Concurrent), checkers);

    let started = tokio::time::Instant::now();
    let signal_id = gate.propose(order()).await.unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed < Duration::from_secs(2), "took {elapsed:?}");
    assert!(gate.outcome(&signal_id).unwrap().executed());
}

#[tokio::test(start_paused = true)]
async fn test_sequential_fan_out_runs_checkers_in_order() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let checkers: Vec<Arc<dyn Checker>> = ["gamma", "alpha", "beta"]
        .into_iter()
        .map(|id| {
            shared(
                ScriptedChecker::approving(id, 0.95)
                    .slow(Duration::from_secs(1))
                    .recording(&calls),
            )
        })
        .collect();
    let gate = gate_with(config(FanOutMode::Sequential), checkers);

    let started = tokio::time::Instant::now();
    let signal_id = gate.propose(order()).await.unwrap();

    assert!(started.elapsed() >= Duration::from_secs(3));
    assert_eq!(*calls.lock(), vec!["alpha", "beta", "gamma"]);
    assert!(gate.outcome(&signal_id).unwrap().executed());
}

#[tokio::test(start_paused = true)]
async fn test_hanging_checker_times_out_into_forced_vote() {
    let config = GateConfig {
        checker_timeout: Duration::from_secs(2),
        ..config(FanOutMode::Concurrent)
    };
    let gate = gate_with(
        config,
        vec![
            shared(ScriptedChecker::approving("stuck", 1.0).slow(Duration::from_secs(3600))),
            shared(ScriptedChecker::approving("quick", 0.8)),
        ],
    );

    let started = tokio::time::Instant::now();
    let signal_id = gate.propose(order()).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(3));

    let outcome = gate.outcome(&signal_id).unwrap();
    assert_eq!(outcome.forced_votes, 1);
    assert!((outcome.coherence - 0.4).abs() < 1e-12);
    assert!(outcome.executed());
}

#[tokio::test]
async fn test_degraded_quorum_only_asks_selected_checkers() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let gate = gate_with(
        config(FanOutMode::Concurrent),
        vec![
            shared(ScriptedChecker::approving("risk", 0.9).recording(&calls)),
            shared(ScriptedChecker::approving("forecast", 0.9).recording(&calls)),
            shared(ScriptedChecker::approving("pattern", 0.9).recording(&calls)),
        ],
    );

    let subset: BTreeSet<CheckerId> = ["risk", "pattern"].into_iter().map(CheckerId::from).collect();
    let signal_id = gate.propose_with_quorum(order(), subset).await.unwrap();

    let mut asked = calls.lock().clone();
    asked.sort();
    assert_eq!(asked, vec!["pattern", "risk"]);
    assert_eq!(gate.outcome(&signal_id).unwrap().total_votes, 2);
}

// =============================================================================
// EXECUTION CALLBACKS
// =============================================================================

#[tokio::test]
async fn test_callback_failures_are_isolated() {
    let gate = gate_with(
        config(FanOutMode::Concurrent),
        vec![shared(ScriptedChecker::approving("only", 0.9))],
    );

    let hits = Arc::new(AtomicUsize::new(0));
    gate.register_execution_callback(Arc::new(FnExecutionCallback::new(
        "rejecting",
        |_: &ExecutionRequest| {
            Err(ExecutionError::Rejected {
                reason: "venue closed".into(),
            })
        },
    )));
    gate.register_execution_callback(Arc::new(PanickingCallback));
    gate.register_execution_callback(counting_callback("survivor", &hits));

    let signal_id = gate.propose(order()).await.unwrap();

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert!(gate.outcome(&signal_id).unwrap().executed());
    let stats = gate.stats();
    assert_eq!(stats.callback_failures, 2);
    assert_eq!(stats.signals_executed, 1);
    assert_eq!(stats.execution_rate, 1.0);
}

#[tokio::test]
async fn test_callback_receives_ledger() {
    let gate = gate_with(
        config(FanOutMode::Concurrent),
        vec![
            shared(ScriptedChecker::approving("a", 0.9)),
            shared(ScriptedChecker::failing("b")),
        ],
    );

    let seen = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&seen);
    gate.register_execution_callback(Arc::new(FnExecutionCallback::new(
        "capture",
        move |request: &ExecutionRequest| {
            *slot.lock() = Some(request.clone());
            Ok(())
        },
    )));

    let signal_id = gate.propose(order()).await.unwrap();
    let request = seen.lock().clone().unwrap();
    assert_eq!(request.signal_id, signal_id);
    assert_eq!(request.votes.len(), 2);
    assert_eq!(request.forced_votes(), 1);
    assert_eq!(request.params, order());
}

// =============================================================================
// EVENTS
// =============================================================================

#[tokio::test]
async fn test_events_published_for_request_and_decision() {
    let bus = Arc::new(InMemoryVoteRequestBus::new());
    let mut rx = bus.subscribe();
    let gate = QuorumGate::new(
        config(FanOutMode::Concurrent),
        vec![
            shared(RiskLimitChecker::default()),
            shared(ProposalConfidenceChecker::new(0.6)),
        ],
        bus.clone(),
        Arc::new(ManualTimeSource::new(5_000)),
    )
    .unwrap();

    let signal_id = gate.propose(order()).await.unwrap();

    match rx.recv().await.unwrap() {
        GateEvent::VoteRequested(e) => {
            assert_eq!(e.signal_id, signal_id);
            assert_eq!(e.created_at, 5_000);
            assert_eq!(e.expires_at, 35_000);
            assert_eq!(e.required_checkers.len(), 2);
        }
        other => panic!("unexpected event {other:?}"),
    }
    match rx.recv().await.unwrap() {
        GateEvent::SignalDecided(e) => {
            assert_eq!(e.outcome.signal_id, signal_id);
            assert_eq!(e.outcome.state, SignalState::Executed);
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(bus.events_published(), 2);
}

// =============================================================================
// REFERENCE CHECKERS
// =============================================================================

#[tokio::test]
async fn test_reference_checkers_gate_orders() {
    let gate = gate_with(
        config(FanOutMode::Concurrent),
        vec![
            shared(RiskLimitChecker::default()),
            shared(ProposalConfidenceChecker::new(0.6)),
        ],
    );

    let approved = gate.propose(order()).await.unwrap();
    assert!(gate.outcome(&approved).unwrap().executed());

    let oversized = gate
        .propose(ActionParams::new("BUY", "BTC-USD", "binance", 5.0, 64_000.0, 0.9))
        .await
        .unwrap();
    assert_eq!(
        gate.outcome(&oversized).unwrap().reason,
        DecisionReason::NoMajority
    );

    let near_limit = gate
        .propose(ActionParams::new("BUY", "BTC-USD", "coinbase", 3.5, 64_000.0, 0.65))
        .await
        .unwrap();
    assert_eq!(
        gate.outcome(&near_limit).unwrap().reason,
        DecisionReason::LowCoherence
    );

    assert!(gate
        .propose(ActionParams::new("BUY", "", "coinbase", 1.0, 1.0, 0.9))
        .await
        .is_err());

    let stats = gate.stats();
    assert_eq!(stats.signals_created, 3);
    assert_eq!(stats.signals_executed, 1);
    assert_eq!(stats.signals_decoherent, 2);
}

// =============================================================================
// SELF-SCHEDULED SWEEP
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_self_scheduled_sweep_expires_abandoned_signal() {
    let clock = Arc::new(ManualTimeSource::new(0));
    let gate = QuorumGate::new(
        GateConfig::default(),
        vec![shared(ScriptedChecker::approving("inline", 0.9))],
        Arc::new(NoopVoteRequestPublisher),
        clock.clone(),
    )
    .unwrap();
    assert!(gate.registry().sweeper_running());

    // A signal waiting on an out-of-band checker that never reports
    let required: BTreeSet<CheckerId> = [CheckerId::from("external")].into_iter().collect();
    let signal_id = gate
        .registry()
        .create_with_quorum(order(), required)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(gate.live_signal(&signal_id).is_some());

    clock.advance(Duration::from_secs(31));
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert!(gate.live_signal(&signal_id).is_none());
    assert_eq!(
        gate.outcome(&signal_id).unwrap().reason,
        DecisionReason::Expired
    );
    assert_eq!(gate.stats().signals_expired, 1);
}
