//! Quorum Gate Service
//!
//! Orchestrates the registry and the checker adapters: a proposal creates a
//! signal and is fanned out to every required checker, one vote each.

use crate::adapters::{CheckerAdapter, NoopVoteRequestPublisher, SystemTimeSource};
use crate::config::{FanOutMode, GateConfig};
use crate::dispatch::ExecutionDispatcher;
use crate::domain::{ActionParams, CheckerId, Signal, SignalId, SignalOutcome};
use crate::error::{GateError, GateResult};
use crate::health::{GateStats, HealthReport};
use crate::ports::inbound::QuorumGateApi;
use crate::ports::outbound::{Checker, ExecutionCallback, TimeSource, VoteRequestPublisher};
use crate::registry::QuorumRegistry;
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, error, info};

/// The Quorum Gate
pub struct QuorumGate {
    registry: Arc<QuorumRegistry>,
    adapters: BTreeMap<CheckerId, Arc<CheckerAdapter>>,
    fan_out: FanOutMode,
}

impl QuorumGate {
    /// Build a gate over `checkers`. Every checker is required by default.
    ///
    /// Starts the stale sweeper when `self_scheduled_sweep` is set and a tokio
    /// runtime is running.
    pub fn new(
        config: GateConfig,
        checkers: Vec<Arc<dyn Checker>>,
        publisher: Arc<dyn VoteRequestPublisher>,
        time_source: Arc<dyn TimeSource>,
    ) -> GateResult<Self> {
        config.validate()?;
        if checkers.is_empty() {
            return Err(GateError::EmptyQuorum);
        }

        let mut required = BTreeSet::new();
        for checker in &checkers {
            let id = checker.id();
            if !required.insert(id.clone()) {
                return Err(GateError::DuplicateChecker {
                    checker_id: id.to_string(),
                });
            }
        }

        let fan_out = config.fan_out;
        let self_scheduled = config.self_scheduled_sweep;
        let registry = Arc::new(QuorumRegistry::new(
            config,
            required,
            Arc::new(ExecutionDispatcher::new()),
            publisher,
            time_source,
        ));

        let adapters = checkers
            .into_iter()
            .map(|checker| {
                let adapter = CheckerAdapter::new(checker, Arc::clone(&registry));
                (adapter.checker_id().clone(), Arc::new(adapter))
            })
            .collect::<BTreeMap<_, _>>();

        if self_scheduled {
            registry.start_sweeper();
        } else {
            info!("[gate] Self-scheduled sweep disabled; caller drives sweep_stale");
        }

        info!(
            checkers = ?adapters.keys().map(CheckerId::as_str).collect::<Vec<_>>(),
            fan_out = ?fan_out,
            "[gate] Quorum gate ready"
        );

        Ok(Self {
            registry,
            adapters,
            fan_out,
        })
    }

    /// Default configuration, no event sink, wall clock.
    pub fn with_defaults(checkers: Vec<Arc<dyn Checker>>) -> GateResult<Self> {
        Self::new(
            GateConfig::default(),
            checkers,
            Arc::new(NoopVoteRequestPublisher),
            Arc::new(SystemTimeSource),
        )
    }

    pub fn registry(&self) -> &Arc<QuorumRegistry> {
        &self.registry
    }

    pub fn checker_ids(&self) -> impl Iterator<Item = &CheckerId> {
        self.adapters.keys()
    }

    pub fn recent_outcomes(&self) -> Vec<SignalOutcome> {
        self.registry.recent_outcomes()
    }

    async fn open_signal(
        &self,
        params: ActionParams,
        required: BTreeSet<CheckerId>,
    ) -> GateResult<SignalId> {
        let signal_id = self
            .registry
            .create_with_quorum(params.clone(), required.clone())
            .await?;

        let adapters: Vec<Arc<CheckerAdapter>> = required
            .iter()
            .filter_map(|id| self.adapters.get(id).cloned())
            .collect();

        match self.fan_out {
            FanOutMode::Concurrent => self.fan_out_concurrent(signal_id, params, adapters).await,
            FanOutMode::Sequential => {
                for adapter in adapters {
                    adapter.run(signal_id, &params).await;
                }
            }
        }

        debug!(%signal_id, "Fan-out complete");
        Ok(signal_id)
    }

    async fn fan_out_concurrent(
        &self,
        signal_id: SignalId,
        params: ActionParams,
        adapters: Vec<Arc<CheckerAdapter>>,
    ) {
        let (checker_ids, tasks): (Vec<_>, Vec<_>) = adapters
            .into_iter()
            .map(|adapter| {
                let checker_id = adapter.checker_id().clone();
                let params = params.clone();
                let task = tokio::spawn(async move { adapter.run(signal_id, &params).await });
                (checker_id, task)
            })
            .unzip();

        for (checker_id, joined) in checker_ids.into_iter().zip(join_all(tasks).await) {
            if let Err(e) = joined {
                error!(
                    %signal_id,
                    checker = %checker_id,
                    error = %e,
                    "[gate] Checker task aborted"
                );
                self.registry
                    .force_check_in(signal_id, checker_id, &format!("checker task failed: {e}"))
                    .await;
            }
        }
    }
}

#[async_trait]
impl QuorumGateApi for QuorumGate {
    async fn propose(&self, params: ActionParams) -> GateResult<SignalId> {
        let required = self.registry.default_required().clone();
        self.open_signal(params, required).await
    }

    async fn propose_with_quorum(
        &self,
        params: ActionParams,
        required: BTreeSet<CheckerId>,
    ) -> GateResult<SignalId> {
        if required.is_empty() {
            return Err(GateError::EmptyQuorum);
        }
        if let Some(unknown) = required.iter().find(|id| !self.adapters.contains_key(*id)) {
            return Err(GateError::UnknownChecker {
                checker_id: unknown.to_string(),
            });
        }
        info!(
            required = ?required.iter().map(CheckerId::as_str).collect::<Vec<_>>(),
            "[gate] Proposal with degraded quorum"
        );
        self.open_signal(params, required).await
    }

    async fn check_in(
        &self,
        signal_id: SignalId,
        checker_id: CheckerId,
        approved: bool,
        confidence: f64,
        auxiliary: Option<serde_json::Value>,
    ) -> Option<Signal> {
        self.registry
            .check_in(signal_id, checker_id, approved, confidence, auxiliary)
            .await
    }

    async fn force_check_in(
        &self,
        signal_id: SignalId,
        checker_id: CheckerId,
        reason: &str,
    ) -> Option<Signal> {
        self.registry
            .force_check_in(signal_id, checker_id, reason)
            .await
    }

    async fn sweep_stale(&self) -> usize {
        self.registry.sweep_stale().await
    }

    fn register_execution_callback(&self, callback: Arc<dyn ExecutionCallback>) {
        self.registry.dispatcher().register(callback);
    }

    fn live_signal(&self, signal_id: &SignalId) -> Option<Signal> {
        self.registry.live_signal(signal_id)
    }

    fn outcome(&self, signal_id: &SignalId) -> Option<SignalOutcome> {
        self.registry.outcome(signal_id)
    }

    fn stats(&self) -> GateStats {
        self.registry.stats()
    }

    fn health(&self) -> HealthReport {
        self.registry.health()
    }
}
