//! # quantum-gate
//!
//! Quorum Gate: consensus-gated execution of risky actions.
//!
//! ## Overview
//!
//! A proposed action becomes a **signal**. Every required checker casts one
//! vote; the signal is decided only when the whole quorum has voted:
//! - **Majority**: strictly more than half of the votes approve
//! - **Coherence**: product of per-vote factors must stay above the threshold
//! - **At-most-once**: approved signals reach execution callbacks exactly once
//! - **Liveness**: failing checkers are replaced by forced votes, stale
//!   signals are swept
//!
//! ## Architecture
//!
//! ```text
//! propose ──→ QuorumRegistry::create ──VoteRequested──→ event bus
//!                  │
//!                  └── fan-out ──→ CheckerAdapter ×N ──check_in / force_check_in──→ QuorumRegistry
//!                                                                                        │
//!                                                           (quorum complete) ──→ ExecutionDispatcher
//! ```
//!
//! ## Signal Lifecycle
//!
//! ```text
//! [SUPERPOSITION] ──last vote──→ [COLLAPSING] ──majority ∧ coherence > 0.30──→ [COLLAPSED] ──callbacks──→ [EXECUTED]
//!       │                              │
//!       │                              └──otherwise──→ [DECOHERENT]
//!       │
//!       └──age > max_signal_age (sweep)──→ [DECOHERENT]
//! ```
//!
//! Terminal signals leave the live map; late votes for them are ignored.
//!
//! ## Example
//!
//! ```rust,ignore
//! use quantum_gate::{QuorumGate, QuorumGateApi, RiskLimitChecker, ActionParams};
//!
//! let gate = QuorumGate::with_defaults(vec![Arc::new(RiskLimitChecker::default())])?;
//! gate.register_execution_callback(Arc::new(my_order_router));
//!
//! let signal_id = gate
//!     .propose(ActionParams::new("BUY", "BTC-USD", "coinbase", 0.5, 64_000.0, 0.8))
//!     .await?;
//! println!("{:?}", gate.outcome(&signal_id));
//! ```

pub mod adapters;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod events;
pub mod health;
pub mod metrics;
pub mod ports;
pub mod registry;
pub mod service;

pub use adapters::{
    CheckerAdapter, InMemoryVoteRequestBus, ManualTimeSource, NoopVoteRequestPublisher,
    ProposalConfidenceChecker, RiskLimitChecker, RiskLimits, SystemTimeSource,
};
pub use config::{FanOutMode, GateConfig};
pub use dispatch::{DispatchReport, ExecutionDispatcher, FnExecutionCallback};
pub use domain::{
    well_known, ActionParams, CheckerId, CollapseDecision, CollapseRule, DecisionReason, Signal,
    SignalId, SignalOutcome, SignalState, Timestamp, Vote,
};
pub use error::{CheckerError, ExecutionError, GateError, GateResult};
pub use events::{GateEvent, SignalDecidedEvent, VoteRequestedEvent};
pub use health::{CheckerHealth, CheckerHealthView, CheckerStatus, GateStats, HealthReport};
pub use ports::inbound::QuorumGateApi;
pub use ports::outbound::{
    Checker, CheckerVerdict, ExecutionCallback, ExecutionRequest, TimeSource,
    VoteRequestPublisher,
};
pub use registry::QuorumRegistry;
pub use service::QuorumGate;
