//! # Quorum Gate demo
//!
//! Wires the reference checkers into a gate, proposes a few sample orders and
//! prints the resulting stats and health report.
//!
//! ## Environment
//!
//! - `QG_LOG_LEVEL`: fallback filter when `RUST_LOG` is unset (default `info`)
//! - `QG_LOG_JSON`: `true` for JSON log lines
//! - `QG_*`: gate configuration, see `GateConfig::from_env`

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use quantum_gate::{
    ActionParams, Checker, ExecutionRequest, FnExecutionCallback, GateConfig, GateEvent,
    InMemoryVoteRequestBus, ProposalConfidenceChecker, QuorumGate, QuorumGateApi,
    RiskLimitChecker, SystemTimeSource,
};

fn init_tracing() -> Result<()> {
    let level = std::env::var("QG_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let json = std::env::var("QG_LOG_JSON")
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&level))
        .context("invalid log filter")?;

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .try_init()
            .context("failed to install tracing subscriber")?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
            .context("failed to install tracing subscriber")?;
    }
    Ok(())
}

fn sample_orders() -> Vec<ActionParams> {
    vec![
        // Small, confident: approved
        ActionParams::new("BUY", "BTC-USD", "coinbase", 0.5, 64_000.0, 0.85),
        // Proposer unsure: rejected by the confidence checker
        ActionParams::new("SELL", "ETH-USD", "kraken", 3.0, 3_100.0, 0.35),
        // Notional over the risk limit
        ActionParams::new("BUY", "BTC-USD", "binance", 5.0, 64_000.0, 0.9),
        // Near the limit: approved on votes, but too little coherence
        ActionParams::new("BUY", "BTC-USD", "coinbase", 3.5, 64_000.0, 0.65),
    ]
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    let config = GateConfig::from_env().context("loading gate configuration")?;
    let sweep_interval = config.sweep_interval;

    let bus = Arc::new(InMemoryVoteRequestBus::new());
    let mut events = bus.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                GateEvent::VoteRequested(e) => {
                    info!(signal_id = %e.signal_id, expires_at = e.expires_at, "Vote requested")
                }
                GateEvent::SignalDecided(e) => info!(
                    signal_id = %e.outcome.signal_id,
                    state = %e.outcome.state,
                    coherence = e.outcome.coherence,
                    "Signal decided"
                ),
            }
        }
    });

    let risk: Arc<dyn Checker> = Arc::new(RiskLimitChecker::default());
    let confidence: Arc<dyn Checker> = Arc::new(ProposalConfidenceChecker::new(0.6));
    let gate = QuorumGate::new(
        config,
        vec![risk, confidence],
        bus.clone(),
        Arc::new(SystemTimeSource),
    )
    .context("building quorum gate")?;

    gate.register_execution_callback(Arc::new(FnExecutionCallback::new(
        "order-log",
        |request: &ExecutionRequest| {
            info!(
                signal_id = %request.signal_id,
                action = %request.params.action,
                asset = %request.params.asset,
                venue = %request.params.venue,
                amount = request.params.amount,
                coherence = request.coherence,
                "Order released for routing"
            );
            Ok(())
        },
    )));

    for order in sample_orders() {
        match gate.propose(order).await {
            Ok(signal_id) => match gate.outcome(&signal_id) {
                Some(outcome) => info!(
                    %signal_id,
                    state = %outcome.state,
                    reason = ?outcome.reason,
                    "Proposal settled"
                ),
                None => info!(%signal_id, "Proposal still awaiting votes"),
            },
            Err(e) => warn!(error = %e, "Proposal refused"),
        }
    }

    tokio::time::sleep(sweep_interval).await;

    println!("{}", serde_json::to_string_pretty(&gate.stats())?);
    println!("{}", serde_json::to_string_pretty(&gate.health())?);
    info!(events = bus.events_published(), "Demo complete");
    Ok(())
}
