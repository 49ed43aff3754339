//! Checker Adapter
//!
//! Wraps a `Checker` so that every evaluation ends in exactly one vote.
//! Errors, timeouts, panics and unrecordable verdicts all turn into a forced
//! check-in naming the checker and the reason.

use crate::dispatch::panic_message;
use crate::domain::{ActionParams, CheckerId, Signal, SignalId};
use crate::error::CheckerError;
use crate::ports::outbound::{Checker, CheckerVerdict};
use crate::registry::QuorumRegistry;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Binds one checker to the registry
pub struct CheckerAdapter {
    checker: Arc<dyn Checker>,
    checker_id: CheckerId,
    registry: Arc<QuorumRegistry>,
    timeout: Duration,
}

impl CheckerAdapter {
    pub fn new(checker: Arc<dyn Checker>, registry: Arc<QuorumRegistry>) -> Self {
        let timeout = registry.config().checker_timeout;
        Self {
            checker_id: checker.id(),
            checker,
            registry,
            timeout,
        }
    }

    pub fn checker_id(&self) -> &CheckerId {
        &self.checker_id
    }

    /// Evaluate `params` and report the result for `signal_id`.
    pub async fn run(&self, signal_id: SignalId, params: &ActionParams) -> Option<Signal> {
        match self.evaluate(params).await {
            Ok(verdict) => {
                debug!(
                    %signal_id,
                    checker = %self.checker_id,
                    approved = verdict.approved,
                    confidence = verdict.confidence,
                    "Checker verdict"
                );
                self.registry
                    .check_in(
                        signal_id,
                        self.checker_id.clone(),
                        verdict.approved,
                        verdict.confidence,
                        verdict.auxiliary,
                    )
                    .await
            }
            Err(e) => {
                warn!(
                    %signal_id,
                    checker = %self.checker_id,
                    error = %e,
                    "[gate] Checker failed; forcing check-in"
                );
                self.registry
                    .force_check_in(signal_id, self.checker_id.clone(), &e.to_string())
                    .await
            }
        }
    }

    async fn evaluate(&self, params: &ActionParams) -> Result<CheckerVerdict, CheckerError> {
        let started = Instant::now();
        let evaluation = AssertUnwindSafe(self.checker.evaluate(params)).catch_unwind();

        match tokio::time::timeout(self.timeout, evaluation).await {
            Err(_) => Err(CheckerError::Timeout {
                elapsed: started.elapsed(),
            }),
            Ok(Err(panic)) => Err(CheckerError::Internal {
                reason: format!("evaluation panicked: {}", panic_message(panic.as_ref())),
            }),
            Ok(Ok(result)) => {
                let verdict = result?;
                if !verdict.confidence.is_finite() {
                    return Err(CheckerError::InvalidVerdict {
                        reason: format!("confidence {} is not finite", verdict.confidence),
                    });
                }
                Ok(verdict)
            }
        }
    }
}
