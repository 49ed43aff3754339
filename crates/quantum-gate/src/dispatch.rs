//! Execution dispatch
//!
//! Runs every registered callback for an approved signal. Each callback is
//! isolated: an error or a panic is logged and counted, and the remaining
//! callbacks still run. Nothing propagates back into the registry.

use crate::error::ExecutionError;
use crate::ports::outbound::{ExecutionCallback, ExecutionRequest};
use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::RwLock;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Result of one dispatch round
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub invoked: usize,
    pub failed: usize,
}

/// Holds the execution callbacks and invokes them
#[derive(Default)]
pub struct ExecutionDispatcher {
    callbacks: RwLock<Vec<Arc<dyn ExecutionCallback>>>,
}

impl ExecutionDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, callback: Arc<dyn ExecutionCallback>) {
        info!(callback = callback.name(), "[gate] Execution callback registered");
        self.callbacks.write().push(callback);
    }

    pub fn len(&self) -> usize {
        self.callbacks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.read().is_empty()
    }

    /// Invoke every callback once, in registration order.
    pub async fn dispatch(&self, request: &ExecutionRequest) -> DispatchReport {
        // Snapshot so callbacks registered mid-dispatch do not deadlock or run twice
        let callbacks: Vec<Arc<dyn ExecutionCallback>> = self.callbacks.read().clone();
        let mut report = DispatchReport::default();

        for callback in callbacks {
            report.invoked += 1;
            let outcome = AssertUnwindSafe(callback.execute(request))
                .catch_unwind()
                .await;

            match outcome {
                Ok(Ok(())) => {
                    debug!(
                        signal_id = %request.signal_id,
                        callback = callback.name(),
                        "Execution callback completed"
                    );
                }
                Ok(Err(e)) => {
                    report.failed += 1;
                    error!(
                        signal_id = %request.signal_id,
                        callback = callback.name(),
                        error = %e,
                        "Execution callback failed"
                    );
                }
                Err(panic) => {
                    report.failed += 1;
                    error!(
                        signal_id = %request.signal_id,
                        callback = callback.name(),
                        panic = %panic_message(panic.as_ref()),
                        "Execution callback panicked"
                    );
                }
            }
        }

        report
    }
}

/// Closure-backed execution callback
pub struct FnExecutionCallback<F> {
    name: String,
    f: F,
}

impl<F> FnExecutionCallback<F>
where
    F: Fn(&ExecutionRequest) -> Result<(), ExecutionError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F> ExecutionCallback for FnExecutionCallback<F>
where
    F: Fn(&ExecutionRequest) -> Result<(), ExecutionError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, request: &ExecutionRequest) -> Result<(), ExecutionError> {
        (self.f)(request)
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
