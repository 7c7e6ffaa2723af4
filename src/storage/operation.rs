//! Uniform execution wrapper for store operations.
//!
//! Every public store method runs its body through [`OperationWrapper`],
//! which:
//!
//! 1. Times the call
//! 2. Emits one `tracing` event (`debug` on success, `warn` on failure)
//! 3. Records `storage_operations_total` and `storage_operation_duration_ms`
//! 4. Normalizes failures into [`Error`], keeping the crate's own variants
//!    and wrapping anything else as [`Error::OperationFailed`]
//!
//! The wrapper holds only the store name, so it is `Copy` and can be shared
//! freely between stores.

use crate::{Error, Result};
use std::future::Future;
use std::time::Instant;

/// Stateless wrapper that instruments and normalizes store operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationWrapper {
    store: &'static str,
}

impl OperationWrapper {
    /// Creates a wrapper labelled with the given store name.
    #[must_use]
    pub const fn new(store: &'static str) -> Self {
        Self { store }
    }

    /// Returns the store label.
    #[must_use]
    pub const fn store(&self) -> &'static str {
        self.store
    }

    /// Runs a synchronous operation.
    ///
    /// # Errors
    ///
    /// Returns the operation's failure, normalized by [`normalize`].
    pub fn execute<T, F>(&self, operation: &'static str, call: F) -> Result<T>
    where
        F: FnOnce() -> anyhow::Result<T>,
    {
        let start = Instant::now();
        let result = call();
        self.finish(operation, start, result)
    }

    /// Runs an operation that may suspend.
    ///
    /// # Errors
    ///
    /// Returns the operation's failure, normalized by [`normalize`].
    pub async fn execute_async<T, Fut>(&self, operation: &'static str, call: Fut) -> Result<T>
    where
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let start = Instant::now();
        let result = call.await;
        self.finish(operation, start, result)
    }

    fn finish<T>(
        &self,
        operation: &'static str,
        start: Instant,
        result: anyhow::Result<T>,
    ) -> Result<T> {
        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
        match result {
            Ok(value) => {
                tracing::debug!(
                    store = self.store,
                    operation,
                    duration_ms,
                    "Storage operation succeeded"
                );
                record_operation_metrics(self.store, operation, duration_ms, "success");
                Ok(value)
            },
            Err(err) => {
                let err = normalize(operation, err);
                tracing::warn!(
                    store = self.store,
                    operation,
                    duration_ms,
                    error = %err,
                    "Storage operation failed"
                );
                record_operation_metrics(self.store, operation, duration_ms, "error");
                Err(err)
            },
        }
    }
}

/// Converts any failure into a crate [`Error`].
///
/// Errors that already are [`Error`] pass through unchanged so callers can
/// still match on validation and not-found failures. Everything else becomes
/// [`Error::OperationFailed`] carrying `operation` and the full cause chain.
#[must_use]
pub fn normalize(operation: &str, err: anyhow::Error) -> Error {
    match err.downcast::<Error>() {
        Ok(own) => own,
        Err(other) => Error::OperationFailed {
            operation: operation.to_string(),
            cause: format!("{other:#}"),
        },
    }
}

/// Records count and latency for one storage operation.
fn record_operation_metrics(
    store: &'static str,
    operation: &'static str,
    duration_ms: f64,
    status: &'static str,
) {
    metrics::counter!(
        "storage_operations_total",
        "store" => store,
        "operation" => operation,
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        "storage_operation_duration_ms",
        "store" => store,
        "operation" => operation,
        "status" => status
    )
    .record(duration_ms);
}
