//! Deadlines for long-running rebuilds.
//!
//! A full re-decode of a large image can take a while, so hosts run it on a
//! blocking task and bound it here. On expiry the cancellation flag handed to
//! the builder is raised, and the builder stops at the next instruction
//! boundary.

use crate::error::{BinpatchError, Result};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error};

/// Default timeout duration in seconds
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 300;

/// Timeout configuration for one operation
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    pub duration: Duration,
    /// Whether to log at error level on expiry
    pub log_warnings: bool,
    /// Operation name for logging
    pub operation_name: String,
}

impl TimeoutConfig {
    pub fn new(seconds: u64, operation: impl Into<String>) -> Self {
        Self {
            duration: Duration::from_secs(seconds),
            log_warnings: true,
            operation_name: operation.into(),
        }
    }

    pub fn from_duration(duration: Duration, operation: impl Into<String>) -> Self {
        Self {
            duration,
            log_warnings: true,
            operation_name: operation.into(),
        }
    }
}

/// Execute an async operation with a timeout
pub async fn with_timeout<T, F>(config: TimeoutConfig, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    debug!(
        "Starting operation '{}' with timeout of {}s",
        config.operation_name,
        config.duration.as_secs()
    );

    match timeout(config.duration, future).await {
        Ok(result) => {
            debug!("Operation '{}' finished", config.operation_name);
            result
        }
        Err(_) => {
            if config.log_warnings {
                error!(
                    "Operation '{}' timed out after {}s",
                    config.operation_name,
                    config.duration.as_secs()
                );
            }
            Err(BinpatchError::Timeout {
                seconds: config.duration.as_secs(),
            })
        }
    }
}

/// Run `job` on the blocking pool under a deadline.
///
/// When the deadline passes, `cancel` is raised so a cooperative job can wind
/// down; the call returns `Timeout` without waiting for it.
pub async fn blocking_with_timeout<T, F>(
    config: TimeoutConfig,
    cancel: Arc<AtomicBool>,
    job: F,
) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let handle = tokio::task::spawn_blocking(job);
    let outcome = with_timeout(config, async move {
        handle
            .await
            .map_err(|e| BinpatchError::Internal(format!("blocking task failed: {e}")))?
    })
    .await;
    if matches!(outcome, Err(BinpatchError::Timeout { .. })) {
        cancel.store(true, Ordering::Relaxed);
    }
    outcome
}
