//! Cancellation and deadline handling shared by every engine operation.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{Result, WardenError};

/// Runs one logical operation under the caller's cancellation token and the
/// configured deadline.
///
/// The operation future owns its transaction. When the token fires or the
/// deadline passes, the future is dropped before it commits, so the store
/// discards every staged write.
#[derive(Debug, Clone, Copy)]
pub struct OperationGuard {
    timeout: Duration,
}

impl OperationGuard {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn run<T, F>(&self, cancel: &CancellationToken, operation: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if cancel.is_cancelled() {
            return Err(WardenError::cancelled(operation));
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!(operation, "Operation cancelled; transaction rolled back");
                Err(WardenError::cancelled(operation))
            }
            res = tokio::time::timeout(self.timeout, fut) => match res {
                Ok(inner) => inner,
                Err(elapsed) => {
                    warn!(operation, timeout_ms = self.timeout.as_millis() as u64, "Operation timed out");
                    Err(WardenError::from(elapsed).with_context("operation", operation))
                }
            },
        }
    }
}

impl Default for OperationGuard {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn test_passes_through_result() {
        let guard = OperationGuard::default();
        let token = CancellationToken::new();
        let value = guard.run(&token, "noop", async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_pre_cancelled_never_polls() {
        let guard = OperationGuard::default();
        let token = CancellationToken::new();
        token.cancel();

        let polled = AtomicBool::new(false);
        let err = guard
            .run(&token, "noop", async {
                polled.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(!polled.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_timeout_maps_to_dependency_unavailable() {
        let guard = OperationGuard::new(Duration::from_millis(10));
        let token = CancellationToken::new();

        let err = guard
            .run(&token, "slow", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DependencyUnavailable);
    }
}
