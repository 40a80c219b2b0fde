//! Timeout and retry policy for store calls.

use std::future::Future;
use std::time::Duration;

use crate::{FulfillmentError, Result};

/// Bounds every store call by a timeout.
///
/// [`retrying`](Self::retrying) runs a failed call a second time and is only for reads
/// and writes that are safe to repeat. Everything else goes through [`once`](Self::once),
/// since a write whose reply was lost may already have committed. Only `Storage` failures
/// are retried; domain errors (not found, conflicts, coupon rejections) are final.
#[derive(Clone, Copy, Debug)]
pub struct StoreGuard {
    timeout: Duration,
}

impl StoreGuard {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn new(timeout: Duration) -> Self { Self { timeout } }

    pub async fn retrying<T, F, Fut>(&self, what: &'static str, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match self.attempt(what, &op).await {
            Err(FulfillmentError::Storage(reason)) => {
                tracing::warn!(operation = what, %reason, "store call failed, retrying once");
                self.attempt(what, &op).await
            }
            other => other,
        }
    }

    /// Single attempt, for writes that must not run twice.
    pub async fn once<T, F, Fut>(&self, what: &'static str, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.attempt(what, &op).await
    }

    async fn attempt<T, F, Fut>(&self, what: &'static str, op: &F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(FulfillmentError::Storage(format!("{} timed out after {:?}", what, self.timeout))),
        }
    }
}

impl Default for StoreGuard {
    fn default() -> Self { Self::new(Self::DEFAULT_TIMEOUT) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_storage_errors_once() {
        let calls = AtomicU32::new(0);
        let guard = StoreGuard::default();
        let result: Result<u32> = guard
            .retrying("flaky", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n == 0 { Err(FulfillmentError::Storage("connection reset".into())) } else { Ok(n) }
            })
            .await;
        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn gives_up_after_second_failure() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = StoreGuard::default()
            .retrying("down", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(FulfillmentError::Storage("down".into()))
            })
            .await;
        assert!(matches!(result, Err(FulfillmentError::Storage(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn domain_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = StoreGuard::default()
            .retrying("lookup", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(FulfillmentError::not_found("order", "x"))
            })
            .await;
        assert!(matches!(result, Err(FulfillmentError::NotFound { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn single_attempt_is_not_repeated() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = StoreGuard::default()
            .once("insert", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(FulfillmentError::Storage("connection reset".into()))
            })
            .await;
        assert!(matches!(result, Err(FulfillmentError::Storage(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_calls_time_out() {
        let guard = StoreGuard::new(Duration::from_millis(10));
        let result: Result<()> = guard
            .retrying("slow", || async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(FulfillmentError::Storage(msg)) if msg.contains("timed out")));
    }
}
