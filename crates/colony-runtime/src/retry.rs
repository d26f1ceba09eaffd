//! Bounded retry of whole operations that lost an optimistic write.

use colony_core::RetryConfig;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::EngineError;

/// Runs `op` until it succeeds, fails with a non-retryable error, or
/// `max_attempts` is reached. Each attempt reloads and recomputes from
/// scratch, so `op` must not carry state between calls.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryConfig,
    name: &'static str,
    mut op: F,
) -> Result<T, EngineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, EngineError>>,
{
    let mut attempt = 1u32;
    loop {
        match op().await {
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let jitter = rand::thread_rng().gen_range(0..=policy.backoff_ms);
                let wait_ms = policy.backoff_ms * attempt as u64 + jitter;
                warn!(op = name, attempt, wait_ms, error = %e, "conflict, retrying");
                tokio::time::sleep(Duration::from_millis(wait_ms)).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}
