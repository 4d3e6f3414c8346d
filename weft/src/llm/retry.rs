//! Retry with exponential backoff for provider calls.
//!
//! The streaming wrapper has one hard rule: it only retries while **zero**
//! tokens have reached the caller. Once a fragment has been forwarded,
//! retrying would duplicate output, so any later error propagates as is.

use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;

use super::{ProviderError, Usage};

/// Backoff configuration: `base_delay * 2^attempt`, capped attempts.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_attempts,
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }
}

/// Retries a non-streaming operation on retryable errors.
pub async fn retry_chat<T, F, Fut>(
    policy: &RetryPolicy,
    mut op: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                attempt += 1;
                if attempt >= policy.max_attempts || !e.is_retryable() {
                    return Err(e);
                }
                let delay = policy.delay_for(attempt - 1);
                tracing::warn!(
                    "provider error (attempt {}/{}), retrying in {:?}: {}",
                    attempt,
                    policy.max_attempts,
                    delay,
                    e
                );
                sleep(delay).await;
            }
        }
    }
}

/// Retries a streaming operation, forwarding tokens to `out`.
///
/// Each attempt gets a fresh internal channel; tokens are forwarded as they
/// arrive. An error after the first forwarded token is final.
pub async fn retry_stream<F, Fut>(
    policy: &RetryPolicy,
    out: mpsc::Sender<String>,
    mut op: F,
) -> Result<Usage, ProviderError>
where
    F: FnMut(mpsc::Sender<String>) -> Fut,
    Fut: Future<Output = Result<Usage, ProviderError>>,
{
    let mut attempt = 0;
    loop {
        let (tx, mut rx) = mpsc::channel::<String>(128);
        let fut = op(tx);
        tokio::pin!(fut);

        let mut yielded = false;
        let result = loop {
            tokio::select! {
                maybe = rx.recv() => {
                    if let Some(token) = maybe {
                        yielded = true;
                        if out.send(token).await.is_err() {
                            // Downstream hung up (interrupt); abandon the op.
                            return Err(ProviderError::Interrupted);
                        }
                    }
                    // None: sender side done; fall through to awaiting the op.
                }
                res = &mut fut => {
                    // Drain anything buffered before the op finished.
                    while let Ok(token) = rx.try_recv() {
                        yielded = true;
                        let _ = out.send(token).await;
                    }
                    break res;
                }
            }
        };

        match result {
            Ok(usage) => return Ok(usage),
            Err(e) => {
                attempt += 1;
                if yielded || attempt >= policy.max_attempts || !e.is_retryable() {
                    return Err(e);
                }
                let delay = policy.delay_for(attempt - 1);
                tracing::warn!(
                    "stream error before first token (attempt {}/{}), retrying in {:?}: {}",
                    attempt,
                    policy.max_attempts,
                    delay,
                    e
                );
                sleep(delay).await;
            }
        }
    }
}
