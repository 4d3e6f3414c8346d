//! Scripted provider for tests: fixed token sequences, optional failures.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

use super::{ChatRequest, ProviderClient, ProviderError, Usage};
use crate::models::Provider;

/// A provider that replays scripted responses, one per call, repeating the
/// last script when calls outnumber scripts. `fail_times` injects transient
/// errors before the first success, for retry tests.
pub struct MockProvider {
    provider: Provider,
    scripts: Mutex<Vec<MockScript>>,
    calls: AtomicUsize,
    fail_times: AtomicUsize,
}

#[derive(Clone, Debug)]
pub struct MockScript {
    /// Tokens yielded in order; their concatenation is the chat() text.
    pub tokens: Vec<String>,
    pub usage: Usage,
}

impl MockScript {
    pub fn text(content: &str) -> Self {
        // one token per character, so streaming tests see real fragmentation
        Self {
            tokens: content.chars().map(|c| c.to_string()).collect(),
            usage: Usage {
                input_tokens: 10,
                output_tokens: content.chars().count() as u64,
                ..Usage::default()
            },
        }
    }

    pub fn tokens(tokens: &[&str]) -> Self {
        Self {
            tokens: tokens.iter().map(|s| s.to_string()).collect(),
            usage: Usage {
                input_tokens: 10,
                output_tokens: tokens.len() as u64,
                ..Usage::default()
            },
        }
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }
}

impl MockProvider {
    pub fn new(scripts: Vec<MockScript>) -> Self {
        Self {
            provider: Provider::Custom("mock".to_string()),
            scripts: Mutex::new(scripts),
            calls: AtomicUsize::new(0),
            fail_times: AtomicUsize::new(0),
        }
    }

    pub fn replying(content: &str) -> Self {
        Self::new(vec![MockScript::text(content)])
    }

    /// Fails the first `n` calls with a retryable 503 before succeeding.
    pub fn failing_first(mut self, n: usize) -> Self {
        *self.fail_times.get_mut() = n;
        self
    }

    /// Number of chat/stream invocations so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_script(&self) -> Result<MockScript, ProviderError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.fail_times.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_times.store(remaining - 1, Ordering::SeqCst);
            return Err(ProviderError::Api {
                status: 503,
                body: "Service Unavailable".to_string(),
            });
        }
        let scripts = self.scripts.lock().unwrap();
        let idx = n.min(scripts.len().saturating_sub(1));
        scripts
            .get(idx)
            .cloned()
            .ok_or_else(|| ProviderError::Stream("mock has no scripts".to_string()))
    }
}

#[async_trait]
impl ProviderClient for MockProvider {
    fn provider(&self) -> &Provider {
        &self.provider
    }

    async fn chat(&self, _req: &ChatRequest) -> Result<(String, Usage), ProviderError> {
        let script = self.next_script()?;
        Ok((script.tokens.concat(), script.usage))
    }

    async fn stream(
        &self,
        _req: &ChatRequest,
        tokens: mpsc::Sender<String>,
    ) -> Result<Usage, ProviderError> {
        let script = self.next_script()?;
        for tok in script.tokens {
            if tokens.send(tok).await.is_err() {
                break; // receiver gone (interrupt or tool-break)
            }
        }
        Ok(script.usage)
    }
}
