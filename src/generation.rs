//! Generation gateway abstraction.
//!
//! The vault consumes a text-generation model through [`GenerationProvider`]:
//! a cancellable, ordered, lazy token stream delivered over an mpsc channel.
//! The consumer pulls until the channel closes or cancels via the
//! [`CancelHandle`]; dropping the receiver also ends emission, since sends
//! into a closed channel fail.
//!
//! [`EchoProvider`] is a model-free stand-in for tests and offline use.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

/// Sampling and stopping parameters for one generation request.
#[derive(Debug, Clone)]
pub struct GenerationParams {
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: usize,
    pub stop: Vec<String>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            temperature: 0.7,
            top_p: 0.9,
            top_k: 40,
            stop: Vec::new(),
        }
    }
}

/// Cooperative cancellation flag shared with an in-flight generation.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that token emission stop promptly.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Streams generated text for a prompt, one token at a time.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Start generation. Tokens arrive in order on the returned channel;
    /// the channel closes when generation finishes, errors, or is cancelled.
    /// Queries never write, so cancellation leaves no state to clean up.
    async fn stream_generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
        cancel: CancelHandle,
    ) -> Result<mpsc::Receiver<Result<String>>>;
}

/// Deterministic stand-in provider: emits the prompt's words back as tokens,
/// honoring `max_tokens`, stop sequences, and cancellation.
pub struct EchoProvider;

#[async_trait]
impl GenerationProvider for EchoProvider {
    fn name(&self) -> &str {
        "echo"
    }

    async fn stream_generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
        cancel: CancelHandle,
    ) -> Result<mpsc::Receiver<Result<String>>> {
        let (tx, rx) = mpsc::channel(32);
        let words: Vec<String> = prompt.split_whitespace().map(|w| w.to_string()).collect();
        let max_tokens = params.max_tokens;
        let stop = params.stop.clone();

        tokio::spawn(async move {
            for (i, word) in words.into_iter().enumerate() {
                if i >= max_tokens || cancel.is_cancelled() {
                    break;
                }
                if stop.iter().any(|s| s == &word) {
                    break;
                }
                let token = format!("{} ", word);
                if tx.send(Ok(token)).await.is_err() {
                    break;
                }
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(mut rx: mpsc::Receiver<Result<String>>) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(tok) = rx.recv().await {
            out.push(tok.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_echo_streams_in_order() {
        let rx = EchoProvider
            .stream_generate("alpha beta gamma", &GenerationParams::default(), CancelHandle::new())
            .await
            .unwrap();
        assert_eq!(collect(rx).await, vec!["alpha ", "beta ", "gamma "]);
    }

    #[tokio::test]
    async fn test_max_tokens_limits_emission() {
        let params = GenerationParams {
            max_tokens: 2,
            ..Default::default()
        };
        let rx = EchoProvider
            .stream_generate("one two three four", &params, CancelHandle::new())
            .await
            .unwrap();
        assert_eq!(collect(rx).await.len(), 2);
    }

    #[tokio::test]
    async fn test_stop_sequence_ends_stream() {
        let params = GenerationParams {
            stop: vec!["STOP".to_string()],
            ..Default::default()
        };
        let rx = EchoProvider
            .stream_generate("before STOP after", &params, CancelHandle::new())
            .await
            .unwrap();
        assert_eq!(collect(rx).await, vec!["before "]);
    }

    #[tokio::test]
    async fn test_cancel_before_start_emits_nothing() {
        let cancel = CancelHandle::new();
        cancel.cancel();
        let rx = EchoProvider
            .stream_generate("a b c", &GenerationParams::default(), cancel)
            .await
            .unwrap();
        assert!(collect(rx).await.is_empty());
    }
}
