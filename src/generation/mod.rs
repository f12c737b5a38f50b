//! # Text Generation
//!
//! A `TextGenerator` turns a system instruction and a prompt into a
//! completion. `GeneratorChain` holds an ordered list of them and walks it
//! until one answers; every attempt runs under the shared outbound limiter
//! with that backend's timeout.
//!
//! | Backend | Module | Wire format |
//! |---------|--------|-------------|
//! | `OpenAiCompatible` | `http` | `POST .../chat/completions` |
//! | `GeminiGenerator` | `http` | `models/{model}:generateContent` |
//! | `ScriptedGenerator` | `mock` | canned replies, for tests and demos |
//!
//! The two consumers are `QuerySynthesizer` (question to Cypher) and
//! `AnswerComposer` (rows to prose).

pub mod composer;
#[cfg(feature = "http")]
pub mod http;
pub mod mock;
pub mod prompt;
pub mod synthesizer;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::limits::OutboundLimiter;
use crate::{Error, Result};

pub use composer::{AnswerComposer, fallback_answer};
#[cfg(feature = "http")]
pub use http::{GeminiGenerator, OpenAiCompatible};
pub use mock::ScriptedGenerator;
pub use synthesizer::{QuerySynthesizer, clean_completion};

/// A text-completion backend.
#[async_trait]
pub trait TextGenerator: Send + Sync + 'static {
    /// Name for logs and health reports.
    fn name(&self) -> &str;

    async fn generate(&self, system: &str, prompt: &str) -> Result<String>;

    /// Reachability check.
    async fn ping(&self) -> Result<()> {
        self.generate("Reply with OK.", "ping").await.map(|_| ())
    }
}

/// A completion and the backend that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub backend: String,
}

#[derive(Clone)]
struct Slot {
    generator: Arc<dyn TextGenerator>,
    timeout: Duration,
}

/// Ordered failover over text generators.
#[derive(Clone)]
pub struct GeneratorChain {
    slots: Vec<Slot>,
    limiter: OutboundLimiter,
}

impl GeneratorChain {
    pub fn new(limiter: OutboundLimiter) -> Self {
        Self { slots: Vec::new(), limiter }
    }

    /// Append a backend; earlier backends are tried first.
    pub fn with(mut self, generator: Arc<dyn TextGenerator>, timeout: Duration) -> Self {
        self.slots.push(Slot { generator, timeout });
        self
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.slots.iter().map(|s| s.generator.name().to_string()).collect()
    }

    /// First non-empty completion from the chain.
    ///
    /// A backend that errors, times out or answers with blank text is
    /// skipped. When none succeeds the result is `GenerationFailed`.
    pub async fn complete(&self, stage: &'static str, system: &str, prompt: &str) -> Result<Completion> {
        let mut failures: Vec<String> = Vec::new();
        for slot in self.slots.iter() {
            let name = slot.generator.name();
            let started = Instant::now();
            let ms = slot.timeout.as_millis() as u64;
            let outcome = self
                .limiter
                .call(slot.timeout, || Error::RequestTimeout(ms), slot.generator.generate(system, prompt))
                .await;
            let elapsed_ms = started.elapsed().as_millis() as u64;
            match outcome {
                Ok(text) if !text.trim().is_empty() => {
                    debug!(stage, backend = name, elapsed_ms, "completion received");
                    return Ok(Completion { text, backend: name.to_string() });
                }
                Ok(_) => {
                    warn!(stage, backend = name, elapsed_ms, "backend returned an empty completion");
                    failures.push(format!("{name}: empty completion"));
                }
                Err(err) => {
                    warn!(stage, backend = name, elapsed_ms, code = err.code(), error = %err, "backend failed, trying next");
                    failures.push(format!("{name}: {}", err.code()));
                }
            }
        }
        if failures.is_empty() {
            return Err(Error::GenerationFailed("no generation backend configured".into()));
        }
        Err(Error::GenerationFailed(failures.join("; ")))
    }

    /// Reachability of every backend, by name.
    pub async fn ping_all(&self) -> BTreeMap<String, bool> {
        let mut out = BTreeMap::new();
        for slot in self.slots.iter() {
            let ms = slot.timeout.as_millis() as u64;
            let ok = self
                .limiter
                .call(slot.timeout, || Error::RequestTimeout(ms), slot.generator.ping())
                .await
                .is_ok();
            out.insert(slot.generator.name().to_string(), ok);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn chain(gens: Vec<ScriptedGenerator>) -> GeneratorChain {
        gens.into_iter().fold(GeneratorChain::new(OutboundLimiter::new(2)), |c, g| {
            c.with(Arc::new(g), Duration::from_millis(200))
        })
    }

    #[tokio::test]
    async fn test_primary_answers() {
        let primary = ScriptedGenerator::new("primary").reply("MATCH (n) RETURN n");
        let secondary = ScriptedGenerator::new("secondary").reply("unused");
        let c = chain(vec![primary.clone(), secondary.clone()]);
        let out = c.complete("test", "sys", "q").await.unwrap();
        assert_eq!(out.backend, "primary");
        assert_eq!(secondary.calls(), 0);
    }

    #[tokio::test]
    async fn test_fails_over_on_error_and_timeout() {
        let broken = ScriptedGenerator::new("broken").fail("quota exceeded");
        let slow = ScriptedGenerator::new("slow").reply("late").delay(Duration::from_secs(5));
        let good = ScriptedGenerator::new("good").reply("ok");
        let c = chain(vec![broken.clone(), slow, good]);
        let out = c.complete("test", "sys", "q").await.unwrap();
        assert_eq!(out.text, "ok");
        assert_eq!(out.backend, "good");
        assert_eq!(broken.calls(), 1);
    }

    #[tokio::test]
    async fn test_all_backends_exhausted() {
        let c = chain(vec![ScriptedGenerator::new("a").fail("down"), ScriptedGenerator::new("b").reply("   ")]);
        match c.complete("test", "sys", "q").await {
            Err(Error::GenerationFailed(msg)) => {
                assert!(msg.contains("a: unavailable"), "{msg}");
                assert!(msg.contains("b: empty completion"), "{msg}");
            }
            other => panic!("expected GenerationFailed, got {other:?}"),
        }
        assert!(matches!(chain(vec![]).complete("test", "", "").await, Err(Error::GenerationFailed(_))));
    }

    #[tokio::test]
    async fn test_ping_all() {
        let c = chain(vec![ScriptedGenerator::new("up").reply("OK"), ScriptedGenerator::new("down").fail("x")]);
        let report = c.ping_all().await;
        assert_eq!(report.get("up"), Some(&true));
        assert_eq!(report.get("down"), Some(&false));
    }
}
