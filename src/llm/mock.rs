//! Scripted providers for tests and local development.
//!
//! A `ScriptedProvider` replays a queue of outcomes, then falls back to a
//! fixed response — enough to exercise retries, circuit transitions, and
//! cross-check disagreement without a live provider.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::provider::{EmbeddingProvider, LlmError, LlmProvider, Result};

/// One scripted call result
#[derive(Debug, Clone)]
pub enum MockOutcome {
    /// Return this JSON document
    Value(Value),
    /// Fail with the given HTTP status
    Status(u16),
    /// Fail with a timeout
    Timeout,
    /// Fail with a connection error
    Connection,
    /// Return a body that is not valid JSON
    NotJson,
}

pub struct ScriptedProvider {
    name: String,
    script: Mutex<VecDeque<MockOutcome>>,
    fallback: Value,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(name: impl Into<String>, fallback: Value) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(VecDeque::new()),
            fallback,
            calls: AtomicUsize::new(0),
        }
    }

    /// Queue the next outcome (FIFO)
    pub fn push(&self, outcome: MockOutcome) {
        self.script
            .lock()
            .expect("script lock poisoned")
            .push_back(outcome);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, _prompt: &str) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let outcome = self
            .script
            .lock()
            .expect("script lock poisoned")
            .pop_front();

        match outcome {
            None => Ok(self.fallback.clone()),
            Some(MockOutcome::Value(value)) => Ok(value),
            Some(MockOutcome::Status(status)) => Err(LlmError::Provider {
                status,
                message: "scripted failure".into(),
            }),
            Some(MockOutcome::Timeout) => Err(LlmError::Timeout),
            Some(MockOutcome::Connection) => {
                Err(LlmError::Connection("scripted connection error".into()))
            }
            Some(MockOutcome::NotJson) => Err(LlmError::SchemaViolation(
                "content is not JSON: scripted".into(),
            )),
        }
    }
}

/// Deterministic embedder: unit-ish vector derived from the text length
pub struct MockEmbedder {
    dimension: usize,
    fail: AtomicBool,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            fail: AtomicBool::new(false),
        }
    }

    /// Make subsequent `embed` calls fail (non-fatal pipeline path)
    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(LlmError::Provider {
                status: 503,
                message: "scripted embedding failure".into(),
            });
        }
        let seed = (text.len() % 97) as f32 / 97.0;
        Ok((0..self.dimension)
            .map(|i| ((i as f32 * 0.37 + seed).sin()))
            .collect())
    }
}
