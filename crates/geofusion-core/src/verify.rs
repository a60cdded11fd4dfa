//! Semantic duplicate verification.
//!
//! When two events share a fingerprint but their text differs materially,
//! the deduplicator cannot tell a duplicate report from a second incident.
//! Such pairs are handed to a [`Verifier`] *before* the store's critical
//! section; the answers are collected into a [`Verdicts`] table that the
//! deduplicator consults while holding the lock.
//!
//! Every call goes through [`GuardedVerifier`], which enforces a timeout
//! and turns any failure into [`Verdict::Unknown`]. An unknown verdict makes
//! the deduplicator fall back to fingerprint-only resolution.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt as _;
use geofusion_types::{Event, EventId};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Pairs judged concurrently by [`GuardedVerifier::judge_all`].
pub const VERIFY_CONCURRENCY: usize = 4;

/// Outcome of a semantic comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Both events describe the same occurrence.
    Duplicate,
    /// The events describe different occurrences.
    Distinct,
    /// The verifier could not decide.
    Unknown,
}

/// Errors from a verification backend.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// The backend did not answer within the configured timeout.
    #[error("verification timed out after {0:?}")]
    Timeout(Duration),

    /// Transport or protocol failure.
    #[error("verification backend error: {0}")]
    Backend(String),
}

/// Judges whether two events describe the same occurrence.
#[async_trait]
pub trait Verifier: Send + Sync {
    /// Compare `a` and `b`.
    async fn judge(&self, a: &Event, b: &Event) -> Result<Verdict, VerifyError>;
}

/// Verifier used when semantic verification is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoVerifier;

#[async_trait]
impl Verifier for NoVerifier {
    async fn judge(&self, _a: &Event, _b: &Event) -> Result<Verdict, VerifyError> {
        Ok(Verdict::Unknown)
    }
}

/// Timeout-guarded, fail-open front for any [`Verifier`].
#[derive(Clone)]
pub struct GuardedVerifier {
    inner: Arc<dyn Verifier>,
    timeout: Duration,
}

impl GuardedVerifier {
    /// Wrap `inner`, abandoning calls that exceed `timeout`.
    pub fn new(inner: Arc<dyn Verifier>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    /// A guard around [`NoVerifier`].
    pub fn disabled() -> Self {
        Self::new(Arc::new(NoVerifier), Duration::from_secs(1))
    }

    /// Judge a pair. Never fails: errors and timeouts yield `Unknown`.
    pub async fn judge(&self, a: &Event, b: &Event) -> Verdict {
        match tokio::time::timeout(self.timeout, self.inner.judge(a, b)).await {
            Ok(Ok(verdict)) => {
                debug!(a = %a.id, b = %b.id, ?verdict, "Verifier answered");
                verdict
            }
            Ok(Err(e)) => {
                warn!(a = %a.id, b = %b.id, error = %e, "Verifier failed, falling back to fingerprint");
                Verdict::Unknown
            }
            Err(_elapsed) => {
                warn!(
                    a = %a.id,
                    b = %b.id,
                    timeout_ms = self.timeout.as_millis(),
                    "Verifier timed out, falling back to fingerprint"
                );
                Verdict::Unknown
            }
        }
    }

    /// Judge every pair, at most [`VERIFY_CONCURRENCY`] at a time, and
    /// collect the answers.
    pub async fn judge_all(&self, pairs: Vec<(Event, Event)>) -> Verdicts {
        let answers: Vec<(EventId, EventId, Verdict)> = futures::stream::iter(pairs)
            .map(|(new, existing)| async move {
                let verdict = self.judge(&new, &existing).await;
                (new.id, existing.id, verdict)
            })
            .buffer_unordered(VERIFY_CONCURRENCY)
            .collect()
            .await;

        let mut verdicts = Verdicts::default();
        for (new, existing, verdict) in answers {
            verdicts.insert(new, existing, verdict);
        }
        verdicts
    }
}

/// Verifier answers keyed by `(new event, existing event)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Verdicts {
    answers: HashMap<(EventId, EventId), Verdict>,
}

impl Verdicts {
    /// An empty table (every lookup misses).
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the verdict for a pair.
    pub fn insert(&mut self, new: EventId, existing: EventId, verdict: Verdict) {
        self.answers.insert((new, existing), verdict);
    }

    /// The verdict for a pair, if one was obtained.
    pub fn get(&self, new: EventId, existing: EventId) -> Option<Verdict> {
        self.answers.get(&(new, existing)).copied()
    }

    /// Merge another table into this one.
    pub fn extend(&mut self, other: Self) {
        self.answers.extend(other.answers);
    }

    /// Number of recorded verdicts.
    pub fn len(&self) -> usize {
        self.answers.len()
    }

    /// Whether no verdicts were recorded.
    pub fn is_empty(&self) -> bool {
        self.answers.is_empty()
    }
}
