//! Network-capture strategy: load the bundle in a live page and inspect
//! the structured payloads it fetches at runtime.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::literal::{parse_literal, scan_anchored_literals};
use super::shape::{canonicalize, pick_best, ShapeMatch};
use super::{document_from, Strategy, StrategyFailure};
use crate::error::IngestResult;
use crate::types::{Bundle, CanonicalDocument, StrategyKind};

/// One response body observed while the page loaded.
#[derive(Debug, Clone)]
pub struct CapturedPayload {
    pub url: String,
    pub mime_type: String,
    pub body: String,
}

impl CapturedPayload {
    /// JSON responses, or anything whose URL ends in `.json`.
    pub fn is_structured(&self) -> bool {
        self.mime_type.contains("json")
            || self
                .url
                .split(['?', '#'])
                .next()
                .map(|p| p.ends_with(".json"))
                .unwrap_or(false)
    }

    pub fn is_script(&self) -> bool {
        self.mime_type.contains("javascript")
            || self
                .url
                .split(['?', '#'])
                .next()
                .map(|p| p.ends_with(".js"))
                .unwrap_or(false)
    }
}

/// Records response bodies while a page loads and settles.
#[async_trait]
pub trait TrafficRecorder: Send + Sync {
    async fn record(&self, url: &str, settle: Duration) -> IngestResult<Vec<CapturedPayload>>;
}

pub struct NetworkCaptureStrategy {
    recorder: Arc<dyn TrafficRecorder>,
    settle: Duration,
    max_literal_bytes: usize,
}

impl NetworkCaptureStrategy {
    pub fn new(
        recorder: Arc<dyn TrafficRecorder>,
        settle: Duration,
        max_literal_bytes: usize,
    ) -> Self {
        Self {
            recorder,
            settle,
            max_literal_bytes,
        }
    }

    fn matches_in(&self, payload: &CapturedPayload) -> Vec<ShapeMatch> {
        if payload.is_structured() {
            parse_literal(payload.body.trim())
                .and_then(|v| canonicalize(&v))
                .into_iter()
                .collect()
        } else if payload.is_script() {
            scan_anchored_literals(&payload.body, self.max_literal_bytes)
                .into_iter()
                .filter_map(parse_literal)
                .filter_map(|v| canonicalize(&v))
                .collect()
        } else {
            Vec::new()
        }
    }
}

#[async_trait]
impl Strategy for NetworkCaptureStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::NetworkCapture
    }

    async fn attempt(&self, bundle: &Bundle) -> Result<CanonicalDocument, StrategyFailure> {
        let payloads = self
            .recorder
            .record(bundle.source_url(), self.settle)
            .await
            .map_err(|e| StrategyFailure::Backend(e.to_string()))?;
        tracing::debug!("Recorded {} responses from {}", payloads.len(), bundle.source_url());

        let best = pick_best(payloads.iter().flat_map(|p| self.matches_in(p)))
            .ok_or(StrategyFailure::EmptyCapture)?;
        Ok(document_from(bundle, best, StrategyKind::NetworkCapture))
    }
}
