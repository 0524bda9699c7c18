//! Content extraction: an ordered chain of strategies over a fetched bundle.
//!
//! Each [`Strategy`] either produces a [`CanonicalDocument`] or a typed
//! [`StrategyFailure`]. The [`StrategyChain`] tries them strictly in order and
//! keeps the first document that clears the confidence threshold. When none
//! does, the caller gets an [`ExtractionFailure`] listing every attempt.

pub mod literal;
pub mod manifest;
pub mod network;
pub mod script;
pub mod shape;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ExtractionConfig;
use crate::types::{Bundle, CanonicalDocument, Candidate, Confidence, StrategyKind};

pub use manifest::ManifestStrategy;
pub use network::{CapturedPayload, NetworkCaptureStrategy, TrafficRecorder};
pub use script::EmbeddedScriptStrategy;
pub use shape::ShapeMatch;

/// Why a single strategy produced nothing.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum StrategyFailure {
    #[error("no manifest found (looked for {0})")]
    MissingManifest(String),

    #[error("manifest unusable: {0}")]
    InvalidManifest(String),

    #[error("no matching literal in {scanned} script sources")]
    NoMatchingLiteral { scanned: usize },

    #[error("no structured payload observed")]
    EmptyCapture,

    #[error("confidence {got} below threshold {min}")]
    BelowThreshold { got: Confidence, min: Confidence },

    #[error("backend error: {0}")]
    Backend(String),
}

/// Every strategy failed; one entry per attempt, in chain order.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionFailure {
    pub attempts: Vec<(StrategyKind, StrategyFailure)>,
}

impl fmt::Display for ExtractionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.attempts.is_empty() {
            return write!(f, "no strategies configured");
        }
        let parts: Vec<String> = self
            .attempts
            .iter()
            .map(|(kind, failure)| format!("{kind}: {failure}"))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

impl std::error::Error for ExtractionFailure {}

/// One way of turning a bundle into a canonical document.
#[async_trait]
pub trait Strategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    async fn attempt(&self, bundle: &Bundle) -> Result<CanonicalDocument, StrategyFailure>;
}

/// Strategies in priority order plus the acceptance threshold.
pub struct StrategyChain {
    strategies: Vec<Box<dyn Strategy>>,
    min_confidence: Confidence,
}

impl StrategyChain {
    pub fn new(min_confidence: Confidence) -> Self {
        Self {
            strategies: Vec::new(),
            min_confidence,
        }
    }

    pub fn with_strategy(mut self, strategy: impl Strategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    /// Manifest, then embedded script, then network capture when a recorder
    /// is available.
    pub fn standard(config: &ExtractionConfig, recorder: Option<Arc<dyn TrafficRecorder>>) -> Self {
        let mut chain = Self::new(config.min_confidence)
            .with_strategy(ManifestStrategy::new(config.manifest_names.clone()))
            .with_strategy(EmbeddedScriptStrategy::new(config.max_literal_bytes));
        if let Some(recorder) = recorder {
            chain = chain.with_strategy(NetworkCaptureStrategy::new(
                recorder,
                std::time::Duration::from_millis(config.network_settle_ms),
                config.max_literal_bytes,
            ));
        }
        chain
    }

    pub fn kinds(&self) -> Vec<StrategyKind> {
        self.strategies.iter().map(|s| s.kind()).collect()
    }

    pub fn min_confidence(&self) -> Confidence {
        self.min_confidence
    }

    /// Run the chain. Later strategies are never invoked once one succeeds.
    pub async fn extract(&self, bundle: &Bundle) -> Result<CanonicalDocument, ExtractionFailure> {
        let mut attempts = Vec::new();
        for strategy in &self.strategies {
            let kind = strategy.kind();
            match strategy.attempt(bundle).await {
                Ok(doc) if doc.confidence >= self.min_confidence => {
                    tracing::info!(
                        "Extracted {} scenes from {} via {} ({})",
                        doc.scenes.len(),
                        bundle.source_url(),
                        kind,
                        doc.confidence
                    );
                    return Ok(doc);
                }
                Ok(doc) => {
                    tracing::debug!("{kind} result below threshold: {}", doc.confidence);
                    attempts.push((
                        kind,
                        StrategyFailure::BelowThreshold {
                            got: doc.confidence,
                            min: self.min_confidence,
                        },
                    ));
                }
                Err(failure) => {
                    tracing::debug!("{kind} failed for {}: {failure}", bundle.source_url());
                    attempts.push((kind, failure));
                }
            }
        }
        Err(ExtractionFailure { attempts })
    }
}

/// Build a document from a shape match, falling back to the URL-derived title.
pub(crate) fn document_from(
    bundle: &Bundle,
    shape: ShapeMatch,
    kind: StrategyKind,
) -> CanonicalDocument {
    let title = shape
        .title
        .unwrap_or_else(|| Candidate::from_url(bundle.source_url()).title);
    CanonicalDocument {
        source_url: bundle.source_url().to_string(),
        title,
        scenes: shape.scenes,
        media: shape.media,
        strategy: kind,
        confidence: shape.confidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed {
        kind: StrategyKind,
        result: Result<Confidence, StrategyFailure>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Strategy for Fixed {
        fn kind(&self) -> StrategyKind {
            self.kind
        }

        async fn attempt(&self, bundle: &Bundle) -> Result<CanonicalDocument, StrategyFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let confidence = self.result.clone()?;
            Ok(CanonicalDocument {
                source_url: bundle.source_url().to_string(),
                title: "t".into(),
                scenes: Vec::new(),
                media: Vec::new(),
                strategy: self.kind,
                confidence,
            })
        }
    }

    fn fixed(
        kind: StrategyKind,
        result: Result<Confidence, StrategyFailure>,
    ) -> (Fixed, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Fixed {
                kind,
                result,
                calls: calls.clone(),
            },
            calls,
        )
    }

    fn bundle() -> Bundle {
        Bundle::new(
            "https://a.b/game/",
            PathBuf::from("/nowhere"),
            PathBuf::from("index.html"),
            vec![],
        )
    }

    #[tokio::test]
    async fn test_first_success_stops_chain() {
        let (a, a_calls) = fixed(StrategyKind::Manifest, Ok(Confidence::Exact));
        let (b, b_calls) = fixed(StrategyKind::EmbeddedScript, Ok(Confidence::Exact));
        let chain = StrategyChain::new(Confidence::Weak).with_strategy(a).with_strategy(b);
        let doc = chain.extract(&bundle()).await.unwrap();
        assert_eq!(doc.strategy, StrategyKind::Manifest);
        assert_eq!(a_calls.load(Ordering::SeqCst), 1);
        assert_eq!(b_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_below_threshold_falls_through() {
        let (a, _) = fixed(StrategyKind::EmbeddedScript, Ok(Confidence::Weak));
        let (b, _) = fixed(StrategyKind::NetworkCapture, Ok(Confidence::Structural));
        let chain = StrategyChain::new(Confidence::Structural).with_strategy(a).with_strategy(b);
        let doc = chain.extract(&bundle()).await.unwrap();
        assert_eq!(doc.strategy, StrategyKind::NetworkCapture);
    }

    #[tokio::test]
    async fn test_exhaustion_lists_every_attempt() {
        let missing = StrategyFailure::MissingManifest("project.json".into());
        let (a, _) = fixed(StrategyKind::Manifest, Err(missing));
        let no_literal = StrategyFailure::NoMatchingLiteral { scanned: 2 };
        let (b, _) = fixed(StrategyKind::EmbeddedScript, Err(no_literal));
        let (c, _) = fixed(StrategyKind::NetworkCapture, Ok(Confidence::Weak));
        let chain = StrategyChain::new(Confidence::Structural)
            .with_strategy(a)
            .with_strategy(b)
            .with_strategy(c);
        let failure = chain.extract(&bundle()).await.unwrap_err();
        assert_eq!(failure.attempts.len(), 3);
        assert_eq!(
            failure.attempts[2].1,
            StrategyFailure::BelowThreshold {
                got: Confidence::Weak,
                min: Confidence::Structural
            }
        );
        let text = failure.to_string();
        assert!(text.contains("manifest"));
        assert!(text.contains("embedded-script"));
        assert!(text.contains("network-capture"));
    }

    #[test]
    fn test_standard_chain_order() {
        let chain = StrategyChain::standard(&ExtractionConfig::default(), None);
        assert_eq!(chain.kinds(), vec![StrategyKind::Manifest, StrategyKind::EmbeddedScript]);
    }
}
