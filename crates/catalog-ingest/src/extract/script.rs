//! Embedded-script strategy: content baked into the bundle's JavaScript.

use async_trait::async_trait;
use scraper::{Html, Selector};

use super::literal::{parse_literal, scan_anchored_literals};
use super::shape::{canonicalize, pick_best, ShapeMatch};
use super::{document_from, Strategy, StrategyFailure};
use crate::types::{Bundle, CanonicalDocument, StrategyKind};

/// Scans `.js` files and inline `<script>` bodies for scene literals.
pub struct EmbeddedScriptStrategy {
    max_literal_bytes: usize,
}

impl EmbeddedScriptStrategy {
    pub fn new(max_literal_bytes: usize) -> Self {
        Self { max_literal_bytes }
    }

    fn best_in(&self, source: &str) -> Option<ShapeMatch> {
        let literals = scan_anchored_literals(source, self.max_literal_bytes);
        pick_best(
            literals
                .into_iter()
                .filter_map(parse_literal)
                .filter_map(|v| canonicalize(&v)),
        )
    }
}

#[async_trait]
impl Strategy for EmbeddedScriptStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::EmbeddedScript
    }

    async fn attempt(&self, bundle: &Bundle) -> Result<CanonicalDocument, StrategyFailure> {
        let mut sources = Vec::new();
        for rel in bundle.files_with_extension("js") {
            match tokio::fs::read(bundle.path_of(rel)).await {
                Ok(bytes) => sources.push(String::from_utf8_lossy(&bytes).into_owned()),
                Err(e) => tracing::debug!("Skipping {}: {e}", rel.display()),
            }
        }
        let pages: Vec<_> = bundle
            .files_with_extension("html")
            .chain(bundle.files_with_extension("htm"))
            .cloned()
            .collect();
        for rel in pages {
            if let Ok(bytes) = tokio::fs::read(bundle.path_of(&rel)).await {
                sources.extend(inline_scripts(&String::from_utf8_lossy(&bytes)));
            }
        }

        let scanned = sources.len();
        let best = pick_best(sources.iter().filter_map(|src| self.best_in(src)))
            .ok_or(StrategyFailure::NoMatchingLiteral { scanned })?;
        tracing::debug!(
            "Embedded literal with {} scenes ({}) across {} sources",
            best.scenes.len(),
            best.confidence,
            scanned
        );
        Ok(document_from(bundle, best, StrategyKind::EmbeddedScript))
    }
}

/// Bodies of `<script>` elements without a `src` attribute.
pub fn inline_scripts(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let Ok(sel) = Selector::parse("script:not([src])") else {
        return Vec::new();
    };
    document
        .select(&sel)
        .map(|el| el.text().collect::<String>())
        .filter(|body| !body.trim().is_empty())
        .collect()
}
