//! Manifest strategy: the bundle ships its content as a structured file.

use async_trait::async_trait;
use serde_json::Value;

use super::literal::js_to_json;
use super::shape::canonicalize;
use super::{document_from, Strategy, StrategyFailure};
use crate::types::{Bundle, CanonicalDocument, Confidence, StrategyKind};

/// Reads the first configured manifest at the bundle root.
pub struct ManifestStrategy {
    names: Vec<String>,
}

impl ManifestStrategy {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }
}

#[async_trait]
impl Strategy for ManifestStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Manifest
    }

    async fn attempt(&self, bundle: &Bundle) -> Result<CanonicalDocument, StrategyFailure> {
        let rel = bundle
            .find_manifest(&self.names)
            .ok_or_else(|| StrategyFailure::MissingManifest(self.names.join(", ")))?;
        let bytes = tokio::fs::read(bundle.path_of(&rel))
            .await
            .map_err(|e| StrategyFailure::InvalidManifest(format!("{}: {e}", rel.display())))?;
        let text = String::from_utf8_lossy(&bytes);

        let value = parse_manifest(&text).ok_or_else(|| {
            StrategyFailure::InvalidManifest(format!("{} is not valid JSON", rel.display()))
        })?;
        let mut shape = canonicalize(&value).ok_or_else(|| {
            StrategyFailure::InvalidManifest(format!("{} has no scene collection", rel.display()))
        })?;
        shape.confidence = Confidence::Exact;
        tracing::debug!(
            "Manifest {} yielded {} scenes",
            rel.display(),
            shape.scenes.len()
        );
        Ok(document_from(bundle, shape, StrategyKind::Manifest))
    }
}

/// Parse a manifest, tolerating Markdown fences, comments, and trailing commas.
pub fn parse_manifest(text: &str) -> Option<Value> {
    let text = text.trim_start_matches('\u{feff}');
    if let Ok(v) = serde_json::from_str(text) {
        return Some(v);
    }
    let unfenced: String = text
        .lines()
        .filter(|l| !matches!(l.trim(), "```" | "```json"))
        .collect::<Vec<_>>()
        .join("\n");
    serde_json::from_str(&js_to_json(&unfenced)).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bundle_with(files: &[(&str, &str)]) -> (tempfile::TempDir, Bundle) {
        let dir = tempfile::tempdir().unwrap();
        for (name, body) in files {
            let path = dir.path().join(name);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, body).unwrap();
        }
        let bundle = Bundle::scan("https://host.example/Quest/", dir.path()).unwrap();
        (dir, bundle)
    }

    #[test]
    fn test_parse_manifest_lenient() {
        let text = "```json\n{\n  // comment\n  \"rows\": [ { \"title\": \"a\" }, ],\n}\n```";
        assert_eq!(parse_manifest(text).unwrap(), json!({ "rows": [ { "title": "a" } ] }));
    }

    #[tokio::test]
    async fn test_manifest_is_exact() {
        let (_dir, bundle) = bundle_with(&[
            ("index.html", "<html></html>"),
            ("project.json", r#"{"rows":[{"title":"A","titleText":"t"}]}"#),
        ]);
        let doc = ManifestStrategy::new(vec!["project.json".into()])
            .attempt(&bundle)
            .await
            .unwrap();
        assert_eq!(doc.confidence, Confidence::Exact);
        assert_eq!(doc.strategy, StrategyKind::Manifest);
        assert_eq!(doc.title, "Quest");
    }

    #[tokio::test]
    async fn test_missing_manifest() {
        let (_dir, bundle) = bundle_with(&[("index.html", "<html></html>")]);
        let err = ManifestStrategy::new(vec!["project.json".into()])
            .attempt(&bundle)
            .await
            .unwrap_err();
        assert!(matches!(err, StrategyFailure::MissingManifest(_)));
    }

    #[tokio::test]
    async fn test_manifest_without_scenes() {
        let (_dir, bundle) = bundle_with(&[("project.json", r#"{"width": 10}"#)]);
        let err = ManifestStrategy::new(vec!["project.json".into()])
            .attempt(&bundle)
            .await
            .unwrap_err();
        assert!(matches!(err, StrategyFailure::InvalidManifest(_)));
    }
}
