//! Duplicate detection against the existing catalog.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::IngestResult;
use crate::types::{normalize_title, normalize_url, Candidate, Fingerprint};

/// One record already in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    pub title: String,
    pub url: String,
}

/// Source of truth for "is this already catalogued?".
#[async_trait]
pub trait CatalogIndex: Send + Sync {
    /// Id of an existing entry matching the fingerprint or URL.
    async fn lookup(&self, fingerprint: &Fingerprint, url: &str) -> IngestResult<Option<String>>;
}

/// Read-only in-memory index keyed by normalized title and normalized URL.
#[derive(Debug, Default, Clone)]
pub struct CatalogSnapshot {
    by_title: HashMap<String, String>,
    by_url: HashMap<String, String>,
}

impl CatalogSnapshot {
    pub fn new(entries: impl IntoIterator<Item = CatalogEntry>) -> Self {
        let mut snapshot = Self::default();
        for entry in entries {
            let title = normalize_title(&entry.title);
            if !title.is_empty() {
                snapshot.by_title.entry(title).or_insert_with(|| entry.id.clone());
            }
            let url = normalize_url(&entry.url);
            if !url.is_empty() {
                snapshot.by_url.entry(url).or_insert(entry.id);
            }
        }
        snapshot
    }

    pub fn len(&self) -> usize {
        self.by_title.len().max(self.by_url.len())
    }

    pub fn is_empty(&self) -> bool {
        self.by_title.is_empty() && self.by_url.is_empty()
    }

    pub fn find(&self, fingerprint: &Fingerprint, url: &str) -> Option<&str> {
        self.by_url
            .get(&normalize_url(url))
            .or_else(|| self.by_title.get(&fingerprint.title))
            .map(String::as_str)
    }
}

#[async_trait]
impl CatalogIndex for CatalogSnapshot {
    async fn lookup(&self, fingerprint: &Fingerprint, url: &str) -> IngestResult<Option<String>> {
        Ok(self.find(fingerprint, url).map(str::to_string))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    New,
    Duplicate(String),
}

pub struct IdentityResolver<'a> {
    index: &'a dyn CatalogIndex,
}

impl<'a> IdentityResolver<'a> {
    pub fn new(index: &'a dyn CatalogIndex) -> Self {
        Self { index }
    }

    pub async fn resolve(&self, candidate: &Candidate) -> IngestResult<Resolution> {
        let fingerprint = Fingerprint::new(&candidate.title, &candidate.source_url);
        match self.index.lookup(&fingerprint, &candidate.source_url).await? {
            Some(id) => {
                tracing::info!(
                    "{} already catalogued as {id} ({fingerprint})",
                    candidate.source_url
                );
                Ok(Resolution::Duplicate(id))
            }
            None => Ok(Resolution::New),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> CatalogSnapshot {
        CatalogSnapshot::new(vec![
            CatalogEntry {
                id: "rec1".into(),
                title: "The Dark Tower".into(),
                url: "https://x.neocities.org/tower/index.html".into(),
            },
            CatalogEntry {
                id: "rec2".into(),
                title: "Other".into(),
                url: "https://y.itch.io/other/".into(),
            },
        ])
    }

    #[tokio::test]
    async fn test_duplicate_by_url() {
        let index = snapshot();
        let resolver = IdentityResolver::new(&index);
        let c = Candidate::from_url("https://x.neocities.org/tower/");
        assert_eq!(resolver.resolve(&c).await.unwrap(), Resolution::Duplicate("rec1".into()));
    }

    #[tokio::test]
    async fn test_duplicate_by_title() {
        let index = snapshot();
        let resolver = IdentityResolver::new(&index);
        let c = Candidate::from_url("https://mirror.example/The_Dark-Tower/");
        assert_eq!(resolver.resolve(&c).await.unwrap(), Resolution::Duplicate("rec1".into()));
    }

    #[tokio::test]
    async fn test_new_candidate() {
        let index = snapshot();
        let resolver = IdentityResolver::new(&index);
        let c = Candidate::from_url("https://z.example/fresh/");
        assert_eq!(resolver.resolve(&c).await.unwrap(), Resolution::New);
    }

    #[test]
    fn test_empty_snapshot() {
        assert!(CatalogSnapshot::default().is_empty());
        assert_eq!(snapshot().len(), 2);
    }
}
