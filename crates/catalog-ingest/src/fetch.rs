//! Bundle acquisition seam.

use std::fmt;
use std::path::Path;

use async_trait::async_trait;

use crate::error::IngestResult;
use crate::types::{Bundle, Candidate};

/// Per-bundle download counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchStats {
    pub processed: usize,
    pub downloaded: usize,
    /// Served from the local copy (ETag unchanged).
    pub cached: usize,
    pub failed: usize,
}

impl fmt::Display for FetchStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} processed, {} downloaded, {} cached, {} failed",
            self.processed, self.downloaded, self.cached, self.failed
        )
    }
}

/// Downloads a candidate's file set into `dest`.
#[async_trait]
pub trait BundleFetcher: Send + Sync {
    /// Fails with `TransientFetch` only when the entry page cannot be
    /// retrieved; individual resource failures are counted in the stats.
    async fn fetch(&self, candidate: &Candidate, dest: &Path) -> IngestResult<(Bundle, FetchStats)>;
}
