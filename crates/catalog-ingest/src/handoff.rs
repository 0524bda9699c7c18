//! Downstream handoff seam.

use async_trait::async_trait;

use crate::error::IngestResult;
use crate::types::{Candidate, CanonicalDocument, ImageArtifact};

/// Receives the finished document and artifact of a candidate.
#[async_trait]
pub trait Handoff: Send + Sync {
    async fn hand_off(
        &self,
        candidate: &Candidate,
        document: &CanonicalDocument,
        artifact: &ImageArtifact,
    ) -> IngestResult<()>;

    /// A previously stored artifact for `name`, if one exists and is non-empty.
    async fn existing_artifact(&self, name: &str) -> IngestResult<Option<ImageArtifact>>;
}
