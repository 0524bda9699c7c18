//! Error taxonomy for the ingestion pipeline.

use crate::extract::ExtractionFailure;

/// All errors that can occur while ingesting a candidate.
#[derive(thiserror::Error, Debug)]
pub enum IngestError {
    /// Network failure that survived every retry.
    #[error("Fetch of {url} failed after {attempts} attempts: {message}")]
    TransientFetch {
        url: String,
        attempts: u32,
        message: String,
    },

    #[error("Extraction exhausted: {0}")]
    ExtractionExhausted(ExtractionFailure),

    /// The operator never acted within the polling budget.
    #[error("Capture timed out after {polls} polls; manual intervention required")]
    CaptureTimeout { polls: u32 },

    /// Missing or invalid configuration/credentials. Aborts the whole run.
    #[error("Fatal configuration error: {0}")]
    FatalConfig(String),

    #[error("Surface error: {0}")]
    Surface(String),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Handoff error: {0}")]
    Handoff(String),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl IngestError {
    /// Only configuration errors may terminate a run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, IngestError::FatalConfig(_))
    }

    pub fn requires_manual_intervention(&self) -> bool {
        matches!(self, IngestError::CaptureTimeout { .. })
    }
}

impl From<ExtractionFailure> for IngestError {
    fn from(f: ExtractionFailure) -> Self {
        IngestError::ExtractionExhausted(f)
    }
}

/// Convenience result type.
pub type IngestResult<T> = Result<T, IngestError>;
