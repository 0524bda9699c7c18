//! catalog-ingest: strategy extraction, operator-assisted capture, and
//! duplicate resolution for web game bundles.

pub mod capture;
pub mod config;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod handoff;
pub mod identity;
pub mod pipeline;
pub mod report;
pub mod types;

pub use capture::{
    normalize, CaptureController, CapturePhase, CaptureSession, CaptureSurface, OperatorSignal,
    SignalInbox, SurfaceProvider,
};
pub use config::IngestConfig;
pub use error::{IngestError, IngestResult};
pub use extract::{
    CapturedPayload, ExtractionFailure, Strategy, StrategyChain, StrategyFailure, TrafficRecorder,
};
pub use fetch::{BundleFetcher, FetchStats};
pub use handoff::Handoff;
pub use identity::{CatalogEntry, CatalogIndex, CatalogSnapshot, IdentityResolver, Resolution};
pub use pipeline::{Pipeline, RunAborted};
pub use report::RunSummary;
pub use types::*;
