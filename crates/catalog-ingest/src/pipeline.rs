//! Per-candidate orchestration: resolve, fetch, extract, capture, hand off.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::capture::CaptureController;
use crate::config::IngestConfig;
use crate::error::{IngestError, IngestResult};
use crate::extract::StrategyChain;
use crate::fetch::BundleFetcher;
use crate::handoff::Handoff;
use crate::identity::{CatalogIndex, IdentityResolver, Resolution};
use crate::report::RunSummary;
use crate::types::{Candidate, CandidateStatus, Stage};

/// A run stopped by a fatal error. `summary` holds every candidate settled
/// before it.
#[derive(thiserror::Error, Debug)]
#[error("Run aborted after {} candidates: {error}", .summary.processed())]
pub struct RunAborted {
    pub summary: RunSummary,
    #[source]
    pub error: IngestError,
}

pub struct Pipeline {
    index: Arc<dyn CatalogIndex>,
    fetcher: Arc<dyn BundleFetcher>,
    chain: StrategyChain,
    capture: CaptureController,
    handoff: Arc<dyn Handoff>,
    bundles: PathBuf,
    force_capture: bool,
}

impl Pipeline {
    pub fn new(
        config: &IngestConfig,
        index: Arc<dyn CatalogIndex>,
        fetcher: Arc<dyn BundleFetcher>,
        chain: StrategyChain,
        capture: CaptureController,
        handoff: Arc<dyn Handoff>,
    ) -> Self {
        Self {
            index,
            fetcher,
            chain,
            capture,
            handoff,
            bundles: config.output.bundles.clone(),
            force_capture: config.force_capture,
        }
    }

    /// Process every URL in order. A failing candidate never stops the
    /// batch; only a fatal configuration error does.
    pub async fn run(&self, urls: &[String]) -> Result<RunSummary, RunAborted> {
        let mut summary = RunSummary::default();
        for (i, url) in urls.iter().enumerate() {
            tracing::info!("[{}/{}] {url}", i + 1, urls.len());
            let candidate = match self.process(url).await {
                Ok(candidate) => candidate,
                Err(error) => {
                    tracing::error!("Aborting run at {url}: {error}");
                    summary.aborted = Some(format!("{url}: {error}"));
                    return Err(RunAborted { summary, error });
                }
            };
            tracing::info!("{url}: {}", candidate.status);
            summary.record(&candidate);
        }
        Ok(summary)
    }

    /// Drive one candidate to a terminal status.
    pub async fn process(&self, url: &str) -> IngestResult<Candidate> {
        let mut candidate = Candidate::from_url(url);

        let resolved = IdentityResolver::new(self.index.as_ref()).resolve(&candidate).await;
        match settle(&mut candidate, Stage::Resolve, resolved)? {
            Some(Resolution::New) => candidate.advance(CandidateStatus::Resolved)?,
            Some(Resolution::Duplicate(existing_id)) => {
                candidate.advance(CandidateStatus::Duplicate { existing_id })?;
                return Ok(candidate);
            }
            None => return Ok(candidate),
        }

        let dest = bundle_dir(&self.bundles, &candidate);
        let fetched = self.fetcher.fetch(&candidate, &dest).await;
        let Some((bundle, stats)) = settle(&mut candidate, Stage::Fetch, fetched)? else {
            return Ok(candidate);
        };
        tracing::info!("Fetched {}: {stats}", dest.display());
        candidate.advance(CandidateStatus::Fetched)?;

        let extracted = self.chain.extract(&bundle).await.map_err(Into::into);
        let Some(document) = settle(&mut candidate, Stage::Extract, extracted)? else {
            return Ok(candidate);
        };
        candidate.advance(CandidateStatus::Extracted)?;

        let name = candidate.output_name();
        let existing = if self.force_capture {
            None
        } else {
            self.handoff.existing_artifact(&name).await.unwrap_or_else(|e| {
                tracing::warn!("Could not check for an existing screenshot of {name}: {e}");
                None
            })
        };
        let captured = match existing {
            Some(artifact) => {
                tracing::info!("Reusing existing screenshot for {name}");
                Ok(artifact)
            }
            None => self.capture.run(&candidate.source_url, &name).await,
        };
        let Some(artifact) = settle(&mut candidate, Stage::Capture, captured)? else {
            return Ok(candidate);
        };
        candidate.advance(CandidateStatus::Captured)?;

        let handed = self.handoff.hand_off(&candidate, &document, &artifact).await;
        if settle(&mut candidate, Stage::Handoff, handed)?.is_some() {
            candidate.advance(CandidateStatus::HandedOff)?;
        }
        Ok(candidate)
    }
}

/// `<bundles>/<host>/<slug>`, mirroring the source URL.
pub fn bundle_dir(root: &Path, candidate: &Candidate) -> PathBuf {
    let host = if candidate.host().is_empty() {
        "unknown"
    } else {
        candidate.host()
    };
    root.join(host).join(candidate.slug())
}

/// Turn a stage error into a `Failed` status, passing fatal errors through.
fn settle<T>(
    candidate: &mut Candidate,
    stage: Stage,
    result: IngestResult<T>,
) -> IngestResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            tracing::warn!("{} failed at {stage}: {e}", candidate.source_url);
            candidate.fail(stage, e.to_string(), e.requires_manual_intervention());
            Ok(None)
        }
    }
}
