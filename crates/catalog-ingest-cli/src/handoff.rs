//! Filesystem handoff queue consumed by the summarization and upload
//! collaborators.
//!
//! Layout under the output root:
//! `markdown/<name>.md`, `documents/<name>.json`, `screenshots/<name>.webp`,
//! `screenshots/<name>_base64.txt`, `screenshots/<name>.json` (origin).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};

use catalog_ingest::config::{CaptureConfig, HandoffConfig, IngestConfig};
use catalog_ingest::{
    normalize, Candidate, CanonicalDocument, CaptureOrigin, Handoff, ImageArtifact, IngestError,
    IngestResult,
};

#[derive(Serialize)]
struct ImageSidecar<'a> {
    file: String,
    width: u32,
    height: u32,
    byte_size: usize,
    origin: CaptureOrigin,
    placeholder: &'a str,
}

#[derive(Serialize, Deserialize)]
struct ScreenshotMeta {
    origin: CaptureOrigin,
}

#[derive(Serialize)]
struct DocumentSidecar<'a> {
    #[serde(flatten)]
    document: &'a CanonicalDocument,
    image: ImageSidecar<'a>,
}

pub struct HandoffQueue {
    root: PathBuf,
    capture: CaptureConfig,
    config: HandoffConfig,
}

impl HandoffQueue {
    pub fn new(config: &IngestConfig) -> Self {
        Self {
            root: config.output.root.clone(),
            capture: config.capture.clone(),
            config: config.handoff.clone(),
        }
    }

    pub fn markdown_path(&self, name: &str) -> PathBuf {
        self.root.join("markdown").join(format!("{name}.md"))
    }

    pub fn document_path(&self, name: &str) -> PathBuf {
        self.root.join("documents").join(format!("{name}.json"))
    }

    pub fn screenshot_path(&self, name: &str) -> PathBuf {
        self.root.join("screenshots").join(format!("{name}.webp"))
    }

    pub fn placeholder_path(&self, name: &str) -> PathBuf {
        self.root.join("screenshots").join(format!("{name}_base64.txt"))
    }

    pub fn screenshot_meta_path(&self, name: &str) -> PathBuf {
        self.root.join("screenshots").join(format!("{name}.json"))
    }

    /// Origin recorded next to a stored screenshot; `Auto` when none was kept.
    async fn stored_origin(&self, name: &str) -> CaptureOrigin {
        let path = self.screenshot_meta_path(name);
        let Ok(bytes) = tokio::fs::read(&path).await else {
            return CaptureOrigin::Auto;
        };
        match serde_json::from_slice::<ScreenshotMeta>(&bytes) {
            Ok(meta) => meta.origin,
            Err(e) => {
                tracing::warn!("Ignoring unreadable {}: {e}", path.display());
                CaptureOrigin::Auto
            }
        }
    }

    /// Write the WebP and placeholder, replacing earlier files for `name`.
    pub async fn store_artifact(
        &self,
        name: &str,
        artifact: &ImageArtifact,
    ) -> IngestResult<PathBuf> {
        let webp = self.screenshot_path(name);
        write_file(&webp, &artifact.encoded).await?;
        write_file(&self.placeholder_path(name), artifact.placeholder.as_bytes()).await?;
        let meta = serde_json::to_vec(&ScreenshotMeta {
            origin: artifact.origin,
        })?;
        write_file(&self.screenshot_meta_path(name), &meta).await?;
        tracing::info!(
            "Stored {} ({}x{}, {} bytes, {:?})",
            webp.display(),
            artifact.width,
            artifact.height,
            artifact.byte_size(),
            artifact.origin
        );
        Ok(webp)
    }

    async fn summarize(&self, markdown: &Path) {
        let Some(command) = self.config.summarize_command.as_ref().filter(|c| !c.is_empty()) else {
            return;
        };
        let Some(file_name) = markdown.file_name().and_then(|n| n.to_str()) else {
            return;
        };
        for mode in &self.config.summarize_modes {
            tracing::info!("Running summarization for {file_name} in {mode} mode");
            if let Err(e) = self.run_with_retry(command, file_name, mode).await {
                tracing::error!("Summarization ({mode}) failed for {file_name}: {e:#}");
            }
        }
    }

    async fn run_with_retry(&self, command: &[String], file_name: &str, mode: &str) -> Result<()> {
        let attempts = self.config.max_attempts.max(1);
        let mut last = None;
        for attempt in 1..=attempts {
            match run_once(command, file_name, mode).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!("Summarize attempt {attempt}/{attempts} failed: {e:#}");
                    last = Some(e);
                }
            }
            if attempt < attempts {
                let jitter = rand::thread_rng().gen_range(0.7..1.3);
                let delay = (self.config.retry_delay_ms as f64 * jitter) as u64;
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }
        Err(last.unwrap_or_else(|| anyhow::anyhow!("summarize never ran")))
    }
}

async fn run_once(command: &[String], file_name: &str, mode: &str) -> Result<()> {
    let (program, args) = command.split_first().context("empty summarize command")?;
    let output = tokio::process::Command::new(program)
        .args(args)
        .arg(file_name)
        .arg("--mode")
        .arg(mode)
        .output()
        .await
        .with_context(|| format!("failed to spawn {program}"))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("{program} exited with {}: {}", output.status, stderr.trim());
    }
    Ok(())
}

async fn write_file(path: &Path, bytes: &[u8]) -> IngestResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes).await?;
    Ok(())
}

#[async_trait]
impl Handoff for HandoffQueue {
    async fn hand_off(
        &self,
        candidate: &Candidate,
        document: &CanonicalDocument,
        artifact: &ImageArtifact,
    ) -> IngestResult<()> {
        let name = candidate.output_name();
        let webp = self.store_artifact(&name, artifact).await?;

        let markdown = self.markdown_path(&name);
        write_file(&markdown, document.to_markdown().as_bytes()).await?;

        let sidecar = DocumentSidecar {
            document,
            image: ImageSidecar {
                file: webp.display().to_string(),
                width: artifact.width,
                height: artifact.height,
                byte_size: artifact.byte_size(),
                origin: artifact.origin,
                placeholder: &artifact.placeholder,
            },
        };
        let json = serde_json::to_vec_pretty(&sidecar)?;
        write_file(&self.document_path(&name), &json).await?;
        tracing::info!(
            "Handed off {name}: {} scenes via {} ({})",
            document.scenes.len(),
            document.strategy,
            document.confidence
        );

        self.summarize(&markdown).await;
        Ok(())
    }

    async fn existing_artifact(&self, name: &str) -> IngestResult<Option<ImageArtifact>> {
        let path = self.screenshot_path(name);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if bytes.is_empty() {
            return Ok(None);
        }
        let origin = self.stored_origin(name).await;
        let artifact = normalize(&bytes, &self.capture, origin)
            .map_err(|e| IngestError::Handoff(format!("{} is unreadable: {e}", path.display())))?;
        Ok(Some(artifact))
    }
}
