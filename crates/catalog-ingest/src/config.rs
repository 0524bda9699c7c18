//! Configuration loading and resolution.
//!
//! The whole run is configured by one [`IngestConfig`] value, loaded once at
//! startup and passed by reference to every component constructor.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{IngestError, IngestResult};
use crate::types::Confidence;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "CATALOG_INGEST_CONFIG";

/// Config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "catalog-ingest.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub catalog: CatalogConfig,
    pub fetch: FetchConfig,
    pub extraction: ExtractionConfig,
    pub capture: CaptureConfig,
    pub handoff: HandoffConfig,
    pub output: OutputConfig,
    /// Re-capture even when a screenshot already exists in the queue.
    pub force_capture: bool,
    /// File the config was read from, if any.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub base_url: String,
    pub email: Option<String>,
    pub password: Option<String>,
    pub page_size: u32,
    pub timeout_ms: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: "https://cyoa.cafe/api".to_string(),
            email: None,
            password: None,
            page_size: 200,
            timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_ms: u64,
    /// Total attempts per request, including the first.
    pub max_attempts: u32,
    /// Base delay for exponential backoff.
    pub backoff_ms: u64,
    pub max_workers: usize,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_attempts: 3,
            backoff_ms: 1_000,
            max_workers: 5,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36"
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Manifest file names, tried in order at the bundle root.
    pub manifest_names: Vec<String>,
    /// Documents below this confidence are rejected.
    pub min_confidence: Confidence,
    pub max_literal_bytes: usize,
    /// How long the network recorder lets the page settle.
    pub network_settle_ms: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            manifest_names: vec!["project.json".to_string()],
            min_confidence: Confidence::Weak,
            max_literal_bytes: 20 * 1024 * 1024,
            network_settle_ms: 5_000,
        }
    }
}

/// Width and height in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
}

impl Geometry {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Viewport while the operator interacts.
    pub viewport: Geometry,
    /// Viewport the final frame is taken at.
    pub geometry: Geometry,
    /// Box the artifact is cropped to and fitted in.
    pub output: Geometry,
    pub placeholder: Geometry,
    pub navigation_timeout_ms: u64,
    pub poll_interval_ms: u64,
    /// Polls allowed in `InteractionReady` before timing out.
    pub poll_budget: u32,
    /// Synthesize `AutoFinish` after this many idle polls.
    pub auto_finish_after: Option<u32>,
    pub scroll_step: u32,
    pub max_sessions: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            viewport: Geometry::new(1280, 900),
            geometry: Geometry::new(900, 1200),
            output: Geometry::new(600, 800),
            placeholder: Geometry::new(100, 133),
            navigation_timeout_ms: 60_000,
            poll_interval_ms: 500,
            poll_budget: 1_200,
            auto_finish_after: None,
            scroll_step: 400,
            max_sessions: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandoffConfig {
    /// External summarizer, invoked as `<command...> <file.md> --mode <mode>`.
    pub summarize_command: Option<Vec<String>>,
    pub summarize_modes: Vec<String>,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            summarize_command: None,
            summarize_modes: vec!["sent_search".to_string(), "catalog".to_string()],
            max_attempts: 3,
            retry_delay_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Handoff queue root (markdown/, documents/, screenshots/).
    pub root: PathBuf,
    pub bundles: PathBuf,
    pub logs: PathBuf,
    pub report_log: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            bundles: PathBuf::from("downloaded_games"),
            logs: PathBuf::from("logs"),
            report_log: PathBuf::from("log.txt"),
        }
    }
}

impl IngestConfig {
    /// Load the config file (explicit path, `$CATALOG_INGEST_CONFIG`, or
    /// `./catalog-ingest.json`), then apply environment overrides.
    pub fn load(explicit: Option<&Path>) -> IngestResult<Self> {
        let mut config = match resolve_config_path(explicit) {
            Some(path) => {
                let text = std::fs::read_to_string(&path).map_err(|e| {
                    IngestError::FatalConfig(format!("cannot read {}: {e}", path.display()))
                })?;
                let mut config = Self::from_json(&text)?;
                config.source = Some(path);
                config
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(text: &str) -> IngestResult<Self> {
        serde_json::from_str(text)
            .map_err(|e| IngestError::FatalConfig(format!("invalid config: {e}")))
    }

    /// Overlay `CATALOG_EMAIL`, `CATALOG_PASSWORD`, `CATALOG_API_URL`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(email) = lookup("CATALOG_EMAIL").filter(|v| !v.is_empty()) {
            self.catalog.email = Some(email);
        }
        if let Some(password) = lookup("CATALOG_PASSWORD").filter(|v| !v.is_empty()) {
            self.catalog.password = Some(password);
        }
        if let Some(url) = lookup("CATALOG_API_URL").filter(|v| !v.is_empty()) {
            self.catalog.base_url = url;
        }
    }

    pub fn validate(&self) -> IngestResult<()> {
        let c = &self.capture;
        if c.poll_budget == 0 || c.poll_interval_ms == 0 {
            return Err(IngestError::FatalConfig(
                "capture.poll_budget and capture.poll_interval_ms must be positive".into(),
            ));
        }
        for (name, g) in [
            ("viewport", c.viewport),
            ("geometry", c.geometry),
            ("output", c.output),
            ("placeholder", c.placeholder),
        ] {
            if g.width == 0 || g.height == 0 {
                return Err(IngestError::FatalConfig(format!(
                    "capture.{name} must have non-zero width and height"
                )));
            }
        }
        if self.fetch.max_attempts == 0 {
            return Err(IngestError::FatalConfig(
                "fetch.max_attempts must be at least 1".into(),
            ));
        }
        if self.extraction.manifest_names.is_empty() {
            return Err(IngestError::FatalConfig(
                "extraction.manifest_names must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Catalog credentials, or a fatal error naming what is missing.
    pub fn require_credentials(&self) -> IngestResult<(String, String)> {
        match (&self.catalog.email, &self.catalog.password) {
            (Some(e), Some(p)) => Ok((e.clone(), p.clone())),
            (None, _) => Err(IngestError::FatalConfig(
                "catalog email is not set (CATALOG_EMAIL)".into(),
            )),
            (_, None) => Err(IngestError::FatalConfig(
                "catalog password is not set (CATALOG_PASSWORD)".into(),
            )),
        }
    }
}

fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Ok(env_path) = std::env::var(CONFIG_ENV) {
        return Some(PathBuf::from(env_path));
    }
    let cwd = PathBuf::from(DEFAULT_CONFIG_FILE);
    cwd.exists().then_some(cwd)
}
