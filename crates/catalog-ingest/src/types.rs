//! Core data types: candidates, bundles, canonical documents, and artifacts.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{IngestError, IngestResult};

/// Pipeline stage a candidate was in when it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Resolve,
    Fetch,
    Extract,
    Capture,
    Handoff,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolve => write!(f, "resolve"),
            Self::Fetch => write!(f, "fetch"),
            Self::Extract => write!(f, "extract"),
            Self::Capture => write!(f, "capture"),
            Self::Handoff => write!(f, "handoff"),
        }
    }
}

/// Lifecycle status of a candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CandidateStatus {
    Queued,
    Resolved,
    Fetched,
    Extracted,
    Captured,
    HandedOff,
    Duplicate {
        existing_id: String,
    },
    Failed {
        stage: Stage,
        reason: String,
        manual_intervention: bool,
    },
}

impl CandidateStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::HandedOff | Self::Duplicate { .. } | Self::Failed { .. }
        )
    }

    /// Whether `self -> to` is a legal transition.
    pub fn can_transition(&self, to: &CandidateStatus) -> bool {
        use CandidateStatus::*;
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, to),
            (_, Failed { .. })
                | (Queued, Resolved)
                | (Queued, Duplicate { .. })
                | (Resolved, Fetched)
                | (Fetched, Extracted)
                | (Extracted, Captured)
                | (Captured, HandedOff)
        )
    }

    /// The stage that runs next from this status.
    pub fn next_stage(&self) -> Option<Stage> {
        match self {
            Self::Queued => Some(Stage::Resolve),
            Self::Resolved => Some(Stage::Fetch),
            Self::Fetched => Some(Stage::Extract),
            Self::Extracted => Some(Stage::Capture),
            Self::Captured => Some(Stage::Handoff),
            _ => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Resolved => "resolved",
            Self::Fetched => "fetched",
            Self::Extracted => "extracted",
            Self::Captured => "captured",
            Self::HandedOff => "handed_off",
            Self::Duplicate { .. } => "duplicate",
            Self::Failed { .. } => "failed",
        }
    }
}

impl fmt::Display for CandidateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Duplicate-detection key: normalized title plus host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    pub title: String,
    pub host: String,
}

impl Fingerprint {
    pub fn new(title: &str, url: &str) -> Self {
        let host = url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
            .unwrap_or_default();
        Self {
            title: normalize_title(title),
            host,
        }
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.title, self.host)
    }
}

/// Lowercase, treat `_`/`-` as spaces, drop punctuation, collapse whitespace.
pub fn normalize_title(title: &str) -> String {
    let mapped: String = title
        .chars()
        .map(|c| if c == '_' || c == '-' { ' ' } else { c })
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .to_lowercase();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Strip trailing slashes and a trailing `/index.html`.
pub fn normalize_url(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    let trimmed = trimmed.strip_suffix("/index.html").unwrap_or(trimmed);
    trimmed.trim_end_matches('/').to_string()
}

/// One URL moving through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub source_url: String,
    pub title: String,
    pub status: CandidateStatus,
    pub fingerprint: Fingerprint,
}

impl Candidate {
    /// Create a queued candidate, deriving its title from the URL path.
    pub fn from_url(url: &str) -> Self {
        let source_url = url.trim().to_string();
        let title = title_from_url(&source_url);
        let fingerprint = Fingerprint::new(&title, &source_url);
        Self {
            source_url,
            title,
            status: CandidateStatus::Queued,
            fingerprint,
        }
    }

    /// File-system safe last path segment, or the host for a bare domain.
    pub fn slug(&self) -> String {
        let raw = last_segment(&self.source_url).unwrap_or_else(|| self.fingerprint.host.clone());
        sanitize_file_name(&raw)
    }

    /// Handoff file stem: `<host>_<slug>`, so equal slugs on different
    /// hosts never share outputs.
    pub fn output_name(&self) -> String {
        let slug = self.slug();
        let host = match self.host() {
            "" => "unknown".to_string(),
            host => sanitize_file_name(host),
        };
        if slug == host {
            slug
        } else {
            format!("{host}_{slug}")
        }
    }

    pub fn host(&self) -> &str {
        &self.fingerprint.host
    }

    /// Move to `to`, rejecting transitions the lifecycle does not allow.
    pub fn advance(&mut self, to: CandidateStatus) -> IngestResult<()> {
        if !self.status.can_transition(&to) {
            return Err(IngestError::InvalidTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        Ok(())
    }

    pub fn fail(&mut self, stage: Stage, reason: impl Into<String>, manual_intervention: bool) {
        let failed = CandidateStatus::Failed {
            stage,
            reason: reason.into(),
            manual_intervention,
        };
        if self.status.can_transition(&failed) {
            self.status = failed;
        }
    }
}

fn sanitize_file_name(raw: &str) -> String {
    raw.chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' | ' ' => '_',
            c => c,
        })
        .collect()
}

fn last_segment(url: &str) -> Option<String> {
    let normalized = normalize_url(url);
    let parsed = url::Url::parse(&normalized).ok()?;
    parsed
        .path_segments()?
        .filter(|s| !s.is_empty())
        .last()
        .map(|s| s.to_string())
}

fn title_from_url(url: &str) -> String {
    match last_segment(url) {
        Some(seg) => seg.replace('_', " "),
        None => url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .unwrap_or_else(|| url.to_string()),
    }
}

/// The fetched file set of one candidate. Immutable once built.
#[derive(Debug, Clone)]
pub struct Bundle {
    source_url: String,
    root: PathBuf,
    entry: PathBuf,
    files: Vec<PathBuf>,
}

impl Bundle {
    pub fn new(source_url: &str, root: PathBuf, entry: PathBuf, mut files: Vec<PathBuf>) -> Self {
        files.sort();
        files.dedup();
        Self {
            source_url: source_url.to_string(),
            root,
            entry,
            files,
        }
    }

    /// Build a bundle from whatever is on disk under `root`.
    pub fn scan(source_url: &str, root: &Path) -> IngestResult<Self> {
        let mut files = Vec::new();
        collect_files(root, root, &mut files)?;
        files.retain(|f| f != Path::new("metadata.json"));
        Ok(Self::new(
            source_url,
            root.to_path_buf(),
            PathBuf::from("index.html"),
            files,
        ))
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Entry page, relative to the root.
    pub fn entry(&self) -> &Path {
        &self.entry
    }

    /// All files, relative to the root, sorted.
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn path_of(&self, relative: &Path) -> PathBuf {
        self.root.join(relative)
    }

    /// First of `names` present at the bundle root.
    pub fn find_manifest(&self, names: &[String]) -> Option<PathBuf> {
        names
            .iter()
            .map(PathBuf::from)
            .find(|name| self.files.iter().any(|f| f == name))
    }

    pub fn files_with_extension<'a>(&'a self, ext: &'a str) -> impl Iterator<Item = &'a PathBuf> {
        self.files.iter().filter(move |f| {
            f.extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case(ext))
                .unwrap_or(false)
        })
    }
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> IngestResult<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_files(root, &path, out)?;
        } else if let Ok(rel) = path.strip_prefix(root) {
            out.push(rel.to_path_buf());
        }
    }
    Ok(())
}

/// Which extraction strategy produced a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Manifest,
    EmbeddedScript,
    NetworkCapture,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manifest => write!(f, "manifest"),
            Self::EmbeddedScript => write!(f, "embedded-script"),
            Self::NetworkCapture => write!(f, "network-capture"),
        }
    }
}

/// Coarse ordinal confidence; not a probability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Weak,
    Structural,
    Exact,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Weak => write!(f, "weak"),
            Self::Structural => write!(f, "structural"),
            Self::Exact => write!(f, "exact"),
        }
    }
}

/// A choice inside a scene.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChoiceBlock {
    pub title: Option<String>,
    pub text: Option<String>,
}

/// One scene/page/row of narrative content.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SceneBlock {
    pub title: Option<String>,
    pub text: Option<String>,
    pub choices: Vec<ChoiceBlock>,
}

/// Strategy-agnostic representation of a bundle's narrative content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalDocument {
    pub source_url: String,
    pub title: String,
    pub scenes: Vec<SceneBlock>,
    pub media: Vec<String>,
    pub strategy: StrategyKind,
    pub confidence: Confidence,
}

impl CanonicalDocument {
    pub fn choice_count(&self) -> usize {
        self.scenes.iter().map(|s| s.choices.len()).sum()
    }

    /// Scenes plus choices; used to rank competing literals.
    pub fn weight(&self) -> usize {
        self.scenes.len() + self.choice_count()
    }

    /// Markdown consumed by the summarization collaborator.
    pub fn to_markdown(&self) -> String {
        let mut out = format!(
            "Game URL: {}\n\nPossible title: {}\n\n",
            self.source_url, self.title
        );
        for scene in &self.scenes {
            if scene.title.is_some() || scene.text.is_some() {
                out.push_str(&format!("## {}\n\n", scene.title.as_deref().unwrap_or("")));
            }
            if let Some(text) = &scene.text {
                out.push_str(text);
                out.push_str("\n\n");
            }
            for choice in &scene.choices {
                if let Some(title) = &choice.title {
                    out.push_str(&format!("### {title}\n\n"));
                }
                if let Some(text) = &choice.text {
                    out.push_str(text);
                    out.push_str("\n\n");
                }
            }
        }
        out
    }
}

/// How the image artifact was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureOrigin {
    Auto,
    Manual,
    Uploaded,
}

/// The single normalized image for a candidate.
#[derive(Debug, Clone)]
pub struct ImageArtifact {
    /// Bytes as captured or uploaded.
    pub raw: Vec<u8>,
    /// Normalized WebP bytes.
    pub encoded: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub origin: CaptureOrigin,
    /// `data:image/webp;base64,...` thumbnail.
    pub placeholder: String,
}

impl ImageArtifact {
    pub fn byte_size(&self) -> usize {
        self.encoded.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_title_from_url() {
        let c = Candidate::from_url("https://example.neocities.org/My_Great_Game/index.html");
        assert_eq!(c.title, "My Great Game");
        assert_eq!(c.slug(), "My_Great_Game");
        assert_eq!(c.fingerprint.title, "my great game");
        assert_eq!(c.host(), "example.neocities.org");
    }

    #[test]
    fn test_candidate_without_path_uses_host() {
        let c = Candidate::from_url("https://game.itch.io/");
        assert_eq!(c.title, "game.itch.io");
        assert_eq!(c.output_name(), "game.itch.io");
    }

    #[test]
    fn test_output_name_is_host_qualified() {
        let alice = Candidate::from_url("https://alice.github.io/cyoa/");
        let bob = Candidate::from_url("https://bob.github.io/cyoa/index.html");
        assert_eq!(alice.slug(), bob.slug());
        assert_eq!(alice.output_name(), "alice.github.io_cyoa");
        assert_eq!(bob.output_name(), "bob.github.io_cyoa");
    }

    #[test]
    fn test_output_name_without_host() {
        let c = Candidate::from_url("not a url/My Game");
        assert!(c.output_name().starts_with("unknown_"));
        assert!(!c.output_name().contains(' '));
    }

    #[test]
    fn test_normalize_title() {
        assert_eq!(normalize_title("  The_Dark-Tower!! "), "the dark tower");
        assert_eq!(normalize_title("Cafe   Story"), "cafe story");
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("https://a.b/game/index.html"), "https://a.b/game");
        assert_eq!(normalize_url("https://a.b/game///"), "https://a.b/game");
    }

    #[test]
    fn test_forward_transitions_only() {
        let mut c = Candidate::from_url("https://a.b/game/");
        assert!(c.advance(CandidateStatus::Fetched).is_err());
        c.advance(CandidateStatus::Resolved).unwrap();
        c.advance(CandidateStatus::Fetched).unwrap();
        c.advance(CandidateStatus::Extracted).unwrap();
        c.advance(CandidateStatus::Captured).unwrap();
        c.advance(CandidateStatus::HandedOff).unwrap();
        assert!(c.advance(CandidateStatus::Queued).is_err());
    }

    #[test]
    fn test_duplicate_only_from_queued() {
        let mut c = Candidate::from_url("https://a.b/game/");
        c.advance(CandidateStatus::Resolved).unwrap();
        let dup = CandidateStatus::Duplicate {
            existing_id: "x".into(),
        };
        assert!(c.advance(dup).is_err());
    }

    #[test]
    fn test_failed_is_terminal() {
        let mut c = Candidate::from_url("https://a.b/game/");
        c.fail(Stage::Fetch, "boom", false);
        assert!(c.status.is_terminal());
        c.fail(Stage::Extract, "again", false);
        match &c.status {
            CandidateStatus::Failed { stage, .. } => assert_eq!(*stage, Stage::Fetch),
            other => panic!("unexpected status {other}"),
        }
    }

    #[test]
    fn test_confidence_ordering() {
        assert!(Confidence::Exact > Confidence::Structural);
        assert!(Confidence::Structural > Confidence::Weak);
    }

    #[test]
    fn test_markdown_rendering() {
        let doc = CanonicalDocument {
            source_url: "https://a.b/game/".into(),
            title: "game".into(),
            scenes: vec![SceneBlock {
                title: Some("Start".into()),
                text: Some("You wake up.".into()),
                choices: vec![ChoiceBlock {
                    title: Some("Knight".into()),
                    text: Some("Sword and shield.".into()),
                }],
            }],
            media: vec![],
            strategy: StrategyKind::Manifest,
            confidence: Confidence::Exact,
        };
        let md = doc.to_markdown();
        assert!(md.starts_with("Game URL: https://a.b/game/"));
        assert!(md.contains("## Start\n\nYou wake up."));
        assert!(md.contains("### Knight\n\nSword and shield."));
    }
}
