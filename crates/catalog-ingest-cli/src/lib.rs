//! Concrete backends and run wiring for the `catalog-ingest` binary.

pub mod archive;
pub mod catalog;
pub mod handoff;
pub mod http;
pub mod logging;
pub mod renderer;

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};

pub use archive::ArchiveFetcher;
pub use catalog::RemoteCatalog;
pub use handoff::HandoffQueue;
pub use http::{HttpClient, HttpResponse};
pub use renderer::{ChromiumProvider, LazyRecorder};

/// Idle polls before an unattended session finishes by itself.
pub const UNATTENDED_FINISH_POLLS: u32 = 10;

/// URLs from a links file: one per line, blank lines and `#` comments skipped.
pub fn parse_links(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect()
}

pub fn read_links(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read links file {}", path.display()))?;
    Ok(parse_links(&text))
}

/// Append a timestamped report block to `path`.
pub fn append_report(path: &Path, report: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open report log {}", path.display()))?;
    let stamp = chrono::Local::now().format("[%Y-%m-%d %H:%M:%S]");
    writeln!(file, "\n{stamp} {report}")?;
    Ok(())
}
