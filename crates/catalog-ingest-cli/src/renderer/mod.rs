//! Browser-backed capture surface and traffic recorder.
//!
//! Chromium is driven through chromiumoxide. The capture controller only sees
//! the `SurfaceProvider`/`CaptureSurface` seams from the core crate.

pub mod chromium;
mod controls;

use std::path::PathBuf;

pub use chromium::{ChromiumProvider, ChromiumSurface, LazyRecorder};

/// Environment variable naming an explicit Chromium binary.
pub const CHROMIUM_ENV: &str = "CATALOG_INGEST_CHROMIUM";

/// Find the Chromium binary path.
pub fn find_chromium() -> Option<PathBuf> {
    // 1. Explicit override
    if let Ok(p) = std::env::var(CHROMIUM_ENV) {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. ~/.catalog-ingest/chromium/
    if let Some(home) = dirs::home_dir() {
        let root = home.join(".catalog-ingest/chromium");
        let candidates = if cfg!(target_os = "macos") {
            vec![
                root.join("chrome-mac-arm64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                root.join("chrome-mac-x64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                root.join("chrome"),
            ]
        } else {
            vec![root.join("chrome-linux64/chrome"), root.join("chrome")]
        };
        if let Some(found) = candidates.into_iter().find(|c| c.exists()) {
            return Some(found);
        }
    }

    // 3. System PATH
    for name in ["google-chrome", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    // 4. Common macOS location
    if cfg!(target_os = "macos") {
        let common = PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}
