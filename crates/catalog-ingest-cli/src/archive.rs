//! HTTP archive fetcher: mirrors a game's entry page and same-host resources
//! to disk.
//!
//! Discovery covers resource tags, CSS `url(...)` references (inline and in
//! downloaded stylesheets), quoted `*.js` paths inside inline scripts, and
//! media paths listed in the manifest. A `metadata.json` next to the files
//! keeps the ETag of every download so unchanged files are not re-fetched.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{bail, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use url::Url;

use catalog_ingest::extract::manifest::parse_manifest;
use catalog_ingest::extract::shape::MEDIA_PREFIXES;
use catalog_ingest::{
    Bundle, BundleFetcher, Candidate, FetchStats, IngestConfig, IngestError, IngestResult,
};

use crate::http::HttpClient;

const METADATA_FILE: &str = "metadata.json";
const ENTRY_FILE: &str = "index.html";

fn css_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"url\(\s*['"]?([^'")]+?)['"]?\s*\)"#).expect("css url regex is valid")
    })
}

fn inline_js_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"['"]([^'"\s]+?\.js(?:\?[^'"]*)?)['"]"#).expect("inline js regex is valid")
    })
}

// ── ETag metadata ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct EtagEntry {
    #[serde(rename = "ETag")]
    etag: Option<String>,
}

#[derive(Debug, Default)]
struct EtagCache {
    path: PathBuf,
    entries: HashMap<String, EtagEntry>,
}

impl EtagCache {
    fn load(dir: &Path) -> Self {
        let path = dir.join(METADATA_FILE);
        let entries = std::fs::read(&path)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .unwrap_or_default();
        Self { path, entries }
    }

    fn get(&self, url: &str) -> Option<String> {
        self.entries.get(url).and_then(|e| e.etag.clone())
    }

    fn set(&mut self, url: &str, etag: Option<String>) {
        if etag.is_some() {
            self.entries.insert(url.to_string(), EtagEntry { etag });
        }
    }

    fn save(&self) -> Result<()> {
        std::fs::write(&self.path, serde_json::to_vec_pretty(&self.entries)?)?;
        Ok(())
    }
}

// ── discovery ───────────────────────────────────────────────────────────────

/// Directory URL the entry page lives in, with a trailing slash.
pub fn base_url(source: &str) -> Result<Url> {
    let mut url = Url::parse(source.trim())?;
    url.set_fragment(None);
    url.set_query(None);
    let path = url.path().to_string();
    if !path.ends_with('/') {
        let last = path.rsplit('/').next().unwrap_or("");
        let dir = if last.contains('.') {
            path[..path.len() - last.len()].to_string()
        } else {
            format!("{path}/")
        };
        url.set_path(&dir);
    }
    Ok(url)
}

/// Resolve `reference` against `base` if it names a same-host resource.
fn resolve_local(base: &Url, reference: &str) -> Option<Url> {
    let reference = reference.replace('\\', "/");
    let reference = reference.trim();
    if reference.is_empty()
        || reference.starts_with('#')
        || reference.starts_with("data:")
        || reference.starts_with("javascript:")
        || reference.starts_with("mailto:")
    {
        return None;
    }
    let mut url = base.join(reference).ok()?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str() != base.host_str() {
        return None;
    }
    url.set_fragment(None);
    Some(url)
}

pub fn css_references(css: &str) -> Vec<String> {
    css_url_re()
        .captures_iter(css)
        .map(|c| c[1].trim().to_string())
        .collect()
}

/// Same-host resources referenced by an HTML page.
pub fn html_resources(html: &str, base: &Url) -> BTreeSet<Url> {
    let document = Html::parse_document(html);
    let mut found = BTreeSet::new();
    let mut add = |reference: &str| {
        if let Some(url) = resolve_local(base, reference) {
            found.insert(url);
        }
    };

    if let Ok(sel) = Selector::parse("link[href]") {
        for el in document.select(&sel) {
            if let Some(href) = el.value().attr("href") {
                add(href);
            }
        }
    }
    if let Ok(sel) = Selector::parse("script[src], img[src], video[src], audio[src], source[src]") {
        for el in document.select(&sel) {
            if let Some(src) = el.value().attr("src") {
                add(src);
            }
        }
    }
    if let Ok(sel) = Selector::parse("style") {
        for el in document.select(&sel) {
            for reference in css_references(&el.text().collect::<String>()) {
                add(&reference);
            }
        }
    }
    if let Ok(sel) = Selector::parse("[style]") {
        for el in document.select(&sel) {
            if let Some(style) = el.value().attr("style") {
                for reference in css_references(style) {
                    add(&reference);
                }
            }
        }
    }
    if let Ok(sel) = Selector::parse("script:not([src])") {
        for el in document.select(&sel) {
            let body = el.text().collect::<String>();
            for cap in inline_js_re().captures_iter(&body) {
                add(&cap[1]);
            }
        }
    }
    found
}

/// Manifest strings under a known media directory, in document order.
pub fn manifest_media(value: &serde_json::Value, out: &mut Vec<String>) {
    match value {
        serde_json::Value::String(s) => {
            if MEDIA_PREFIXES.iter().any(|p| s.starts_with(p)) {
                out.push(s.clone());
            }
        }
        serde_json::Value::Array(items) => items.iter().for_each(|v| manifest_media(v, out)),
        serde_json::Value::Object(obj) => obj.values().for_each(|v| manifest_media(v, out)),
        _ => {}
    }
}

/// Local path for `url`, relative to the bundle root.
pub fn local_path(base: &Url, url: &Url) -> Option<PathBuf> {
    let base_path = base.path().trim_start_matches('/');
    let path = url.path().trim_start_matches('/');
    let rel = path.strip_prefix(base_path).unwrap_or(path).trim_start_matches('/');
    if rel.is_empty() || rel.split('/').any(|seg| seg == "..") {
        return None;
    }
    Some(PathBuf::from(rel))
}

// ── fetcher ─────────────────────────────────────────────────────────────────

enum Outcome {
    Downloaded(Option<String>),
    Cached,
}

pub struct ArchiveFetcher {
    http: HttpClient,
    manifest_names: Vec<String>,
    max_workers: usize,
}

impl ArchiveFetcher {
    pub fn new(http: HttpClient, config: &IngestConfig) -> Self {
        Self {
            http,
            manifest_names: config.extraction.manifest_names.clone(),
            max_workers: config.fetch.max_workers.max(1),
        }
    }

    async fn download(&self, url: &Url, path: &Path, etag: Option<String>) -> Result<Outcome> {
        let etag = etag.filter(|_| path.exists());
        let resp = self.http.get(url.as_str(), etag.as_deref()).await?;
        if resp.not_modified() {
            return Ok(Outcome::Cached);
        }
        if !resp.is_success() {
            bail!("HTTP {} after {} attempts", resp.status, resp.attempts);
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, &resp.body).await?;
        Ok(Outcome::Downloaded(resp.etag))
    }

    /// Download `urls` concurrently, returning stylesheet paths for the next
    /// discovery round.
    async fn download_all(
        &self,
        base: &Url,
        dest: &Path,
        urls: Vec<Url>,
        cache: &mut EtagCache,
        stats: &mut FetchStats,
    ) -> Vec<(Url, PathBuf)> {
        let jobs: Vec<(Url, PathBuf, Option<String>)> = urls
            .into_iter()
            .filter_map(|url| {
                let rel = local_path(base, &url)?;
                let etag = cache.get(url.as_str());
                Some((url, dest.join(rel), etag))
            })
            .collect();

        let results: Vec<(Url, PathBuf, Result<Outcome>)> = stream::iter(jobs)
            .map(|(url, path, etag)| async move {
                let outcome = self.download(&url, &path, etag).await;
                (url, path, outcome)
            })
            .buffer_unordered(self.max_workers)
            .collect()
            .await;

        let mut stylesheets = Vec::new();
        for (url, path, outcome) in results {
            stats.processed += 1;
            match outcome {
                Ok(Outcome::Downloaded(etag)) => {
                    stats.downloaded += 1;
                    cache.set(url.as_str(), etag);
                }
                Ok(Outcome::Cached) => stats.cached += 1,
                Err(e) => {
                    stats.failed += 1;
                    tracing::warn!("Failed to download {url}: {e:#}");
                    continue;
                }
            }
            if path.extension().is_some_and(|e| e.eq_ignore_ascii_case("css")) {
                stylesheets.push((url, path));
            }
        }
        stylesheets
    }
}

#[async_trait]
impl BundleFetcher for ArchiveFetcher {
    async fn fetch(
        &self,
        candidate: &Candidate,
        dest: &Path,
    ) -> IngestResult<(Bundle, FetchStats)> {
        let transient = |message: String| IngestError::TransientFetch {
            url: candidate.source_url.clone(),
            attempts: self.http.max_attempts(),
            message,
        };
        let base = base_url(&candidate.source_url).map_err(|e| transient(e.to_string()))?;
        let entry_url =
            Url::parse(candidate.source_url.trim()).map_err(|e| transient(e.to_string()))?;
        tokio::fs::create_dir_all(dest).await?;

        let mut cache = EtagCache::load(dest);
        let mut stats = FetchStats::default();
        let entry_path = dest.join(ENTRY_FILE);
        tracing::info!("Fetching {} into {}", entry_url, dest.display());

        match self
            .download(&entry_url, &entry_path, cache.get(entry_url.as_str()))
            .await
            .map_err(|e| transient(format!("{e:#}")))?
        {
            Outcome::Downloaded(etag) => {
                stats.downloaded += 1;
                cache.set(entry_url.as_str(), etag);
            }
            Outcome::Cached => stats.cached += 1,
        }
        stats.processed += 1;

        let html = String::from_utf8_lossy(&tokio::fs::read(&entry_path).await?).into_owned();
        let mut seen: BTreeSet<Url> = html_resources(&html, &base);

        for name in &self.manifest_names {
            let Ok(url) = base.join(name) else { continue };
            let path = dest.join(name);
            match self.download(&url, &path, cache.get(url.as_str())).await {
                Ok(outcome) => {
                    stats.processed += 1;
                    match outcome {
                        Outcome::Downloaded(etag) => {
                            stats.downloaded += 1;
                            cache.set(url.as_str(), etag);
                        }
                        Outcome::Cached => stats.cached += 1,
                    }
                    let text = String::from_utf8_lossy(&tokio::fs::read(&path).await?).into_owned();
                    if let Some(value) = parse_manifest(&text) {
                        let mut media = Vec::new();
                        manifest_media(&value, &mut media);
                        tracing::debug!("{name} references {} media files", media.len());
                        seen.extend(media.iter().filter_map(|m| resolve_local(&base, m)));
                    }
                    break;
                }
                Err(e) => tracing::debug!("No {name} at {url}: {e:#}"),
            }
        }
        seen.remove(&entry_url);

        let mut pending: Vec<Url> = seen.iter().cloned().collect();
        while !pending.is_empty() {
            let stylesheets = self
                .download_all(&base, dest, pending, &mut cache, &mut stats)
                .await;
            pending = Vec::new();
            for (css_url, path) in stylesheets {
                let Ok(bytes) = tokio::fs::read(&path).await else { continue };
                let css = String::from_utf8_lossy(&bytes);
                for reference in css_references(&css) {
                    if let Some(url) = resolve_local(&css_url, &reference) {
                        if url.host_str() == base.host_str() && seen.insert(url.clone()) {
                            pending.push(url);
                        }
                    }
                }
            }
        }

        if let Err(e) = cache.save() {
            tracing::warn!("Failed to write {}: {e:#}", METADATA_FILE);
        }
        tracing::info!("Bundle {}: {stats}", candidate.source_url);
        let bundle = Bundle::scan(&candidate.source_url, dest)?;
        Ok((bundle, stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url() {
        assert_eq!(base_url("https://a.b/game").unwrap().as_str(), "https://a.b/game/");
        assert_eq!(base_url("https://a.b/game/index.html").unwrap().as_str(), "https://a.b/game/");
        assert_eq!(base_url("https://a.b/game/?x=1#top").unwrap().as_str(), "https://a.b/game/");
    }

    #[test]
    fn test_html_resources() {
        let base = Url::parse("https://a.b/game/").unwrap();
        let html = r#"<html><head>
            <link rel="stylesheet" href="css/app.css">
            <script src="js/app.js"></script>
            <script src="https://cdn.other.com/vue.js"></script>
            <style>body { background: url('images/bg.png'); }</style>
            <script>load("js/extra.js?v=2");</script>
            </head><body>
            <img src="data:image/png;base64,AAAA">
            <div style="background-image: url(images\hero.jpg)"></div>
            <audio src="/shared/theme.mp3"></audio>
            </body></html>"#;
        let found: Vec<String> = html_resources(html, &base)
            .into_iter()
            .map(String::from)
            .collect();
        assert!(found.contains(&"https://a.b/game/css/app.css".to_string()));
        assert!(found.contains(&"https://a.b/game/js/app.js".to_string()));
        assert!(found.contains(&"https://a.b/game/images/bg.png".to_string()));
        assert!(found.contains(&"https://a.b/game/js/extra.js?v=2".to_string()));
        assert!(found.contains(&"https://a.b/game/images/hero.jpg".to_string()));
        assert!(found.contains(&"https://a.b/shared/theme.mp3".to_string()));
        assert_eq!(found.len(), 6);
    }

    #[test]
    fn test_manifest_media() {
        let value = serde_json::json!({
            "rows": [{ "image": "images/a.png", "objects": [{ "image": "img/b.webp" }] }],
            "music": "music/theme.mp3",
            "title": "images are nice"
        });
        let mut out = Vec::new();
        manifest_media(&value, &mut out);
        out.sort();
        assert_eq!(out, vec!["images/a.png", "img/b.webp", "music/theme.mp3"]);
    }

    #[test]
    fn test_local_path() {
        let base = Url::parse("https://a.b/game/").unwrap();
        let inside = Url::parse("https://a.b/game/images/a.png").unwrap();
        let outside = Url::parse("https://a.b/shared/x.css").unwrap();
        assert_eq!(local_path(&base, &inside), Some(PathBuf::from("images/a.png")));
        assert_eq!(local_path(&base, &outside), Some(PathBuf::from("shared/x.css")));
        assert_eq!(local_path(&base, &base), None);
    }

    #[test]
    fn test_css_references() {
        let css = r#"@font-face { src: url("../fonts/a.woff2") } .x { background: url( img/b.png ) }"#;
        assert_eq!(css_references(css), vec!["../fonts/a.woff2", "img/b.png"]);
    }
}
