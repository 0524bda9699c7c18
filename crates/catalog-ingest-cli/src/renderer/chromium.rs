//! Chromium-backed capture surface and network traffic recorder.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventResponseReceived, GetResponseBodyParams,
};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use serde::de::DeserializeOwned;

use catalog_ingest::config::Geometry;
use catalog_ingest::{
    CaptureSurface, CapturedPayload, IngestError, IngestResult, OperatorSignal, SurfaceProvider,
    TrafficRecorder,
};

use super::controls::{self, RawSignal};
use super::find_chromium;

/// Upper bound on scroll steps per page.
const MAX_SCROLL_STEPS: u32 = 200;
const SCROLL_PAUSE: Duration = Duration::from_millis(120);

fn surface_err(context: &str, e: impl std::fmt::Display) -> IngestError {
    IngestError::Surface(format!("{context}: {e}"))
}

/// Owns the browser process; hands out one page per session.
pub struct ChromiumProvider {
    browser: Browser,
    active_count: Arc<AtomicUsize>,
}

impl ChromiumProvider {
    /// Launch Chromium. Operator sessions need `headless = false`.
    pub async fn launch(headless: bool) -> Result<Self> {
        let chrome_path = find_chromium()
            .context("Chromium not found. Set CATALOG_INGEST_CHROMIUM or install Chrome.")?;

        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--autoplay-policy=no-user-gesture-required");
        builder = if headless {
            builder.arg("--headless=new")
        } else {
            builder.with_head()
        };
        let config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch Chromium")?;

        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        tracing::info!("Chromium launched ({})", if headless { "headless" } else { "headed" });
        Ok(Self {
            browser,
            active_count: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn active_pages(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }

    async fn new_page(&self) -> IngestResult<Page> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| surface_err("failed to create page", e))?;
        self.active_count.fetch_add(1, Ordering::Relaxed);
        Ok(page)
    }

    async fn close_page(&self, page: Page) {
        self.active_count.fetch_sub(1, Ordering::Relaxed);
        if let Err(e) = page.close().await {
            tracing::debug!("Closing page failed: {e}");
        }
    }
}

async fn set_metrics(page: &Page, geometry: Geometry) -> IngestResult<()> {
    let params = SetDeviceMetricsOverrideParams::new(
        i64::from(geometry.width),
        i64::from(geometry.height),
        1.0,
        false,
    );
    page.execute(params)
        .await
        .map_err(|e| surface_err("failed to set viewport", e))?;
    Ok(())
}

async fn eval<T: DeserializeOwned>(page: &Page, script: &str) -> IngestResult<T> {
    page.evaluate(script)
        .await
        .map_err(|e| surface_err("JS execution failed", e))?
        .into_value()
        .map_err(|e| surface_err("failed to convert JS result", format!("{e:?}")))
}

#[async_trait]
impl SurfaceProvider for ChromiumProvider {
    async fn open(&self, viewport: Geometry) -> IngestResult<Box<dyn CaptureSurface>> {
        let page = self.new_page().await?;
        set_metrics(&page, viewport).await?;
        Ok(Box::new(ChromiumSurface {
            page: Some(page),
            active_count: Arc::clone(&self.active_count),
        }))
    }
}

#[async_trait]
impl TrafficRecorder for ChromiumProvider {
    async fn record(&self, url: &str, settle: Duration) -> IngestResult<Vec<CapturedPayload>> {
        let page = self.new_page().await?;
        let result = record_on(&page, url, settle).await;
        self.close_page(page).await;
        result
    }
}

/// Recorder that launches a headless browser on its first recording, so a
/// bundle settled by an earlier strategy never starts Chromium.
#[derive(Default)]
pub struct LazyRecorder {
    browser: tokio::sync::OnceCell<ChromiumProvider>,
}

impl LazyRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_launched(&self) -> bool {
        self.browser.initialized()
    }

    async fn provider(&self) -> IngestResult<&ChromiumProvider> {
        self.browser
            .get_or_try_init(|| async {
                ChromiumProvider::launch(true)
                    .await
                    .map_err(|e| surface_err("failed to launch Chromium", format!("{e:#}")))
            })
            .await
    }
}

#[async_trait]
impl TrafficRecorder for LazyRecorder {
    async fn record(&self, url: &str, settle: Duration) -> IngestResult<Vec<CapturedPayload>> {
        self.provider().await?.record(url, settle).await
    }
}

async fn record_on(page: &Page, url: &str, settle: Duration) -> IngestResult<Vec<CapturedPayload>> {
    page.execute(EnableParams::default())
        .await
        .map_err(|e| surface_err("failed to enable network events", e))?;
    let mut events = page
        .event_listener::<EventResponseReceived>()
        .await
        .map_err(|e| surface_err("failed to subscribe to responses", e))?;

    let deadline = tokio::time::Instant::now() + settle;
    match tokio::time::timeout_at(deadline, page.goto(url)).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => tracing::warn!("Navigation to {url} failed while recording: {e}"),
        Err(_) => tracing::warn!("Navigation to {url} did not finish within {settle:?}"),
    }

    let mut interesting = Vec::new();
    while let Ok(Some(event)) = tokio::time::timeout_at(deadline, events.next()).await {
        let mime = event.response.mime_type.to_ascii_lowercase();
        let response_url = event.response.url.clone();
        let pending = CapturedPayload {
            url: response_url,
            mime_type: mime,
            body: String::new(),
        };
        if pending.is_structured() || pending.is_script() {
            interesting.push((event.request_id.clone(), pending));
        }
    }
    tracing::debug!("Recorded {} candidate responses from {url}", interesting.len());

    let mut payloads = Vec::with_capacity(interesting.len());
    for (request_id, mut payload) in interesting {
        match page.execute(GetResponseBodyParams::new(request_id)).await {
            Ok(resp) => {
                payload.body = if resp.result.base64_encoded {
                    match base64::engine::general_purpose::STANDARD.decode(&resp.result.body) {
                        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                        Err(e) => {
                            tracing::debug!("Undecodable body for {}: {e}", payload.url);
                            continue;
                        }
                    }
                } else {
                    resp.result.body.clone()
                };
                payloads.push(payload);
            }
            Err(e) => tracing::debug!("No body for {}: {e}", payload.url),
        }
    }
    Ok(payloads)
}

/// One page held open for an operator session.
pub struct ChromiumSurface {
    page: Option<Page>,
    active_count: Arc<AtomicUsize>,
}

impl ChromiumSurface {
    fn page(&self) -> IngestResult<&Page> {
        self.page
            .as_ref()
            .ok_or_else(|| IngestError::Surface("page already closed".into()))
    }
}

#[async_trait]
impl CaptureSurface for ChromiumSurface {
    async fn navigate(&mut self, url: &str) -> IngestResult<()> {
        let page = self.page()?;
        page.goto(url)
            .await
            .map_err(|e| surface_err("navigation failed", e))?;
        if let Err(e) = page.wait_for_navigation().await {
            tracing::debug!("wait_for_navigation on {url}: {e}");
        }
        Ok(())
    }

    async fn auto_scroll(&mut self, step: u32) -> IngestResult<u32> {
        let page = self.page()?;
        let script = controls::scroll_step_js(step.max(1));
        for _ in 0..MAX_SCROLL_STEPS {
            let moved: bool = eval(page, &script).await?;
            if !moved {
                break;
            }
            tokio::time::sleep(SCROLL_PAUSE).await;
        }
        let offset: f64 = eval(page, "window.scrollY").await?;
        eval::<serde_json::Value>(page, "window.scrollTo(0, 0)").await.ok();
        Ok(offset.max(0.0) as u32)
    }

    async fn install_controls(&mut self) -> IngestResult<()> {
        let installed: bool = eval(self.page()?, controls::INSTALL_JS).await?;
        if installed {
            tracing::debug!("Control panel installed");
        }
        Ok(())
    }

    async fn remove_controls(&mut self) -> IngestResult<()> {
        let _: bool = eval(self.page()?, controls::REMOVE_JS).await?;
        Ok(())
    }

    async fn drain_signals(&mut self) -> IngestResult<Vec<OperatorSignal>> {
        let raw: Vec<RawSignal> = eval(self.page()?, controls::DRAIN_JS).await?;
        Ok(controls::parse_signals(raw))
    }

    async fn set_viewport(&mut self, geometry: Geometry) -> IngestResult<()> {
        set_metrics(self.page()?, geometry).await
    }

    async fn screenshot(&mut self) -> IngestResult<Vec<u8>> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .build();
        self.page()?
            .screenshot(params)
            .await
            .map_err(|e| surface_err("screenshot failed", e))
    }

    async fn offer_download(&mut self, file_name: &str, bytes: &[u8]) -> IngestResult<()> {
        let _: bool = eval(self.page()?, &controls::download_js(file_name, bytes)).await?;
        tracing::info!("Offered {file_name} ({} bytes) to the operator", bytes.len());
        Ok(())
    }

    async fn close(&mut self) -> IngestResult<()> {
        if let Some(page) = self.page.take() {
            self.active_count.fetch_sub(1, Ordering::Relaxed);
            page.close()
                .await
                .map_err(|e| surface_err("failed to close page", e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_ingest::config::ExtractionConfig;
    use catalog_ingest::{Bundle, StrategyChain, StrategyKind};

    #[tokio::test]
    async fn test_lazy_recorder_stays_idle_for_manifest_bundles() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("project.json"),
            r#"{"rows":[{"title":"Start","titleText":"Begin"}]}"#,
        )
        .unwrap();
        let bundle = Bundle::scan("https://a.b/Quest/", dir.path()).unwrap();

        let lazy = Arc::new(LazyRecorder::new());
        let recorder: Arc<dyn TrafficRecorder> = lazy.clone();
        let chain = StrategyChain::standard(&ExtractionConfig::default(), Some(recorder));
        let document = chain.extract(&bundle).await.unwrap();

        assert_eq!(document.strategy, StrategyKind::Manifest);
        assert!(!lazy.is_launched());
    }

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn test_surface_controls_round_trip() {
        let provider = ChromiumProvider::launch(true)
            .await
            .expect("failed to launch Chromium");
        let mut surface = provider
            .open(Geometry::new(800, 600))
            .await
            .expect("failed to open surface");

        surface
            .navigate("data:text/html,<body style='height:3000px'><h1>Quest</h1></body>")
            .await
            .expect("navigation failed");
        surface.install_controls().await.expect("install failed");
        surface.install_controls().await.expect("second install is a no-op");

        let page = provider.browser.pages().await.expect("pages").pop().expect("a page");
        page.evaluate("document.querySelectorAll('#__ingest_panel button')[1].click()")
            .await
            .expect("click failed");

        let signals = surface.drain_signals().await.expect("drain failed");
        assert_eq!(signals, vec![OperatorSignal::AutoFinish]);
        assert!(surface.drain_signals().await.expect("drain failed").is_empty());

        let offset = surface.auto_scroll(600).await.expect("scroll failed");
        assert!(offset > 0);

        surface.remove_controls().await.expect("remove failed");
        let png = surface.screenshot().await.expect("screenshot failed");
        assert!(png.starts_with(&[0x89, b'P', b'N', b'G']));

        surface.close().await.expect("close failed");
        assert_eq!(provider.active_pages(), 0);
    }
}
