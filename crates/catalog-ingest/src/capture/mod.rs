//! Operator-assisted capture of one representative image per candidate.
//!
//! A [`CaptureController`] drives a rendering backend ([`CaptureSurface`])
//! through the capture protocol. Phase changes are decided by the pure
//! [`next_phase`] function; the async driver performs the side effects
//! (navigation, scrolling, control injection, screenshots) and polls the
//! operator's [`SignalInbox`] at a fixed interval.

pub mod normalize;

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::config::{CaptureConfig, Geometry};
use crate::error::{IngestError, IngestResult};
use crate::types::{CaptureOrigin, ImageArtifact};

pub use normalize::normalize;

/// A typed event raised by the operator on the page.
#[derive(Clone, PartialEq, Eq)]
pub enum OperatorSignal {
    Pause,
    Resume,
    AutoFinish,
    SaveManual,
    UploadReplace { bytes: Vec<u8> },
}

impl fmt::Debug for OperatorSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pause => write!(f, "Pause"),
            Self::Resume => write!(f, "Resume"),
            Self::AutoFinish => write!(f, "AutoFinish"),
            Self::SaveManual => write!(f, "SaveManual"),
            Self::UploadReplace { bytes } => write!(f, "UploadReplace({} bytes)", bytes.len()),
        }
    }
}

/// FIFO of operator signals, filled by draining the surface.
#[derive(Debug, Default)]
pub struct SignalInbox {
    queue: VecDeque<OperatorSignal>,
}

impl SignalInbox {
    pub fn push(&mut self, signal: OperatorSignal) {
        self.queue.push_back(signal);
    }

    pub fn extend(&mut self, signals: impl IntoIterator<Item = OperatorSignal>) {
        self.queue.extend(signals);
    }

    pub fn pop(&mut self) -> Option<OperatorSignal> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapturePhase {
    Loading,
    InteractionReady,
    Paused,
    Capturing,
    ManualSave,
    UploadIngest,
    Done,
    TimedOut,
}

/// Phase reached from `phase` on `signal`. Phases that do not wait for the
/// operator ignore signals.
pub fn next_phase(phase: CapturePhase, signal: &OperatorSignal) -> CapturePhase {
    use CapturePhase::*;
    match (phase, signal) {
        (InteractionReady | Paused, OperatorSignal::AutoFinish) => Capturing,
        (InteractionReady | Paused, OperatorSignal::SaveManual) => ManualSave,
        (InteractionReady | Paused, OperatorSignal::UploadReplace { .. }) => UploadIngest,
        (InteractionReady | Paused, OperatorSignal::Pause) => Paused,
        (InteractionReady | Paused, OperatorSignal::Resume) => InteractionReady,
        (other, _) => other,
    }
}

/// State of one capture session; lives for exactly one surface.
#[derive(Debug)]
pub struct CaptureSession {
    pub viewport: Geometry,
    pub phase: CapturePhase,
    pub pending_signal: Option<OperatorSignal>,
    pub scroll_offset: u32,
    pub polls_used: u32,
    scrolled: bool,
}

impl CaptureSession {
    pub fn new(viewport: Geometry) -> Self {
        Self {
            viewport,
            phase: CapturePhase::Loading,
            pending_signal: None,
            scroll_offset: 0,
            polls_used: 0,
            scrolled: false,
        }
    }

    /// Apply a signal, remembering it for the phase that consumes it.
    pub fn apply(&mut self, signal: OperatorSignal) {
        let next = next_phase(self.phase, &signal);
        tracing::debug!("Capture signal {signal:?}: {:?} -> {next:?}", self.phase);
        self.phase = next;
        self.pending_signal = Some(signal);
    }
}

/// A live page the operator can interact with.
#[async_trait]
pub trait CaptureSurface: Send {
    async fn navigate(&mut self, url: &str) -> IngestResult<()>;

    /// Scroll through the page once, returning the final offset.
    async fn auto_scroll(&mut self, step: u32) -> IngestResult<u32>;

    async fn install_controls(&mut self) -> IngestResult<()>;

    async fn remove_controls(&mut self) -> IngestResult<()>;

    /// Signals raised since the previous call, oldest first.
    async fn drain_signals(&mut self) -> IngestResult<Vec<OperatorSignal>>;

    async fn set_viewport(&mut self, geometry: Geometry) -> IngestResult<()>;

    /// Raw encoded pixels of the current viewport.
    async fn screenshot(&mut self) -> IngestResult<Vec<u8>>;

    /// Hand a file back to the operator through the page.
    async fn offer_download(&mut self, file_name: &str, bytes: &[u8]) -> IngestResult<()>;

    async fn close(&mut self) -> IngestResult<()>;
}

/// Opens one surface per capture session.
#[async_trait]
pub trait SurfaceProvider: Send + Sync {
    async fn open(&self, viewport: Geometry) -> IngestResult<Box<dyn CaptureSurface>>;
}

pub struct CaptureController {
    provider: Arc<dyn SurfaceProvider>,
    config: CaptureConfig,
    sessions: Arc<Semaphore>,
}

impl CaptureController {
    pub fn new(provider: Arc<dyn SurfaceProvider>, config: &CaptureConfig) -> Self {
        Self {
            provider,
            config: config.clone(),
            sessions: Arc::new(Semaphore::new(config.max_sessions.max(1))),
        }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Run one session against `url`. `name` labels manual-save downloads.
    pub async fn run(&self, url: &str, name: &str) -> IngestResult<ImageArtifact> {
        let _permit = self
            .sessions
            .acquire()
            .await
            .map_err(|e| IngestError::Surface(format!("session limiter closed: {e}")))?;
        let mut surface = self.provider.open(self.config.viewport).await?;
        let result = self.drive(surface.as_mut(), url, name).await;
        if let Err(e) = surface.close().await {
            tracing::warn!("Failed to close capture surface: {e}");
        }
        result
    }

    async fn drive(
        &self,
        surface: &mut dyn CaptureSurface,
        url: &str,
        name: &str,
    ) -> IngestResult<ImageArtifact> {
        let mut session = CaptureSession::new(self.config.viewport);
        let mut inbox = SignalInbox::default();
        let interval = Duration::from_millis(self.config.poll_interval_ms);

        loop {
            match session.phase {
                CapturePhase::Loading => {
                    let timeout = Duration::from_millis(self.config.navigation_timeout_ms);
                    match tokio::time::timeout(timeout, surface.navigate(url)).await {
                        Ok(Ok(())) => tracing::info!("Loaded {url}"),
                        Ok(Err(e)) => tracing::warn!("Navigation to {url} failed: {e}"),
                        Err(_) => tracing::warn!("Navigation to {url} timed out after {timeout:?}"),
                    }
                    session.phase = CapturePhase::InteractionReady;
                }
                CapturePhase::InteractionReady | CapturePhase::Paused => {
                    if !session.scrolled {
                        session.scrolled = true;
                        session.scroll_offset = surface
                            .auto_scroll(self.config.scroll_step)
                            .await
                            .unwrap_or_else(|e| {
                                tracing::warn!("Auto-scroll failed: {e}");
                                0
                            });
                        tracing::info!("Waiting for operator on {url}");
                    }

                    // A reload drops the panel; installing is a no-op while it is present.
                    if let Err(e) = surface.install_controls().await {
                        tracing::warn!("Failed to install controls: {e}");
                    }
                    match surface.drain_signals().await {
                        Ok(signals) => inbox.extend(signals),
                        Err(e) => tracing::warn!("Failed to read operator signals: {e}"),
                    }
                    if let Some(signal) = inbox.pop() {
                        session.apply(signal);
                        continue;
                    }

                    if session.phase == CapturePhase::InteractionReady {
                        session.polls_used += 1;
                        if self
                            .config
                            .auto_finish_after
                            .is_some_and(|n| session.polls_used >= n)
                        {
                            inbox.push(OperatorSignal::AutoFinish);
                            continue;
                        }
                        if session.polls_used >= self.config.poll_budget {
                            session.phase = CapturePhase::TimedOut;
                            continue;
                        }
                    }
                    tokio::time::sleep(interval).await;
                }
                CapturePhase::Capturing => {
                    let raw = self.grab(surface).await?;
                    let artifact = normalize(&raw, &self.config, CaptureOrigin::Auto)?;
                    session.phase = CapturePhase::Done;
                    tracing::info!(
                        "Captured {}x{} ({} bytes) from {url}",
                        artifact.width,
                        artifact.height,
                        artifact.byte_size()
                    );
                    return Ok(artifact);
                }
                CapturePhase::ManualSave => {
                    self.save_manual(surface, name).await;
                    if let Err(e) = surface.set_viewport(session.viewport).await {
                        tracing::warn!("Failed to restore viewport after manual save: {e}");
                    }
                    session.pending_signal = None;
                    session.phase = CapturePhase::InteractionReady;
                }
                CapturePhase::UploadIngest => {
                    let bytes = match session.pending_signal.take() {
                        Some(OperatorSignal::UploadReplace { bytes }) => bytes,
                        _ => Vec::new(),
                    };
                    match normalize(&bytes, &self.config, CaptureOrigin::Uploaded) {
                        Ok(artifact) => {
                            if let Err(e) = surface.remove_controls().await {
                                tracing::warn!("Failed to remove controls: {e}");
                            }
                            session.phase = CapturePhase::Done;
                            tracing::info!(
                                "Using uploaded image ({} bytes) for {url}",
                                artifact.byte_size()
                            );
                            return Ok(artifact);
                        }
                        Err(e) => {
                            tracing::warn!("Rejected uploaded image: {e}");
                            session.phase = CapturePhase::InteractionReady;
                        }
                    }
                }
                CapturePhase::TimedOut => {
                    if let Err(e) = surface.remove_controls().await {
                        tracing::debug!("Failed to remove controls after timeout: {e}");
                    }
                    tracing::warn!(
                        "No operator action on {url} after {} polls",
                        session.polls_used
                    );
                    return Err(IngestError::CaptureTimeout {
                        polls: session.polls_used,
                    });
                }
                CapturePhase::Done => {
                    return Err(IngestError::Surface("capture session already finished".into()));
                }
            }
        }
    }

    /// Screenshot offered back to the operator as a download. Failures are
    /// logged and the session carries on.
    async fn save_manual(&self, surface: &mut dyn CaptureSurface, name: &str) {
        let raw = match self.grab(surface).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("Manual save screenshot failed: {e}");
                return;
            }
        };
        match normalize(&raw, &self.config, CaptureOrigin::Manual) {
            Ok(artifact) => {
                let file_name = format!("{name}.webp");
                if let Err(e) = surface.offer_download(&file_name, &artifact.encoded).await {
                    tracing::warn!("Manual save download failed: {e}");
                }
            }
            Err(e) => tracing::warn!("Manual save could not be normalized: {e}"),
        }
    }

    /// Controls off, final geometry, screenshot.
    async fn grab(&self, surface: &mut dyn CaptureSurface) -> IngestResult<Vec<u8>> {
        surface.remove_controls().await?;
        surface.set_viewport(self.config.geometry).await?;
        surface.screenshot().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions_from_ready() {
        use CapturePhase::*;
        assert_eq!(next_phase(InteractionReady, &OperatorSignal::Pause), Paused);
        assert_eq!(next_phase(InteractionReady, &OperatorSignal::AutoFinish), Capturing);
        assert_eq!(next_phase(InteractionReady, &OperatorSignal::SaveManual), ManualSave);
        assert_eq!(
            next_phase(InteractionReady, &OperatorSignal::UploadReplace { bytes: vec![1] }),
            UploadIngest
        );
        assert_eq!(next_phase(InteractionReady, &OperatorSignal::Resume), InteractionReady);
    }

    #[test]
    fn test_paused_resumes_or_finishes() {
        use CapturePhase::*;
        assert_eq!(next_phase(Paused, &OperatorSignal::Resume), InteractionReady);
        assert_eq!(next_phase(Paused, &OperatorSignal::Pause), Paused);
        assert_eq!(next_phase(Paused, &OperatorSignal::AutoFinish), Capturing);
    }

    #[test]
    fn test_non_waiting_phases_ignore_signals() {
        use CapturePhase::*;
        for phase in [Loading, Capturing, ManualSave, UploadIngest, Done, TimedOut] {
            assert_eq!(next_phase(phase, &OperatorSignal::AutoFinish), phase);
        }
    }

    #[test]
    fn test_inbox_is_fifo() {
        let mut inbox = SignalInbox::default();
        inbox.extend([OperatorSignal::Pause, OperatorSignal::Resume]);
        inbox.push(OperatorSignal::AutoFinish);
        assert_eq!(inbox.len(), 3);
        assert_eq!(inbox.pop(), Some(OperatorSignal::Pause));
        assert_eq!(inbox.pop(), Some(OperatorSignal::Resume));
        assert_eq!(inbox.pop(), Some(OperatorSignal::AutoFinish));
        assert!(inbox.is_empty());
    }

    #[test]
    fn test_upload_debug_hides_bytes() {
        let signal = OperatorSignal::UploadReplace { bytes: vec![0; 4096] };
        assert_eq!(format!("{signal:?}"), "UploadReplace(4096 bytes)");
    }
}
