//! Drives slide-by-slide capture: activate, settle, rasterize, then restore the slide the
//! viewer was on. Produces one ordered [`CaptureResult`] per slide or fails the whole set.

use crate::debug::TraceLogger;
use crate::error::{CaptureError, ExportError};
use crate::overflow::{OverflowGuard, OverflowProbe, OverflowReport};
use crate::readiness::{AssetHost, ReadinessGate, ReadinessReport};
use crate::structured::SlideContent;
use crate::types::Color;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Opaque handle to a live rendering surface of known logical size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceHandle {
    pub id: String,
    pub width: u32,
    pub height: u32,
}

impl SurfaceHandle {
    pub fn new(id: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            id: id.into(),
            width,
            height,
        }
    }
}

/// Encoded (PNG or JPEG) capture of a surface. `width`/`height` are device pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Bitmap {
    pub fn is_empty(&self) -> bool {
        self.data.is_empty() || self.width == 0 || self.height == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RasterOptions {
    /// Device pixels per logical pixel.
    pub scale: f32,
    pub background: Color,
    /// Interactive-only elements hidden in the captured copy, never on the live surface.
    pub exclude_selectors: Vec<String>,
}

#[async_trait]
pub trait Rasterizer: Send + Sync {
    async fn rasterize(
        &self,
        surface: &SurfaceHandle,
        options: &RasterOptions,
    ) -> Result<Bitmap, CaptureError>;
}

pub trait SlideNavigator: Send + Sync {
    fn activate_slide(&self, index: usize);
    fn active_slide_index(&self) -> usize;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleStrategy {
    Fixed(Duration),
    /// Polls the host's layout epoch until two reads agree, never longer than `max`. Without
    /// an asset host to poll this waits the full `max`.
    PollUntilStable { interval: Duration, max: Duration },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Renderable {
    Surface(SurfaceHandle),
    Structured(SlideContent),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlideDescriptor {
    pub id: String,
    pub label: String,
    pub nav_index: usize,
    pub renderable: Renderable,
}

impl SlideDescriptor {
    pub fn surface(
        id: impl Into<String>,
        label: impl Into<String>,
        nav_index: usize,
        surface: SurfaceHandle,
    ) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            nav_index,
            renderable: Renderable::Surface(surface),
        }
    }

    pub fn structured(id: impl Into<String>, label: impl Into<String>, content: SlideContent) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            nav_index: 0,
            renderable: Renderable::Structured(content),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CapturePayload {
    Bitmap(Bitmap),
    Structured(SlideContent),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaptureResult {
    pub slide_id: String,
    pub label: String,
    pub page_number: usize,
    pub payload: CapturePayload,
    /// Logical size of the captured surface; zero for structured slides.
    pub source_width: u32,
    pub source_height: u32,
    pub capture_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Activating(usize),
    Settling(usize),
    Capturing(usize),
    Restoring,
    Assembling,
    Done,
    Aborted,
}

impl CaptureState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureState::Idle => "idle",
            CaptureState::Activating(_) => "activating",
            CaptureState::Settling(_) => "settling",
            CaptureState::Capturing(_) => "capturing",
            CaptureState::Restoring => "restoring",
            CaptureState::Assembling => "assembling",
            CaptureState::Done => "done",
            CaptureState::Aborted => "aborted",
        }
    }

    pub fn page(&self) -> Option<usize> {
        match self {
            CaptureState::Activating(page)
            | CaptureState::Settling(page)
            | CaptureState::Capturing(page) => Some(*page),
            _ => None,
        }
    }
}

pub(crate) fn log_transition(trace: Option<&TraceLogger>, state: CaptureState) {
    debug!(state = state.as_str(), page = state.page(), "export state");
    if let Some(trace) = trace {
        trace.event(
            "export.state",
            json!({ "state": state.as_str(), "page": state.page() }),
        );
        trace.increment(&format!("state.{}", state.as_str()), 1);
    }
}

pub type ProgressCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub struct CaptureOptions {
    pub settle: SettleStrategy,
    pub post_render: Duration,
    pub raster: RasterOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageOverflow {
    pub page_number: usize,
    #[serde(flatten)]
    pub report: OverflowReport,
}

#[derive(Debug, Clone, Default)]
pub struct CaptureOutcome {
    pub captures: Vec<CaptureResult>,
    pub readiness: ReadinessReport,
    pub overflow: Vec<PageOverflow>,
}

/// Re-activates the originally active slide when dropped, so restoring happens on success,
/// on error, on panic, and when an enclosing timeout drops the capture future.
struct RestoreGuard {
    navigator: Arc<dyn SlideNavigator>,
    original: usize,
    trace: Option<TraceLogger>,
}

impl Drop for RestoreGuard {
    fn drop(&mut self) {
        log_transition(self.trace.as_ref(), CaptureState::Restoring);
        if self.navigator.active_slide_index() != self.original {
            self.navigator.activate_slide(self.original);
        }
        debug!(slide = self.original, "active slide restored");
    }
}

pub struct CaptureOrchestrator {
    navigator: Option<Arc<dyn SlideNavigator>>,
    rasterizer: Option<Arc<dyn Rasterizer>>,
    asset_host: Option<Arc<dyn AssetHost>>,
    readiness: Option<ReadinessGate>,
    overflow_probe: Option<Arc<dyn OverflowProbe>>,
    trace: Option<TraceLogger>,
    options: CaptureOptions,
}

impl CaptureOrchestrator {
    pub fn new(options: CaptureOptions) -> Self {
        Self {
            navigator: None,
            rasterizer: None,
            asset_host: None,
            readiness: None,
            overflow_probe: None,
            trace: None,
            options,
        }
    }

    pub fn with_navigator(mut self, navigator: Arc<dyn SlideNavigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    pub fn with_rasterizer(mut self, rasterizer: Arc<dyn Rasterizer>) -> Self {
        self.rasterizer = Some(rasterizer);
        self
    }

    pub fn with_asset_host(
        mut self,
        host: Arc<dyn AssetHost>,
        asset_timeout: Duration,
        max_settle_cycles: u32,
    ) -> Self {
        self.readiness = Some(ReadinessGate::new(
            host.clone(),
            asset_timeout,
            max_settle_cycles,
        ));
        self.asset_host = Some(host);
        self
    }

    pub fn with_overflow_probe(mut self, probe: Arc<dyn OverflowProbe>) -> Self {
        self.overflow_probe = Some(probe);
        self
    }

    pub fn with_trace(mut self, trace: TraceLogger) -> Self {
        self.trace = Some(trace);
        self
    }

    pub fn options(&self) -> &CaptureOptions {
        &self.options
    }

    /// Captures every slide in order. Fails with [`ExportError::IncompletePageSet`] when any
    /// slide produced no capture; a partial set never leaves this function.
    pub async fn capture_all(
        &self,
        slides: &[SlideDescriptor],
        progress: Option<&ProgressCallback>,
    ) -> Result<CaptureOutcome, ExportError> {
        let total = slides.len();
        let surfaces = slides
            .iter()
            .any(|slide| matches!(slide.renderable, Renderable::Surface(_)));
        let (navigator, rasterizer) = if surfaces {
            let navigator = self.navigator.clone().ok_or_else(|| {
                ExportError::InvalidConfiguration(
                    "surface slides require a slide navigator".to_string(),
                )
            })?;
            let rasterizer = self.rasterizer.clone().ok_or_else(|| {
                ExportError::InvalidConfiguration("surface slides require a rasterizer".to_string())
            })?;
            if self.readiness.is_none() {
                return Err(ExportError::InvalidConfiguration(
                    "surface slides require an asset host".to_string(),
                ));
            }
            (Some(navigator), Some(rasterizer))
        } else {
            (None, None)
        };

        let restore = navigator.as_ref().map(|navigator| RestoreGuard {
            navigator: navigator.clone(),
            original: navigator.active_slide_index(),
            trace: self.trace.clone(),
        });
        info!(slides = total, "capturing slides");

        let mut outcome = CaptureOutcome {
            readiness: ReadinessReport {
                layout_stable: true,
                ..ReadinessReport::default()
            },
            ..CaptureOutcome::default()
        };
        for (idx, slide) in slides.iter().enumerate() {
            let page_number = idx + 1;
            match &slide.renderable {
                Renderable::Structured(content) => {
                    self.transition(CaptureState::Capturing(page_number));
                    outcome.captures.push(CaptureResult {
                        slide_id: slide.id.clone(),
                        label: slide.label.clone(),
                        page_number,
                        payload: CapturePayload::Structured(content.clone()),
                        source_width: 0,
                        source_height: 0,
                        capture_ms: 0.0,
                    });
                }
                Renderable::Surface(surface) => {
                    let (Some(navigator), Some(rasterizer)) = (&navigator, &rasterizer) else {
                        continue;
                    };
                    self.transition(CaptureState::Activating(page_number));
                    navigator.activate_slide(slide.nav_index);

                    self.transition(CaptureState::Settling(page_number));
                    self.settle().await;
                    if let Some(gate) = &self.readiness {
                        let report = gate.await_ready().await;
                        outcome.readiness.merge(&report);
                    }
                    tokio::time::sleep(self.options.post_render).await;

                    if let Some(probe) = &self.overflow_probe {
                        let report =
                            OverflowGuard::check(probe.as_ref(), surface, surface.width, surface.height);
                        if !report.pass {
                            outcome.overflow.push(PageOverflow {
                                page_number,
                                report,
                            });
                        }
                    }

                    self.transition(CaptureState::Capturing(page_number));
                    let started = Instant::now();
                    match rasterizer.rasterize(surface, &self.options.raster).await {
                        Ok(bitmap) if !bitmap.is_empty() => {
                            outcome.captures.push(CaptureResult {
                                slide_id: slide.id.clone(),
                                label: slide.label.clone(),
                                page_number,
                                payload: CapturePayload::Bitmap(bitmap),
                                source_width: surface.width,
                                source_height: surface.height,
                                capture_ms: started.elapsed().as_secs_f64() * 1000.0,
                            });
                        }
                        Ok(_) => {
                            warn!(page = page_number, slide = %slide.id, "empty capture, skipping slide");
                            self.count("capture.skipped");
                        }
                        Err(err) => {
                            warn!(page = page_number, slide = %slide.id, error = %err, "capture failed, skipping slide");
                            self.count("capture.skipped");
                        }
                    }
                }
            }
            if let Some(progress) = progress {
                progress(page_number, total);
            }
            self.transition(CaptureState::Idle);
        }

        drop(restore);

        if outcome.captures.len() != total {
            let missing: Vec<usize> = (1..=total)
                .filter(|page| !outcome.captures.iter().any(|c| c.page_number == *page))
                .collect();
            self.transition(CaptureState::Aborted);
            warn!(
                expected = total,
                actual = outcome.captures.len(),
                ?missing,
                "incomplete capture set, aborting"
            );
            return Err(ExportError::IncompletePageSet {
                expected: total,
                actual: outcome.captures.len(),
                missing,
            });
        }
        Ok(outcome)
    }

    async fn settle(&self) {
        match self.options.settle {
            SettleStrategy::Fixed(delay) => tokio::time::sleep(delay).await,
            SettleStrategy::PollUntilStable { interval, max } => {
                let Some(host) = &self.asset_host else {
                    tokio::time::sleep(max).await;
                    return;
                };
                let deadline = Instant::now() + max;
                let mut last = host.layout_epoch();
                loop {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        warn!(max_ms = max.as_millis() as u64, "layout did not settle in time");
                        return;
                    }
                    tokio::time::sleep(interval.min(remaining)).await;
                    let epoch = host.layout_epoch();
                    if epoch == last {
                        return;
                    }
                    last = epoch;
                }
            }
        }
    }

    fn transition(&self, state: CaptureState) {
        log_transition(self.trace.as_ref(), state);
    }

    fn count(&self, key: &str) {
        if let Some(trace) = &self.trace {
            trace.increment(key, 1);
        }
    }
}
