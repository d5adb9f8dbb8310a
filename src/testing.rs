//! Fakes for the host capabilities and shared fixtures.

use crate::capture::{
    Bitmap, CapturePayload, CaptureResult, RasterOptions, Rasterizer, SlideDescriptor,
    SlideNavigator, SurfaceHandle,
};
use crate::error::{CaptureError, FetchError};
use crate::font::{FetchResponse, FontFace, FontFetcher, FontWeight, RegisteredFonts};
use crate::job::{PrintHost, PrintRequest};
use crate::overflow::{OverflowProbe, OverflowReport, SurfaceExtent};
use crate::readiness::{AssetHandle, AssetHost, AssetKind, AssetStatus};
use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use std::collections::{HashMap, HashSet, VecDeque};
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Routes `tracing` output through the test harness; `RUST_LOG` picks the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn fixture_font(name: &str) -> Vec<u8> {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("fonts")
        .join(name);
    std::fs::read(&path).unwrap_or_else(|err| panic!("read {}: {err}", path.display()))
}

pub fn registered_fixture_fonts() -> RegisteredFonts {
    let regular = FontFace::from_bytes(
        "DejaVu Sans Mono",
        FontWeight::REGULAR,
        fixture_font("DejaVuSansMono-Oblique.ttf"),
        "fixture:regular",
    )
    .expect("regular fixture");
    let bold = FontFace::from_bytes(
        "DejaVu Sans Mono",
        FontWeight::BOLD,
        fixture_font("DejaVuSansMono-BoldOblique.ttf"),
        "fixture:bold",
    )
    .expect("bold fixture");
    RegisteredFonts {
        regular,
        bold: Some(bold),
    }
}

pub fn png_bytes(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
    let image = RgbaImage::from_pixel(width, height, Rgba(rgba));
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(image)
        .write_to(&mut out, ImageFormat::Png)
        .expect("png encodes");
    out.into_inner()
}

pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb([120, 60, 30]));
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image)
        .write_to(&mut out, ImageFormat::Jpeg)
        .expect("jpeg encodes");
    out.into_inner()
}

pub fn bitmap_capture(page_number: usize, source_width: u32, source_height: u32, data: Vec<u8>) -> CaptureResult {
    let decoded = image::load_from_memory(&data).expect("fixture decodes");
    CaptureResult {
        slide_id: format!("slide-{page_number}"),
        label: format!("Slide {page_number}"),
        page_number,
        payload: CapturePayload::Bitmap(Bitmap {
            width: decoded.width(),
            height: decoded.height(),
            data,
        }),
        source_width,
        source_height,
        capture_ms: 0.0,
    }
}

/// `count` surface slides `slide-1..` on panels `panel-1..`, navigated by index `0..`.
pub fn surface_slides(count: usize, width: u32, height: u32) -> Vec<SlideDescriptor> {
    (1..=count)
        .map(|n| {
            SlideDescriptor::surface(
                format!("slide-{n}"),
                format!("Slide {n}"),
                n - 1,
                SurfaceHandle::new(format!("panel-{n}"), width, height),
            )
        })
        .collect()
}

pub struct FakeNavigator {
    active: Mutex<usize>,
    history: Mutex<Vec<usize>>,
}

impl FakeNavigator {
    pub fn new(active: usize) -> Self {
        Self {
            active: Mutex::new(active),
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn activations(&self) -> Vec<usize> {
        self.history.lock().unwrap().clone()
    }
}

impl SlideNavigator for FakeNavigator {
    fn activate_slide(&self, index: usize) {
        *self.active.lock().unwrap() = index;
        self.history.lock().unwrap().push(index);
    }

    fn active_slide_index(&self) -> usize {
        *self.active.lock().unwrap()
    }
}

/// Produces a small PNG per surface, tinted by the surface id so pages differ.
pub struct FakeRasterizer {
    failing: Mutex<HashSet<String>>,
    empty: Mutex<HashSet<String>>,
    options: Mutex<Vec<RasterOptions>>,
    latency: Duration,
}

impl FakeRasterizer {
    pub fn new() -> Self {
        Self {
            failing: Mutex::new(HashSet::new()),
            empty: Mutex::new(HashSet::new()),
            options: Mutex::new(Vec::new()),
            latency: Duration::from_millis(20),
        }
    }

    pub fn fail_surface(&self, id: &str) {
        self.failing.lock().unwrap().insert(id.to_string());
    }

    pub fn empty_surface(&self, id: &str) {
        self.empty.lock().unwrap().insert(id.to_string());
    }

    pub fn options_seen(&self) -> Vec<RasterOptions> {
        self.options.lock().unwrap().clone()
    }
}

#[async_trait]
impl Rasterizer for FakeRasterizer {
    async fn rasterize(
        &self,
        surface: &SurfaceHandle,
        options: &RasterOptions,
    ) -> Result<Bitmap, CaptureError> {
        self.options.lock().unwrap().push(options.clone());
        tokio::time::sleep(self.latency).await;
        if self.failing.lock().unwrap().contains(&surface.id) {
            return Err(CaptureError::Rasterizer(format!("{} is tainted", surface.id)));
        }
        if self.empty.lock().unwrap().contains(&surface.id) {
            return Ok(Bitmap {
                width: 0,
                height: 0,
                data: Vec::new(),
            });
        }
        let tint = surface.id.bytes().fold(0u8, |acc, b| acc.wrapping_mul(31).wrapping_add(b));
        let width = (surface.width / 64).max(1);
        let height = (surface.height / 64).max(1);
        Ok(Bitmap {
            width,
            height,
            data: png_bytes(width, height, [tint, 128, 255 - tint, 255]),
        })
    }
}

#[derive(Clone)]
pub enum Reply {
    Status(u16),
    Body(Vec<u8>),
    Transport(String),
}

/// Scripted fetcher: each URL answers with its queued replies in order, repeating the
/// last one once the queue runs dry.
pub struct FakeFetcher {
    routes: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<HashMap<String, usize>>,
    latency: Mutex<Duration>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            latency: Mutex::new(Duration::ZERO),
        }
    }

    pub fn route(&self, url: &str, replies: Vec<Reply>) {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), replies.into_iter().collect());
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl FontFetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError> {
        *self.calls.lock().unwrap().entry(url.to_string()).or_insert(0) += 1;
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let reply = {
            let mut routes = self.routes.lock().unwrap();
            match routes.get_mut(url) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };
        match reply {
            Some(Reply::Status(status)) => Ok(FetchResponse {
                status,
                body: Vec::new(),
            }),
            Some(Reply::Body(body)) => Ok(FetchResponse { status: 200, body }),
            Some(Reply::Transport(message)) => Err(FetchError::new(message)),
            None => Ok(FetchResponse {
                status: 404,
                body: Vec::new(),
            }),
        }
    }
}

/// Assets settle after their scripted delay. Frames take 16ms; the layout epoch after
/// frame `k` is `epochs[k]` (clamped to the last entry), or 0 when unscripted.
pub struct FakeAssetHost {
    assets: Mutex<Vec<(AssetHandle, Duration, AssetStatus)>>,
    epochs: Mutex<Vec<u64>>,
    frames: AtomicUsize,
}

impl FakeAssetHost {
    pub fn new() -> Self {
        Self {
            assets: Mutex::new(Vec::new()),
            epochs: Mutex::new(Vec::new()),
            frames: AtomicUsize::new(0),
        }
    }

    pub fn add_asset(&self, asset: AssetHandle, delay: Duration, status: AssetStatus) {
        self.assets.lock().unwrap().push((asset, delay, status));
    }

    pub fn script_epochs(&self, epochs: Vec<u64>) {
        *self.epochs.lock().unwrap() = epochs;
    }

    fn pending(&self, kind: AssetKind) -> Vec<AssetHandle> {
        self.assets
            .lock()
            .unwrap()
            .iter()
            .filter(|(asset, _, _)| asset.kind == kind)
            .map(|(asset, _, _)| asset.clone())
            .collect()
    }
}

#[async_trait]
impl AssetHost for FakeAssetHost {
    fn pending_fonts(&self) -> Vec<AssetHandle> {
        self.pending(AssetKind::Font)
    }

    fn pending_images(&self) -> Vec<AssetHandle> {
        self.pending(AssetKind::Image)
    }

    async fn wait_asset(&self, asset: &AssetHandle) -> AssetStatus {
        let scripted = self
            .assets
            .lock()
            .unwrap()
            .iter()
            .find(|(candidate, _, _)| candidate == asset)
            .map(|(_, delay, status)| (*delay, *status));
        let Some((delay, status)) = scripted else {
            return AssetStatus::Errored;
        };
        tokio::time::sleep(delay).await;
        status
    }

    async fn next_frame(&self) {
        tokio::time::sleep(Duration::from_millis(16)).await;
        self.frames.fetch_add(1, Ordering::SeqCst);
    }

    fn layout_epoch(&self) -> u64 {
        let epochs = self.epochs.lock().unwrap();
        if epochs.is_empty() {
            return 0;
        }
        let frame = self.frames.load(Ordering::SeqCst);
        epochs[frame.min(epochs.len() - 1)]
    }
}

pub struct FakeOverflowProbe {
    extent: SurfaceExtent,
    annotated: Mutex<Vec<String>>,
}

impl FakeOverflowProbe {
    pub fn new(extent: SurfaceExtent) -> Self {
        Self {
            extent,
            annotated: Mutex::new(Vec::new()),
        }
    }

    pub fn annotated(&self) -> Vec<String> {
        self.annotated.lock().unwrap().clone()
    }
}

impl OverflowProbe for FakeOverflowProbe {
    fn measure(&self, _surface: &SurfaceHandle) -> SurfaceExtent {
        self.extent
    }

    fn annotate(&self, surface: &SurfaceHandle, _report: &OverflowReport) {
        self.annotated.lock().unwrap().push(surface.id.clone());
    }
}

pub struct FakePrintHost {
    requests: Mutex<Vec<PrintRequest>>,
    failure: Option<String>,
}

impl FakePrintHost {
    pub fn new() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            failure: None,
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            failure: Some(message.to_string()),
        }
    }

    pub fn requests(&self) -> Vec<PrintRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl PrintHost for FakePrintHost {
    fn print(&self, request: &PrintRequest) -> Result<(), String> {
        self.requests.lock().unwrap().push(request.clone());
        match &self.failure {
            Some(message) => Err(message.clone()),
            None => Ok(()),
        }
    }
}
