//! Waits until a rendering surface is stable enough to capture: pending fonts and images
//! have settled and layout has stopped moving for two consecutive frames.

use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Consecutive unchanged frames required before layout counts as stable.
pub const STABLE_FRAMES: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Font,
    Image,
}

impl AssetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::Font => "font",
            AssetKind::Image => "image",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetHandle {
    pub id: String,
    pub kind: AssetKind,
}

impl AssetHandle {
    pub fn font(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: AssetKind::Font,
        }
    }

    pub fn image(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: AssetKind::Image,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetStatus {
    Loaded,
    Errored,
}

/// The host environment's view of the surface being captured.
#[async_trait]
pub trait AssetHost: Send + Sync {
    fn pending_fonts(&self) -> Vec<AssetHandle>;
    fn pending_images(&self) -> Vec<AssetHandle>;
    async fn wait_asset(&self, asset: &AssetHandle) -> AssetStatus;
    async fn next_frame(&self);
    /// Monotonic counter the host bumps on every layout mutation.
    fn layout_epoch(&self) -> u64;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReadinessReport {
    pub fonts: usize,
    pub images: usize,
    pub loaded: usize,
    pub errored: usize,
    pub timed_out: usize,
    pub frames: u32,
    pub layout_stable: bool,
}

impl ReadinessReport {
    pub fn merge(&mut self, other: &ReadinessReport) {
        self.fonts += other.fonts;
        self.images += other.images;
        self.loaded += other.loaded;
        self.errored += other.errored;
        self.timed_out += other.timed_out;
        self.frames += other.frames;
        self.layout_stable &= other.layout_stable;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settled {
    Loaded,
    Errored,
    TimedOut,
}

pub struct ReadinessGate {
    host: Arc<dyn AssetHost>,
    asset_timeout: Duration,
    max_settle_cycles: u32,
}

impl ReadinessGate {
    pub fn new(host: Arc<dyn AssetHost>, asset_timeout: Duration, max_settle_cycles: u32) -> Self {
        Self {
            host,
            asset_timeout,
            max_settle_cycles: max_settle_cycles.max(STABLE_FRAMES),
        }
    }

    /// Resolves once every pending asset has loaded, errored or timed out, and layout has
    /// held still for [`STABLE_FRAMES`] frames (or the frame budget ran out). Never fails.
    pub async fn await_ready(&self) -> ReadinessReport {
        let fonts = self.host.pending_fonts();
        let images = self.host.pending_images();
        let mut report = ReadinessReport {
            fonts: fonts.len(),
            images: images.len(),
            ..ReadinessReport::default()
        };

        let outcomes = join_all(fonts.iter().chain(images.iter()).map(|asset| self.settle(asset))).await;
        for outcome in outcomes {
            match outcome {
                Settled::Loaded => report.loaded += 1,
                Settled::Errored => report.errored += 1,
                Settled::TimedOut => report.timed_out += 1,
            }
        }

        let mut last_epoch = self.host.layout_epoch();
        let mut stable = 0u32;
        while report.frames < self.max_settle_cycles {
            self.host.next_frame().await;
            report.frames += 1;
            let epoch = self.host.layout_epoch();
            if epoch == last_epoch {
                stable += 1;
                if stable >= STABLE_FRAMES {
                    report.layout_stable = true;
                    break;
                }
            } else {
                stable = 0;
                last_epoch = epoch;
            }
        }
        if !report.layout_stable {
            warn!(
                frames = report.frames,
                "layout still changing after settle budget, proceeding"
            );
        }
        debug!(
            loaded = report.loaded,
            errored = report.errored,
            timed_out = report.timed_out,
            frames = report.frames,
            "surface ready"
        );
        report
    }

    async fn settle(&self, asset: &AssetHandle) -> Settled {
        match tokio::time::timeout(self.asset_timeout, self.host.wait_asset(asset)).await {
            Ok(AssetStatus::Loaded) => Settled::Loaded,
            Ok(AssetStatus::Errored) => {
                debug!(asset = %asset.id, kind = asset.kind.as_str(), "asset failed to load");
                Settled::Errored
            }
            Err(_) => {
                warn!(
                    asset = %asset.id,
                    kind = asset.kind.as_str(),
                    timeout_ms = self.asset_timeout.as_millis() as u64,
                    "asset did not settle in time"
                );
                Settled::TimedOut
            }
        }
    }
}
