use crate::assemble::BackendKind;
use crate::canvas::Document;
use crate::capture::{PageOverflow, ProgressCallback, SlideDescriptor};
use crate::error::JobStatus;
use crate::geometry::PageGeometry;
use crate::metrics::ExportMetrics;
use crate::readiness::ReadinessReport;
use serde::Serialize;

/// One export request: the ordered slides, the backend that renders them and an optional
/// progress callback invoked with `(current, total)` after each slide.
#[derive(Clone)]
pub struct ExportJob {
    pub slides: Vec<SlideDescriptor>,
    pub backend: BackendKind,
    pub title: Option<String>,
    pub progress: Option<ProgressCallback>,
}

impl ExportJob {
    pub fn new(slides: Vec<SlideDescriptor>, backend: BackendKind) -> Self {
        Self {
            slides,
            backend,
            title: None,
            progress: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn expected_pages(&self) -> usize {
        self.slides.len()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportReport {
    #[serde(serialize_with = "serialize_status")]
    pub status: JobStatus,
    pub backend: BackendKind,
    pub metrics: ExportMetrics,
    pub readiness: ReadinessReport,
    pub overflow: Vec<PageOverflow>,
}

fn serialize_status<S: serde::Serializer>(status: &JobStatus, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(match status {
        JobStatus::Succeeded => "succeeded",
        JobStatus::Failed => "failed",
        JobStatus::AbortedIncomplete => "aborted_incomplete",
    })
}

#[derive(Debug, Clone)]
pub struct ExportOutput {
    pub document: Document,
    pub pdf: Vec<u8>,
    pub report: ExportReport,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrintRequest {
    pub geometry: PageGeometry,
    pub page_count: usize,
    pub title: Option<String>,
    /// `@font-face` rules for the registered font, when one is registered.
    pub font_css: Option<String>,
}

/// The host's native print path, used when PDF bytes cannot be produced.
pub trait PrintHost: Send + Sync {
    fn print(&self, request: &PrintRequest) -> Result<(), String>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Bytes(Vec<u8>),
    Printed { reason: String },
}
