mod assemble;
mod canvas;
mod capture;
mod config;
mod debug;
mod error;
mod fit;
mod font;
mod geometry;
mod job;
mod metrics;
mod overflow;
mod pdf;
mod readiness;
mod structured;
#[cfg(test)]
mod testing;
mod types;

pub use assemble::{
    BackendKind, DocumentAssembler, FooterStyle, ImageRegistry, META_LABEL, META_SLIDE_ID,
    PageBackend, PageContext, RasterBackend, StructuredBackend, footer_text,
};
pub use canvas::{Canvas, Command, Document, FontKey, Page};
pub use capture::{
    Bitmap, CaptureOptions, CaptureOrchestrator, CaptureOutcome, CapturePayload, CaptureResult,
    CaptureState, PageOverflow, ProgressCallback, RasterOptions, Rasterizer, Renderable,
    SettleStrategy, SlideDescriptor, SlideNavigator, SurfaceHandle,
};
pub use config::ExportConfig;
pub use debug::TraceLogger;
pub use error::{CaptureError, ExportError, FetchError, FontError, JobStatus};
pub use fit::{MIN_DIMENSION, OriginPolicy, Placement, ScaleTransform, fit};
pub use font::{
    DATA_URI_CHUNK_BYTES, FetchResponse, FontFace, FontFetcher, FontFormat, FontMetrics,
    FontResourceService, FontSource, FontStateKind, FontWeight, RegisteredFonts, RetryPolicy,
    sniff_format,
};
pub use geometry::{CSS_PX_PER_INCH, DocumentClass, PageGeometry, PixelBox, px_to_pt};
pub use job::{Delivery, ExportJob, ExportOutput, ExportReport, PrintHost, PrintRequest};
pub use metrics::{ExportMetrics, PageMetrics};
pub use overflow::{OverflowGuard, OverflowProbe, OverflowReport, SurfaceExtent};
pub use pdf::{ImageData, ImageEncoding, decode_image_bytes};
pub use readiness::{
    AssetHandle, AssetHost, AssetKind, AssetStatus, ReadinessGate, ReadinessReport,
};
pub use structured::{BlockLayout, Section, SlideContent, Table, layout_slide, wrap_text};
pub use types::{Color, Pt, Size};

use capture::log_transition;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Exports an ordered slide set to a fixed-geometry PDF.
pub struct ExportPipeline {
    config: ExportConfig,
    geometry: PageGeometry,
    navigator: Option<Arc<dyn SlideNavigator>>,
    rasterizer: Option<Arc<dyn Rasterizer>>,
    asset_host: Option<Arc<dyn AssetHost>>,
    overflow_probe: Option<Arc<dyn OverflowProbe>>,
    font_service: Option<Arc<FontResourceService>>,
    print_host: Option<Arc<dyn PrintHost>>,
    trace: Option<TraceLogger>,
    /// Held for the duration of a job; the active slide is shared host state.
    job_lock: tokio::sync::Mutex<()>,
}

pub struct ExportPipelineBuilder {
    config: ExportConfig,
    navigator: Option<Arc<dyn SlideNavigator>>,
    rasterizer: Option<Arc<dyn Rasterizer>>,
    asset_host: Option<Arc<dyn AssetHost>>,
    overflow_probe: Option<Arc<dyn OverflowProbe>>,
    font_service: Option<Arc<FontResourceService>>,
    font_source: Option<(Arc<dyn FontFetcher>, FontSource)>,
    print_host: Option<Arc<dyn PrintHost>>,
    trace_path: Option<PathBuf>,
}

impl ExportPipelineBuilder {
    pub fn new() -> Self {
        Self {
            config: ExportConfig::default(),
            navigator: None,
            rasterizer: None,
            asset_host: None,
            overflow_probe: None,
            font_service: None,
            font_source: None,
            print_host: None,
            trace_path: None,
        }
    }

    pub fn config(mut self, config: ExportConfig) -> Self {
        self.config = config;
        self
    }

    pub fn navigator(mut self, navigator: Arc<dyn SlideNavigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    pub fn rasterizer(mut self, rasterizer: Arc<dyn Rasterizer>) -> Self {
        self.rasterizer = Some(rasterizer);
        self
    }

    pub fn asset_host(mut self, host: Arc<dyn AssetHost>) -> Self {
        self.asset_host = Some(host);
        self
    }

    pub fn overflow_probe(mut self, probe: Arc<dyn OverflowProbe>) -> Self {
        self.overflow_probe = Some(probe);
        self
    }

    /// Shares an existing font service, so registration happens once per process.
    pub fn font_service(mut self, service: Arc<FontResourceService>) -> Self {
        self.font_service = Some(service);
        self
    }

    /// Builds a dedicated font service using the configured retry policy.
    pub fn font_source(mut self, fetcher: Arc<dyn FontFetcher>, source: FontSource) -> Self {
        self.font_source = Some((fetcher, source));
        self
    }

    pub fn print_host(mut self, host: Arc<dyn PrintHost>) -> Self {
        self.print_host = Some(host);
        self
    }

    pub fn trace_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.trace_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<ExportPipeline, ExportError> {
        self.config.validate()?;
        let geometry = self.config.geometry()?;
        let font_service = match (self.font_service, self.font_source) {
            (Some(_), Some(_)) => {
                return Err(ExportError::InvalidConfiguration(
                    "font_service and font_source are mutually exclusive".to_string(),
                ));
            }
            (Some(service), None) => Some(service),
            (None, Some((fetcher, source))) => Some(Arc::new(FontResourceService::new(
                fetcher,
                source,
                self.config.retry_policy(),
            ))),
            (None, None) => None,
        };
        let trace = match self.trace_path {
            Some(path) => Some(TraceLogger::new(path)?),
            None => None,
        };
        Ok(ExportPipeline {
            config: self.config,
            geometry,
            navigator: self.navigator,
            rasterizer: self.rasterizer,
            asset_host: self.asset_host,
            overflow_probe: self.overflow_probe,
            font_service,
            print_host: self.print_host,
            trace,
            job_lock: tokio::sync::Mutex::new(()),
        })
    }
}

impl Default for ExportPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ExportPipeline {
    pub fn builder() -> ExportPipelineBuilder {
        ExportPipelineBuilder::new()
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    pub fn geometry(&self) -> PageGeometry {
        self.geometry
    }

    pub fn font_service(&self) -> Option<&Arc<FontResourceService>> {
        self.font_service.as_ref()
    }

    /// Runs the whole export under the configured job timeout. Dropping the returned future
    /// (or hitting the timeout) still restores the originally active slide.
    ///
    /// Jobs on one pipeline run one at a time; a second call waits for the first to restore
    /// the viewer's slide, and that wait counts against its own timeout.
    pub async fn export(&self, job: &ExportJob) -> Result<ExportOutput, ExportError> {
        let limit = self.config.job_timeout();
        info!(
            slides = job.slides.len(),
            backend = job.backend.as_str(),
            "export started"
        );
        let queued = async {
            let _running = self.job_lock.lock().await;
            self.run(job).await
        };
        let result = match tokio::time::timeout(limit, queued).await {
            Ok(result) => result,
            Err(_) => Err(ExportError::TimeoutExceeded { limit }),
        };
        match &result {
            Ok(output) => info!(
                pages = output.document.page_count(),
                bytes = output.pdf.len(),
                "export finished"
            ),
            Err(err) => {
                log_transition(self.trace.as_ref(), CaptureState::Aborted);
                warn!(status = ?err.job_status(), error = %err, "export failed");
            }
        }
        self.emit_trace_summary("export");
        result
    }

    /// Exports to PDF bytes, falling back to the host's print path when byte generation
    /// fails for a reason the print path does not share.
    pub async fn export_bytes_or_print(&self, job: &ExportJob) -> Result<Delivery, ExportError> {
        let err = match self.export(job).await {
            Ok(output) => return Ok(Delivery::Bytes(output.pdf)),
            Err(err) => err,
        };
        let Some(host) = self.print_host.as_ref().filter(|_| err.offers_print_fallback()) else {
            return Err(err);
        };
        warn!(error = %err, "pdf generation failed, using host print");
        let font_css = match &self.font_service {
            Some(service) if service.state() == FontStateKind::Registered => service
                .ensure_font()
                .await
                .ok()
                .map(|fonts| fonts.css_font_faces()),
            _ => None,
        };
        let request = PrintRequest {
            geometry: self.geometry,
            page_count: job.slides.len(),
            title: job.title.clone(),
            font_css,
        };
        host.print(&request).map_err(ExportError::Print)?;
        Ok(Delivery::Printed {
            reason: err.to_string(),
        })
    }

    async fn run(&self, job: &ExportJob) -> Result<ExportOutput, ExportError> {
        if job.slides.is_empty() {
            return Err(ExportError::EmptyJob);
        }
        if let Some(page) = job
            .slides
            .iter()
            .position(|slide| !job.backend.accepts(&slide.renderable))
        {
            return Err(ExportError::BackendMismatch {
                page: page + 1,
                backend: job.backend.as_str(),
            });
        }
        let backend: Box<dyn PageBackend> = match job.backend {
            BackendKind::Raster => Box::new(RasterBackend),
            BackendKind::Structured => {
                let service = self
                    .font_service
                    .as_ref()
                    .ok_or(ExportError::FontUnavailable(FontError::NotConfigured))?;
                Box::new(StructuredBackend::new(service.ensure_font().await?))
            }
        };

        let outcome = self
            .orchestrator()
            .capture_all(&job.slides, job.progress.as_ref())
            .await?;

        log_transition(self.trace.as_ref(), CaptureState::Assembling);
        let assembler = DocumentAssembler::new(self.geometry, backend)
            .with_footer(self.config.footer_style())
            .with_background(self.config.background_color())
            .with_title(job.title.clone());
        let (document, scales) = assembler.assemble_measured(&outcome.captures)?;
        let pdf = document.to_pdf_bytes()?;

        let mut metrics = ExportMetrics::default();
        for (capture, scale) in outcome.captures.iter().zip(scales) {
            metrics.push(PageMetrics {
                page_number: capture.page_number,
                slide_id: capture.slide_id.clone(),
                source_width: capture.source_width,
                source_height: capture.source_height,
                scale,
                capture_ms: capture.capture_ms,
            });
        }
        metrics.pdf_bytes = pdf.len();
        if let Some(trace) = &self.trace {
            trace.increment("pages", document.page_count() as u64);
            trace.event("export.metrics", &metrics);
        }
        log_transition(self.trace.as_ref(), CaptureState::Done);

        Ok(ExportOutput {
            document,
            pdf,
            report: ExportReport {
                status: JobStatus::Succeeded,
                backend: job.backend,
                metrics,
                readiness: outcome.readiness,
                overflow: outcome.overflow,
            },
        })
    }

    fn orchestrator(&self) -> CaptureOrchestrator {
        let mut orchestrator = CaptureOrchestrator::new(CaptureOptions {
            settle: self.config.settle_strategy(),
            post_render: self.config.post_render(),
            raster: self.config.raster_options(),
        });
        if let Some(navigator) = &self.navigator {
            orchestrator = orchestrator.with_navigator(navigator.clone());
        }
        if let Some(rasterizer) = &self.rasterizer {
            orchestrator = orchestrator.with_rasterizer(rasterizer.clone());
        }
        if let Some(host) = &self.asset_host {
            orchestrator = orchestrator.with_asset_host(
                host.clone(),
                self.config.asset_timeout(),
                self.config.max_settle_cycles,
            );
        }
        if let Some(probe) = self.overflow_probe.as_ref().filter(|_| self.config.check_overflow) {
            orchestrator = orchestrator.with_overflow_probe(probe.clone());
        }
        if let Some(trace) = &self.trace {
            orchestrator = orchestrator.with_trace(trace.clone());
        }
        orchestrator
    }

    fn emit_trace_summary(&self, context: &str) {
        if let Some(trace) = &self.trace {
            trace.emit_summary(context);
            trace.flush();
        }
    }
}

/// Concatenates documents that share one page geometry. Image resources are renamed so
/// each document's images stay distinct.
pub fn merge_documents(documents: Vec<Document>) -> Result<Document, ExportError> {
    let mut iter = documents.into_iter();
    let Some(mut merged) = iter.next() else {
        return Err(ExportError::EmptyJob);
    };

    for doc in iter {
        if doc.geometry != merged.geometry {
            return Err(ExportError::InconsistentGeometry);
        }
        match (&merged.fonts, &doc.fonts) {
            (Some(ours), Some(theirs)) if !Arc::ptr_eq(ours, theirs) => {
                return Err(ExportError::InvalidConfiguration(
                    "documents embed different fonts".to_string(),
                ));
            }
            (None, Some(theirs)) => merged.fonts = Some(theirs.clone()),
            _ => {}
        }

        let mut renamed = std::collections::HashMap::new();
        for (name, image) in doc.images {
            let fresh = format!("Im{}", merged.images.len() + 1);
            merged.images.insert(fresh.clone(), image);
            renamed.insert(name, fresh);
        }
        for mut page in doc.pages {
            for command in &mut page.commands {
                if let Command::DrawImage { resource_id, .. } = command {
                    if let Some(fresh) = renamed.get(resource_id.as_str()) {
                        *resource_id = fresh.clone();
                    }
                }
            }
            merged.pages.push(page);
        }
    }
    Ok(merged)
}
