use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize)]
pub struct PageMetrics {
    pub page_number: usize,
    pub slide_id: String,
    pub source_width: u32,
    pub source_height: u32,
    pub scale: f32,
    pub capture_ms: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExportMetrics {
    pub pages: Vec<PageMetrics>,
    pub total_capture_ms: f64,
    pub pdf_bytes: usize,
}

impl ExportMetrics {
    pub fn push(&mut self, page: PageMetrics) {
        self.total_capture_ms += page.capture_ms;
        self.pages.push(page);
    }
}
