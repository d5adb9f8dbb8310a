//! Turns an ordered set of captures into a fixed-geometry [`Document`]: one page per
//! capture, content scaled to fit and centered, with a `"{i} / {n}"` footer.

use crate::canvas::{Canvas, Command, Document, FontKey};
use crate::capture::{CapturePayload, CaptureResult, Renderable};
use crate::error::ExportError;
use crate::fit::ScaleTransform;
use crate::font::{RegisteredFonts, measure_text_width};
use crate::geometry::PageGeometry;
use crate::pdf::{ImageData, decode_image_bytes};
use crate::structured::layout_slide;
use crate::types::{Color, Pt};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

pub const META_SLIDE_ID: &str = "slide_id";
pub const META_LABEL: &str = "label";

const STRUCTURED_MARGIN: f32 = 36.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Raster,
    Structured,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Raster => "raster",
            BackendKind::Structured => "structured",
        }
    }

    /// Whether this backend can place a page for `renderable`.
    pub fn accepts(&self, renderable: &Renderable) -> bool {
        matches!(
            (self, renderable),
            (BackendKind::Raster, Renderable::Surface(_))
                | (BackendKind::Structured, Renderable::Structured(_))
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FooterStyle {
    pub font_size: Pt,
    pub color: Color,
    /// Distance from the bottom page edge to the footer baseline.
    pub baseline_offset: Pt,
}

impl Default for FooterStyle {
    fn default() -> Self {
        Self {
            font_size: Pt::from_f32(9.0),
            color: Color::rgb(0.4, 0.4, 0.4),
            baseline_offset: Pt::from_f32(14.0),
        }
    }
}

pub fn footer_text(page_number: usize, total: usize) -> String {
    format!("{page_number} / {total}")
}

/// Decoded images keyed by resource name. Identical encoded bytes share one entry.
#[derive(Default)]
pub struct ImageRegistry {
    by_digest: HashMap<[u8; 32], String>,
    images: BTreeMap<String, Arc<ImageData>>,
}

impl ImageRegistry {
    pub fn intern(&mut self, encoded: &[u8]) -> Result<String, String> {
        let digest: [u8; 32] = Sha256::digest(encoded).into();
        if let Some(name) = self.by_digest.get(&digest) {
            return Ok(name.clone());
        }
        let image = decode_image_bytes(encoded)?;
        let name = format!("Im{}", self.images.len() + 1);
        self.images.insert(name.clone(), Arc::new(image));
        self.by_digest.insert(digest, name.clone());
        Ok(name)
    }

    pub fn into_images(self) -> BTreeMap<String, Arc<ImageData>> {
        self.images
    }
}

/// Per-page drawing state handed to a backend.
pub struct PageContext<'a> {
    pub canvas: &'a mut Canvas,
    pub images: &'a mut ImageRegistry,
    pub geometry: PageGeometry,
}

/// Renders one capture onto the current page and returns the applied scale factor.
pub trait PageBackend: Send + Sync {
    fn kind(&self) -> BackendKind;
    fn footer_font(&self) -> FontKey;
    fn fonts(&self) -> Option<Arc<RegisteredFonts>>;
    fn render_page(
        &self,
        page: &mut PageContext<'_>,
        capture: &CaptureResult,
    ) -> Result<f32, ExportError>;
}

/// Places captured bitmaps, scaled against the page's pixel box.
pub struct RasterBackend;

impl PageBackend for RasterBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Raster
    }

    fn footer_font(&self) -> FontKey {
        FontKey::Helvetica
    }

    fn fonts(&self) -> Option<Arc<RegisteredFonts>> {
        None
    }

    fn render_page(
        &self,
        page: &mut PageContext<'_>,
        capture: &CaptureResult,
    ) -> Result<f32, ExportError> {
        let CapturePayload::Bitmap(bitmap) = &capture.payload else {
            return Err(ExportError::BackendMismatch {
                page: capture.page_number,
                backend: self.kind().as_str(),
            });
        };
        let resource = page
            .images
            .intern(&bitmap.data)
            .map_err(|reason| ExportError::MalformedCapture {
                page: capture.page_number,
                slide_id: capture.slide_id.clone(),
                reason,
            })?;

        let (source_w, source_h) = if capture.source_width > 0 && capture.source_height > 0 {
            (capture.source_width as f32, capture.source_height as f32)
        } else {
            (bitmap.width as f32, bitmap.height as f32)
        };
        let pixel_box = page.geometry.pixel_box();
        let (box_w, box_h) = (pixel_box.width as f32, pixel_box.height as f32);
        let transform = ScaleTransform::compute(source_w, source_h, box_w, box_h);
        let placed = transform.place(source_w, source_h, box_w, box_h);

        let size = page.geometry.point_size();
        let to_pt_x = size.width.to_f32() / box_w;
        let to_pt_y = size.height.to_f32() / box_h;
        page.canvas.draw_image(
            Pt::from_f32(placed.x * to_pt_x),
            Pt::from_f32(placed.y * to_pt_y),
            Pt::from_f32(placed.width * to_pt_x),
            Pt::from_f32(placed.height * to_pt_y),
            resource,
        );
        Ok(transform.factor)
    }
}

/// Lays out structured slide content with the registered embedded font.
pub struct StructuredBackend {
    fonts: Arc<RegisteredFonts>,
}

impl StructuredBackend {
    pub fn new(fonts: Arc<RegisteredFonts>) -> Self {
        Self { fonts }
    }
}

impl PageBackend for StructuredBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Structured
    }

    fn footer_font(&self) -> FontKey {
        FontKey::EmbeddedRegular
    }

    fn fonts(&self) -> Option<Arc<RegisteredFonts>> {
        Some(self.fonts.clone())
    }

    fn render_page(
        &self,
        page: &mut PageContext<'_>,
        capture: &CaptureResult,
    ) -> Result<f32, ExportError> {
        let CapturePayload::Structured(content) = &capture.payload else {
            return Err(ExportError::BackendMismatch {
                page: capture.page_number,
                backend: self.kind().as_str(),
            });
        };
        let size = page.geometry.point_size();
        let margin = Pt::from_f32(STRUCTURED_MARGIN);
        let area_w = (size.width - margin * 2).max(Pt::from_f32(1.0));
        // The bottom margin is doubled to keep the footer band clear.
        let area_h = (size.height - margin * 3).max(Pt::from_f32(1.0));

        let layout = layout_slide(content, &self.fonts, area_w);
        if layout.commands.is_empty() {
            return Ok(1.0);
        }
        let (content_w, content_h) = (layout.width.to_f32(), layout.height.to_f32());
        let transform =
            ScaleTransform::compute(content_w, content_h, area_w.to_f32(), area_h.to_f32());
        let placed = transform.place(content_w, content_h, area_w.to_f32(), area_h.to_f32());

        let mut commands = Vec::with_capacity(layout.commands.len() + 1);
        commands.push(Command::ConcatMatrix {
            a: transform.factor,
            b: 0.0,
            c: 0.0,
            d: transform.factor,
            e: margin + Pt::from_f32(placed.x),
            f: margin + Pt::from_f32(placed.y),
        });
        commands.extend(layout.commands);
        page.canvas.append_isolated(commands);
        Ok(transform.factor)
    }
}

pub struct DocumentAssembler {
    geometry: PageGeometry,
    backend: Box<dyn PageBackend>,
    footer: Option<FooterStyle>,
    background: Color,
    title: Option<String>,
}

impl DocumentAssembler {
    pub fn new(geometry: PageGeometry, backend: Box<dyn PageBackend>) -> Self {
        Self {
            geometry,
            backend,
            footer: Some(FooterStyle::default()),
            background: Color::WHITE,
            title: None,
        }
    }

    pub fn with_footer(mut self, footer: Option<FooterStyle>) -> Self {
        self.footer = footer;
        self
    }

    pub fn with_background(mut self, background: Color) -> Self {
        self.background = background;
        self
    }

    pub fn with_title(mut self, title: Option<String>) -> Self {
        self.title = title;
        self
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn assemble(&self, captures: &[CaptureResult]) -> Result<Document, ExportError> {
        self.assemble_measured(captures).map(|(document, _)| document)
    }

    /// Like [`assemble`](Self::assemble), also returning the scale applied to each page.
    pub fn assemble_measured(
        &self,
        captures: &[CaptureResult],
    ) -> Result<(Document, Vec<f32>), ExportError> {
        if captures.is_empty() {
            return Err(ExportError::EmptyJob);
        }
        let total = captures.len();
        if captures
            .iter()
            .enumerate()
            .any(|(idx, capture)| capture.page_number != idx + 1)
        {
            let expected = captures
                .iter()
                .map(|c| c.page_number)
                .max()
                .unwrap_or(total)
                .max(total);
            let missing = (1..=expected)
                .filter(|page| !captures.iter().any(|c| c.page_number == *page))
                .collect();
            return Err(ExportError::IncompletePageSet {
                expected,
                actual: total,
                missing,
            });
        }

        let size = self.geometry.point_size();
        let fonts = self.backend.fonts();
        let mut canvas = Canvas::new(self.geometry);
        let mut images = ImageRegistry::default();
        let mut scales = Vec::with_capacity(total);

        for capture in captures {
            canvas.meta(META_SLIDE_ID, capture.slide_id.as_str());
            canvas.meta(META_LABEL, capture.label.as_str());
            canvas.set_fill_color(self.background);
            canvas.draw_rect(Pt::ZERO, Pt::ZERO, size.width, size.height);

            let mut page = PageContext {
                canvas: &mut canvas,
                images: &mut images,
                geometry: self.geometry,
            };
            let scale = self.backend.render_page(&mut page, capture)?;
            scales.push(scale);

            if let Some(footer) = &self.footer {
                let text = footer_text(capture.page_number, total);
                let key = self.backend.footer_font();
                let width = measure_text_width(fonts.as_deref(), key, footer.font_size, &text);
                canvas.set_font(key, footer.font_size);
                canvas.set_fill_color(footer.color);
                canvas.draw_string(
                    (size.width - width) / 2,
                    size.height - footer.baseline_offset,
                    text,
                );
            }
            debug!(
                page = capture.page_number,
                slide = %capture.slide_id,
                scale,
                backend = self.backend.kind().as_str(),
                "page assembled"
            );
            canvas.show_page();
        }

        Ok((
            Document {
                geometry: self.geometry,
                pages: canvas.into_pages(),
                images: images.into_images(),
                fonts,
                title: self.title.clone(),
            },
            scales,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Bitmap;
    use crate::structured::{Section, SlideContent};
    use crate::testing::{bitmap_capture, png_bytes, registered_fixture_fonts};

    fn raster() -> DocumentAssembler {
        DocumentAssembler::new(PageGeometry::default(), Box::new(RasterBackend))
    }

    fn images_on(page: &crate::canvas::Page) -> Vec<(f32, f32, f32, f32, String)> {
        page.commands
            .iter()
            .filter_map(|cmd| match cmd {
                Command::DrawImage {
                    x,
                    y,
                    width,
                    height,
                    resource_id,
                } => Some((
                    x.to_f32(),
                    y.to_f32(),
                    width.to_f32(),
                    height.to_f32(),
                    resource_id.clone(),
                )),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn five_page_box_captures_fill_each_page_with_footers() {
        let captures: Vec<CaptureResult> = (1..=5)
            .map(|n| bitmap_capture(n, 1587, 1123, png_bytes(32, 22, [n as u8 * 40, 10, 10, 255])))
            .collect();
        let (document, scales) = raster().assemble_measured(&captures).unwrap();

        assert_eq!(document.page_count(), 5);
        assert_eq!(scales, vec![1.0; 5]);
        let size = document.geometry.point_size();
        for (idx, page) in document.pages.iter().enumerate() {
            let n = idx + 1;
            assert_eq!(page.meta(META_SLIDE_ID), Some(format!("slide-{n}").as_str()));
            let footer: Vec<&str> = page.strings().collect();
            assert_eq!(footer, vec![format!("{n} / 5").as_str()]);
            let placed = images_on(page);
            assert_eq!(placed.len(), 1);
            let (x, y, w, h, _) = &placed[0];
            assert!(x.abs() < 0.01 && y.abs() < 0.01);
            assert!((w - size.width.to_f32()).abs() < 0.01);
            assert!((h - size.height.to_f32()).abs() < 0.01);
        }
        assert_eq!(document.images.len(), 5);
    }

    #[test]
    fn differing_natural_sizes_each_fit_their_own_page() {
        let sizes = [(1587u32, 1123u32), (3174, 1123), (800, 600), (1587, 2246), (2000, 2000)];
        let captures: Vec<CaptureResult> = sizes
            .iter()
            .enumerate()
            .map(|(idx, (w, h))| {
                bitmap_capture(idx + 1, *w, *h, png_bytes(4, 4, [idx as u8 * 30, 0, 0, 255]))
            })
            .collect();
        let (document, scales) = raster().assemble_measured(&captures).unwrap();

        let size = document.geometry.point_size();
        let (page_w, page_h) = (size.width.to_f32(), size.height.to_f32());
        for (idx, (w, h)) in sizes.iter().enumerate() {
            let (w, h) = (*w as f32, *h as f32);
            let expected = (1587.0 / w).min(1123.0 / h).min(1.0);
            assert!((scales[idx] - expected).abs() < 1e-5, "page {}", idx + 1);

            let (x, y, pw, ph, _) = images_on(&document.pages[idx]).remove(0);
            assert!((x - (page_w - pw - x)).abs() < 0.05, "page {} not centered", idx + 1);
            assert!((y - (page_h - ph - y)).abs() < 0.05, "page {} not centered", idx + 1);
            let footer: Vec<&str> = document.pages[idx].strings().collect();
            assert_eq!(footer, vec![format!("{} / 5", idx + 1).as_str()]);
        }
    }

    #[test]
    fn oversized_capture_is_scaled_down_and_centered() {
        let captures = vec![bitmap_capture(1, 3174, 1123, png_bytes(8, 4, [0, 0, 0, 255]))];
        let (document, scales) = raster().assemble_measured(&captures).unwrap();
        assert!((scales[0] - 0.5).abs() < 1e-6);

        let size = document.geometry.point_size();
        let (x, y, w, h, _) = images_on(&document.pages[0]).remove(0);
        assert!(x.abs() < 0.01);
        assert!((w - size.width.to_f32()).abs() < 0.01);
        assert!((h - size.height.to_f32() / 2.0).abs() < 0.01);
        assert!((y - size.height.to_f32() / 4.0).abs() < 0.01);
    }

    #[test]
    fn small_capture_keeps_natural_size() {
        let captures = vec![bitmap_capture(1, 800, 600, png_bytes(8, 6, [0, 0, 0, 255]))];
        let (document, scales) = raster().assemble_measured(&captures).unwrap();
        assert_eq!(scales[0], 1.0);
        let (_, _, w, h, _) = images_on(&document.pages[0]).remove(0);
        assert!((w - 600.0).abs() < 0.5, "{w}");
        assert!((h - 450.0).abs() < 0.5, "{h}");
    }

    #[test]
    fn malformed_capture_fails_the_whole_document() {
        let mut captures: Vec<CaptureResult> = (1..=4)
            .map(|n| bitmap_capture(n, 1587, 1123, png_bytes(4, 4, [9, 9, 9, 255])))
            .collect();
        captures[2].payload = CapturePayload::Bitmap(Bitmap {
            width: 10,
            height: 10,
            data: b"\x89PNG\r\n\x1a\ntruncated".to_vec(),
        });
        match raster().assemble(&captures).unwrap_err() {
            ExportError::MalformedCapture { page, slide_id, .. } => {
                assert_eq!(page, 3);
                assert_eq!(slide_id, "slide-3");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn identical_bitmaps_share_one_image_but_keep_every_page() {
        let bytes = png_bytes(6, 6, [200, 200, 200, 255]);
        let captures: Vec<CaptureResult> = (1..=3)
            .map(|n| bitmap_capture(n, 1587, 1123, bytes.clone()))
            .collect();
        let document = raster().assemble(&captures).unwrap();
        assert_eq!(document.page_count(), 3);
        assert_eq!(document.images.len(), 1);
        assert!(document
            .pages
            .iter()
            .all(|page| images_on(page)[0].4 == "Im1"));
    }

    #[test]
    fn out_of_sequence_captures_are_rejected() {
        let captures = vec![
            bitmap_capture(1, 100, 100, png_bytes(2, 2, [0, 0, 0, 255])),
            bitmap_capture(3, 100, 100, png_bytes(2, 2, [0, 0, 0, 255])),
        ];
        match raster().assemble(&captures).unwrap_err() {
            ExportError::IncompletePageSet {
                expected,
                actual,
                missing,
            } => {
                assert_eq!((expected, actual), (3, 2));
                assert_eq!(missing, vec![2]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(raster().assemble(&[]), Err(ExportError::EmptyJob)));
    }

    #[test]
    fn footer_can_be_disabled() {
        let captures = vec![bitmap_capture(1, 100, 100, png_bytes(2, 2, [0, 0, 0, 255]))];
        let document = raster().with_footer(None).assemble(&captures).unwrap();
        assert_eq!(document.pages[0].strings().count(), 0);
    }

    #[test]
    fn page_starts_with_background_fill() {
        let captures = vec![bitmap_capture(1, 100, 100, png_bytes(2, 2, [0, 0, 0, 255]))];
        let background = Color::rgb(0.1, 0.2, 0.3);
        let document = raster().with_background(background).assemble(&captures).unwrap();
        let commands = &document.pages[0].commands;
        assert!(commands.contains(&Command::SetFillColor(background)));
        assert!(matches!(
            commands.iter().find(|cmd| matches!(cmd, Command::DrawRect { .. })),
            Some(Command::DrawRect { x, y, .. }) if *x == Pt::ZERO && *y == Pt::ZERO
        ));
    }

    #[test]
    fn backend_rejects_the_wrong_payload() {
        let structured = CaptureResult {
            slide_id: "s".to_string(),
            label: "S".to_string(),
            page_number: 1,
            payload: CapturePayload::Structured(SlideContent::default()),
            source_width: 0,
            source_height: 0,
            capture_ms: 0.0,
        };
        assert!(matches!(
            raster().assemble(&[structured]),
            Err(ExportError::BackendMismatch {
                page: 1,
                backend: "raster"
            })
        ));
    }

    #[test]
    fn structured_pages_use_the_embedded_font_throughout() {
        let fonts = Arc::new(registered_fixture_fonts());
        let assembler = DocumentAssembler::new(
            PageGeometry::default(),
            Box::new(StructuredBackend::new(fonts)),
        )
        .with_title(Some("Portfolio review".to_string()));
        let captures: Vec<CaptureResult> = (1..=2)
            .map(|n| CaptureResult {
                slide_id: format!("s{n}"),
                label: format!("Slide {n}"),
                page_number: n,
                payload: CapturePayload::Structured(SlideContent {
                    title: format!("Section {n}"),
                    sections: vec![Section {
                        heading: None,
                        paragraphs: vec!["Balances by region".to_string(); 40],
                    }],
                    ..SlideContent::default()
                }),
                source_width: 0,
                source_height: 0,
                capture_ms: 0.0,
            })
            .collect();

        let (document, scales) = assembler.assemble_measured(&captures).unwrap();
        assert!(document.fonts.is_some());
        // Forty paragraphs do not fit at natural size.
        assert!(scales.iter().all(|s| *s < 1.0 && *s > 0.0));
        for page in &document.pages {
            assert!(page.commands.iter().all(|cmd| !matches!(
                cmd,
                Command::SetFont { font, .. } if !font.is_embedded()
            )));
        }
        assert_eq!(document.pages[1].strings().last(), Some("2 / 2"));

        let pdf = document.to_pdf_bytes().unwrap();
        let loaded = lopdf::Document::load_mem(&pdf).unwrap();
        assert_eq!(loaded.get_pages().len(), 2);
    }
}
