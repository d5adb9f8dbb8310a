//! Font acquisition and registration.
//!
//! The service fetches one embeddable font family (regular plus an optional bold weight)
//! once per process, validates it, and hands out the registered faces. Concurrent callers
//! share one in-flight registration.

use crate::canvas::FontKey;
use crate::error::{FetchError, FontError};
use crate::types::Pt;
use async_trait::async_trait;
use base64::Engine;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Base64 input is encoded in slices of this many bytes. A multiple of 3, so the
/// concatenated output equals a one-shot encoding.
pub const DATA_URI_CHUNK_BYTES: usize = 3 * 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FontWeight(pub u16);

impl FontWeight {
    pub const REGULAR: FontWeight = FontWeight(400);
    pub const BOLD: FontWeight = FontWeight(700);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontFormat {
    TrueType,
    OpenTypeCff,
}

impl FontFormat {
    pub fn mime(self) -> &'static str {
        match self {
            FontFormat::TrueType => "font/ttf",
            FontFormat::OpenTypeCff => "font/otf",
        }
    }

    fn css_format(self) -> &'static str {
        match self {
            FontFormat::TrueType => "truetype",
            FontFormat::OpenTypeCff => "opentype",
        }
    }
}

/// Classifies a payload by its first four bytes.
pub fn sniff_format(data: &[u8]) -> Result<FontFormat, String> {
    let Some(magic) = data.get(..4) else {
        return Err(format!("a truncated payload ({} bytes)", data.len()));
    };
    match magic {
        [0x00, 0x01, 0x00, 0x00] | b"true" => Ok(FontFormat::TrueType),
        b"OTTO" => Ok(FontFormat::OpenTypeCff),
        b"wOFF" => Err("WOFF (compressed web font)".to_string()),
        b"wOF2" => Err("WOFF2 (compressed web font)".to_string()),
        b"ttcf" => Err("a TrueType/OpenType font collection".to_string()),
        other => Err(format!(
            "an unknown format ({:02x} {:02x} {:02x} {:02x})",
            other[0], other[1], other[2], other[3]
        )),
    }
}

#[derive(Debug, Clone)]
pub struct FontMetrics {
    pub units_per_em: u16,
    pub ascent: i16,
    pub descent: i16,
    pub cap_height: i16,
    pub italic_angle: i16,
    pub stem_v: i16,
    pub bbox: (i16, i16, i16, i16),
    pub missing_width: u16,
    pub is_fixed_pitch: bool,
}

impl FontMetrics {
    fn from_face(face: &ttf_parser::Face<'_>) -> Self {
        let units_per_em = face.units_per_em().max(1);
        let scale = 1000.0 / units_per_em as f32;
        let ascent = scale_i16(face.ascender(), scale);
        let bbox = face.global_bounding_box();
        let missing_width = face
            .glyph_index(' ')
            .and_then(|gid| face.glyph_hor_advance(gid))
            .map(|adv| (adv as f32 * scale).round().clamp(0.0, u16::MAX as f32) as u16)
            .unwrap_or(500);
        Self {
            units_per_em,
            ascent,
            descent: scale_i16(face.descender(), scale),
            cap_height: face
                .capital_height()
                .map(|value| scale_i16(value, scale))
                .unwrap_or(ascent),
            italic_angle: face
                .italic_angle()
                .map(|value| value.round() as i16)
                .unwrap_or(0),
            stem_v: 80,
            bbox: (
                scale_i16(bbox.x_min, scale),
                scale_i16(bbox.y_min, scale),
                scale_i16(bbox.x_max, scale),
                scale_i16(bbox.y_max, scale),
            ),
            missing_width,
            is_fixed_pitch: face.is_monospaced(),
        }
    }
}

/// A validated, embeddable font face.
#[derive(Debug, Clone)]
pub struct FontFace {
    pub family: String,
    pub weight: FontWeight,
    pub format: FontFormat,
    pub postscript_name: String,
    pub metrics: FontMetrics,
    data: Arc<[u8]>,
}

impl FontFace {
    pub fn from_bytes(
        family: &str,
        weight: FontWeight,
        data: Vec<u8>,
        url: &str,
    ) -> Result<Self, FontError> {
        let format = sniff_format(&data).map_err(|format| FontError::UnsupportedFormat {
            url: url.to_string(),
            format,
        })?;
        let face = ttf_parser::Face::parse(&data, 0).map_err(|err| FontError::Invalid {
            url: url.to_string(),
            reason: err.to_string(),
        })?;
        let postscript_name = postscript_name(&face).unwrap_or_else(|| family.to_string());
        let metrics = FontMetrics::from_face(&face);
        Ok(Self {
            family: family.to_string(),
            weight,
            format,
            postscript_name,
            metrics,
            data: Arc::from(data),
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    fn with_face<R>(&self, f: impl FnOnce(&ttf_parser::Face<'_>) -> R) -> Option<R> {
        ttf_parser::Face::parse(&self.data, 0).ok().map(|face| f(&face))
    }

    /// Glyph ids for `text`, one per char; unmapped chars become glyph 0.
    pub fn glyph_ids(&self, text: &str) -> Vec<u16> {
        self.with_face(|face| {
            text.chars()
                .map(|ch| face.glyph_index(ch).map(|gid| gid.0).unwrap_or(0))
                .collect()
        })
        .unwrap_or_else(|| vec![0; text.chars().count()])
    }

    /// Horizontal advance of `gid` in 1/1000 em.
    pub fn glyph_advance(&self, gid: u16) -> u16 {
        self.with_face(|face| {
            let units = face.units_per_em().max(1) as i64;
            face.glyph_hor_advance(ttf_parser::GlyphId(gid))
                .map(|adv| ((adv as i64) * 1000 + (units / 2)) / units)
                .map(|scaled| scaled.clamp(0, u16::MAX as i64) as u16)
        })
        .flatten()
        .unwrap_or(self.metrics.missing_width)
    }

    pub fn measure_text_width(&self, font_size: Pt, text: &str) -> Pt {
        let total: i32 = self
            .with_face(|face| {
                let units = face.units_per_em().max(1) as i64;
                text.chars()
                    .map(|ch| {
                        face.glyph_index(ch)
                            .and_then(|gid| face.glyph_hor_advance(gid))
                            .map(|adv| (((adv as i64) * 1000 + units / 2) / units) as i32)
                            .unwrap_or(self.metrics.missing_width as i32)
                    })
                    .fold(0i32, i32::saturating_add)
            })
            .unwrap_or(0);
        if total <= 0 {
            return Pt::ZERO;
        }
        font_size.mul_ratio(total, 1000)
    }

    /// Self-contained `data:` URI for the face, encoded in [`DATA_URI_CHUNK_BYTES`] slices.
    pub fn to_data_uri(&self) -> String {
        let mut out = format!("data:{};base64,", self.format.mime());
        encode_base64_chunked(&self.data, &mut out);
        out
    }

    /// `@font-face` rule for the host print path.
    pub fn css_font_face(&self) -> String {
        format!(
            "@font-face {{ font-family: \"{}\"; font-weight: {}; src: url({}) format(\"{}\"); }}",
            self.family,
            self.weight.0,
            self.to_data_uri(),
            self.format.css_format()
        )
    }
}

pub fn encode_base64_chunked(data: &[u8], out: &mut String) {
    out.reserve(data.len().div_ceil(3) * 4);
    for chunk in data.chunks(DATA_URI_CHUNK_BYTES) {
        base64::engine::general_purpose::STANDARD.encode_string(chunk, out);
    }
}

/// The registered family: a regular face and, when it loaded, a bold face.
#[derive(Debug, Clone)]
pub struct RegisteredFonts {
    pub regular: FontFace,
    pub bold: Option<FontFace>,
}

impl RegisteredFonts {
    pub fn face(&self, key: FontKey) -> Option<&FontFace> {
        match key {
            FontKey::EmbeddedRegular => Some(&self.regular),
            FontKey::EmbeddedBold => Some(self.bold.as_ref().unwrap_or(&self.regular)),
            FontKey::Helvetica | FontKey::HelveticaBold => None,
        }
    }

    /// Key to draw bold text with; the regular face stands in when bold is missing.
    pub fn bold_key(&self) -> FontKey {
        if self.bold.is_some() {
            FontKey::EmbeddedBold
        } else {
            FontKey::EmbeddedRegular
        }
    }

    pub fn css_font_faces(&self) -> String {
        let mut out = self.regular.css_font_face();
        if let Some(bold) = &self.bold {
            out.push('\n');
            out.push_str(&bold.css_font_face());
        }
        out
    }
}

pub fn measure_text_width(
    fonts: Option<&RegisteredFonts>,
    key: FontKey,
    font_size: Pt,
    text: &str,
) -> Pt {
    if let Some(face) = fonts.and_then(|fonts| fonts.face(key)) {
        return face.measure_text_width(font_size, text);
    }
    let char_width = (font_size * 0.6).max(Pt::from_f32(1.0));
    char_width * (text.chars().count() as i32)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FontSource {
    pub family: String,
    pub regular_url: String,
    pub bold_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Wait after failed attempt `attempt` (1-based): `base * 2^(attempt - 1)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Network retrieval capability.
#[async_trait]
pub trait FontFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError>;
}

type FontFlight = Shared<BoxFuture<'static, Result<Arc<RegisteredFonts>, FontError>>>;

enum FontState {
    Unregistered,
    InFlight { generation: u64, flight: FontFlight },
    Registered(Arc<RegisteredFonts>),
    Failed(FontError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontStateKind {
    Unregistered,
    InFlight,
    Registered,
    Failed,
}

struct ServiceState {
    state: FontState,
    generation: u64,
}

/// Process-wide font registration with single-flight semantics.
pub struct FontResourceService {
    fetcher: Arc<dyn FontFetcher>,
    source: FontSource,
    retry: RetryPolicy,
    state: Mutex<ServiceState>,
}

impl FontResourceService {
    pub fn new(fetcher: Arc<dyn FontFetcher>, source: FontSource, retry: RetryPolicy) -> Self {
        Self {
            fetcher,
            source,
            retry,
            state: Mutex::new(ServiceState {
                state: FontState::Unregistered,
                generation: 0,
            }),
        }
    }

    pub fn source(&self) -> &FontSource {
        &self.source
    }

    pub fn state(&self) -> FontStateKind {
        match self.lock_state().state {
            FontState::Unregistered => FontStateKind::Unregistered,
            FontState::InFlight { .. } => FontStateKind::InFlight,
            FontState::Registered(_) => FontStateKind::Registered,
            FontState::Failed(_) => FontStateKind::Failed,
        }
    }

    /// Registered faces, fetching them first if needed. Callers arriving while a
    /// registration is in flight await that same attempt. A failed registration is retried
    /// by the next call.
    ///
    /// The faces always come from the [`FontSource`] this service was built with; a different
    /// font URL needs its own service.
    pub async fn ensure_font(&self) -> Result<Arc<RegisteredFonts>, FontError> {
        let (generation, flight) = {
            let mut guard = self.lock_state();
            match &guard.state {
                FontState::Registered(fonts) => return Ok(fonts.clone()),
                FontState::InFlight { generation, flight } => {
                    debug!(family = %self.source.family, "joining in-flight font registration");
                    (*generation, flight.clone())
                }
                FontState::Unregistered | FontState::Failed(_) => {
                    guard.generation += 1;
                    let generation = guard.generation;
                    let flight = load_fonts(self.fetcher.clone(), self.source.clone(), self.retry)
                        .boxed()
                        .shared();
                    guard.state = FontState::InFlight {
                        generation,
                        flight: flight.clone(),
                    };
                    (generation, flight)
                }
            }
        };

        let result = flight.await;

        let mut guard = self.lock_state();
        let current = matches!(
            &guard.state,
            FontState::InFlight { generation: g, .. } if *g == generation
        );
        if current {
            guard.state = match &result {
                Ok(fonts) => FontState::Registered(fonts.clone()),
                Err(err) => FontState::Failed(err.clone()),
            };
        }
        result
    }

    /// Forgets any registration. Test hook.
    pub fn reset(&self) {
        let mut guard = self.lock_state();
        guard.generation += 1;
        guard.state = FontState::Unregistered;
    }

    fn lock_state(&self) -> MutexGuard<'_, ServiceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn load_fonts(
    fetcher: Arc<dyn FontFetcher>,
    source: FontSource,
    retry: RetryPolicy,
) -> Result<Arc<RegisteredFonts>, FontError> {
    info!(family = %source.family, url = %source.regular_url, "registering font");
    let data = fetch_with_retry(fetcher.as_ref(), &source.regular_url, retry).await?;
    let regular = FontFace::from_bytes(&source.family, FontWeight::REGULAR, data, &source.regular_url)?;

    let bold = match &source.bold_url {
        None => None,
        Some(url) => {
            let loaded = match fetch_with_retry(fetcher.as_ref(), url, retry).await {
                Ok(data) => FontFace::from_bytes(&source.family, FontWeight::BOLD, data, url),
                Err(err) => Err(err),
            };
            match loaded {
                Ok(face) => Some(face),
                Err(err) => {
                    warn!(family = %source.family, error = %err, "bold weight unavailable, continuing with regular weight");
                    None
                }
            }
        }
    };

    info!(
        family = %source.family,
        postscript_name = %regular.postscript_name,
        bold = bold.is_some(),
        "font registered"
    );
    Ok(Arc::new(RegisteredFonts { regular, bold }))
}

async fn fetch_with_retry(
    fetcher: &dyn FontFetcher,
    url: &str,
    retry: RetryPolicy,
) -> Result<Vec<u8>, FontError> {
    let attempts = retry.attempts.max(1);
    let mut last_status = None;
    let mut last_message = String::new();
    for attempt in 1..=attempts {
        match fetcher.fetch(url).await {
            Ok(response) if response.is_success() => {
                // Format problems are permanent; reject before any retry.
                sniff_format(&response.body).map_err(|format| FontError::UnsupportedFormat {
                    url: url.to_string(),
                    format,
                })?;
                return Ok(response.body);
            }
            Ok(response) => {
                last_status = Some(response.status);
                last_message = format!("HTTP {}", response.status);
            }
            Err(err) => {
                last_status = None;
                last_message = err.to_string();
            }
        }
        let delay = retry.delay_for(attempt);
        warn!(url, attempt, attempts, delay_ms = delay.as_millis() as u64, error = %last_message, "font fetch failed");
        tokio::time::sleep(delay).await;
    }
    Err(FontError::Network {
        url: url.to_string(),
        status: last_status,
        attempts,
        message: last_message,
    })
}

fn postscript_name(face: &ttf_parser::Face<'_>) -> Option<String> {
    use ttf_parser::name::name_id;

    let mut family = None;
    let mut full = None;
    let mut post = None;
    for entry in face.names() {
        let Some(name) = entry.to_string() else {
            continue;
        };
        match entry.name_id {
            name_id::POST_SCRIPT_NAME if post.is_none() => post = Some(name),
            name_id::FULL_NAME if full.is_none() => full = Some(name),
            name_id::TYPOGRAPHIC_FAMILY | name_id::FAMILY if family.is_none() => {
                family = Some(name)
            }
            _ => {}
        }
    }
    post.or(full).or(family)
}

fn scale_i16(value: i16, scale: f32) -> i16 {
    let scaled = (value as f32 * scale).round() as i32;
    scaled.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}
