use crate::assemble::FooterStyle;
use crate::capture::{RasterOptions, SettleStrategy};
use crate::error::ExportError;
use crate::font::RetryPolicy;
use crate::geometry::{DocumentClass, PageGeometry};
use crate::types::{Color, Pt};
use serde::Deserialize;
use std::time::Duration;

/// Export settings. Every field has a default, so a partial JSON object is a valid config.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExportConfig {
    pub document_class: DocumentClass,
    /// Overrides `document_class` with a custom `[width, height]` in millimeters.
    pub page_size_mm: Option<[f32; 2]>,
    pub oversample: f32,
    pub settle_ms: u64,
    /// When set, settling polls layout at this interval, bounded by `settle_ms`.
    pub settle_poll_interval_ms: Option<u64>,
    pub post_render_ms: u64,
    pub asset_timeout_ms: u64,
    pub max_settle_cycles: u32,
    pub job_timeout_ms: u64,
    pub font_retry_attempts: u32,
    pub font_retry_base_ms: u64,
    pub footer: bool,
    pub footer_font_size: f32,
    pub background: [u8; 3],
    pub exclude_selectors: Vec<String>,
    pub check_overflow: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            document_class: DocumentClass::A3Landscape,
            page_size_mm: None,
            oversample: 2.0,
            settle_ms: 600,
            settle_poll_interval_ms: None,
            post_render_ms: 100,
            asset_timeout_ms: 5_000,
            max_settle_cycles: 10,
            job_timeout_ms: 30_000,
            font_retry_attempts: 3,
            font_retry_base_ms: 1_000,
            footer: true,
            footer_font_size: 9.0,
            background: [255, 255, 255],
            exclude_selectors: vec!["button".to_string(), "[data-export-hidden]".to_string()],
            check_overflow: true,
        }
    }
}

impl ExportConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ExportError> {
        let config: ExportConfig = serde_json::from_str(raw)
            .map_err(|err| ExportError::InvalidConfiguration(format!("config json: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ExportError> {
        if !self.oversample.is_finite() || self.oversample < 2.0 {
            return Err(invalid(format!(
                "oversample must be >= 2.0, got {}",
                self.oversample
            )));
        }
        if self.job_timeout_ms == 0 {
            return Err(invalid("job_timeout_ms must be > 0".to_string()));
        }
        if self.asset_timeout_ms == 0 {
            return Err(invalid("asset_timeout_ms must be > 0".to_string()));
        }
        if self.max_settle_cycles < 2 {
            return Err(invalid("max_settle_cycles must be >= 2".to_string()));
        }
        if self.font_retry_attempts == 0 {
            return Err(invalid("font_retry_attempts must be >= 1".to_string()));
        }
        match self.settle_poll_interval_ms {
            Some(0) => return Err(invalid("settle_poll_interval_ms must be > 0".to_string())),
            Some(interval) if interval > self.settle_ms => {
                return Err(invalid(format!(
                    "settle_poll_interval_ms ({interval}) must not exceed settle_ms ({})",
                    self.settle_ms
                )));
            }
            _ => {}
        }
        if !self.footer_font_size.is_finite() || self.footer_font_size <= 0.0 {
            return Err(invalid(format!(
                "footer_font_size must be > 0, got {}",
                self.footer_font_size
            )));
        }
        self.geometry()?;
        Ok(())
    }

    pub fn geometry(&self) -> Result<PageGeometry, ExportError> {
        match self.page_size_mm {
            Some([width, height]) => PageGeometry::from_mm(width, height),
            None => Ok(PageGeometry::for_class(self.document_class)),
        }
    }

    pub fn settle_strategy(&self) -> SettleStrategy {
        let settle = Duration::from_millis(self.settle_ms);
        match self.settle_poll_interval_ms {
            Some(interval) => SettleStrategy::PollUntilStable {
                interval: Duration::from_millis(interval),
                max: settle,
            },
            None => SettleStrategy::Fixed(settle),
        }
    }

    pub fn post_render(&self) -> Duration {
        Duration::from_millis(self.post_render_ms)
    }

    pub fn asset_timeout(&self) -> Duration {
        Duration::from_millis(self.asset_timeout_ms)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_millis(self.job_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.font_retry_attempts,
            base_delay: Duration::from_millis(self.font_retry_base_ms),
        }
    }

    pub fn background_color(&self) -> Color {
        Color::from_rgb8(self.background)
    }

    pub fn footer_style(&self) -> Option<FooterStyle> {
        self.footer.then(|| FooterStyle {
            font_size: Pt::from_f32(self.footer_font_size),
            ..FooterStyle::default()
        })
    }

    pub fn raster_options(&self) -> RasterOptions {
        RasterOptions {
            scale: self.oversample,
            background: self.background_color(),
            exclude_selectors: self.exclude_selectors.clone(),
        }
    }
}

fn invalid(message: String) -> ExportError {
    ExportError::InvalidConfiguration(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_describe_an_a3_landscape_export() {
        let config = ExportConfig::default();
        config.validate().unwrap();
        assert_eq!(config.geometry().unwrap().pixel_box().width, 1587);
        assert_eq!(
            config.settle_strategy(),
            SettleStrategy::Fixed(Duration::from_millis(600))
        );
        assert_eq!(config.job_timeout(), Duration::from_secs(30));
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.raster_options().scale, 2.0);
        assert_eq!(config.background_color(), Color::WHITE);
        assert!(config.exclude_selectors.contains(&"button".to_string()));
    }

    #[test]
    fn partial_json_keeps_other_defaults() {
        let config = ExportConfig::from_json_str(
            r#"{ "document_class": "a4_landscape", "settle_poll_interval_ms": 50, "footer": false }"#,
        )
        .unwrap();
        assert_eq!(config.document_class, DocumentClass::A4Landscape);
        assert_eq!(
            config.settle_strategy(),
            SettleStrategy::PollUntilStable {
                interval: Duration::from_millis(50),
                max: Duration::from_millis(600),
            }
        );
        assert!(config.footer_style().is_none());
        assert_eq!(config.oversample, 2.0);
    }

    #[test]
    fn custom_page_size_overrides_class() {
        let config = ExportConfig::from_json_str(r#"{ "page_size_mm": [300, 200] }"#).unwrap();
        assert_eq!(config.geometry().unwrap().width_mm(), 300.0);
    }

    #[test]
    fn invalid_values_name_the_field() {
        for (raw, field) in [
            (r#"{ "oversample": 1.0 }"#, "oversample"),
            (r#"{ "job_timeout_ms": 0 }"#, "job_timeout_ms"),
            (r#"{ "page_size_mm": [0, 200] }"#, "page size"),
            (r#"{ "font_retry_attempts": 0 }"#, "font_retry_attempts"),
            (r#"{ "settle_poll_interval_ms": 700 }"#, "settle_poll_interval_ms"),
            (r#"{ "unknown_knob": true }"#, "unknown_knob"),
        ] {
            let err = ExportConfig::from_json_str(raw).unwrap_err();
            assert!(
                matches!(&err, ExportError::InvalidConfiguration(message) if message.contains(field)),
                "{raw}: {err}"
            );
        }
    }
}
