use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("font unavailable: {0}")]
    FontUnavailable(#[from] FontError),

    #[error(
        "incomplete page set: expected {expected} pages, captured {actual} (missing pages {missing:?})"
    )]
    IncompletePageSet {
        expected: usize,
        actual: usize,
        missing: Vec<usize>,
    },

    #[error("malformed capture for page {page} (slide {slide_id}): {reason}")]
    MalformedCapture {
        page: usize,
        slide_id: String,
        reason: String,
    },

    #[error("{backend} backend cannot place page {page}: capture payload has the wrong kind")]
    BackendMismatch { page: usize, backend: &'static str },

    #[error("export exceeded the {limit:?} job timeout")]
    TimeoutExceeded { limit: Duration },

    #[error("export job has no slides")]
    EmptyJob,

    #[error("documents have inconsistent page geometry")]
    InconsistentGeometry,

    #[error("pdf serialization failed: {0}")]
    Serialization(String),

    #[error("host print failed: {0}")]
    Print(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Terminal state of an export job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Succeeded,
    Failed,
    AbortedIncomplete,
}

impl ExportError {
    pub fn job_status(&self) -> JobStatus {
        match self {
            ExportError::IncompletePageSet { .. } => JobStatus::AbortedIncomplete,
            _ => JobStatus::Failed,
        }
    }

    /// True when the failing stage is byte generation (font/network or serialization),
    /// which the host's native print path does not depend on.
    pub fn offers_print_fallback(&self) -> bool {
        matches!(
            self,
            ExportError::FontUnavailable(_) | ExportError::Serialization(_)
        )
    }
}

impl From<lopdf::Error> for ExportError {
    fn from(err: lopdf::Error) -> Self {
        ExportError::Serialization(err.to_string())
    }
}

/// Font acquisition failures. `Clone` so every caller sharing one in-flight registration
/// observes the same error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FontError {
    #[error("fetching {url} failed after {attempts} attempts ({})", describe_status(.status, .message))]
    Network {
        url: String,
        status: Option<u16>,
        attempts: u32,
        message: String,
    },

    #[error("{url} is {format}, which cannot be embedded; provide a TrueType (.ttf) or OpenType (.otf) font")]
    UnsupportedFormat { url: String, format: String },

    #[error("{url} is not a readable font: {reason}")]
    Invalid { url: String, reason: String },

    #[error("no font source configured")]
    NotConfigured,
}

fn describe_status(status: &Option<u16>, message: &str) -> String {
    match status {
        Some(code) => format!("last status {code}"),
        None => format!("last error: {message}"),
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("transport error: {message}")]
pub struct FetchError {
    pub message: String,
}

impl FetchError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error("rasterizer failed: {0}")]
    Rasterizer(String),

    #[error("surface {0} is not attached")]
    Detached(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incomplete_page_set_names_counts() {
        let err = ExportError::IncompletePageSet {
            expected: 14,
            actual: 12,
            missing: vec![3, 9],
        };
        let message = err.to_string();
        assert!(message.contains("expected 14"));
        assert!(message.contains("captured 12"));
        assert!(message.contains("[3, 9]"));
        assert_eq!(err.job_status(), JobStatus::AbortedIncomplete);
        assert!(!err.offers_print_fallback());
    }

    #[test]
    fn network_error_names_status_and_url() {
        let err = FontError::Network {
            url: "https://cdn.example/fonts/NotoSansJP.ttf".to_string(),
            status: Some(500),
            attempts: 3,
            message: "HTTP 500".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("NotoSansJP.ttf"));
        assert!(message.contains("500"));
        assert!(message.contains("3 attempts"));

        let export: ExportError = err.into();
        assert!(export.offers_print_fallback());
        assert_eq!(export.job_status(), JobStatus::Failed);
    }
}
