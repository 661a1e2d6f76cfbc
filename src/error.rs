//! Error taxonomy for the scan pipeline
//!
//! Only `Decode` is fatal for a request. Everything else is caught at the
//! stage that produced it and turned into an absent field.

use thiserror::Error;

/// Errors produced by the vision, extraction and fingerprint layers
#[derive(Debug, Error)]
pub enum ScanError {
    /// Image bytes could not be decoded
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    /// No contour cleared the area threshold
    #[error("no card detected")]
    NoDetection,

    /// The detected quadrilateral cannot be mapped to a rectangle
    #[error("degenerate card geometry: {0}")]
    DegenerateGeometry(String),

    /// OCR engine missing, failed, or timed out
    #[error("OCR unavailable: {0}")]
    OcrUnavailable(String),

    /// A collaborator (vision service, dictionary bootstrap, logo table) failed
    #[error("{service} failed: {message}")]
    ExternalService { service: &'static str, message: String },

    /// Malformed serialized fingerprint data
    #[error("invalid fingerprint encoding: {0}")]
    Encoding(String),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ScanError {
    /// Build an `ExternalService` error from any displayable cause
    pub fn external(service: &'static str, cause: impl std::fmt::Display) -> Self {
        Self::ExternalService {
            service,
            message: cause.to_string(),
        }
    }

    /// Whether the error means "no card here" rather than a failure
    pub fn is_no_card(&self) -> bool {
        matches!(self, Self::NoDetection | Self::DegenerateGeometry(_))
    }
}

impl From<base64::DecodeError> for ScanError {
    fn from(err: base64::DecodeError) -> Self {
        Self::Encoding(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry_failures_mean_no_card() {
        assert!(ScanError::NoDetection.is_no_card());
        assert!(ScanError::DegenerateGeometry("flat".into()).is_no_card());
        assert!(!ScanError::OcrUnavailable("missing".into()).is_no_card());
        assert!(!ScanError::external("vision", "timeout").is_no_card());
    }
}
