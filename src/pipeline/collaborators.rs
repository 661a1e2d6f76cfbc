//! External collaborators of the scan pipeline
//!
//! Card identification ("vision service") and fingerprint persistence live
//! outside this crate. Both are consumed through traits so callers can plug
//! in real services and tests can plug in fakes.

use image::RgbImage;
use serde::{Deserialize, Serialize};

use super::result::CardFields;
use crate::error::Result;
use crate::fingerprint::EncodedFingerprint;

/// Fields proposed by an external identification service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisionCandidate {
    pub fields: CardFields,
    /// Service confidence in [0, 1]
    pub score: f32,
}

/// Identifies a warped card image
pub trait CardIdentifier: Send + Sync {
    /// `Ok(None)` means the service answered but recognized nothing
    fn identify(&self, card: &RgbImage) -> Result<Option<VisionCandidate>>;
}

/// One persisted capture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardRecord {
    pub id: String,
    pub fingerprint: EncodedFingerprint,
    pub fields: CardFields,
    /// Best external candidate score at extraction time
    pub candidate_score: f32,
    /// Set when this capture was a duplicate of an earlier record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duplicate_of: Option<String>,
    /// Unix seconds
    pub created_at: u64,
}

/// Append-only fingerprint corpus
pub trait FingerprintStore: Send + Sync {
    /// Every record, in insertion order
    fn records(&self) -> Result<Vec<CardRecord>>;

    fn persist(&self, record: CardRecord) -> Result<()>;
}
