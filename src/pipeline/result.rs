//! Pipeline responses

use serde::{Deserialize, Serialize};

use crate::fingerprint::EncodedFingerprint;
use crate::vision::{NormalizedRect, QualityScore};

/// Structured card description; every field is best-effort
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CardFields {
    pub name: Option<String>,
    pub number: Option<String>,
    pub total: Option<String>,
    pub set: Option<String>,
    pub set_code: Option<String>,
    pub language: Option<String>,
    pub variant: Option<String>,
    pub condition: Option<String>,
    pub rarity: Option<String>,
    pub energy: Option<String>,
}

/// Pipeline stage, recorded in visiting order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ScanState {
    Idle,
    Decoding,
    QuadDetected,
    NoCard,
    QualityGate { passed: bool },
    FingerprintComputed,
    DuplicateCheck { hit: bool },
    ShortCircuitAssemble,
    FullExtract,
    ExternalVisionCall,
    SymbolMatcherOverride,
    OcrFallbackOverride,
    NameFallbackOverride,
    Persist,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStatus {
    Card,
    NoCard,
}

/// Live-preview answer: is there a card, where, and how good is the shot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResponse {
    pub status: ProbeStatus,
    pub overlay: Option<NormalizedRect>,
    pub quality: Option<f32>,
    /// Quality is below the preview warning level
    pub quality_warning: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConfidenceLabel {
    Good,
    Fair,
    Poor,
}

impl ConfidenceLabel {
    pub fn from_score(confidence: f32) -> Self {
        if confidence >= 0.8 {
            Self::Good
        } else if confidence >= 0.6 {
            Self::Fair
        } else {
            Self::Poor
        }
    }
}

/// Full analysis of a committed capture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    #[serde(flatten)]
    pub fields: CardFields,
    pub overlay: Option<NormalizedRect>,
    pub quality: f32,
    pub quality_detail: QualityScore,
    /// Quality times the best external candidate score
    pub confidence: f32,
    pub confidence_label: ConfidenceLabel,
    pub duplicate_of: Option<String>,
    pub duplicate_distance: Option<u32>,
    /// Id under which the capture was persisted, if persisting succeeded
    pub record_id: Option<String>,
    pub fingerprint: EncodedFingerprint,
    pub trace: Vec<ScanState>,
}

/// Commit answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CommitOutcome {
    /// Retake the photo; nothing was persisted
    LowQuality {
        quality: f32,
        minimum: f32,
        trace: Vec<ScanState>,
    },
    Scanned(Box<ScanResult>),
}
