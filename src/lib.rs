//! CardScan - trading card photo analysis
//!
//! Locates cards in photos, corrects perspective, gates on capture quality,
//! reads text regions, matches set symbols and fingerprints each capture so
//! repeated scans of the same card are recognized without re-extraction.

pub mod capture;
pub mod config;
pub mod error;
pub mod extract;
pub mod fingerprint;
pub mod pipeline;
pub mod storage;
pub mod vision;

pub use error::{Result, ScanError};
pub use pipeline::ScanPipeline;
