//! Card fingerprints
//!
//! A fingerprint is a set of bit arrays summarizing a warped card image:
//! a global perceptual hash, a difference hash, one perceptual hash per
//! tile, and optionally local keypoint descriptors. Fingerprints are
//! immutable once computed and persist in their encoded text form.

pub mod codec;
pub mod engine;
pub mod hash;
pub mod matcher;

pub use codec::EncodedFingerprint;
pub use engine::FingerprintEngine;
pub use hash::{hamming, HashArray, MAX_DISTANCE};
pub use matcher::{DuplicateMatch, DuplicateMatcher};

/// Bit-array summary of one card image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// `[hash_size, hash_size]`
    pub phash: HashArray,
    /// `[hash_size, hash_size]`
    pub dhash: HashArray,
    /// `[tiles, hash_size, hash_size]`
    pub tile_phash: HashArray,
    /// `[n, 256]` when computed and keypoints were found
    pub descriptors: Option<HashArray>,
}
