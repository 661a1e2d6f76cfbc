//! Duplicate detection over a fingerprint corpus
//!
//! The corpus is scanned linearly, so lookups are O(N) in the number of
//! stored fingerprints.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::hash::hamming;
use super::Fingerprint;
use crate::config::DuplicateConfig;

/// Closest stored fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateMatch {
    pub candidate_id: String,
    pub distance: u32,
}

/// Threshold decision on combined Hamming distance
#[derive(Debug, Clone)]
pub struct DuplicateMatcher {
    config: DuplicateConfig,
}

impl DuplicateMatcher {
    pub fn new(config: DuplicateConfig) -> Self {
        Self { config }
    }

    pub fn threshold(&self) -> u32 {
        self.config.threshold
    }

    /// phash + dhash, plus the per-tile sum when tile comparison is on.
    ///
    /// Any shape mismatch saturates the result at `MAX_DISTANCE`.
    pub fn distance(&self, a: &Fingerprint, b: &Fingerprint) -> u32 {
        let mut total = hamming(&a.phash, &b.phash).saturating_add(hamming(&a.dhash, &b.dhash));
        if self.config.use_tiles {
            // Hamming over the stacked tiles equals the sum of per-tile distances
            total = total.saturating_add(hamming(&a.tile_phash, &b.tile_phash));
        }
        total
    }

    /// Minimum-distance candidate regardless of threshold; first seen wins ties
    pub fn nearest<'a, I>(&self, query: &Fingerprint, corpus: I) -> Option<DuplicateMatch>
    where
        I: IntoIterator<Item = (&'a str, &'a Fingerprint)>,
    {
        corpus
            .into_iter()
            .map(|(id, fp)| (id, self.distance(query, fp)))
            .fold(None::<(&str, u32)>, |best, (id, d)| match best {
                Some((_, bd)) if bd <= d => best,
                _ => Some((id, d)),
            })
            .map(|(id, distance)| DuplicateMatch {
                candidate_id: id.to_string(),
                distance,
            })
    }

    /// Nearest candidate if it is within the duplicate threshold
    pub fn find_duplicate<'a, I>(&self, query: &Fingerprint, corpus: I) -> Option<DuplicateMatch>
    where
        I: IntoIterator<Item = (&'a str, &'a Fingerprint)>,
    {
        let nearest = self.nearest(query, corpus)?;
        let accepted = nearest.distance <= self.config.threshold;
        debug!(
            candidate = %nearest.candidate_id,
            distance = nearest.distance,
            threshold = self.config.threshold,
            accepted,
            "Duplicate check"
        );
        accepted.then_some(nearest)
    }
}

impl Default for DuplicateMatcher {
    fn default() -> Self {
        Self::new(DuplicateConfig::default())
    }
}
