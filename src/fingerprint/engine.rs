//! Fingerprint computation

use image::{imageops, GrayImage, RgbImage};
use std::time::Instant;
use tracing::debug;

use super::hash::{dhash, local_descriptors, phash, HashArray};
use super::Fingerprint;
use crate::config::FingerprintConfig;
use crate::vision::preprocess::resize_exact;

/// Computes global, tile and optional local fingerprints for a card image
#[derive(Debug, Clone)]
pub struct FingerprintEngine {
    config: FingerprintConfig,
}

impl FingerprintEngine {
    pub fn new(config: FingerprintConfig) -> Self {
        Self { config }
    }

    pub fn compute(&self, image: &RgbImage) -> Fingerprint {
        self.compute_gray(&imageops::grayscale(image))
    }

    pub fn compute_gray(&self, gray: &GrayImage) -> Fingerprint {
        let start = Instant::now();
        let size = self.config.normalize_size.max(8);
        let hash_size = self.config.hash_size;
        let normalized = resize_exact(gray, size, size);

        let phash = phash(&normalized, hash_size);
        let dhash = dhash(&normalized, hash_size);
        let tile_phash = self.tile_hashes(&normalized);
        let descriptors = if self.config.descriptors {
            local_descriptors(&normalized, self.config.max_descriptors)
        } else {
            None
        };

        debug!(
            phash = %phash.to_hex(),
            tiles = tile_phash.shape().first().copied().unwrap_or(0),
            descriptors = descriptors.as_ref().map(|d| d.shape()[0]).unwrap_or(0),
            "Fingerprint computed in {:?}",
            start.elapsed()
        );

        Fingerprint {
            phash,
            dhash,
            tile_phash,
            descriptors,
        }
    }

    /// One phash per grid cell, row-major, stacked along a leading axis
    fn tile_hashes(&self, normalized: &GrayImage) -> HashArray {
        let cols = self.config.tile_cols.max(1);
        let rows = self.config.tile_rows.max(1);
        let (w, h) = normalized.dimensions();
        let tile_w = (w / cols).max(1);
        let tile_h = (h / rows).max(1);

        let tiles: Vec<HashArray> = (0..rows)
            .flat_map(|r| (0..cols).map(move |c| (r, c)))
            .map(|(r, c)| {
                let tile = imageops::crop_imm(normalized, c * tile_w, r * tile_h, tile_w, tile_h).to_image();
                phash(&tile, self.config.hash_size)
            })
            .collect();

        // Every tile hash has the same shape, so stacking cannot fail here
        HashArray::stack(&tiles).unwrap_or_else(|| phash(normalized, self.config.hash_size))
    }
}

impl Default for FingerprintEngine {
    fn default() -> Self {
        Self::new(FingerprintConfig::default())
    }
}
