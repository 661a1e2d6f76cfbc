//! Capture quality scoring
//!
//! Combines Laplacian sharpness, mean brightness and glare coverage into a
//! single score in [0, 1] that gates whether a capture may be committed.

use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::QualityConfig;

/// Measured capture quality
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    /// Variance of the Laplacian of the luma plane
    pub sharpness_var: f64,
    /// Mean luma, 0-1
    pub brightness: f64,
    /// Fraction of pixels whose HSV value exceeds the glare level
    pub glare_ratio: f64,
    /// Weighted combination, 0-1
    pub quality_score: f32,
}

/// Scores capture quality
#[derive(Debug, Clone)]
pub struct QualityAssessor {
    config: QualityConfig,
}

impl QualityAssessor {
    pub fn new(config: QualityConfig) -> Self {
        Self { config }
    }

    /// Score an RGB image
    pub fn assess(&self, rgb: &RgbImage) -> QualityScore {
        let gray = image::DynamicImage::ImageRgb8(rgb.clone()).to_luma8();
        self.assess_with_gray(rgb, &gray)
    }

    /// Score an RGB image whose luma plane is already available
    pub fn assess_with_gray(&self, rgb: &RgbImage, gray: &GrayImage) -> QualityScore {
        let sharpness_var = laplacian_variance(gray);
        let brightness = mean_luma(gray) / 255.0;
        let glare_ratio = glare_fraction(rgb, self.config.glare_level);

        let sharp_norm = (sharpness_var / self.config.sharpness_norm).clamp(0.0, 1.0);
        let target = self.config.brightness_target;
        let bright_pen = 1.0 - ((brightness - target).abs() / target).clamp(0.0, 1.0);
        let glare_pen = (1.0 - glare_ratio * 5.0).clamp(0.0, 1.0);

        let quality = (0.5 * sharp_norm + 0.3 * bright_pen + 0.2 * glare_pen).clamp(0.0, 1.0);

        debug!(
            sharpness_var,
            brightness, glare_ratio, quality, "Quality assessed"
        );

        QualityScore {
            sharpness_var,
            brightness,
            glare_ratio,
            quality_score: quality as f32,
        }
    }

    /// Whether a score passes the commit gate
    pub fn passes_commit(&self, score: &QualityScore) -> bool {
        score.quality_score >= self.config.commit_min
    }

    /// Whether a probe should warn the user about this score
    pub fn probe_warning(&self, score: &QualityScore) -> bool {
        score.quality_score < self.config.probe_warn
    }

    pub fn commit_min(&self) -> f32 {
        self.config.commit_min
    }
}

impl Default for QualityAssessor {
    fn default() -> Self {
        Self::new(QualityConfig::default())
    }
}

/// Variance of the 4-neighbour Laplacian response
pub fn laplacian_variance(gray: &GrayImage) -> f64 {
    let (w, h) = gray.dimensions();
    if w == 0 || h == 0 {
        return 0.0;
    }
    let lap = imageproc::filter::laplacian_filter(gray);

    let n = (w as f64) * (h as f64);
    let (sum, sum_sq) = lap.pixels().fold((0.0f64, 0.0f64), |(s, sq), p| {
        let v = p.0[0] as f64;
        (s + v, sq + v * v)
    });
    let mean = sum / n;
    (sum_sq / n - mean * mean).max(0.0)
}

fn mean_luma(gray: &GrayImage) -> f64 {
    let n = gray.width() as f64 * gray.height() as f64;
    if n == 0.0 {
        return 0.0;
    }
    gray.pixels().map(|p| p.0[0] as f64).sum::<f64>() / n
}

/// HSV value is the max channel
fn glare_fraction(rgb: &RgbImage, level: u8) -> f64 {
    let n = rgb.width() as f64 * rgb.height() as f64;
    if n == 0.0 {
        return 0.0;
    }
    let bright = rgb
        .pixels()
        .filter(|p| p.0.iter().copied().max().unwrap_or(0) > level)
        .count();
    bright as f64 / n
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_all_white_is_full_glare() {
        let img = RgbImage::from_pixel(32, 32, Rgb([255, 255, 255]));
        let score = QualityAssessor::default().assess(&img);
        assert!((score.glare_ratio - 1.0).abs() < 1e-12);
        assert!((score.brightness - 1.0).abs() < 1e-12);
        assert_eq!(score.sharpness_var, 0.0);
    }

    #[test]
    fn test_all_black_has_zero_brightness() {
        let img = RgbImage::from_pixel(32, 32, Rgb([0, 0, 0]));
        let score = QualityAssessor::default().assess(&img);
        assert_eq!(score.brightness, 0.0);
        assert_eq!(score.glare_ratio, 0.0);
        // Only the glare term contributes
        assert!((score.quality_score - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_score_always_in_unit_range() {
        let assessor = QualityAssessor::default();
        let checker = RgbImage::from_fn(64, 64, |x, y| {
            if (x + y) % 2 == 0 {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        });
        let noise = RgbImage::from_fn(64, 64, |x, y| {
            let v = ((x * 37 + y * 91) % 256) as u8;
            Rgb([v, v / 2, 255 - v])
        });
        for img in [checker, noise] {
            let q = assessor.assess(&img).quality_score;
            assert!((0.0..=1.0).contains(&q), "score {} out of range", q);
        }
    }

    #[test]
    fn test_sharp_well_lit_image_scores_high() {
        // Mid-grey stripes: strong edges, brightness near target, no glare
        let img = RgbImage::from_fn(64, 64, |x, _| {
            if (x / 2) % 2 == 0 {
                Rgb([230, 230, 230])
            } else {
                Rgb([130, 130, 130])
            }
        });
        let assessor = QualityAssessor::default();
        let score = assessor.assess(&img);
        assert!(score.sharpness_var > 200.0);
        assert!(score.quality_score > 0.9, "got {}", score.quality_score);
        assert!(assessor.passes_commit(&score));
    }

    #[test]
    fn test_commit_gate_threshold() {
        let assessor = QualityAssessor::default();
        let flat = RgbImage::from_pixel(16, 16, Rgb([0, 0, 0]));
        let score = assessor.assess(&flat);
        assert!(!assessor.passes_commit(&score));
        assert!(assessor.probe_warning(&score));
    }
}
