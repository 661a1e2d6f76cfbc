//! Decoded photo buffers

use image::{GrayImage, RgbImage};

/// A decoded photo, owned by the request that decoded it
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// RGB pixel data
    pub rgb: RgbImage,
    /// Luma plane derived from `rgb`
    pub gray: GrayImage,
}

impl CapturedFrame {
    /// Wrap an RGB image, deriving its luma plane
    pub fn new(rgb: RgbImage) -> Self {
        let gray = image::DynamicImage::ImageRgb8(rgb.clone()).to_luma8();
        Self { rgb, gray }
    }

    /// Get frame dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        self.rgb.dimensions()
    }

    pub fn width(&self) -> u32 {
        self.rgb.width()
    }

    pub fn height(&self) -> u32 {
        self.rgb.height()
    }

    /// Total pixel count as f64, for area ratios
    pub fn area(&self) -> f64 {
        self.width() as f64 * self.height() as f64
    }
}
