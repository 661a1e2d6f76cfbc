//! Image preprocessing filters
//!
//! Grayscale operators shared by the detectors, the OCR variants and the
//! fingerprint engine: rescaling, local contrast equalization, adaptive
//! binarization and autocontrast.

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};
use tracing::debug;

use super::NormalizedRect;

/// Rescale a grayscale image by a factor (no-op for 1.0)
pub fn upscale(image: &GrayImage, factor: f32) -> GrayImage {
    if (factor - 1.0).abs() < 1e-3 {
        return image.clone();
    }
    let (w, h) = image.dimensions();
    let new_w = ((w as f32 * factor).round() as u32).max(1);
    let new_h = ((h as f32 * factor).round() as u32).max(1);
    debug!("Rescaling {}x{} -> {}x{}", w, h, new_w, new_h);
    imageops::resize(image, new_w, new_h, FilterType::CatmullRom)
}

/// Resize to an exact size with an anti-aliasing filter
pub fn resize_exact(image: &GrayImage, width: u32, height: u32) -> GrayImage {
    imageops::resize(image, width.max(1), height.max(1), FilterType::Lanczos3)
}

/// Cropping by normalized region for image buffers
pub trait ImageCrop {
    type Buffer;
    fn crop_region(&self, region: NormalizedRect) -> Self::Buffer;
}

impl<P> ImageCrop for image::ImageBuffer<P, Vec<P::Subpixel>>
where
    P: image::Pixel + 'static,
{
    type Buffer = image::ImageBuffer<P, Vec<P::Subpixel>>;

    fn crop_region(&self, region: NormalizedRect) -> Self::Buffer {
        let rect = region.to_pixels(self.width(), self.height());
        let width = rect.width.max(1).min(self.width().saturating_sub(rect.x).max(1));
        let height = rect.height.max(1).min(self.height().saturating_sub(rect.y).max(1));
        let x = rect.x.min(self.width().saturating_sub(1));
        let y = rect.y.min(self.height().saturating_sub(1));
        imageops::crop_imm(self, x, y, width, height).to_image()
    }
}

/// Median denoise with a 3x3 window
pub fn denoise(image: &GrayImage) -> GrayImage {
    imageproc::filter::median_filter(image, 1, 1)
}

/// Contrast-limited local histogram equalization.
///
/// The image is split into a `grid` x `grid` tile layout; each tile gets its
/// own clipped-histogram lookup table and pixels blend the four nearest
/// tables bilinearly.
pub fn equalize_local(image: &GrayImage, grid: u32, clip_limit: f32) -> GrayImage {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return image.clone();
    }

    let tile_w = w.div_ceil(grid.clamp(1, w));
    let tile_h = h.div_ceil(grid.clamp(1, h));
    let grid_x = w.div_ceil(tile_w);
    let grid_y = h.div_ceil(tile_h);

    let mut luts = vec![[0u8; 256]; (grid_x * grid_y) as usize];
    for ty in 0..grid_y {
        for tx in 0..grid_x {
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = (x0 + tile_w).min(w);
            let y1 = (y0 + tile_h).min(h);

            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[image.get_pixel(x, y).0[0] as usize] += 1;
                }
            }

            let count = (x1 - x0) * (y1 - y0);
            let limit = ((clip_limit * count as f32 / 256.0) as u32).max(1);
            let mut excess = 0u32;
            for bin in hist.iter_mut() {
                if *bin > limit {
                    excess += *bin - limit;
                    *bin = limit;
                }
            }
            let bonus = excess / 256;
            for bin in hist.iter_mut() {
                *bin += bonus;
            }

            let total: u32 = hist.iter().sum();
            let lut = &mut luts[(ty * grid_x + tx) as usize];
            let mut cdf = 0u32;
            for (i, bin) in hist.iter().enumerate() {
                cdf += bin;
                lut[i] = ((cdf as f32 / total.max(1) as f32) * 255.0).round() as u8;
            }
        }
    }

    let mut out = GrayImage::new(w, h);
    for y in 0..h {
        let gy = (y as f32 + 0.5) / tile_h as f32 - 0.5;
        let ty0 = (gy.floor().max(0.0) as u32).min(grid_y - 1);
        let ty1 = (ty0 + 1).min(grid_y - 1);
        let fy = (gy - ty0 as f32).clamp(0.0, 1.0);

        for x in 0..w {
            let gx = (x as f32 + 0.5) / tile_w as f32 - 0.5;
            let tx0 = (gx.floor().max(0.0) as u32).min(grid_x - 1);
            let tx1 = (tx0 + 1).min(grid_x - 1);
            let fx = (gx - tx0 as f32).clamp(0.0, 1.0);

            let v = image.get_pixel(x, y).0[0] as usize;
            let lut = |tx: u32, ty: u32| luts[(ty * grid_x + tx) as usize][v] as f32;

            let top = lut(tx0, ty0) * (1.0 - fx) + lut(tx1, ty0) * fx;
            let bottom = lut(tx0, ty1) * (1.0 - fx) + lut(tx1, ty1) * fx;
            let value = top * (1.0 - fy) + bottom * fy;
            out.put_pixel(x, y, Luma([value.round().clamp(0.0, 255.0) as u8]));
        }
    }

    out
}

/// Summed-area table with a zero-padded first row and column
fn integral_image(gray: &GrayImage) -> Vec<u64> {
    let (w, h) = gray.dimensions();
    let stride = (w + 1) as usize;
    let mut table = vec![0u64; stride * (h + 1) as usize];

    for y in 0..h {
        let mut row_sum: u64 = 0;
        for x in 0..w {
            row_sum += gray.get_pixel(x, y).0[0] as u64;
            let idx = (y + 1) as usize * stride + (x + 1) as usize;
            let above = y as usize * stride + (x + 1) as usize;
            table[idx] = row_sum + table[above];
        }
    }

    table
}

/// Mean-C adaptive threshold.
///
/// A pixel turns white when it is brighter than the mean of its
/// `(2 * block_radius + 1)^2` neighborhood minus `c`. `invert` swaps the
/// output polarity.
pub fn adaptive_threshold(image: &GrayImage, block_radius: u32, c: i32, invert: bool) -> GrayImage {
    let (w, h) = image.dimensions();
    let table = integral_image(image);
    let stride = (w + 1) as usize;
    let mut out = GrayImage::new(w, h);

    let (on, off) = if invert { (0u8, 255u8) } else { (255u8, 0u8) };

    for y in 0..h {
        let y0 = y.saturating_sub(block_radius) as usize;
        let y1 = (y + block_radius + 1).min(h) as usize;
        for x in 0..w {
            let x0 = x.saturating_sub(block_radius) as usize;
            let x1 = (x + block_radius + 1).min(w) as usize;

            let sum = table[y1 * stride + x1] + table[y0 * stride + x0]
                - table[y0 * stride + x1]
                - table[y1 * stride + x0];
            let count = ((x1 - x0) * (y1 - y0)) as f64;
            let mean = sum as f64 / count;

            let value = image.get_pixel(x, y).0[0] as f64;
            let pixel = if value > mean - c as f64 { on } else { off };
            out.put_pixel(x, y, Luma([pixel]));
        }
    }

    out
}

/// Stretch intensities so the darkest pixel maps to 0 and the brightest to 255
pub fn autocontrast(image: &GrayImage) -> GrayImage {
    let (lo, hi) = image
        .pixels()
        .fold((255u8, 0u8), |(lo, hi), p| (lo.min(p.0[0]), hi.max(p.0[0])));
    if hi <= lo {
        return image.clone();
    }
    let span = (hi - lo) as f32;
    let mut out = image.clone();
    for p in out.pixels_mut() {
        p.0[0] = (((p.0[0] - lo) as f32 / span) * 255.0).round() as u8;
    }
    out
}
