//! Bit arrays, perceptual hashes and Hamming distance

use image::GrayImage;
use imageproc::corners::corners_fast9;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::error::{Result, ScanError};
use crate::vision::preprocess::resize_exact;

/// Distance reported for arrays that cannot be compared
pub const MAX_DISTANCE: u32 = u32::MAX;

/// FAST-9 threshold for descriptor keypoints
const FAST_THRESHOLD: u8 = 30;

/// Bits per local descriptor
pub const DESCRIPTOR_BITS: usize = 256;

/// Row-major boolean array with an explicit shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashArray {
    shape: Vec<usize>,
    bits: Vec<bool>,
}

impl HashArray {
    /// Build an array, checking that the bit count matches the shape
    pub fn new(shape: Vec<usize>, bits: Vec<bool>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != bits.len() {
            return Err(ScanError::Encoding(format!(
                "shape {:?} needs {} bits, got {}",
                shape,
                expected,
                bits.len()
            )));
        }
        Ok(Self { shape, bits })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn bits(&self) -> &[bool] {
        &self.bits
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Stack equal-shape arrays along a new leading axis.
    ///
    /// Returns `None` when the input is empty or shapes differ.
    pub fn stack(arrays: &[HashArray]) -> Option<Self> {
        let first = arrays.first()?;
        if arrays.iter().any(|a| a.shape != first.shape) {
            return None;
        }
        let mut shape = Vec::with_capacity(first.shape.len() + 1);
        shape.push(arrays.len());
        shape.extend_from_slice(&first.shape);
        let bits = arrays.iter().flat_map(|a| a.bits.iter().copied()).collect();
        Some(Self { shape, bits })
    }

    /// Slices along the leading axis
    pub fn rows(&self) -> impl Iterator<Item = &[bool]> {
        let outer = self.shape.first().copied().unwrap_or(1).max(1);
        let row_len = self.bits.len() / outer;
        self.bits.chunks(row_len.max(1))
    }

    /// Hex digest of the bits, MSB first
    pub fn to_hex(&self) -> String {
        self.bits
            .chunks(4)
            .map(|nibble| {
                let v = nibble
                    .iter()
                    .enumerate()
                    .fold(0u32, |acc, (i, &b)| acc | ((b as u32) << (3 - i)));
                std::char::from_digit(v, 16).unwrap_or('0')
            })
            .collect()
    }
}

/// Number of differing bits; `MAX_DISTANCE` when shapes differ
pub fn hamming(a: &HashArray, b: &HashArray) -> u32 {
    if a.shape != b.shape {
        return MAX_DISTANCE;
    }
    a.bits.iter().zip(b.bits.iter()).filter(|(x, y)| x != y).count() as u32
}

/// DCT-based perceptual hash, `hash_size` x `hash_size` bits.
///
/// The image is resampled to `4 * hash_size` square, transformed with a 2D
/// DCT-II, and each low-frequency coefficient is compared to their median.
pub fn phash(gray: &GrayImage, hash_size: u32) -> HashArray {
    let hs = hash_size.max(2) as usize;
    let n = hs * 4;
    let small = resize_exact(gray, n as u32, n as u32);
    let pixels: Vec<f64> = small.pixels().map(|p| p.0[0] as f64).collect();

    // cos_table[k][i] = cos(pi * k * (2i + 1) / 2n), only the kept frequencies
    let cos_table: Vec<Vec<f64>> = (0..hs)
        .map(|k| {
            (0..n)
                .map(|i| (PI * k as f64 * (2 * i + 1) as f64 / (2 * n) as f64).cos())
                .collect()
        })
        .collect();

    // Rows first: rows[y][k]
    let rows: Vec<Vec<f64>> = pixels
        .chunks(n)
        .map(|row| {
            cos_table
                .iter()
                .map(|c| row.iter().zip(c.iter()).map(|(p, w)| p * w).sum())
                .collect()
        })
        .collect();

    // Then columns over the low frequencies only: coeffs[v][u]
    let mut coeffs = Vec::with_capacity(hs * hs);
    for c in &cos_table {
        for u in 0..hs {
            coeffs.push(rows.iter().zip(c.iter()).map(|(r, w)| r[u] * w).sum::<f64>());
        }
    }

    let median = median(&coeffs);
    let bits = coeffs.iter().map(|&v| v > median).collect();
    HashArray {
        shape: vec![hs, hs],
        bits,
    }
}

/// Gradient hash: each bit says whether a pixel is darker than its right neighbor
pub fn dhash(gray: &GrayImage, hash_size: u32) -> HashArray {
    let hs = hash_size.max(2);
    let small = resize_exact(gray, hs + 1, hs);
    let mut bits = Vec::with_capacity((hs * hs) as usize);
    for y in 0..hs {
        for x in 0..hs {
            bits.push(small.get_pixel(x + 1, y).0[0] > small.get_pixel(x, y).0[0]);
        }
    }
    HashArray {
        shape: vec![hs as usize, hs as usize],
        bits,
    }
}

/// Binary intensity-pair descriptor around a keypoint (31x31 patch)
fn brief(img: &GrayImage, x: u32, y: u32) -> Option<Vec<bool>> {
    if x < 16 || y < 16 || x + 17 > img.width() || y + 17 > img.height() {
        return None;
    }
    let bits = (0..DESCRIPTOR_BITS as u32)
        .map(|i| {
            let p1 = img.get_pixel(x + (i % 15) - 7, y + (i / 15 % 15) - 7).0[0];
            let p2 = img.get_pixel(x + (i % 13) - 6, y + (i / 13 % 13) - 6).0[0];
            p1 > p2
        })
        .collect();
    Some(bits)
}

/// FAST-9 keypoints with BRIEF descriptors, strongest first.
///
/// Shape `[n, 256]`; `None` when no keypoint has a full patch.
pub fn local_descriptors(gray: &GrayImage, max_descriptors: usize) -> Option<HashArray> {
    let mut corners = corners_fast9(gray, FAST_THRESHOLD);
    corners.sort_by(|a, b| b.score.total_cmp(&a.score).then((a.y, a.x).cmp(&(b.y, b.x))));

    let mut bits = Vec::new();
    let mut count = 0usize;
    for corner in corners {
        if count >= max_descriptors {
            break;
        }
        if let Some(desc) = brief(gray, corner.x, corner.y) {
            bits.extend(desc);
            count += 1;
        }
    }

    if count == 0 {
        return None;
    }
    Some(HashArray {
        shape: vec![count, DESCRIPTOR_BITS],
        bits,
    })
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use imageproc::drawing::draw_filled_rect_mut;
    use imageproc::rect::Rect;

    fn checker(size: u32, cell: u32) -> GrayImage {
        GrayImage::from_fn(size, size, |x, y| {
            Luma([if (x / cell + y / cell) % 2 == 0 { 20 } else { 230 }])
        })
    }

    /// Smooth non-separable pattern scaled to the image size
    fn scene(size: u32) -> GrayImage {
        let s = size as f64 / 256.0;
        GrayImage::from_fn(size, size, |x, y| {
            let (x, y) = (x as f64 / s, y as f64 / s);
            let v = 128.0 + 60.0 * (x / 17.0).sin() * (y / 23.0).cos() + 40.0 * ((x + 2.0 * y) / 31.0).sin();
            Luma([v.clamp(0.0, 255.0) as u8])
        })
    }

    #[test]
    fn test_new_checks_shape() {
        assert!(HashArray::new(vec![2, 3], vec![false; 6]).is_ok());
        assert!(matches!(
            HashArray::new(vec![2, 3], vec![false; 5]),
            Err(ScanError::Encoding(_))
        ));
    }

    #[test]
    fn test_hamming_counts_mismatches() {
        let a = HashArray::new(vec![4], vec![true, false, true, false]).unwrap();
        let b = HashArray::new(vec![4], vec![true, true, false, false]).unwrap();
        assert_eq!(hamming(&a, &b), 2);
        assert_eq!(hamming(&b, &a), 2);
        assert_eq!(hamming(&a, &a), 0);
    }

    #[test]
    fn test_shape_mismatch_is_sentinel() {
        let a = HashArray::new(vec![2, 2], vec![false; 4]).unwrap();
        let b = HashArray::new(vec![4], vec![false; 4]).unwrap();
        assert_eq!(hamming(&a, &b), MAX_DISTANCE);
    }

    #[test]
    fn test_phash_shape_and_stability() {
        let img = scene(256);
        let h = phash(&img, 8);
        assert_eq!(h.shape(), &[8, 8]);
        assert_eq!(h, phash(&img, 8));
    }

    #[test]
    fn test_phash_separates_different_images() {
        let a = phash(&checker(256, 32), 8);
        let b = phash(&scene(256), 8);
        assert!(hamming(&a, &b) > 10, "distance {}", hamming(&a, &b));
    }

    #[test]
    fn test_phash_tolerates_rescaling() {
        let big = scene(256);
        let small = scene(200);
        assert!(hamming(&phash(&big, 8), &phash(&small, 8)) <= 6);
    }

    #[test]
    fn test_dhash_of_horizontal_gradient() {
        let img = GrayImage::from_fn(90, 80, |x, _| Luma([(x * 2) as u8]));
        let h = dhash(&img, 8);
        assert_eq!(h.shape(), &[8, 8]);
        assert!(h.bits().iter().all(|&b| b));
    }

    #[test]
    fn test_stack_and_rows() {
        let a = HashArray::new(vec![2], vec![true, false]).unwrap();
        let b = HashArray::new(vec![2], vec![false, true]).unwrap();
        let stacked = HashArray::stack(&[a.clone(), b.clone()]).unwrap();
        assert_eq!(stacked.shape(), &[2, 2]);
        let rows: Vec<&[bool]> = stacked.rows().collect();
        assert_eq!(rows, vec![a.bits(), b.bits()]);

        let c = HashArray::new(vec![3], vec![false; 3]).unwrap();
        assert!(HashArray::stack(&[a, c]).is_none());
        assert!(HashArray::stack(&[]).is_none());
    }

    #[test]
    fn test_to_hex() {
        let h = HashArray::new(vec![8], vec![true, false, true, false, false, false, false, true]).unwrap();
        assert_eq!(h.to_hex(), "a1");
    }

    #[test]
    fn test_descriptors_on_textured_image() {
        let mut img = GrayImage::from_pixel(128, 128, Luma([20]));
        draw_filled_rect_mut(&mut img, Rect::at(36, 36).of_size(24, 24), Luma([230]));
        draw_filled_rect_mut(&mut img, Rect::at(76, 60).of_size(20, 30), Luma([200]));
        let desc = local_descriptors(&img, 20).unwrap();
        assert_eq!(desc.shape()[1], DESCRIPTOR_BITS);
        assert!(desc.shape()[0] >= 1 && desc.shape()[0] <= 20);
    }

    #[test]
    fn test_descriptors_absent_on_flat_image() {
        let img = GrayImage::from_pixel(128, 128, Luma([100]));
        assert!(local_descriptors(&img, 20).is_none());
    }
}
