//! Vision Layer
//!
//! Classical, deterministic image operators for card photos:
//! - quad detection and perspective correction for a single card
//! - multi-card location for flat-lay photos
//! - capture quality scoring
//! - region OCR through an external engine
//! - set symbol matching against a logo table

pub mod multi_card;
pub mod ocr;
pub mod preprocess;
pub mod quad;
pub mod quality;
pub mod symbols;
pub mod warp;

pub use multi_card::{CardCrop, MultiCardLocator};
pub use ocr::{OcrProfile, OcrResult, RegionOcr, TesseractCli, TextRecognizer};
pub use quad::{Detection, QuadDetector};
pub use quality::{QualityAssessor, QualityScore};
pub use symbols::{SetSymbolMatcher, SymbolMatch, SymbolTable};
pub use warp::{PerspectiveWarper, WarpedCard};

use serde::{Deserialize, Serialize};

/// A 2D point in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

impl Point2 {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Rectangle relative to the source image, every component in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl NormalizedRect {
    /// Normalize a pixel rectangle; `None` when it has no area
    pub fn from_pixels(rect: PixelRect, img_width: u32, img_height: u32) -> Option<Self> {
        if img_width == 0 || img_height == 0 {
            return None;
        }
        let iw = img_width as f32;
        let ih = img_height as f32;

        let x0 = (rect.x as f32 / iw).clamp(0.0, 1.0);
        let y0 = (rect.y as f32 / ih).clamp(0.0, 1.0);
        let x1 = ((rect.x + rect.width) as f32 / iw).clamp(0.0, 1.0);
        let y1 = ((rect.y + rect.height) as f32 / ih).clamp(0.0, 1.0);

        let w = x1 - x0;
        let h = y1 - y0;
        if w > 0.0 && h > 0.0 {
            Some(Self { x: x0, y: y0, w, h })
        } else {
            None
        }
    }

    /// Convert back to pixels for an image of the given size
    pub fn to_pixels(&self, img_width: u32, img_height: u32) -> PixelRect {
        let x = (self.x * img_width as f32).round() as u32;
        let y = (self.y * img_height as f32).round() as u32;
        let width = ((self.w * img_width as f32).round() as u32).min(img_width.saturating_sub(x));
        let height = ((self.h * img_height as f32).round() as u32).min(img_height.saturating_sub(y));
        PixelRect { x, y, width, height }
    }
}

/// Axis-aligned rectangle in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Area shared with another rectangle
    pub fn intersection_area(&self, other: &PixelRect) -> u64 {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = (self.x + self.width).min(other.x + other.width);
        let y1 = (self.y + self.height).min(other.y + other.height);
        if x1 <= x0 || y1 <= y0 {
            0
        } else {
            (x1 - x0) as u64 * (y1 - y0) as u64
        }
    }

    /// Bounding rectangle of a point set, clipped to the image
    pub fn bounding(points: &[Point2], img_width: u32, img_height: u32) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let min_x = points.iter().map(|p| p.x).fold(f64::INFINITY, f64::min).max(0.0);
        let min_y = points.iter().map(|p| p.y).fold(f64::INFINITY, f64::min).max(0.0);
        let max_x = points
            .iter()
            .map(|p| p.x)
            .fold(f64::NEG_INFINITY, f64::max)
            .min(img_width as f64);
        let max_y = points
            .iter()
            .map(|p| p.y)
            .fold(f64::NEG_INFINITY, f64::max)
            .min(img_height as f64);

        if max_x <= min_x || max_y <= min_y {
            return None;
        }
        let x = min_x.floor() as u32;
        let y = min_y.floor() as u32;
        Some(Self {
            x,
            y,
            width: (max_x.ceil() as u32).saturating_sub(x).max(1),
            height: (max_y.ceil() as u32).saturating_sub(y).max(1),
        })
    }
}

/// Four ordered corners: top-left, top-right, bottom-right, bottom-left
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quadrilateral {
    pub corners: [Point2; 4],
}

impl Quadrilateral {
    /// Order four arbitrary points into tl/tr/br/bl.
    ///
    /// tl has the smallest x+y, br the largest; tr has the smallest y-x,
    /// bl the largest.
    pub fn from_unordered(points: [Point2; 4]) -> Self {
        let by_sum = |p: &&Point2| p.x + p.y;
        let by_diff = |p: &&Point2| p.y - p.x;

        let tl = *points.iter().min_by(|a, b| by_sum(a).total_cmp(&by_sum(b))).unwrap_or(&points[0]);
        let br = *points.iter().max_by(|a, b| by_sum(a).total_cmp(&by_sum(b))).unwrap_or(&points[2]);
        let tr = *points.iter().min_by(|a, b| by_diff(a).total_cmp(&by_diff(b))).unwrap_or(&points[1]);
        let bl = *points.iter().max_by(|a, b| by_diff(a).total_cmp(&by_diff(b))).unwrap_or(&points[3]);

        Self {
            corners: [tl, tr, br, bl],
        }
    }

    pub fn tl(&self) -> Point2 {
        self.corners[0]
    }
    pub fn tr(&self) -> Point2 {
        self.corners[1]
    }
    pub fn br(&self) -> Point2 {
        self.corners[2]
    }
    pub fn bl(&self) -> Point2 {
        self.corners[3]
    }

    /// Polygon area (shoelace)
    pub fn area(&self) -> f64 {
        shoelace_area(&self.corners)
    }

    /// Bounding rectangle normalized to the source image
    pub fn normalized_bounds(&self, img_width: u32, img_height: u32) -> Option<NormalizedRect> {
        let rect = PixelRect::bounding(&self.corners, img_width, img_height)?;
        NormalizedRect::from_pixels(rect, img_width, img_height)
    }

    /// True when any three corners are (nearly) collinear or corners repeat
    pub fn is_degenerate(&self) -> bool {
        let c = &self.corners;
        let scale = self.perimeter().max(1.0);
        for i in 0..4 {
            let a = c[i];
            let b = c[(i + 1) % 4];
            let d = c[(i + 2) % 4];
            let cross = (b.x - a.x) * (d.y - a.y) - (b.y - a.y) * (d.x - a.x);
            // Twice the triangle area relative to perimeter^2
            if cross.abs() / (scale * scale) < 1e-4 {
                return true;
            }
        }
        false
    }

    fn perimeter(&self) -> f64 {
        (0..4)
            .map(|i| {
                let a = self.corners[i];
                let b = self.corners[(i + 1) % 4];
                ((b.x - a.x).powi(2) + (b.y - a.y).powi(2)).sqrt()
            })
            .sum()
    }
}

/// Shoelace polygon area
pub fn shoelace_area(points: &[Point2]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let n = points.len();
    let twice: f64 = (0..n)
        .map(|i| {
            let a = points[i];
            let b = points[(i + 1) % n];
            a.x * b.y - b.x * a.y
        })
        .sum();
    twice.abs() / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(x: f64, y: f64) -> Point2 {
        Point2::new(x, y)
    }

    #[test]
    fn test_corner_ordering() {
        let quad = Quadrilateral::from_unordered([p(90.0, 110.0), p(10.0, 12.0), p(12.0, 105.0), p(95.0, 8.0)]);
        assert_eq!(quad.tl(), p(10.0, 12.0));
        assert_eq!(quad.tr(), p(95.0, 8.0));
        assert_eq!(quad.br(), p(90.0, 110.0));
        assert_eq!(quad.bl(), p(12.0, 105.0));
    }

    #[test]
    fn test_shoelace_area() {
        let square = [p(0.0, 0.0), p(10.0, 0.0), p(10.0, 10.0), p(0.0, 10.0)];
        assert!((shoelace_area(&square) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_quad() {
        let line = Quadrilateral {
            corners: [p(0.0, 0.0), p(10.0, 0.0), p(20.0, 0.0), p(30.0, 0.0)],
        };
        assert!(line.is_degenerate());

        let ok = Quadrilateral {
            corners: [p(0.0, 0.0), p(10.0, 0.0), p(10.0, 14.0), p(0.0, 14.0)],
        };
        assert!(!ok.is_degenerate());
    }

    #[test]
    fn test_normalized_rect_requires_area() {
        let empty = PixelRect { x: 5, y: 5, width: 0, height: 10 };
        assert!(NormalizedRect::from_pixels(empty, 100, 100).is_none());

        let rect = PixelRect { x: 10, y: 20, width: 50, height: 40 };
        let norm = NormalizedRect::from_pixels(rect, 100, 200).unwrap();
        assert!((norm.x - 0.1).abs() < 1e-6);
        assert!((norm.y - 0.1).abs() < 1e-6);
        assert!((norm.w - 0.5).abs() < 1e-6);
        assert!((norm.h - 0.2).abs() < 1e-6);
        assert_eq!(norm.to_pixels(100, 200), rect);
    }

    #[test]
    fn test_intersection_area() {
        let a = PixelRect { x: 0, y: 0, width: 10, height: 10 };
        let b = PixelRect { x: 5, y: 5, width: 10, height: 10 };
        let c = PixelRect { x: 20, y: 20, width: 5, height: 5 };
        assert_eq!(a.intersection_area(&b), 25);
        assert_eq!(a.intersection_area(&c), 0);
    }
}
