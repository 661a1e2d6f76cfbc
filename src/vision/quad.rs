//! Single card boundary detection
//!
//! Blur, Canny edges, then external contours scanned largest-first. The first
//! contour whose polygon approximation has exactly four vertices wins; if none
//! does, the bounding rectangle of the largest qualifying contour is used
//! without perspective correction.

use image::GrayImage;
use imageproc::contours::{find_contours, BorderType, Contour};
use imageproc::distance_transform::Norm;
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use imageproc::geometry::{approximate_polygon_dp, arc_length};
use imageproc::morphology::dilate;
use imageproc::point::Point;
use std::time::Instant;
use tracing::debug;

use super::{shoelace_area, NormalizedRect, PixelRect, Point2, Quadrilateral};
use crate::config::DetectionConfig;
use crate::error::{Result, ScanError};

/// Where the card sits in the photo
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Detection {
    /// Four-cornered boundary, eligible for perspective correction
    Quad(Quadrilateral),
    /// Axis-aligned fallback box
    BoundingBox(PixelRect),
}

impl Detection {
    /// Bounding rectangle relative to the source image
    pub fn normalized_bounds(&self, img_width: u32, img_height: u32) -> Option<NormalizedRect> {
        match self {
            Detection::Quad(quad) => quad.normalized_bounds(img_width, img_height),
            Detection::BoundingBox(rect) => NormalizedRect::from_pixels(*rect, img_width, img_height),
        }
    }
}

/// A contour with its cached area
pub(crate) struct ScoredContour {
    pub points: Vec<Point<i32>>,
    pub area: f64,
}

impl ScoredContour {
    pub fn as_points2(&self) -> Vec<Point2> {
        self.points.iter().map(|p| Point2::new(p.x as f64, p.y as f64)).collect()
    }
}

/// Outer contours that are not nested in any hole, with their areas
pub(crate) fn external_contours(binary: &GrayImage) -> Vec<ScoredContour> {
    find_contours::<i32>(binary)
        .into_iter()
        .filter(|c: &Contour<i32>| c.border_type == BorderType::Outer && c.parent.is_none())
        .filter(|c| c.points.len() >= 3)
        .map(|c| {
            let pts: Vec<Point2> = c.points.iter().map(|p| Point2::new(p.x as f64, p.y as f64)).collect();
            ScoredContour {
                area: shoelace_area(&pts),
                points: c.points,
            }
        })
        .collect()
}

/// Edge and contour based single card detector
#[derive(Debug, Clone)]
pub struct QuadDetector {
    config: DetectionConfig,
}

impl QuadDetector {
    pub fn new(config: DetectionConfig) -> Self {
        Self { config }
    }

    /// Detect the card boundary in a grayscale photo
    pub fn detect(&self, gray: &GrayImage) -> Result<Detection> {
        let start = Instant::now();
        let (w, h) = gray.dimensions();
        if w < 3 || h < 3 {
            return Err(ScanError::NoDetection);
        }

        let blurred = gaussian_blur_f32(gray, self.config.blur_sigma);
        let edges = canny(&blurred, self.config.canny_low, self.config.canny_high);
        // Close single-pixel gaps so card outlines form one loop
        let edges = dilate(&edges, Norm::LInf, 1);

        let min_area = self.config.min_area_ratio * w as f64 * h as f64;
        let mut candidates: Vec<ScoredContour> = external_contours(&edges)
            .into_iter()
            .filter(|c| c.area >= min_area)
            .collect();
        // Stable sort keeps trace order for equal areas
        candidates.sort_by(|a, b| b.area.total_cmp(&a.area));

        debug!(
            "Quad detection: {} candidate contours above {:.0}px² in {:?}",
            candidates.len(),
            min_area,
            start.elapsed()
        );

        for contour in &candidates {
            let perimeter = arc_length(&contour.points, true);
            let epsilon = self.config.epsilon_ratio * perimeter;
            if epsilon <= 0.0 {
                continue;
            }
            let approx = approximate_polygon_dp(&contour.points, epsilon, true);
            if approx.len() == 4 {
                let pts = [0, 1, 2, 3].map(|i| Point2::new(approx[i].x as f64, approx[i].y as f64));
                let quad = Quadrilateral::from_unordered(pts);
                debug!(area = contour.area, ?quad, "Accepted 4-vertex contour");
                return Ok(Detection::Quad(quad));
            }
        }

        let largest = candidates.first().ok_or(ScanError::NoDetection)?;
        let rect = PixelRect::bounding(&largest.as_points2(), w, h).ok_or(ScanError::NoDetection)?;
        debug!(?rect, "No 4-vertex contour; falling back to bounding box");
        Ok(Detection::BoundingBox(rect))
    }
}

impl Default for QuadDetector {
    fn default() -> Self {
        Self::new(DetectionConfig::default())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::Luma;
    use imageproc::drawing::{draw_filled_circle_mut, draw_polygon_mut};

    /// Bright quadrilateral on a dark background
    pub(crate) fn synthetic_card(w: u32, h: u32, corners: [(i32, i32); 4]) -> GrayImage {
        let mut img = GrayImage::from_pixel(w, h, Luma([30]));
        let poly: Vec<Point<i32>> = corners.iter().map(|&(x, y)| Point::new(x, y)).collect();
        draw_polygon_mut(&mut img, &poly, Luma([225]));
        img
    }

    fn near(p: Point2, x: f64, y: f64, tol: f64) -> bool {
        (p.x - x).abs() <= tol && (p.y - y).abs() <= tol
    }

    #[test]
    fn test_detects_perspective_quad() {
        let img = synthetic_card(400, 500, [(80, 60), (320, 90), (300, 440), (60, 420)]);
        let detection = QuadDetector::default().detect(&img).unwrap();

        let Detection::Quad(quad) = detection else {
            panic!("expected a quad, got {:?}", detection);
        };
        assert!(near(quad.tl(), 80.0, 60.0, 8.0), "tl {:?}", quad.tl());
        assert!(near(quad.tr(), 320.0, 90.0, 8.0), "tr {:?}", quad.tr());
        assert!(near(quad.br(), 300.0, 440.0, 8.0), "br {:?}", quad.br());
        assert!(near(quad.bl(), 60.0, 420.0, 8.0), "bl {:?}", quad.bl());
    }

    #[test]
    fn test_blank_image_is_no_detection() {
        let img = GrayImage::from_pixel(200, 200, Luma([128]));
        let result = QuadDetector::default().detect(&img);
        assert!(matches!(result, Err(ScanError::NoDetection)));
    }

    #[test]
    fn test_small_shape_below_area_threshold() {
        // 20x20 square is 1% of a 200x200 frame
        let img = synthetic_card(200, 200, [(90, 90), (110, 90), (110, 110), (90, 110)]);
        let result = QuadDetector::default().detect(&img);
        assert!(matches!(result, Err(ScanError::NoDetection)));
    }

    #[test]
    fn test_round_shape_falls_back_to_bounding_box() {
        let mut img = GrayImage::from_pixel(400, 400, Luma([30]));
        draw_filled_circle_mut(&mut img, (200, 200), 150, Luma([225]));
        let detection = QuadDetector::default().detect(&img).unwrap();

        let Detection::BoundingBox(rect) = detection else {
            panic!("expected bounding box fallback, got {:?}", detection);
        };
        assert!((rect.x as i32 - 50).abs() <= 4);
        assert!((rect.width as i32 - 300).abs() <= 8);
        assert!(detection.normalized_bounds(400, 400).is_some());
    }

    #[test]
    fn test_first_quad_wins_over_larger_round_contour() {
        // Circle is about 20% of the frame, the quad about 14%
        let mut img = GrayImage::from_pixel(600, 500, Luma([30]));
        draw_filled_circle_mut(&mut img, (170, 250), 140, Luma([225]));
        let poly = [(380, 150), (560, 150), (560, 390), (380, 390)].map(|(x, y)| Point::new(x, y));
        draw_polygon_mut(&mut img, &poly, Luma([225]));

        let detection = QuadDetector::default().detect(&img).unwrap();
        let Detection::Quad(quad) = detection else {
            panic!("expected the smaller quad, got {:?}", detection);
        };
        assert!(near(quad.tl(), 380.0, 150.0, 8.0), "tl {:?}", quad.tl());
        assert!(near(quad.tr(), 560.0, 150.0, 8.0), "tr {:?}", quad.tr());
        assert!(near(quad.br(), 560.0, 390.0, 8.0), "br {:?}", quad.br());
        assert!(near(quad.bl(), 380.0, 390.0, 8.0), "bl {:?}", quad.bl());
    }

    #[test]
    fn test_detection_is_deterministic() {
        let img = synthetic_card(300, 400, [(40, 50), (250, 40), (260, 350), (30, 360)]);
        let detector = QuadDetector::default();
        assert_eq!(detector.detect(&img).unwrap(), detector.detect(&img).unwrap());
    }
}
