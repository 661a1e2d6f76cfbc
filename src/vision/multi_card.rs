//! Multi-card location for flat-lay photos
//!
//! Finds every card-shaped contour in a photo of several cards, removes
//! boxes that sit mostly inside a bigger one, and returns crops in reading
//! order (top-to-bottom bands, then left-to-right).

use image::{imageops, GrayImage, RgbImage};
use imageproc::distance_transform::Norm;
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use imageproc::geometry::convex_hull;
use imageproc::morphology::dilate;
use std::time::Instant;
use tracing::{debug, info};

use super::preprocess::{equalize_local, upscale};
use super::quad::external_contours;
use super::{shoelace_area, NormalizedRect, PixelRect, Point2};
use crate::capture::CapturedFrame;
use crate::config::MultiCardConfig;

/// One located card
#[derive(Debug, Clone)]
pub struct CardCrop {
    /// Box in original image pixels
    pub rect: PixelRect,
    /// Box relative to the original image
    pub normalized: NormalizedRect,
    /// Pixels cropped from the original image
    pub image: RgbImage,
}

/// Locates several cards in one photo
#[derive(Debug, Clone)]
pub struct MultiCardLocator {
    config: MultiCardConfig,
}

impl MultiCardLocator {
    pub fn new(config: MultiCardConfig) -> Self {
        Self { config }
    }

    /// Locate card boxes and crop them from the original frame
    pub fn locate(&self, frame: &CapturedFrame) -> Vec<CardCrop> {
        let (w, h) = frame.dimensions();
        self.locate_boxes(&frame.gray)
            .into_iter()
            .filter_map(|rect| {
                let normalized = NormalizedRect::from_pixels(rect, w, h)?;
                let image = imageops::crop_imm(&frame.rgb, rect.x, rect.y, rect.width, rect.height).to_image();
                Some(CardCrop {
                    rect,
                    normalized,
                    image,
                })
            })
            .collect()
    }

    /// Candidate boxes in original coordinates, deduplicated and ordered
    pub fn locate_boxes(&self, gray: &GrayImage) -> Vec<PixelRect> {
        let start = Instant::now();
        let (orig_w, orig_h) = gray.dimensions();
        if orig_w < 3 || orig_h < 3 {
            return Vec::new();
        }

        let scale = if orig_w < self.config.min_width {
            self.config.min_width as f32 / orig_w as f32
        } else {
            1.0
        };
        let work = upscale(gray, scale);
        let (work_w, work_h) = work.dimensions();
        // Ratio between working and original coordinates per axis
        let sx = work_w as f64 / orig_w as f64;
        let sy = work_h as f64 / orig_h as f64;

        let equalized = equalize_local(&work, 8, 2.0);
        let blurred = gaussian_blur_f32(&equalized, 1.0);
        let edges = canny(&blurred, self.config.canny_low, self.config.canny_high);
        let edges = dilate(&edges, Norm::LInf, self.config.dilate_radius);

        let frame_area = work_w as f64 * work_h as f64;
        let min_area = self.config.min_area_ratio * frame_area;

        let mut boxes = Vec::new();
        for contour in external_contours(&edges) {
            if contour.area < min_area {
                continue;
            }

            let points = contour.as_points2();
            let Some(work_rect) = PixelRect::bounding(&points, work_w, work_h) else {
                continue;
            };
            let aspect = work_rect.width as f64 / work_rect.height as f64;
            if aspect < self.config.min_aspect || aspect > self.config.max_aspect {
                continue;
            }

            let hull: Vec<Point2> = convex_hull(contour.points.as_slice())
                .iter()
                .map(|p| Point2::new(p.x as f64, p.y as f64))
                .collect();
            let hull_area = shoelace_area(&hull);
            let solidity = if hull_area > 0.0 { contour.area / hull_area } else { 0.0 };
            if solidity < self.config.min_solidity {
                continue;
            }

            let rect = unscale(work_rect, sx, sy, orig_w, orig_h);
            if rect.width.min(rect.height) < self.config.min_side_px {
                continue;
            }
            boxes.push(rect);
        }

        let candidates = boxes.len();
        let kept = order_reading(dedup_contained(boxes, self.config.containment_threshold));

        info!(
            "Located {} card(s) from {} candidate(s) in {:?} (scale {:.2})",
            kept.len(),
            candidates,
            start.elapsed(),
            scale
        );
        kept
    }
}

impl Default for MultiCardLocator {
    fn default() -> Self {
        Self::new(MultiCardConfig::default())
    }
}

/// Map a working-resolution box back to original pixels
fn unscale(rect: PixelRect, sx: f64, sy: f64, orig_w: u32, orig_h: u32) -> PixelRect {
    let x = ((rect.x as f64 / sx).floor() as u32).min(orig_w.saturating_sub(1));
    let y = ((rect.y as f64 / sy).floor() as u32).min(orig_h.saturating_sub(1));
    let x1 = (((rect.x + rect.width) as f64 / sx).ceil() as u32).min(orig_w);
    let y1 = (((rect.y + rect.height) as f64 / sy).ceil() as u32).min(orig_h);
    PixelRect {
        x,
        y,
        width: x1.saturating_sub(x).max(1),
        height: y1.saturating_sub(y).max(1),
    }
}

/// Greedy largest-first containment suppression.
///
/// A box is dropped when more than `threshold` of its own area lies inside a
/// box that was already kept. This is asymmetric on purpose: a small box
/// inside a large one is removed, never the other way round.
pub fn dedup_contained(mut boxes: Vec<PixelRect>, threshold: f64) -> Vec<PixelRect> {
    boxes.sort_by(|a, b| b.area().cmp(&a.area()));

    let mut kept: Vec<PixelRect> = Vec::with_capacity(boxes.len());
    for candidate in boxes {
        let own = candidate.area().max(1) as f64;
        let contained = kept
            .iter()
            .any(|k| candidate.intersection_area(k) as f64 > threshold * own);
        if contained {
            debug!(?candidate, "Dropping contained box");
        } else {
            kept.push(candidate);
        }
    }
    kept
}

/// Group boxes into rows top-to-bottom, then order each row left-to-right.
///
/// A box joins the current row while its top is within half the median box
/// height of the row's first box.
pub fn order_reading(mut boxes: Vec<PixelRect>) -> Vec<PixelRect> {
    if boxes.is_empty() {
        return boxes;
    }
    let mut heights: Vec<u32> = boxes.iter().map(|b| b.height).collect();
    heights.sort_unstable();
    let band = (heights[heights.len() / 2] / 2).max(1);

    boxes.sort_by_key(|b| (b.y, b.x));
    let mut rows: Vec<Vec<PixelRect>> = Vec::new();
    for b in boxes {
        match rows.last_mut() {
            Some(row) if b.y - row[0].y <= band => row.push(b),
            _ => rows.push(vec![b]),
        }
    }
    rows.into_iter()
        .flat_map(|mut row| {
            row.sort_by_key(|b| b.x);
            row
        })
        .collect()
}
