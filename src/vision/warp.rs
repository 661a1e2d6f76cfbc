//! Perspective correction to a canonical card size

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use tracing::{debug, warn};

use super::{Detection, NormalizedRect, Point2, Quadrilateral};
use crate::error::{Result, ScanError};

/// Quads smaller than this many square pixels are treated as degenerate
const MIN_QUAD_AREA: f64 = 16.0;

/// A card resampled to the canonical size
#[derive(Debug, Clone)]
pub struct WarpedCard {
    /// Card pixels at exactly the canonical size
    pub image: RgbImage,
    /// Card bounds relative to the source photo
    pub overlay: Option<NormalizedRect>,
    /// Source-to-canonical transform when perspective was corrected
    pub projection: Option<Projection>,
}

impl WarpedCard {
    pub fn perspective_corrected(&self) -> bool {
        self.projection.is_some()
    }
}

/// Maps a detected card onto a fixed-size upright rectangle
#[derive(Debug, Clone, Copy)]
pub struct PerspectiveWarper {
    pub width: u32,
    pub height: u32,
}

impl PerspectiveWarper {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Corners of the canonical rectangle in tl/tr/br/bl order
    pub fn canonical_corners(&self) -> [Point2; 4] {
        let w = self.width as f64;
        let h = self.height as f64;
        [
            Point2::new(0.0, 0.0),
            Point2::new(w, 0.0),
            Point2::new(w, h),
            Point2::new(0.0, h),
        ]
    }

    /// Projective transform taking `quad` onto the canonical rectangle
    pub fn projection_for(&self, quad: &Quadrilateral) -> Result<Projection> {
        if quad.area() < MIN_QUAD_AREA || quad.is_degenerate() {
            return Err(ScanError::DegenerateGeometry(format!(
                "quad area {:.1} with corners {:?}",
                quad.area(),
                quad.corners
            )));
        }
        let src = quad.corners.map(|p| (p.x as f32, p.y as f32));
        let dst = self.canonical_corners().map(|p| (p.x as f32, p.y as f32));
        Projection::from_control_points(src, dst)
            .ok_or_else(|| ScanError::DegenerateGeometry("projection is singular".to_string()))
    }

    /// Resample a detected card from `source`
    pub fn warp(&self, source: &RgbImage, detection: &Detection) -> Result<WarpedCard> {
        let (src_w, src_h) = source.dimensions();
        let overlay = detection.normalized_bounds(src_w, src_h);

        match detection {
            Detection::Quad(quad) => {
                let projection = self.projection_for(quad)?;

                let mut out = RgbImage::new(self.width, self.height);
                warp_into(source, &projection, Interpolation::Bilinear, Rgb([0, 0, 0]), &mut out);
                debug!("Warped card {}x{} -> {}x{}", src_w, src_h, self.width, self.height);

                Ok(WarpedCard {
                    image: out,
                    overlay,
                    projection: Some(projection),
                })
            }
            Detection::BoundingBox(rect) => {
                if rect.width == 0 || rect.height == 0 {
                    warn!(?rect, "Empty bounding box");
                    return Err(ScanError::DegenerateGeometry("empty bounding box".to_string()));
                }
                let crop = imageops::crop_imm(source, rect.x, rect.y, rect.width, rect.height).to_image();
                let image = imageops::resize(&crop, self.width, self.height, FilterType::Triangle);
                Ok(WarpedCard {
                    image,
                    overlay,
                    projection: None,
                })
            }
        }
    }
}
