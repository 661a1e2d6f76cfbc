//! Image intake
//!
//! Turns raw JPEG/PNG bytes into a [`CapturedFrame`]. A decode failure is the
//! only fatal error of a scan request.

pub mod frame;

pub use frame::CapturedFrame;

use std::path::Path;
use tracing::debug;

use crate::error::{Result, ScanError};

/// Decode raw image bytes
pub fn decode(bytes: &[u8]) -> Result<CapturedFrame> {
    if bytes.is_empty() {
        return Err(ScanError::Decode(image::ImageError::IoError(
            std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "empty image payload"),
        )));
    }

    let img = image::load_from_memory(bytes)?;
    let rgb = img.to_rgb8();
    debug!("Decoded {}x{} image ({} bytes)", rgb.width(), rgb.height(), bytes.len());

    if rgb.width() == 0 || rgb.height() == 0 {
        return Err(ScanError::Decode(image::ImageError::IoError(
            std::io::Error::new(std::io::ErrorKind::InvalidData, "image has zero size"),
        )));
    }

    Ok(CapturedFrame::new(rgb))
}

/// Read and decode an image file
pub fn decode_file(path: &Path) -> Result<CapturedFrame> {
    let bytes = std::fs::read(path)?;
    decode(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn png_bytes(img: &RgbImage) -> Vec<u8> {
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png).unwrap();
        buf
    }

    #[test]
    fn test_decode_png() {
        let img = RgbImage::from_pixel(12, 7, Rgb([10, 200, 30]));
        let frame = decode(&png_bytes(&img)).unwrap();
        assert_eq!(frame.dimensions(), (12, 7));
        assert_eq!(frame.gray.dimensions(), (12, 7));
        assert_eq!(frame.rgb.get_pixel(3, 3), &Rgb([10, 200, 30]));
    }

    #[test]
    fn test_decode_garbage_fails() {
        let result = decode(b"definitely not an image");
        assert!(matches!(result, Err(ScanError::Decode(_))));
    }

    #[test]
    fn test_decode_empty_fails() {
        assert!(matches!(decode(&[]), Err(ScanError::Decode(_))));
    }
}
