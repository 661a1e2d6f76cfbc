//! Application Configuration
//!
//! Scan thresholds and reference data locations stored in TOML format.
//! Every threshold is empirically tuned; recalibrate on a new camera or
//! lighting setup before trusting the defaults.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Single-card quad detection and warping
    pub detection: DetectionConfig,
    /// Flat-lay multi-card location
    pub multi_card: MultiCardConfig,
    /// Capture quality scoring and gating
    pub quality: QualityConfig,
    /// Region OCR
    pub ocr: OcrConfig,
    /// Fingerprint computation
    pub fingerprint: FingerprintConfig,
    /// Duplicate detection
    pub duplicate: DuplicateConfig,
    /// Set symbol matching
    pub symbols: SymbolConfig,
    /// Name dictionary
    pub names: NameConfig,
}

/// Single quad detection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Gaussian blur sigma applied before edge detection
    pub blur_sigma: f32,
    /// Canny low threshold
    pub canny_low: f32,
    /// Canny high threshold
    pub canny_high: f32,
    /// Minimum contour area as a fraction of the image area
    pub min_area_ratio: f64,
    /// Polygon approximation tolerance as a fraction of contour perimeter
    pub epsilon_ratio: f64,
    /// Canonical warped card width
    pub canonical_width: u32,
    /// Canonical warped card height
    pub canonical_height: u32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            blur_sigma: 1.1,
            canny_low: 50.0,
            canny_high: 150.0,
            min_area_ratio: 0.05,
            epsilon_ratio: 0.02,
            canonical_width: 840,
            canonical_height: 1176,
        }
    }
}

/// Multi-card location settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiCardConfig {
    /// Images narrower than this are upscaled before detection
    pub min_width: u32,
    /// Canny low threshold
    pub canny_low: f32,
    /// Canny high threshold
    pub canny_high: f32,
    /// Dilation radius used to bridge broken edges
    pub dilate_radius: u8,
    /// Minimum contour area as a fraction of the frame
    pub min_area_ratio: f64,
    /// Minimum bounding box aspect ratio (w / h)
    pub min_aspect: f64,
    /// Maximum bounding box aspect ratio (w / h)
    pub max_aspect: f64,
    /// Minimum bounding box side, in original pixels
    pub min_side_px: u32,
    /// Minimum contour area / convex hull area
    pub min_solidity: f64,
    /// A box is dropped when this fraction of its area lies inside a kept box
    pub containment_threshold: f64,
}

impl Default for MultiCardConfig {
    fn default() -> Self {
        Self {
            min_width: 1000,
            canny_low: 30.0,
            canny_high: 120.0,
            dilate_radius: 2,
            min_area_ratio: 0.005,
            min_aspect: 0.5,
            max_aspect: 2.2,
            min_side_px: 50,
            min_solidity: 0.7,
            containment_threshold: 0.5,
        }
    }
}

/// Quality scoring settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Probe responses below this score carry a warning
    pub probe_warn: f32,
    /// Commits below this score are rejected
    pub commit_min: f32,
    /// Laplacian variance mapped to a sharpness of 1.0
    pub sharpness_norm: f64,
    /// Ideal mean brightness (0-1)
    pub brightness_target: f64,
    /// HSV value above which a pixel counts as glare (0-255)
    pub glare_level: u8,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            probe_warn: 0.45,
            commit_min: 0.55,
            sharpness_norm: 200.0,
            brightness_target: 0.7,
            glare_level: 245,
        }
    }
}

/// Normalized region (x, y, w, h) on the warped card
pub type RegionBounds = (f32, f32, f32, f32);

/// OCR settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Run OCR at all
    pub enabled: bool,
    /// Tesseract executable
    pub tesseract_path: PathBuf,
    /// Tesseract language code
    pub language: String,
    /// Per-call timeout in milliseconds
    pub timeout_ms: u64,
    /// Collector number region on the warped card
    pub number_region: RegionBounds,
    /// Card name region on the warped card
    pub name_region: RegionBounds,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tesseract_path: PathBuf::from("tesseract"),
            language: "eng".to_string(),
            timeout_ms: 8000,
            number_region: (0.0, 0.88, 0.5, 0.12),
            name_region: (0.05, 0.02, 0.7, 0.08),
        }
    }
}

/// Fingerprint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FingerprintConfig {
    /// Side of the normalized grayscale image
    pub normalize_size: u32,
    /// Hash side length (bits per hash = hash_size^2)
    pub hash_size: u32,
    /// Tile grid columns
    pub tile_cols: u32,
    /// Tile grid rows
    pub tile_rows: u32,
    /// Compute sparse local descriptors
    pub descriptors: bool,
    /// Cap on descriptors kept per fingerprint
    pub max_descriptors: usize,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            normalize_size: 256,
            hash_size: 8,
            tile_cols: 2,
            tile_rows: 2,
            descriptors: false,
            max_descriptors: 500,
        }
    }
}

/// Duplicate detection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DuplicateConfig {
    /// Maximum combined distance still considered a duplicate
    pub threshold: u32,
    /// Include per-tile distances in the combined distance
    pub use_tiles: bool,
}

impl Default for DuplicateConfig {
    fn default() -> Self {
        Self {
            threshold: 80,
            use_tiles: true,
        }
    }
}

/// Set symbol settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SymbolConfig {
    /// Directory of `<code>.png` / `<code>.jpg` logos
    pub logo_dir: Option<PathBuf>,
    /// Maximum Hamming distance accepted as a match
    pub max_distance: u32,
}

impl Default for SymbolConfig {
    fn default() -> Self {
        Self {
            logo_dir: None,
            max_distance: 18,
        }
    }
}

/// Name dictionary settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NameConfig {
    /// Bundled newline-delimited dictionary
    pub dictionary_path: Option<PathBuf>,
    /// Remote species list fetched once when no bundled file exists
    pub remote_url: Option<String>,
    /// Fetch timeout in milliseconds
    pub fetch_timeout_ms: u64,
    /// Minimum token-set similarity (0-100) to accept a dictionary match
    pub accept_score: f64,
}

impl Default for NameConfig {
    fn default() -> Self {
        Self {
            dictionary_path: None,
            remote_url: Some("https://pokeapi.co/api/v2/pokemon-species?limit=2000".to_string()),
            fetch_timeout_ms: 10_000,
            accept_score: 80.0,
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_app_config() {
        let config = AppConfig::default();

        assert!((config.detection.min_area_ratio - 0.05).abs() < 1e-9);
        assert!((config.detection.epsilon_ratio - 0.02).abs() < 1e-9);
        assert_eq!(config.detection.canonical_width, 840);
        assert_eq!(config.detection.canonical_height, 1176);

        assert_eq!(config.multi_card.min_width, 1000);
        assert!((config.multi_card.min_solidity - 0.7).abs() < 1e-9);

        assert_eq!(config.duplicate.threshold, 80);
        assert!(config.duplicate.use_tiles);
        assert_eq!(config.symbols.max_distance, 18);
        assert!((config.names.accept_score - 80.0).abs() < 1e-9);
        assert!(!config.fingerprint.descriptors);
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.duplicate.threshold, parsed.duplicate.threshold);
        assert_eq!(config.fingerprint.tile_cols, parsed.fingerprint.tile_cols);
        assert_eq!(config.ocr.number_region, parsed.ocr.number_region);
        assert_eq!(config.names.remote_url, parsed.names.remote_url);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: AppConfig = toml::from_str("[duplicate]\nthreshold = 40\n").unwrap();
        assert_eq!(parsed.duplicate.threshold, 40);
        assert!(parsed.duplicate.use_tiles);
        assert_eq!(parsed.detection.canonical_width, 840);
    }

    #[test]
    fn test_save_and_load_config() {
        let mut config = AppConfig::default();
        config.quality.commit_min = 0.3;
        config.symbols.logo_dir = Some(PathBuf::from("/tmp/logos"));

        let temp_file = NamedTempFile::new().unwrap();
        save_config(&config, temp_file.path()).unwrap();
        let loaded = load_config(temp_file.path()).unwrap();

        assert!((loaded.quality.commit_min - 0.3).abs() < 1e-6);
        assert_eq!(loaded.symbols.logo_dir, Some(PathBuf::from("/tmp/logos")));
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "this is not valid toml {{{{").unwrap();

        let result = load_config(temp_file.path());
        assert!(result.is_err());
    }
}
