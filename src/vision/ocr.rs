//! Region OCR
//!
//! Each crop is upscaled, denoised and contrast-equalized, then binarized
//! two ways (normal and inverted adaptive threshold). Every binarization is
//! read with every OCR profile and the reading with the most alphanumeric
//! characters wins; ties go to the first reading in iteration order.
//!
//! The OCR engine itself is external. [`TesseractCli`] drives the
//! `tesseract` executable with a bounded timeout.

use image::{GrayImage, ImageFormat};
use std::io::Cursor;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

use super::preprocess::{adaptive_threshold, denoise, equalize_local, upscale};
use crate::config::OcrConfig;
use crate::error::{Result, ScanError};

/// OCR engine configuration for one reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OcrProfile {
    /// Single text line, digits and slash only
    Digits,
    /// Uniform block of free text
    FreeText,
}

impl OcrProfile {
    /// Both profiles, in tournament order
    pub const ALL: [OcrProfile; 2] = [OcrProfile::Digits, OcrProfile::FreeText];

    /// Tesseract page segmentation mode
    pub fn page_seg_mode(&self) -> u8 {
        match self {
            OcrProfile::Digits => 7,
            OcrProfile::FreeText => 6,
        }
    }

    /// Character whitelist, if any
    pub fn whitelist(&self) -> Option<&'static str> {
        match self {
            OcrProfile::Digits => Some("0123456789/"),
            OcrProfile::FreeText => None,
        }
    }
}

/// Binarization applied before a reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Binarization {
    Normal,
    Inverted,
}

/// One reading of one binarized crop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcrResult {
    pub binarization: Binarization,
    pub profile: OcrProfile,
    pub text: String,
    /// Alphanumeric character count
    pub score: usize,
}

/// Text recognition backend
pub trait TextRecognizer: Send + Sync {
    /// Read the text in a prepared grayscale crop
    fn recognize(&self, image: &GrayImage, profile: OcrProfile) -> Result<String>;
}

/// Score a reading by its alphanumeric character count
pub fn score_text(text: &str) -> usize {
    text.chars().filter(|c| c.is_alphanumeric()).count()
}

/// Multi-variant OCR over card regions
#[derive(Clone)]
pub struct RegionOcr {
    engine: Arc<dyn TextRecognizer>,
}

impl RegionOcr {
    pub fn new(engine: Arc<dyn TextRecognizer>) -> Self {
        Self { engine }
    }

    /// Enhance a crop and produce the normal and inverted binarizations
    pub fn prepare_variants(crop: &GrayImage) -> [(Binarization, GrayImage); 2] {
        let (w, h) = crop.dimensions();
        let factor = if w.max(h) < 600 { 1.6 } else { 1.2 };
        let enhanced = equalize_local(&denoise(&upscale(crop, factor)), 8, 2.0);
        [
            (Binarization::Normal, adaptive_threshold(&enhanced, 15, 10, false)),
            (Binarization::Inverted, adaptive_threshold(&enhanced, 15, 10, true)),
        ]
    }

    /// Run the variant x profile tournament; `None` when nothing scored
    pub fn read(&self, crop: &GrayImage, profiles: &[OcrProfile]) -> Option<OcrResult> {
        if crop.width() == 0 || crop.height() == 0 {
            return None;
        }
        let start = Instant::now();
        let variants = Self::prepare_variants(crop);

        let trials = variants.iter().flat_map(|(binarization, image)| {
            profiles.iter().map(move |profile| (*binarization, *profile, image))
        });

        let mut failures = 0usize;
        let best = trials
            .filter_map(|(binarization, profile, image)| match self.engine.recognize(image, profile) {
                Ok(raw) => {
                    let text = raw.trim().to_string();
                    let score = score_text(&text);
                    debug!(?binarization, ?profile, score, text = %text, "OCR trial");
                    Some(OcrResult {
                        binarization,
                        profile,
                        text,
                        score,
                    })
                }
                Err(e) => {
                    failures += 1;
                    debug!(?binarization, ?profile, "OCR trial failed: {}", e);
                    None
                }
            })
            .fold(None::<OcrResult>, |best, candidate| match best {
                Some(b) if b.score >= candidate.score => Some(b),
                _ => Some(candidate),
            });

        if failures > 0 {
            warn!("{} OCR trial(s) failed", failures);
        }

        let best = best.filter(|r| r.score > 0);
        debug!(
            "Region OCR finished in {:?}: {:?}",
            start.elapsed(),
            best.as_ref().map(|r| &r.text)
        );
        best
    }
}

/// Tesseract executable driven through stdin/stdout.
///
/// Owns a private current-thread runtime, so it must not be called from
/// inside another tokio runtime.
pub struct TesseractCli {
    binary: PathBuf,
    language: String,
    timeout: Duration,
    runtime: Runtime,
}

impl TesseractCli {
    pub fn new(config: &OcrConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| ScanError::OcrUnavailable(format!("failed to create runtime: {}", e)))?;

        info!(
            "Tesseract OCR backend: {:?} (lang {}, timeout {}ms)",
            config.tesseract_path, config.language, config.timeout_ms
        );

        Ok(Self {
            binary: config.tesseract_path.clone(),
            language: config.language.clone(),
            timeout: Duration::from_millis(config.timeout_ms),
            runtime,
        })
    }

    fn args(&self, profile: OcrProfile) -> Vec<String> {
        let mut args = vec![
            "stdin".to_string(),
            "stdout".to_string(),
            "-l".to_string(),
            self.language.clone(),
            "--psm".to_string(),
            profile.page_seg_mode().to_string(),
        ];
        if let Some(whitelist) = profile.whitelist() {
            args.push("-c".to_string());
            args.push(format!("tessedit_char_whitelist={}", whitelist));
        }
        args
    }

    async fn run(&self, png: Vec<u8>, profile: OcrProfile) -> Result<String> {
        let mut child = Command::new(&self.binary)
            .args(self.args(profile))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ScanError::OcrUnavailable(format!("failed to start {:?}: {}", self.binary, e)))?;

        // Feeding stdin can block once the pipe fills, so it shares the deadline
        let exchange = async move {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(&png).await?;
            }
            child.wait_with_output().await
        };
        let output = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| ScanError::OcrUnavailable(format!("timed out after {:?}", self.timeout)))?
            .map_err(|e| ScanError::OcrUnavailable(e.to_string()))?;

        if !output.status.success() {
            return Err(ScanError::OcrUnavailable(format!("tesseract exited with {}", output.status)));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl TextRecognizer for TesseractCli {
    fn recognize(&self, image: &GrayImage, profile: OcrProfile) -> Result<String> {
        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| ScanError::OcrUnavailable(format!("failed to encode crop: {}", e)))?;
        self.runtime.block_on(self.run(png, profile))
    }
}
