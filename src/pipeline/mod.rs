//! Scan Pipeline
//!
//! Orchestrates one photo through the vision, fingerprint and extraction
//! layers. Two entry points:
//! - `probe`: decode and locate only, for live preview
//! - `commit`: quality gate, duplicate short-circuit, fallback extraction
//!   chain and persistence
//!
//! Every stage is fault-isolated. Only a decode failure surfaces as an
//! error; a failed quality gate is a regular `CommitOutcome`. Specialist
//! failures leave their field empty and the run continues.

pub mod collaborators;
pub mod result;

pub use collaborators::{CardIdentifier, CardRecord, FingerprintStore, VisionCandidate};
pub use result::{
    CardFields, CommitOutcome, ConfidenceLabel, ProbeResponse, ProbeStatus, ScanResult, ScanState,
};

use image::{imageops, GrayImage, RgbImage};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::capture::{self, CapturedFrame};
use crate::config::{AppConfig, RegionBounds};
use crate::error::Result;
use crate::extract::{NameMatcher, NumberParser};
use crate::fingerprint::{DuplicateMatch, DuplicateMatcher, EncodedFingerprint, Fingerprint, FingerprintEngine};
use crate::vision::preprocess::ImageCrop;
use crate::vision::{
    Detection, NormalizedRect, OcrProfile, PerspectiveWarper, QualityAssessor, QualityScore, QuadDetector,
    RegionOcr, SetSymbolMatcher, TesseractCli, TextRecognizer,
};

fn region(bounds: RegionBounds) -> NormalizedRect {
    let (x, y, w, h) = bounds;
    NormalizedRect { x, y, w, h }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// A located card, upright at canonical size
struct LocatedCard {
    image: RgbImage,
    overlay: Option<NormalizedRect>,
}

/// Card photo state machine
pub struct ScanPipeline {
    detector: QuadDetector,
    warper: PerspectiveWarper,
    quality: QualityAssessor,
    fingerprints: FingerprintEngine,
    duplicates: DuplicateMatcher,
    numbers: NumberParser,
    names: Arc<NameMatcher>,
    symbols: Arc<SetSymbolMatcher>,
    ocr: Option<RegionOcr>,
    identifier: Option<Arc<dyn CardIdentifier>>,
    number_region: NormalizedRect,
    name_region: NormalizedRect,
}

impl ScanPipeline {
    /// Build from configuration; `cache_dir` holds the downloaded name dictionary
    pub fn new(config: &AppConfig, cache_dir: Option<PathBuf>) -> Result<Self> {
        let ocr = if config.ocr.enabled {
            match TesseractCli::new(&config.ocr) {
                Ok(cli) => Some(RegionOcr::new(Arc::new(cli))),
                Err(e) => {
                    warn!("OCR disabled: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            detector: QuadDetector::new(config.detection.clone()),
            warper: PerspectiveWarper::new(config.detection.canonical_width, config.detection.canonical_height),
            quality: QualityAssessor::new(config.quality.clone()),
            fingerprints: FingerprintEngine::new(config.fingerprint.clone()),
            duplicates: DuplicateMatcher::new(config.duplicate.clone()),
            numbers: NumberParser::new()?,
            names: Arc::new(NameMatcher::new(config.names.clone(), cache_dir)?),
            symbols: Arc::new(SetSymbolMatcher::new(&config.symbols)),
            ocr,
            identifier: None,
            number_region: region(config.ocr.number_region),
            name_region: region(config.ocr.name_region),
        })
    }

    /// Replace the OCR backend
    pub fn with_ocr(mut self, engine: Arc<dyn TextRecognizer>) -> Self {
        self.ocr = Some(RegionOcr::new(engine));
        self
    }

    pub fn without_ocr(mut self) -> Self {
        self.ocr = None;
        self
    }

    /// Attach an external card identification service
    pub fn with_identifier(mut self, identifier: Arc<dyn CardIdentifier>) -> Self {
        self.identifier = Some(identifier);
        self
    }

    /// Share a symbol matcher (and its loaded table) with other pipelines
    pub fn with_symbols(mut self, symbols: Arc<SetSymbolMatcher>) -> Self {
        self.symbols = symbols;
        self
    }

    /// Share a name matcher (and its loaded dictionary) with other pipelines
    pub fn with_names(mut self, names: Arc<NameMatcher>) -> Self {
        self.names = names;
        self
    }

    /// Detection whose geometry can actually be warped
    fn detect(&self, frame: &CapturedFrame) -> Option<Detection> {
        let checked = self.detector.detect(&frame.gray).and_then(|detection| match &detection {
            Detection::Quad(quad) => self.warper.projection_for(quad).map(|_| detection),
            Detection::BoundingBox(_) => Ok(detection),
        });
        match checked {
            Ok(detection) => Some(detection),
            Err(e) if e.is_no_card() => {
                debug!("No card: {}", e);
                None
            }
            Err(e) => {
                warn!("Card detection failed: {}", e);
                None
            }
        }
    }

    fn locate(&self, frame: &CapturedFrame, trace: &mut Vec<ScanState>) -> Option<LocatedCard> {
        let warped = self.detect(frame).and_then(|detection| {
            self.warper
                .warp(&frame.rgb, &detection)
                .map_err(|e| debug!("Warp failed: {}", e))
                .ok()
        });
        match warped {
            Some(w) => {
                trace.push(ScanState::QuadDetected);
                Some(LocatedCard {
                    image: w.image,
                    overlay: w.overlay,
                })
            }
            None => {
                trace.push(ScanState::NoCard);
                None
            }
        }
    }

    /// Decode and locate only
    pub fn probe(&self, bytes: &[u8]) -> Result<ProbeResponse> {
        let frame = capture::decode(bytes)?;
        let (w, h) = frame.dimensions();

        let Some(detection) = self.detect(&frame) else {
            return Ok(ProbeResponse {
                status: ProbeStatus::NoCard,
                overlay: None,
                quality: None,
                quality_warning: false,
            });
        };

        let score = self.quality.assess_with_gray(&frame.rgb, &frame.gray);
        Ok(ProbeResponse {
            status: ProbeStatus::Card,
            overlay: detection.normalized_bounds(w, h),
            quality: Some(score.quality_score),
            quality_warning: self.quality.probe_warning(&score),
        })
    }

    /// Full analysis; persists the capture unless the quality gate fails.
    ///
    /// A photo without a detectable boundary is analyzed as a whole, on the
    /// assumption that it is already cropped to the card.
    pub fn commit(&self, bytes: &[u8], store: &dyn FingerprintStore) -> Result<CommitOutcome> {
        let start = Instant::now();
        let mut trace = vec![ScanState::Idle, ScanState::Decoding];
        let frame = capture::decode(bytes)?;

        let located = self.locate(&frame, &mut trace);
        let (card, overlay) = match located {
            Some(card) => (card.image, card.overlay),
            None => (
                imageops::resize(
                    &frame.rgb,
                    self.warper.width,
                    self.warper.height,
                    imageops::FilterType::Triangle,
                ),
                None,
            ),
        };

        let quality = self.quality.assess_with_gray(&frame.rgb, &frame.gray);
        let passed = self.quality.passes_commit(&quality);
        trace.push(ScanState::QualityGate { passed });
        if !passed {
            info!(
                "Capture rejected: quality {:.2} below {:.2}",
                quality.quality_score,
                self.quality.commit_min()
            );
            return Ok(CommitOutcome::LowQuality {
                quality: quality.quality_score,
                minimum: self.quality.commit_min(),
                trace,
            });
        }

        let fingerprint = self.fingerprints.compute(&card);
        let encoded = fingerprint.encode()?;
        trace.push(ScanState::FingerprintComputed);

        let records = store.records().unwrap_or_else(|e| {
            warn!("Fingerprint corpus unavailable, skipping duplicate check: {}", e);
            Vec::new()
        });
        let duplicate = self.find_duplicate(&fingerprint, &records);
        trace.push(ScanState::DuplicateCheck {
            hit: duplicate.is_some(),
        });

        let prior = duplicate
            .as_ref()
            .and_then(|m| records.iter().find(|r| r.id == m.candidate_id));
        let (fields, candidate_score) = match prior {
            Some(record) => {
                trace.push(ScanState::ShortCircuitAssemble);
                (record.fields.clone(), record.candidate_score)
            }
            None => {
                trace.push(ScanState::FullExtract);
                self.extract(&card, &mut trace)
            }
        };

        trace.push(ScanState::Persist);
        let record = CardRecord {
            id: Uuid::new_v4().to_string(),
            fingerprint: encoded.clone(),
            fields: fields.clone(),
            candidate_score,
            duplicate_of: duplicate.as_ref().map(|m| m.candidate_id.clone()),
            created_at: unix_now(),
        };
        let record_id = record.id.clone();
        let record_id = match store.persist(record) {
            Ok(()) => Some(record_id),
            Err(e) => {
                warn!("Failed to persist capture: {}", e);
                None
            }
        };

        let result = self.assemble(fields, overlay, quality, candidate_score, duplicate, record_id, encoded, trace);
        info!(
            name = ?result.fields.name,
            duplicate_of = ?result.duplicate_of,
            confidence = result.confidence,
            "Commit finished in {:?}",
            start.elapsed()
        );
        Ok(CommitOutcome::Scanned(Box::new(result)))
    }

    fn find_duplicate(&self, fingerprint: &Fingerprint, records: &[CardRecord]) -> Option<DuplicateMatch> {
        let corpus: Vec<(&str, Fingerprint)> = records
            .iter()
            .filter_map(|r| match Fingerprint::decode(&r.fingerprint) {
                Ok(fp) => Some((r.id.as_str(), fp)),
                Err(e) => {
                    warn!("Skipping record {} with unreadable fingerprint: {}", r.id, e);
                    None
                }
            })
            .collect();
        self.duplicates
            .find_duplicate(fingerprint, corpus.iter().map(|(id, fp)| (*id, fp)))
    }

    /// External identification, then local specialists for whatever is missing
    fn extract(&self, card: &RgbImage, trace: &mut Vec<ScanState>) -> (CardFields, f32) {
        trace.push(ScanState::ExternalVisionCall);
        let candidate = self.identifier.as_ref().and_then(|identifier| match identifier.identify(card) {
            Ok(candidate) => candidate,
            Err(e) => {
                warn!("Card identification failed: {}", e);
                None
            }
        });
        let candidate_score = candidate.as_ref().map(|c| c.score.clamp(0.0, 1.0)).unwrap_or(0.0);
        let mut fields = candidate.map(|c| c.fields).unwrap_or_default();

        if fields.set_code.is_none() {
            trace.push(ScanState::SymbolMatcherOverride);
            if let Some(symbol) = self.symbols.match_card(card) {
                fields.set_code = Some(symbol.code);
                fields.set = fields.set.or(Some(symbol.name));
            }
        }

        if let Some(ocr) = &self.ocr {
            let gray = imageops::grayscale(card);

            if fields.number.is_none() {
                trace.push(ScanState::OcrFallbackOverride);
                if let Some(text) = read_region(ocr, &gray, self.number_region) {
                    let parsed = self.numbers.parse(&text);
                    fields.number = parsed.number;
                    fields.total = fields.total.or(parsed.total);
                }
            }

            if fields.name.is_none() {
                trace.push(ScanState::NameFallbackOverride);
                fields.name = read_region(ocr, &gray, self.name_region)
                    .and_then(|text| self.names.match_name(&text))
                    .map(|m| m.name);
            }
        }

        (fields, candidate_score)
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        &self,
        fields: CardFields,
        overlay: Option<NormalizedRect>,
        quality: QualityScore,
        candidate_score: f32,
        duplicate: Option<DuplicateMatch>,
        record_id: Option<String>,
        fingerprint: EncodedFingerprint,
        trace: Vec<ScanState>,
    ) -> ScanResult {
        let confidence = (quality.quality_score * candidate_score).clamp(0.0, 1.0);
        ScanResult {
            fields,
            overlay,
            quality: quality.quality_score,
            quality_detail: quality,
            confidence,
            confidence_label: ConfidenceLabel::from_score(confidence),
            duplicate_of: duplicate.as_ref().map(|m| m.candidate_id.clone()),
            duplicate_distance: duplicate.map(|m| m.distance),
            record_id,
            fingerprint,
            trace,
        }
    }
}

fn read_region(ocr: &RegionOcr, gray: &GrayImage, region: NormalizedRect) -> Option<String> {
    let crop = gray.crop_region(region);
    ocr.read(&crop, &OcrProfile::ALL).map(|r| r.text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScanError;
    use crate::storage::MemoryStore;
    use crate::vision::ocr::tests::ScriptedOcr;
    use image::{ImageFormat, Rgb};
    use imageproc::drawing::{draw_filled_rect_mut, draw_polygon_mut};
    use imageproc::point::Point;
    use imageproc::rect::Rect;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn png(img: &RgbImage) -> Vec<u8> {
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png).unwrap();
        buf
    }

    /// Angled card with printed detail on a dark table
    fn card_photo() -> Vec<u8> {
        let mut img = RgbImage::from_pixel(480, 640, Rgb([50, 55, 60]));
        let corners = [(80, 70), (400, 90), (390, 580), (70, 560)].map(|(x, y)| Point::new(x, y));
        draw_polygon_mut(&mut img, &corners, Rgb([220, 210, 190]));
        for i in 0..12 {
            draw_filled_rect_mut(&mut img, Rect::at(130, 140 + i * 30).of_size(200, 3), Rgb([70, 60, 50]));
        }
        draw_filled_rect_mut(&mut img, Rect::at(150, 200).of_size(60, 60), Rgb([180, 40, 40]));
        png(&img)
    }

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.ocr.enabled = false;
        config.names.remote_url = None;
        config
    }

    fn pipeline() -> ScanPipeline {
        ScanPipeline::new(&config(), None).unwrap()
    }

    struct FixedIdentifier {
        candidate: Option<VisionCandidate>,
        calls: AtomicUsize,
    }

    impl CardIdentifier for FixedIdentifier {
        fn identify(&self, _card: &RgbImage) -> Result<Option<VisionCandidate>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.candidate.clone())
        }
    }

    struct FailingIdentifier;

    impl CardIdentifier for FailingIdentifier {
        fn identify(&self, _card: &RgbImage) -> Result<Option<VisionCandidate>> {
            Err(ScanError::external("vision", "HTTP 503"))
        }
    }

    fn scanned(outcome: CommitOutcome) -> ScanResult {
        match outcome {
            CommitOutcome::Scanned(result) => *result,
            other => panic!("expected a scan result, got {:?}", other),
        }
    }

    #[test]
    fn test_probe_reports_card() {
        let response = pipeline().probe(&card_photo()).unwrap();
        assert_eq!(response.status, ProbeStatus::Card);
        let overlay = response.overlay.unwrap();
        assert!(overlay.x > 0.1 && overlay.x < 0.2);
        assert!(overlay.w > 0.6);
        let quality = response.quality.unwrap();
        assert!((0.0..=1.0).contains(&quality));
        assert!(!response.quality_warning);
    }

    #[test]
    fn test_probe_without_card() {
        let blank = png(&RgbImage::from_pixel(300, 300, Rgb([120, 120, 120])));
        let response = pipeline().probe(&blank).unwrap();
        assert_eq!(response.status, ProbeStatus::NoCard);
        assert!(response.overlay.is_none());
        assert!(response.quality.is_none());
    }

    #[test]
    fn test_corrupt_bytes_are_fatal() {
        let p = pipeline();
        assert!(matches!(p.probe(b"not an image"), Err(ScanError::Decode(_))));
        assert!(matches!(p.commit(b"", &MemoryStore::new()), Err(ScanError::Decode(_))));
    }

    #[test]
    fn test_low_quality_is_not_persisted() {
        let store = MemoryStore::new();
        let dark = png(&RgbImage::from_pixel(300, 400, Rgb([0, 0, 0])));
        let outcome = pipeline().commit(&dark, &store).unwrap();

        let CommitOutcome::LowQuality { quality, minimum, trace } = outcome else {
            panic!("expected low quality, got {:?}", outcome);
        };
        assert!(quality < minimum);
        assert!((minimum - 0.55).abs() < 1e-6);
        assert_eq!(trace.last(), Some(&ScanState::QualityGate { passed: false }));
        assert!(trace.contains(&ScanState::NoCard));
        assert!(store.is_empty());
    }

    #[test]
    fn test_same_photo_twice_is_duplicate() {
        let store = MemoryStore::new();
        let p = pipeline();
        let photo = card_photo();

        let first = scanned(p.commit(&photo, &store).unwrap());
        assert!(first.duplicate_of.is_none());
        assert!(first.trace.contains(&ScanState::QuadDetected));
        assert!(first.trace.contains(&ScanState::FullExtract));

        let second = scanned(p.commit(&photo, &store).unwrap());
        assert_eq!(second.duplicate_of, first.record_id);
        assert_eq!(second.duplicate_distance, Some(0));
        assert!(second.trace.contains(&ScanState::ShortCircuitAssemble));
        assert!(!second.trace.contains(&ScanState::FullExtract));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_full_extract_fallback_chain() {
        let identifier = Arc::new(FixedIdentifier {
            candidate: Some(VisionCandidate {
                fields: CardFields {
                    name: Some("Pikachu".into()),
                    rarity: Some("Common".into()),
                    ..Default::default()
                },
                score: 0.9,
            }),
            calls: AtomicUsize::new(0),
        });
        let ocr = Arc::new(ScriptedOcr::new(vec![Ok("123/198".into())]));
        let p = pipeline().with_identifier(identifier.clone()).with_ocr(ocr);

        let result = scanned(p.commit(&card_photo(), &MemoryStore::new()).unwrap());
        assert_eq!(result.fields.name.as_deref(), Some("Pikachu"));
        assert_eq!(result.fields.rarity.as_deref(), Some("Common"));
        assert_eq!(result.fields.number.as_deref(), Some("123"));
        assert_eq!(result.fields.total.as_deref(), Some("198"));
        // No logo table configured
        assert!(result.fields.set_code.is_none());
        assert!((result.confidence - result.quality * 0.9).abs() < 1e-6);

        let trace = &result.trace;
        let pos = |s: ScanState| trace.iter().position(|t| *t == s).unwrap();
        assert!(pos(ScanState::ExternalVisionCall) < pos(ScanState::SymbolMatcherOverride));
        assert!(pos(ScanState::SymbolMatcherOverride) < pos(ScanState::OcrFallbackOverride));
        assert!(!trace.contains(&ScanState::NameFallbackOverride));
        assert_eq!(trace.last(), Some(&ScanState::Persist));
        assert_eq!(identifier.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_identifier_failure_leaves_fields_empty() {
        let p = pipeline().with_identifier(Arc::new(FailingIdentifier));
        let result = scanned(p.commit(&card_photo(), &MemoryStore::new()).unwrap());
        assert_eq!(result.fields, CardFields::default());
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.confidence_label, ConfidenceLabel::Poor);
        assert!(result.record_id.is_some());
    }

    #[test]
    fn test_duplicate_reuses_prior_fields() {
        let store = MemoryStore::new();
        let photo = card_photo();
        let identifier = Arc::new(FixedIdentifier {
            candidate: Some(VisionCandidate {
                fields: CardFields {
                    name: Some("Eevee".into()),
                    set_code: Some("base".into()),
                    number: Some("51".into()),
                    ..Default::default()
                },
                score: 1.0,
            }),
            calls: AtomicUsize::new(0),
        });
        let p = pipeline().with_identifier(identifier.clone());

        let first = scanned(p.commit(&photo, &store).unwrap());
        let second = scanned(p.commit(&photo, &store).unwrap());

        assert_eq!(identifier.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.fields, first.fields);
        assert!((second.confidence - first.confidence).abs() < 1e-6);
        let records = store.records().unwrap();
        assert_eq!(records[1].duplicate_of.as_deref(), Some(records[0].id.as_str()));
    }
}
