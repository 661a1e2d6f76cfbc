//! Set symbol matching
//!
//! A reference table of set logos is hashed once; card corners are hashed
//! per request and the globally closest (region, logo) pair wins.

use image::{imageops, GrayImage, RgbImage};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::preprocess::{autocontrast, resize_exact, ImageCrop};
use super::NormalizedRect;
use crate::config::SymbolConfig;
use crate::error::{Result, ScanError};
use crate::fingerprint::hash::{hamming, phash, HashArray};

/// Side length symbols are normalized to before hashing
const SYMBOL_SIZE: u32 = 64;

/// Optional `{code: name}` map stored next to the logos
const SET_NAMES_FILE: &str = "sets.json";

/// Where set symbols are printed: bottom corners on current layouts,
/// top corners on older ones
pub const SYMBOL_REGIONS: [(&str, NormalizedRect); 4] = [
    ("bottom-left", NormalizedRect { x: 0.0, y: 0.85, w: 0.25, h: 0.15 }),
    ("bottom-right", NormalizedRect { x: 0.75, y: 0.85, w: 0.25, h: 0.15 }),
    ("top-left", NormalizedRect { x: 0.0, y: 0.0, w: 0.25, h: 0.15 }),
    ("top-right", NormalizedRect { x: 0.75, y: 0.0, w: 0.25, h: 0.15 }),
];

/// Resize to the symbol size and stretch contrast
pub fn normalize_symbol(gray: &GrayImage) -> GrayImage {
    autocontrast(&resize_exact(gray, SYMBOL_SIZE, SYMBOL_SIZE))
}

/// Hashed reference logo
#[derive(Debug, Clone)]
pub struct SymbolTemplate {
    /// Set code, from the file stem
    pub code: String,
    /// Display name
    pub name: String,
    hash: HashArray,
}

impl SymbolTemplate {
    pub fn from_image(code: &str, name: &str, image: &GrayImage) -> Self {
        Self {
            code: code.to_string(),
            name: name.to_string(),
            hash: phash(&normalize_symbol(image), 8),
        }
    }

    /// Load a logo file; the name defaults to the upper-cased code
    pub fn from_file(code: &str, name: Option<&str>, path: &Path) -> Result<Self> {
        let image = image::open(path)?.to_luma8();
        let fallback = code.to_uppercase();
        Ok(Self::from_image(code, name.unwrap_or(&fallback), &image))
    }

    pub fn hash(&self) -> &HashArray {
        &self.hash
    }
}

/// Read-only table of hashed set logos
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    templates: Vec<SymbolTemplate>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_template(&mut self, template: SymbolTemplate) {
        debug!("Added set symbol '{}' ({})", template.code, template.name);
        self.templates.push(template);
    }

    pub fn templates(&self) -> &[SymbolTemplate] {
        &self.templates
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Load every `<code>.png` / `<code>.jpg` in a directory, in file name order
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let start = Instant::now();
        let entries = std::fs::read_dir(dir).map_err(|e| ScanError::external("logo table", e))?;
        let names = read_set_names(dir);

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| matches!(e.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg"))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        let mut table = Self::new();
        for path in paths {
            let Some(code) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match SymbolTemplate::from_file(code, names.get(code).map(String::as_str), &path) {
                Ok(template) => table.add_template(template),
                Err(e) => warn!("Skipping set symbol {:?}: {}", path, e),
            }
        }

        info!("Loaded {} set symbols from {:?} in {:?}", table.len(), dir, start.elapsed());
        Ok(table)
    }
}

fn read_set_names(dir: &Path) -> HashMap<String, String> {
    let path = dir.join(SET_NAMES_FILE);
    if !path.exists() {
        return HashMap::new();
    }
    match std::fs::read_to_string(&path)
        .map_err(|e| e.to_string())
        .and_then(|s| serde_json::from_str(&s).map_err(|e| e.to_string()))
    {
        Ok(names) => names,
        Err(e) => {
            warn!("Ignoring {:?}: {}", path, e);
            HashMap::new()
        }
    }
}

/// Best logo match for a card
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolMatch {
    pub code: String,
    pub name: String,
    pub distance: u32,
    /// Card corner the symbol was found in
    pub region: &'static str,
}

/// Matches card corners against the logo table
#[derive(Debug)]
pub struct SetSymbolMatcher {
    logo_dir: Option<PathBuf>,
    max_distance: u32,
    table: OnceLock<SymbolTable>,
}

impl SetSymbolMatcher {
    /// Matcher whose table is loaded from `config.logo_dir` on first use
    pub fn new(config: &SymbolConfig) -> Self {
        Self {
            logo_dir: config.logo_dir.clone(),
            max_distance: config.max_distance,
            table: OnceLock::new(),
        }
    }

    /// Matcher over an already built table
    pub fn with_table(table: SymbolTable, max_distance: u32) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(table);
        Self {
            logo_dir: None,
            max_distance,
            table: cell,
        }
    }

    /// The logo table, loaded once; empty when the directory is unusable
    pub fn table(&self) -> &SymbolTable {
        self.table.get_or_init(|| match &self.logo_dir {
            Some(dir) => SymbolTable::load_dir(dir).unwrap_or_else(|e| {
                warn!("Set symbol table unavailable: {}", e);
                SymbolTable::new()
            }),
            None => {
                debug!("No logo directory configured");
                SymbolTable::new()
            }
        })
    }

    /// Match a warped card; `None` unless the best distance is within the limit
    pub fn match_card(&self, card: &RgbImage) -> Option<SymbolMatch> {
        let table = self.table();
        if table.is_empty() {
            return None;
        }
        let gray = imageops::grayscale(card);

        let region_hashes: Vec<(&'static str, HashArray)> = SYMBOL_REGIONS
            .iter()
            .map(|(label, region)| (*label, phash(&normalize_symbol(&gray.crop_region(*region)), 8)))
            .collect();

        let best = region_hashes
            .iter()
            .flat_map(|(label, hash)| table.templates().iter().map(move |t| (*label, t, hamming(hash, t.hash()))))
            .fold(None::<(&'static str, &SymbolTemplate, u32)>, |best, cand| match best {
                Some(b) if b.2 <= cand.2 => Some(b),
                _ => Some(cand),
            })?;

        let (region, template, distance) = best;
        debug!(code = %template.code, region, distance, "Closest set symbol");
        (distance <= self.max_distance).then(|| SymbolMatch {
            code: template.code.clone(),
            name: template.name.clone(),
            distance,
            region,
        })
    }
}
