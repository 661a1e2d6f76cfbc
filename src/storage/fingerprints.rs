//! Fingerprint corpus stores
//!
//! Both stores are append-only. Reads take a shared lock, so concurrent
//! scans can compare against the corpus while another one persists.

use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{Result, ScanError};
use crate::pipeline::{CardRecord, FingerprintStore};

/// Process-local corpus
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<Vec<CardRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl FingerprintStore for MemoryStore {
    fn records(&self) -> Result<Vec<CardRecord>> {
        Ok(self.records.read().clone())
    }

    fn persist(&self, record: CardRecord) -> Result<()> {
        debug!("Persisting record {}", record.id);
        self.records.write().push(record);
        Ok(())
    }
}

/// Corpus kept in a single JSON document, rewritten on every append
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    records: RwLock<Vec<CardRecord>>,
}

impl JsonFileStore {
    /// Open an existing corpus file, or start empty if it does not exist
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            if content.trim().is_empty() {
                Vec::new()
            } else {
                serde_json::from_str(&content)
                    .map_err(|e| ScanError::external("fingerprint store", format!("{:?}: {}", path, e)))?
            }
        } else {
            Vec::new()
        };
        info!("Opened fingerprint store {:?} ({} records)", path, records.len());
        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    fn write_all(&self, records: &[CardRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(records)
            .map_err(|e| ScanError::external("fingerprint store", e))?;
        // Write then rename so a crash never leaves a truncated corpus
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl FingerprintStore for JsonFileStore {
    fn records(&self) -> Result<Vec<CardRecord>> {
        Ok(self.records.read().clone())
    }

    fn persist(&self, record: CardRecord) -> Result<()> {
        let mut records = self.records.write();
        records.push(record);
        if let Err(e) = self.write_all(&records) {
            records.pop();
            return Err(e);
        }
        debug!("Corpus {:?} now holds {} records", self.path, records.len());
        Ok(())
    }
}
