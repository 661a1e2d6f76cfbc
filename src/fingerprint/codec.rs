//! Portable fingerprint encoding
//!
//! Packed layout: `ndim: u8`, then `ndim` little-endian `u32` dimensions,
//! then the row-major bits packed MSB-first with zero padding in the last
//! byte. The text form is standard base64 of the packed bytes.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use super::hash::HashArray;
use super::Fingerprint;
use crate::error::{Result, ScanError};

/// Pack a bit array into its binary layout
pub fn pack(array: &HashArray) -> Result<Vec<u8>> {
    let shape = array.shape();
    let ndim = u8::try_from(shape.len())
        .map_err(|_| ScanError::Encoding(format!("too many dimensions: {}", shape.len())))?;

    let mut out = Vec::with_capacity(1 + 4 * shape.len() + array.len().div_ceil(8));
    out.push(ndim);
    for &dim in shape {
        let dim = u32::try_from(dim).map_err(|_| ScanError::Encoding(format!("dimension too large: {}", dim)))?;
        out.extend_from_slice(&dim.to_le_bytes());
    }
    for chunk in array.bits().chunks(8) {
        let byte = chunk
            .iter()
            .enumerate()
            .fold(0u8, |acc, (i, &bit)| acc | ((bit as u8) << (7 - i)));
        out.push(byte);
    }
    Ok(out)
}

/// Inverse of [`pack`]; rejects truncated or oversized input
pub fn unpack(bytes: &[u8]) -> Result<HashArray> {
    let (&ndim, rest) = bytes
        .split_first()
        .ok_or_else(|| ScanError::Encoding("empty buffer".to_string()))?;

    let header_len = ndim as usize * 4;
    if rest.len() < header_len {
        return Err(ScanError::Encoding(format!(
            "header needs {} bytes, got {}",
            header_len,
            rest.len()
        )));
    }
    let (header, payload) = rest.split_at(header_len);

    let shape: Vec<usize> = header
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]) as usize)
        .collect();
    let count = shape
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| ScanError::Encoding(format!("shape {:?} overflows", shape)))?;

    if payload.len() != count.div_ceil(8) {
        return Err(ScanError::Encoding(format!(
            "shape {:?} needs {} payload bytes, got {}",
            shape,
            count.div_ceil(8),
            payload.len()
        )));
    }

    let bits = (0..count).map(|i| payload[i / 8] & (0x80 >> (i % 8)) != 0).collect();
    HashArray::new(shape, bits)
}

/// Pack and base64-encode
pub fn encode(array: &HashArray) -> Result<String> {
    Ok(STANDARD.encode(pack(array)?))
}

/// Base64-decode and unpack
pub fn decode(text: &str) -> Result<HashArray> {
    unpack(&STANDARD.decode(text.trim())?)
}

/// Text form of a fingerprint, one base64 string per array
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedFingerprint {
    pub phash: String,
    pub dhash: String,
    pub tile_phash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptors: Option<String>,
}

impl Fingerprint {
    pub fn encode(&self) -> Result<EncodedFingerprint> {
        Ok(EncodedFingerprint {
            phash: encode(&self.phash)?,
            dhash: encode(&self.dhash)?,
            tile_phash: encode(&self.tile_phash)?,
            descriptors: self.descriptors.as_ref().map(encode).transpose()?,
        })
    }

    pub fn decode(encoded: &EncodedFingerprint) -> Result<Self> {
        Ok(Self {
            phash: decode(&encoded.phash)?,
            dhash: decode(&encoded.dhash)?,
            tile_phash: decode(&encoded.tile_phash)?,
            descriptors: encoded.descriptors.as_deref().map(decode).transpose()?,
        })
    }
}
