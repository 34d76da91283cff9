use sha2::{Digest, Sha256};

use crate::error::{AnalysisError, Result};

/// Packs the given doubles into a byte buffer, 8 little-endian bytes each.
pub fn pack_doubles(values: &[f64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 8);
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Unpacks a little-endian byte buffer back into doubles.
///
/// The buffer length must be an exact multiple of 8.
pub fn unpack_doubles(bytes: &[u8]) -> Result<Vec<f64>> {
    if bytes.len() % 8 != 0 {
        return Err(AnalysisError::InvalidEncoding(format!(
            "byte length {} is not a multiple of 8",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(8)
        .map(|c| f64::from_le_bytes(c.try_into().unwrap()))
        .collect())
}

/// Packs the given int32 values into a byte buffer, 4 little-endian bytes each.
pub fn pack_ints(values: &[i32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 4);
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Unpacks a little-endian byte buffer back into int32 values.
///
/// The buffer length must be an exact multiple of 4.
pub fn unpack_ints(bytes: &[u8]) -> Result<Vec<i32>> {
    if bytes.len() % 4 != 0 {
        return Err(AnalysisError::InvalidEncoding(format!(
            "byte length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| i32::from_le_bytes(c.try_into().unwrap()))
        .collect())
}

/// SHA-256 of the raw bytes as 64 lowercase hex characters.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
