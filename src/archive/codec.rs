//! Stored-payload decoding: transport encoding, then decompression.

use std::io::Read;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::read::{GzDecoder, ZlibDecoder};

use crate::error::ArchiveError;

/// A `tile_data` value as it comes out of the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredPayload {
    /// Raw binary column
    Blob(Vec<u8>),
    /// Text-safe (base64) encoded column
    Text(String),
}

/// Compression detected from a payload's leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Gzip,
    Zlib,
    None,
}

/// Undo the transport encoding of a stored payload.
pub fn decode_transport(stored: StoredPayload) -> Result<Vec<u8>, ArchiveError> {
    match stored {
        StoredPayload::Blob(bytes) => Ok(bytes),
        StoredPayload::Text(text) => {
            let compact: String = text.split_ascii_whitespace().collect();
            STANDARD
                .decode(compact)
                .map_err(|e| ArchiveError::Query(format!("invalid base64 tile data: {}", e)))
        }
    }
}

pub fn detect_compression(data: &[u8]) -> Compression {
    match data {
        [0x1f, 0x8b, ..] => Compression::Gzip,
        // CMF 0x78 (deflate, 32K window) with a valid FCHECK
        [0x78, flg, ..] if (0x7800u16 | u16::from(*flg)) % 31 == 0 => Compression::Zlib,
        _ => Compression::None,
    }
}

/// Decompress a tile payload. Uncompressed payloads pass through unchanged.
pub fn inflate(data: Vec<u8>) -> Result<Vec<u8>, ArchiveError> {
    let mut out = Vec::with_capacity(data.len() * 4);
    let result = match detect_compression(&data) {
        Compression::Gzip => GzDecoder::new(data.as_slice()).read_to_end(&mut out),
        Compression::Zlib => ZlibDecoder::new(data.as_slice()).read_to_end(&mut out),
        Compression::None => return Ok(data),
    };
    result.map_err(|e| ArchiveError::Query(format!("failed to inflate tile data: {}", e)))?;
    Ok(out)
}
