//! Payload decoding: zlib inflation and Intel HEX flattening.

use std::borrow::Cow;
use std::io::Read;

use flate2::read::ZlibDecoder;
use log::{debug, warn};

use crate::error::{ExtractError, Result};

/// zlib stream headers (fastest, best and default compression levels).
pub const ZLIB_HEADERS: [[u8; 2]; 3] = [[0x78, 0x9C], [0x78, 0xDA], [0x78, 0x01]];

/// Leading bytes of an uncompressed FPGA bitstream.
pub const RAW_BITSTREAM_MARKER: [u8; 2] = [0xFF, 0xFF];

/// Largest image an Intel HEX file may expand to.
pub const MAX_HEX_IMAGE: usize = 16 << 20;

/// Largest output a single zlib stream may inflate to.
pub const MAX_INFLATED_SIZE: usize = 16 << 20;

/// Big-endian uncompressed size in front of every zlib stream.
const SIZE_PREFIX: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Zlib,
}

/// A fully decoded leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPayload {
    /// Flat binary image.
    pub bytes: Vec<u8>,
    pub compression: Compression,
    /// The Intel HEX text `bytes` was decoded from, if any.
    pub intel_hex: Option<Vec<u8>>,
}

/// Decodes a raw leaf.
///
/// Flagged leaves are always inflated. Unflagged ones are inflated when a
/// zlib header follows the size prefix, unless they start with
/// [`RAW_BITSTREAM_MARKER`]. Intel HEX text is then flattened into a binary
/// image; anything else is returned unchanged.
pub fn decode(raw: &[u8], compressed: bool) -> Result<DecodedPayload> {
    let compression = if compressed || is_zlib_wrapped(raw) {
        Compression::Zlib
    } else {
        Compression::None
    };

    let inflated = match compression {
        Compression::Zlib => Cow::Owned(inflate(raw)?),
        Compression::None => Cow::Borrowed(raw),
    };

    if is_intel_hex(&inflated) {
        let bytes = decode_intel_hex(&inflated)?;
        return Ok(DecodedPayload {
            bytes,
            compression,
            intel_hex: Some(inflated.into_owned()),
        });
    }

    Ok(DecodedPayload {
        bytes: inflated.into_owned(),
        compression,
        intel_hex: None,
    })
}

/// Whether `raw` looks like `{size: u32, zlib stream}`.
pub fn is_zlib_wrapped(raw: &[u8]) -> bool {
    if raw.starts_with(&RAW_BITSTREAM_MARKER) {
        return false;
    }
    raw.get(SIZE_PREFIX..SIZE_PREFIX + 2)
        .is_some_and(|magic| ZLIB_HEADERS.iter().any(|h| h == magic))
}

/// Inflates a size-prefixed zlib stream.
pub fn inflate(raw: &[u8]) -> Result<Vec<u8>> {
    let stream = raw.get(SIZE_PREFIX..).ok_or_else(|| {
        ExtractError::DecodeFailure("compressed blob shorter than its size prefix".into())
    })?;
    let expected = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize;

    let mut out = Vec::with_capacity(expected.min(MAX_INFLATED_SIZE));
    ZlibDecoder::new(stream)
        .take(MAX_INFLATED_SIZE as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::DecodeFailure(format!("zlib: {e}")))?;

    if out.len() > MAX_INFLATED_SIZE {
        return Err(ExtractError::DecodeFailure(format!(
            "zlib stream inflates past {MAX_INFLATED_SIZE:#X} bytes"
        )));
    }

    if expected != 0 && expected != out.len() {
        warn!("Inflated {:#X} bytes, size prefix says {expected:#X}", out.len());
    }
    Ok(out)
}

/// Whether `data` is plausibly Intel HEX text.
pub fn is_intel_hex(data: &[u8]) -> bool {
    data.first() == Some(&b':') && data.is_ascii()
}

/// Flattens Intel HEX text into a zero-filled binary image.
///
/// Data records are placed at their (extended) address in address order,
/// later records overwriting earlier ones; an end-of-file record stops the
/// parse. Text without any data record is returned unchanged.
pub fn decode_intel_hex(data: &[u8]) -> Result<Vec<u8>> {
    let text = String::from_utf8_lossy(data);
    let mut records: Vec<(usize, Vec<u8>)> = Vec::new();
    let mut base = 0usize;

    for (number, line) in text.split('\n').enumerate() {
        let Some(digits) = line.trim().strip_prefix(':') else {
            continue;
        };

        let record = hex::decode(digits)
            .map_err(|e| ExtractError::DecodeFailure(format!("HEX line {}: {e}", number + 1)))?;
        if record.len() < 4 {
            return Err(ExtractError::DecodeFailure(format!(
                "HEX line {}: record too short",
                number + 1
            )));
        }

        let count = usize::from(record[0]);
        let address = usize::from(u16::from_be_bytes([record[1], record[2]]));
        let kind = record[3];
        if record.len() < 4 + count {
            return Err(ExtractError::DecodeFailure(format!(
                "HEX line {}: {count} data bytes declared, {} present",
                number + 1,
                record.len() - 4
            )));
        }

        let checksum = record.iter().take(5 + count).fold(0u8, |a, b| a.wrapping_add(*b));
        if record.len() > 4 + count && checksum != 0 {
            debug!("HEX line {}: checksum mismatch", number + 1);
        }

        match kind {
            0x00 if count > 0 => records.push((base + address, record[4..4 + count].to_vec())),
            0x01 => break,
            0x02 | 0x04 if count == 2 => {
                let segment = usize::from(u16::from_be_bytes([record[4], record[5]]));
                base = if kind == 0x02 { segment << 4 } else { segment << 16 };
            }
            _ => {}
        }
    }

    if records.is_empty() {
        return Ok(data.to_vec());
    }

    records.sort_by_key(|&(address, _)| address);

    let len = records
        .iter()
        .map(|(address, bytes)| address + bytes.len())
        .max()
        .unwrap_or_default();
    if len > MAX_HEX_IMAGE {
        return Err(ExtractError::DecodeFailure(format!(
            "HEX image of {len:#X} bytes exceeds {MAX_HEX_IMAGE:#X}"
        )));
    }

    let mut image = vec![0u8; len];
    for (address, bytes) in records {
        image[address..address + bytes.len()].copy_from_slice(&bytes);
    }
    Ok(image)
}
