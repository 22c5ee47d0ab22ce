//! Vlog record format shared by the writer and reader.
//!
//! A vlog file is a raw stream of framed records with no block boundaries,
//! record types, or padding:
//!
//! ```text
//! +----------------+-------------+--- ... ---+
//! | CRC masked (4B)| Length (3B) | Payload   |
//! +----------------+-------------+--- ... ---+
//! ```
//!
//! Where:
//! - CRC = masked 32-bit CRC of the payload (little-endian)
//! - Length = payload byte length (little-endian), so payloads are bounded
//!   to 2^24 - 1 bytes
//! - Payload = opaque byte stream of the specified length
//!
//! Sequential readers still buffer in `BLOCK_SIZE` units; the block size is
//! an I/O granularity only and leaves no trace in the file format.

use crc32fast::Hasher;

use crate::error::{Error, Result};

/// Size of the per-record frame header: CRC (4 bytes) + length (3 bytes).
pub const VLOG_HEADER_SIZE: usize = 7;

/// Buffering granularity for sequential scans (32KB).
pub const BLOCK_SIZE: usize = 32 * 1024;

/// Largest payload a 3-byte length field can describe.
pub const MAX_PAYLOAD_SIZE: usize = (1 << 24) - 1;

const MASK_DELTA: u32 = 0xa282_ead8;

/// Returns a masked representation of `crc` for storage.
///
/// Motivation taken from the LSM's log format: computing the CRC of a string
/// that already contains embedded CRCs is problematic, so stored CRCs are
/// rotated and offset.
pub fn mask_crc(crc: u32) -> u32 {
    ((crc >> 15) | (crc << 17)).wrapping_add(MASK_DELTA)
}

/// Inverse of [`mask_crc`].
pub fn unmask_crc(masked: u32) -> u32 {
    let rot = masked.wrapping_sub(MASK_DELTA);
    (rot << 15) | (rot >> 17)
}

/// Computes the CRC of a payload.
pub fn checksum(payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(payload);
    hasher.finalize()
}

/// Builds the 7-byte frame header for a payload.
///
/// Fails with `InvalidArgument` if the payload does not fit a 3-byte length.
pub fn encode_header(payload: &[u8]) -> Result<[u8; VLOG_HEADER_SIZE]> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(Error::InvalidArgument(format!(
            "payload of {} bytes exceeds the {} byte record limit",
            payload.len(),
            MAX_PAYLOAD_SIZE
        )));
    }

    let mut header = [0u8; VLOG_HEADER_SIZE];
    let masked = mask_crc(checksum(payload));
    header[..4].copy_from_slice(&masked.to_le_bytes());
    header[4] = payload.len() as u8;
    header[5] = (payload.len() >> 8) as u8;
    header[6] = (payload.len() >> 16) as u8;
    Ok(header)
}

/// Parses a frame header into `(expected_crc, payload_length)`.
pub fn parse_header(header: &[u8]) -> (u32, usize) {
    let masked = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let length =
        header[4] as usize | (header[5] as usize) << 8 | (header[6] as usize) << 16;
    (unmask_crc(masked), length)
}

/// Encodes a payload into a complete frame.
pub fn encode_record(payload: &[u8]) -> Result<Vec<u8>> {
    let header = encode_header(payload)?;
    let mut frame = Vec::with_capacity(VLOG_HEADER_SIZE + payload.len());
    frame.extend_from_slice(&header);
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Decodes one frame, returning the payload slice.
///
/// Reports `Corruption` for a short frame, a length that overruns the input,
/// or (when `verify_checksum` is set) a CRC mismatch.
pub fn decode_record(frame: &[u8], verify_checksum: bool) -> Result<&[u8]> {
    if frame.len() < VLOG_HEADER_SIZE {
        return Err(Error::Corruption(format!(
            "frame of {} bytes is shorter than the record header",
            frame.len()
        )));
    }

    let (expected_crc, length) = parse_header(frame);
    if length > frame.len() - VLOG_HEADER_SIZE {
        return Err(Error::Corruption(format!(
            "record length {} exceeds the {} available bytes",
            length,
            frame.len() - VLOG_HEADER_SIZE
        )));
    }

    let payload = &frame[VLOG_HEADER_SIZE..VLOG_HEADER_SIZE + length];
    if verify_checksum {
        let actual_crc = checksum(payload);
        if actual_crc != expected_crc {
            return Err(Error::Corruption(format!(
                "checksum mismatch: expected {expected_crc}, got {actual_crc}"
            )));
        }
    }

    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_roundtrip() {
        for crc in [0u32, 1, 0xdead_beef, u32::MAX] {
            assert_eq!(unmask_crc(mask_crc(crc)), crc);
            // Masking should visibly change the value
            assert_ne!(mask_crc(crc), crc);
        }
    }

    #[test]
    fn test_record_roundtrip() {
        for payload in [&b""[..], b"foo", &[0xab; 5000]] {
            let frame = encode_record(payload).unwrap();
            assert_eq!(frame.len(), VLOG_HEADER_SIZE + payload.len());
            assert_eq!(decode_record(&frame, true).unwrap(), payload);
        }
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let payload = vec![0u8; MAX_PAYLOAD_SIZE + 1];
        assert!(matches!(
            encode_header(&payload),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_corrupt_payload_detected() {
        let mut frame = encode_record(b"some payload").unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0x01;
        assert!(matches!(
            decode_record(&frame, true),
            Err(Error::Corruption(_))
        ));
        // Verification disabled: the flipped byte goes unnoticed
        assert!(decode_record(&frame, false).is_ok());
    }

    #[test]
    fn test_overlong_length_detected() {
        let mut frame = encode_record(b"abc").unwrap();
        frame[4] = 0xff;
        assert!(matches!(
            decode_record(&frame, true),
            Err(Error::Corruption(_))
        ));
    }
}
