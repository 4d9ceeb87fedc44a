//! Journal frame encoding.
//!
//! ```text
//! | len (4, LE) | crc32 (4, LE) | CBOR payload (len) |
//! ```
//!
//! The checksum covers the payload only.

use crate::error::{CoreError, CoreResult};

/// Size of the frame header.
pub const FRAME_HEADER_SIZE: usize = 8;

/// Wraps a payload in a frame.
pub fn encode_frame(payload: &[u8]) -> CoreResult<Vec<u8>> {
    let len = u32::try_from(payload.len())
        .map_err(|_| CoreError::journal("journal frame payload too large"))?;
    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&compute_crc32(payload).to_le_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// A complete frame found by [`scan_frames`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame<'a> {
    /// Byte offset of the frame header.
    pub offset: u64,
    /// The frame's payload.
    pub payload: &'a [u8],
}

/// Result of scanning a journal image.
#[derive(Debug)]
pub struct FrameScan<'a> {
    /// Frames that passed their checksum.
    pub frames: Vec<RawFrame<'a>>,
    /// Length of the valid prefix; anything after it is a torn tail.
    pub valid_len: u64,
}

impl FrameScan<'_> {
    /// Returns true if the image ends with an incomplete frame.
    #[must_use]
    pub fn has_torn_tail(&self, total_len: usize) -> bool {
        self.valid_len < total_len as u64
    }
}

/// Splits a journal image into frames.
///
/// A short header, a short payload, or a checksum mismatch in the final
/// frame is a torn write and ends the scan. A checksum mismatch followed
/// by more data is corruption.
pub fn scan_frames(bytes: &[u8]) -> CoreResult<FrameScan<'_>> {
    let mut frames = Vec::new();
    let mut offset = 0usize;

    while offset < bytes.len() {
        let Some(header) = bytes.get(offset..offset + FRAME_HEADER_SIZE) else {
            break;
        };
        let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let stored_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

        let start = offset + FRAME_HEADER_SIZE;
        let Some(payload) = start.checked_add(len).and_then(|end| bytes.get(start..end)) else {
            break;
        };
        let end = start + len;

        let actual_crc = compute_crc32(payload);
        if actual_crc != stored_crc {
            if end == bytes.len() {
                break;
            }
            return Err(CoreError::journal_corruption(
                offset as u64,
                format!("checksum mismatch: expected {stored_crc:08x}, got {actual_crc:08x}"),
            ));
        }

        frames.push(RawFrame {
            offset: offset as u64,
            payload,
        });
        offset = end;
    }

    Ok(FrameScan {
        frames,
        valid_len: offset as u64,
    })
}

/// Computes the CRC32 (IEEE) checksum of `data`.
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut bit = 0;
            while bit < 8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ 0xEDB8_8320
                } else {
                    crc >> 1
                };
                bit += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        crc = (crc >> 8) ^ TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize];
    }
    !crc
}
