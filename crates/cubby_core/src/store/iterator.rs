//! Sequential frame reader used by recovery, verification and compaction stats.
//!
//! ## Recovery Policy
//!
//! Conditions treated as a **torn tail** (clean end of file, the caller may
//! truncate at [`FrameIterator::valid_end`]):
//!
//! - fewer than a full envelope header left at the end of the file
//! - a length field pointing past the end of the file
//! - a checksum mismatch in the final frame
//! - nothing but zero bytes from the current position to the end
//!
//! These are what an interrupted append leaves behind. Everything else
//! (bad magic followed by data, unknown frame type, future version, checksum
//! mismatch with more frames after it) is corruption and is returned as an
//! error.

use crate::error::{CoreError, CoreResult};
use crate::store::frame::{
    Frame, FrameType, ValueSpan, CRC_SIZE, FRAME_MAGIC, FRAME_VERSION, HEADER_SIZE,
};
use cubby_storage::StorageBackend;

/// Largest tail inspected when deciding whether it is zero fill.
const ZERO_TAIL_SCAN_LIMIT: u64 = 1024 * 1024;

/// A decoded frame and where it sits in the file.
#[derive(Debug)]
pub struct FrameEntry {
    /// Offset of the frame's first byte.
    pub offset: u64,
    /// Total frame length including envelope and CRC.
    pub len: u64,
    /// The decoded frame.
    pub frame: Frame,
    /// Value spans relative to `offset`, one per commit operation.
    pub value_spans: Vec<Option<ValueSpan>>,
}

/// Reads frames one by one from a backend.
pub struct FrameIterator<'a> {
    backend: &'a dyn StorageBackend,
    total_size: u64,
    offset: u64,
    torn_at: Option<u64>,
    finished: bool,
}

impl<'a> FrameIterator<'a> {
    /// Creates an iterator starting at the beginning of the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend size cannot be determined.
    pub fn new(backend: &'a dyn StorageBackend) -> CoreResult<Self> {
        Ok(Self {
            total_size: backend.size()?,
            backend,
            offset: 0,
            torn_at: None,
            finished: false,
        })
    }

    /// Offset just past the last valid frame read so far.
    #[must_use]
    pub fn valid_end(&self) -> u64 {
        self.offset
    }

    /// Offset of a torn tail, once one has been hit.
    #[must_use]
    pub fn torn_tail(&self) -> Option<u64> {
        self.torn_at
    }

    fn mark_torn(&mut self) -> CoreResult<Option<FrameEntry>> {
        self.torn_at = Some(self.offset);
        self.finished = true;
        Ok(None)
    }

    fn fail(&mut self, err: CoreError) -> CoreResult<Option<FrameEntry>> {
        self.finished = true;
        Err(err)
    }

    fn is_zero_tail(&self) -> CoreResult<bool> {
        let remaining = self.total_size - self.offset;
        if remaining > ZERO_TAIL_SCAN_LIMIT {
            return Ok(false);
        }
        let tail = self.backend.read_at(self.offset, remaining as usize)?;
        Ok(tail.iter().all(|&b| b == 0))
    }

    fn read_next(&mut self) -> CoreResult<Option<FrameEntry>> {
        if self.finished || self.offset == self.total_size {
            self.finished = true;
            return Ok(None);
        }

        let start = self.offset;
        let remaining = self.total_size - start;
        if remaining < HEADER_SIZE as u64 {
            return self.mark_torn();
        }

        let header = self.backend.read_at(start, HEADER_SIZE)?;
        if header[0..4] != FRAME_MAGIC {
            if self.is_zero_tail()? {
                return self.mark_torn();
            }
            return self.fail(CoreError::corruption(format!(
                "invalid magic at offset {start}"
            )));
        }

        let version = u16::from_le_bytes([header[4], header[5]]);
        if version > FRAME_VERSION {
            return self.fail(CoreError::corruption(format!(
                "unsupported frame version {version} at offset {start}"
            )));
        }

        let Some(frame_type) = FrameType::from_byte(header[6]) else {
            let byte = header[6];
            return self.fail(CoreError::corruption(format!(
                "unknown frame type {byte} at offset {start}"
            )));
        };

        let payload_len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as u64;
        let frame_len = HEADER_SIZE as u64 + payload_len + CRC_SIZE as u64;
        if frame_len > remaining {
            return self.mark_torn();
        }

        let body = self
            .backend
            .read_at(start + HEADER_SIZE as u64, payload_len as usize + CRC_SIZE)?;
        let (payload, crc_bytes) = body.split_at(payload_len as usize);
        let expected = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&header);
        hasher.update(payload);
        let actual = hasher.finalize();

        if actual != expected {
            if start + frame_len == self.total_size {
                return self.mark_torn();
            }
            return self.fail(CoreError::ChecksumMismatch {
                offset: start,
                expected,
                actual,
            });
        }

        let (frame, value_spans) =
            match Frame::decode_payload(frame_type, payload, HEADER_SIZE as u64) {
                Ok(decoded) => decoded,
                Err(e) => return self.fail(e),
            };

        self.offset = start + frame_len;
        Ok(Some(FrameEntry {
            offset: start,
            len: frame_len,
            frame,
            value_spans,
        }))
    }
}

impl Iterator for FrameIterator<'_> {
    type Item = CoreResult<FrameEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_next().transpose()
    }
}
