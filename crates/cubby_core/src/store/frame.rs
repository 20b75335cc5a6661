//! Store file frames and their binary encoding.

use crate::error::{CoreError, CoreResult};
use crate::types::TransactionId;

/// Magic bytes opening every frame.
pub const FRAME_MAGIC: [u8; 4] = *b"CBYF";

/// Current frame envelope version.
pub const FRAME_VERSION: u16 = 1;

/// Store format version written into the header frame.
pub const FORMAT_VERSION: (u16, u16) = (1, 0);

/// magic (4) + version (2) + type (1) + length (4)
pub const HEADER_SIZE: usize = 11;

/// Trailing CRC32.
pub const CRC_SIZE: usize = 4;

const OP_CREATE_BUCKET: u8 = 1;
const OP_PUT: u8 = 2;
const OP_DELETE: u8 = 3;

/// Type of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// First frame of every store file.
    Header = 1,
    /// One committed transaction.
    Commit = 2,
}

impl FrameType {
    /// Converts a byte to a frame type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Header),
            2 => Some(Self::Commit),
            _ => None,
        }
    }

    /// Converts the frame type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A single mutation inside a commit frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    /// Create a bucket if it does not exist.
    CreateBucket {
        /// Bucket identifier.
        bucket: String,
    },
    /// Insert or overwrite a key.
    Put {
        /// Bucket identifier.
        bucket: String,
        /// Record key.
        key: Vec<u8>,
        /// Record value.
        value: Vec<u8>,
    },
    /// Remove a key.
    Delete {
        /// Bucket identifier.
        bucket: String,
        /// Record key.
        key: Vec<u8>,
    },
}

impl Op {
    /// Bucket the operation targets.
    #[must_use]
    pub fn bucket(&self) -> &str {
        match self {
            Self::CreateBucket { bucket }
            | Self::Put { bucket, .. }
            | Self::Delete { bucket, .. } => bucket,
        }
    }

    /// Size of the operation inside a commit payload.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        let bucket = 1 + 2 + self.bucket().len();
        match self {
            Self::CreateBucket { .. } => bucket,
            Self::Put { key, value, .. } => bucket + 4 + key.len() + 4 + value.len(),
            Self::Delete { key, .. } => bucket + 4 + key.len(),
        }
    }
}

/// A frame of the store file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// File header.
    Header {
        /// Store format version (major, minor).
        format_version: (u16, u16),
    },
    /// A committed transaction.
    Commit {
        /// Transaction ID.
        txid: TransactionId,
        /// Operations, applied in order.
        ops: Vec<Op>,
    },
}

/// Location of a value relative to the start of its frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueSpan {
    /// Byte offset from the first magic byte of the frame.
    pub offset: u64,
    /// Value length.
    pub len: u32,
}

/// A frame in its on-disk form, plus where each `Put` value landed.
#[derive(Debug)]
pub struct EncodedFrame {
    /// Complete frame bytes, envelope and CRC included.
    pub bytes: Vec<u8>,
    /// One span per operation; `Some` for puts.
    pub value_spans: Vec<Option<ValueSpan>>,
}

impl Frame {
    /// Returns the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Self::Header { .. } => FrameType::Header,
            Self::Commit { .. } => FrameType::Commit,
        }
    }

    /// A header frame for the current format.
    #[must_use]
    pub fn header() -> Self {
        Self::Header {
            format_version: FORMAT_VERSION,
        }
    }

    /// Encodes the frame with its envelope and checksum.
    ///
    /// # Errors
    ///
    /// Returns an error if a bucket name, key, value or the whole payload
    /// exceeds its length field.
    pub fn encode(&self) -> CoreResult<EncodedFrame> {
        let mut buf = Vec::with_capacity(HEADER_SIZE + self.payload_len() + CRC_SIZE);
        let mut value_spans = Vec::new();

        buf.extend_from_slice(&FRAME_MAGIC);
        buf.extend_from_slice(&FRAME_VERSION.to_le_bytes());
        buf.push(self.frame_type().as_byte());
        // Length is patched once the payload is written.
        buf.extend_from_slice(&[0u8; 4]);

        match self {
            Self::Header { format_version } => {
                buf.extend_from_slice(&format_version.0.to_le_bytes());
                buf.extend_from_slice(&format_version.1.to_le_bytes());
            }
            Self::Commit { txid, ops } => {
                buf.extend_from_slice(&txid.as_u64().to_le_bytes());
                let count = u32::try_from(ops.len())
                    .map_err(|_| CoreError::invalid_operation("too many operations in commit"))?;
                buf.extend_from_slice(&count.to_le_bytes());
                for op in ops {
                    value_spans.push(encode_op(op, &mut buf)?);
                }
            }
        }

        let payload_len = u32::try_from(buf.len() - HEADER_SIZE)
            .map_err(|_| CoreError::invalid_operation("frame payload too large"))?;
        buf[7..11].copy_from_slice(&payload_len.to_le_bytes());

        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());

        Ok(EncodedFrame {
            bytes: buf,
            value_spans,
        })
    }

    fn payload_len(&self) -> usize {
        match self {
            Self::Header { .. } => 4,
            Self::Commit { ops, .. } => 12 + ops.iter().map(Op::encoded_len).sum::<usize>(),
        }
    }

    /// Decodes a frame payload.
    ///
    /// `payload_start` is the payload's offset from the frame start and is
    /// used to compute value spans.
    ///
    /// # Errors
    ///
    /// Returns a corruption error if the payload is malformed.
    pub fn decode_payload(
        frame_type: FrameType,
        payload: &[u8],
        payload_start: u64,
    ) -> CoreResult<(Self, Vec<Option<ValueSpan>>)> {
        let mut reader = PayloadReader::new(payload);

        let frame = match frame_type {
            FrameType::Header => {
                let major = reader.u16()?;
                let minor = reader.u16()?;
                (
                    Self::Header {
                        format_version: (major, minor),
                    },
                    Vec::new(),
                )
            }
            FrameType::Commit => {
                let txid = TransactionId::new(reader.u64()?);
                let count = reader.u32()? as usize;
                let mut ops = Vec::with_capacity(count.min(4096));
                let mut spans = Vec::with_capacity(count.min(4096));
                for _ in 0..count {
                    let (op, span) = reader.op(payload_start)?;
                    ops.push(op);
                    spans.push(span);
                }
                (Self::Commit { txid, ops }, spans)
            }
        };

        if !reader.is_empty() {
            return Err(CoreError::corruption("trailing bytes in frame payload"));
        }

        Ok(frame)
    }
}

fn encode_op(op: &Op, buf: &mut Vec<u8>) -> CoreResult<Option<ValueSpan>> {
    let tag = match op {
        Op::CreateBucket { .. } => OP_CREATE_BUCKET,
        Op::Put { .. } => OP_PUT,
        Op::Delete { .. } => OP_DELETE,
    };
    buf.push(tag);

    let bucket = op.bucket().as_bytes();
    let bucket_len = u16::try_from(bucket.len())
        .map_err(|_| CoreError::invalid_operation("bucket name too long"))?;
    buf.extend_from_slice(&bucket_len.to_le_bytes());
    buf.extend_from_slice(bucket);

    match op {
        Op::CreateBucket { .. } => Ok(None),
        Op::Put { key, value, .. } => {
            put_bytes(buf, key, "key")?;
            let len = u32::try_from(value.len())
                .map_err(|_| CoreError::invalid_operation("value too large"))?;
            buf.extend_from_slice(&len.to_le_bytes());
            let offset = buf.len() as u64;
            buf.extend_from_slice(value);
            Ok(Some(ValueSpan { offset, len }))
        }
        Op::Delete { key, .. } => {
            put_bytes(buf, key, "key")?;
            Ok(None)
        }
    }
}

fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8], what: &str) -> CoreResult<()> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| CoreError::invalid_operation(format!("{what} too large")))?;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(bytes);
    Ok(())
}

/// Bounds-checked little-endian reader over a frame payload.
struct PayloadReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos == self.data.len()
    }

    fn take(&mut self, n: usize) -> CoreResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| CoreError::corruption("frame payload ends mid-field"))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> CoreResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> CoreResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> CoreResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> CoreResult<u64> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_le_bytes(arr))
    }

    fn bytes(&mut self) -> CoreResult<Vec<u8>> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn op(&mut self, payload_start: u64) -> CoreResult<(Op, Option<ValueSpan>)> {
        let tag = self.u8()?;
        let bucket_len = self.u16()? as usize;
        let bucket = std::str::from_utf8(self.take(bucket_len)?)
            .map_err(|_| CoreError::corruption("bucket name is not UTF-8"))?
            .to_string();

        match tag {
            OP_CREATE_BUCKET => Ok((Op::CreateBucket { bucket }, None)),
            OP_PUT => {
                let key = self.bytes()?;
                let len = self.u32()?;
                let offset = payload_start + self.pos as u64;
                let value = self.take(len as usize)?.to_vec();
                Ok((Op::Put { bucket, key, value }, Some(ValueSpan { offset, len })))
            }
            OP_DELETE => {
                let key = self.bytes()?;
                Ok((Op::Delete { bucket, key }, None))
            }
            other => Err(CoreError::corruption(format!("unknown operation tag {other}"))),
        }
    }
}
