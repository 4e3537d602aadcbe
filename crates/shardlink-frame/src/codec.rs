use std::fmt;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{FrameError, Result};

/// Wire size of every frame: shard id (8) + block id (8).
pub const FRAME_SIZE: usize = 16;

/// A unit of work advertised over a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Frame {
    /// Shard the block belongs to.
    pub shard_id: u64,
    /// Block to process within the shard.
    pub block_id: u64,
}

impl Frame {
    /// Create a new frame.
    pub fn new(shard_id: u64, block_id: u64) -> Self {
        Self { shard_id, block_id }
    }

    /// Encode into the fixed wire representation.
    ///
    /// Wire format:
    /// ```text
    /// ┌──────────────────┬──────────────────┐
    /// │ Shard id (8B BE) │ Block id (8B BE) │
    /// └──────────────────┴──────────────────┘
    /// ```
    pub fn encode(&self) -> [u8; FRAME_SIZE] {
        let mut out = [0u8; FRAME_SIZE];
        out[..8].copy_from_slice(&self.shard_id.to_be_bytes());
        out[8..].copy_from_slice(&self.block_id.to_be_bytes());
        out
    }

    /// Decode from the first 16 bytes of `src`.
    ///
    /// Bytes past the first frame are ignored.
    pub fn decode(src: &[u8]) -> Result<Self> {
        if src.len() < FRAME_SIZE {
            return Err(FrameError::ShortFrame {
                received: src.len(),
            });
        }
        let mut shard = [0u8; 8];
        let mut block = [0u8; 8];
        shard.copy_from_slice(&src[..8]);
        block.copy_from_slice(&src[8..FRAME_SIZE]);
        Ok(Self {
            shard_id: u64::from_be_bytes(shard),
            block_id: u64::from_be_bytes(block),
        })
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shard={} block={}", self.shard_id, self.block_id)
    }
}

/// Append a frame to `dst`.
pub fn encode_frame(frame: &Frame, dst: &mut BytesMut) {
    dst.reserve(FRAME_SIZE);
    dst.put_u64(frame.shard_id);
    dst.put_u64(frame.block_id);
}

/// Decode a frame from a buffer.
///
/// Returns `None` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer.
pub fn decode_frame(src: &mut BytesMut) -> Option<Frame> {
    if src.len() < FRAME_SIZE {
        return None;
    }
    let shard_id = src.get_u64();
    let block_id = src.get_u64();
    Some(Frame { shard_id, block_id })
}

/// `tokio_util` codec for [`Frame`] streams.
///
/// A stream ending on a frame boundary is a clean close; a stream ending with
/// 1 to 15 buffered bytes yields [`FrameError::ShortFrame`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        let frame = decode_frame(src);
        if frame.is_none() {
            src.reserve(FRAME_SIZE - src.len());
        }
        Ok(frame)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(FrameError::ShortFrame {
                received: src.len(),
            }),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        encode_frame(&frame, dst);
        Ok(())
    }
}
