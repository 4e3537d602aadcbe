//! Fixed-width work frames for shardlink.
//!
//! Every frame on the wire is exactly 16 bytes:
//! - An 8-byte big-endian shard id
//! - An 8-byte big-endian block id
//!
//! There is no length prefix, delimiter, or checksum. A stream that ends in the
//! middle of a frame is a framing error.

pub mod codec;
pub mod error;

pub use codec::{decode_frame, encode_frame, Frame, FrameCodec, FRAME_SIZE};
pub use error::{FrameError, Result};
