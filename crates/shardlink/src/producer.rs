use std::time::Duration;

use shardlink_frame::Frame;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Consecutive blocks of one shard, starting at `start_block`.
///
/// Ends after `count` frames, or when the block id would overflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSequence {
    shard_id: u64,
    next_block: Option<u64>,
    remaining: Option<u64>,
}

impl BlockSequence {
    pub fn new(shard_id: u64, start_block: u64, count: Option<u64>) -> Self {
        Self {
            shard_id,
            next_block: Some(start_block),
            remaining: count,
        }
    }
}

impl Iterator for BlockSequence {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        if self.remaining == Some(0) {
            return None;
        }
        let block = self.next_block?;
        self.next_block = block.checked_add(1);
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= 1;
        }
        Some(Frame::new(self.shard_id, block))
    }
}

/// Push `sequence` into the writer's channel, waiting `interval` between frames.
///
/// A full channel suspends the producer. Stops early when the writer hangs up
/// or `cancel` fires. Returns the number of frames queued.
pub async fn feed(
    sequence: BlockSequence,
    frames: mpsc::Sender<Frame>,
    interval: Option<Duration>,
    cancel: CancellationToken,
) -> u64 {
    let mut queued = 0u64;
    for frame in sequence {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            sent = frames.send(frame) => {
                if sent.is_err() {
                    debug!(queued, "writer closed, producer stopping");
                    break;
                }
            }
        }
        queued += 1;

        if let Some(interval) = interval {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }
    debug!(queued, "producer finished");
    queued
}
