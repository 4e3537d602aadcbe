use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::SinkExt;
use shardlink_frame::{Frame, FrameCodec, FrameError};
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Frames flushed to the wire, shared with whoever observes progress.
#[derive(Debug, Clone, Default)]
pub struct FrameCounter(Arc<AtomicU64>);

impl FrameCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
}

/// Why a writer loop stopped.
#[derive(Debug)]
pub enum WriterCloseReason {
    /// The frame source was exhausted and the stream was closed.
    InputClosed,
    /// The node is shutting down.
    Cancelled,
    /// Encoding, writing or flushing failed.
    WriteError(FrameError),
    /// The writer task ended without reporting, e.g. it panicked.
    Aborted,
}

impl WriterCloseReason {
    pub fn is_clean(&self) -> bool {
        matches!(
            self,
            WriterCloseReason::InputClosed | WriterCloseReason::Cancelled
        )
    }
}

/// Outcome of one writer loop.
#[derive(Debug)]
pub struct WriterReport {
    pub frames_sent: u64,
    pub reason: WriterCloseReason,
}

/// Encode each frame from `frames` onto `io`, flushing after every frame.
///
/// The counter is bumped only after a frame has been flushed; it may be shared
/// with other writers, and the report counts only this loop's frames. A full
/// channel or a slow remote stalls the producer; frames are never dropped.
pub async fn run_writer<W>(
    io: W,
    mut frames: mpsc::Receiver<Frame>,
    counter: FrameCounter,
    cancel: CancellationToken,
) -> WriterReport
where
    W: AsyncWrite + Unpin,
{
    let mut sink = FramedWrite::new(io, FrameCodec);
    let mut sent = 0u64;

    let reason = loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => break WriterCloseReason::Cancelled,
            frame = frames.recv() => frame,
        };
        let Some(frame) = frame else {
            break WriterCloseReason::InputClosed;
        };

        let flushed = tokio::select! {
            biased;
            _ = cancel.cancelled() => break WriterCloseReason::Cancelled,
            flushed = sink.send(frame) => flushed,
        };
        if let Err(err) = flushed {
            break WriterCloseReason::WriteError(err);
        }
        sent += 1;
        counter.increment();
        debug!(frames = sent, shard = frame.shard_id, block = frame.block_id, "frame sent");
    };

    if reason.is_clean() {
        if let Err(err) = sink.close().await {
            debug!(error = %err, "closing stream failed");
        }
    }

    match &reason {
        WriterCloseReason::WriteError(err) => {
            warn!(frames = sent, error = %err, "write failed, closing stream")
        }
        _ => info!(frames = sent, reason = ?reason, "writer finished"),
    }

    WriterReport {
        frames_sent: sent,
        reason,
    }
}
