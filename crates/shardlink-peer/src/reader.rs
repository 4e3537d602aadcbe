use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use shardlink_engine::{EngineError, EngineGateway, EngineSession, ExecutionStatus};
use shardlink_frame::{Frame, FrameCodec, FrameError};
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Deadlines applied by the reader loop.
#[derive(Debug, Clone, Default)]
pub struct ReaderConfig {
    /// Maximum idle time waiting for the next frame. `None` waits forever.
    pub read_timeout: Option<Duration>,
    /// Maximum time for one engine invocation. `None` waits forever.
    pub invoke_timeout: Option<Duration>,
}

/// Why a reader loop closed its connection.
#[derive(Debug)]
pub enum CloseReason {
    /// The remote closed the stream on a frame boundary.
    Eof,
    /// A short or unreadable frame.
    DecodeError(FrameError),
    /// The engine returned a non-zero status for `frame`.
    EngineFailure {
        frame: Frame,
        status: ExecutionStatus,
    },
    /// The engine could not run the invocation.
    EngineError(EngineError),
    /// The engine could not be created for this connection.
    EngineUnavailable(EngineError),
    /// No frame arrived within the read timeout.
    ReadTimeout(Duration),
    /// The node is shutting down.
    Cancelled,
}

impl CloseReason {
    /// EOF and cancellation are normal closes; everything else is a failure.
    pub fn is_clean(&self) -> bool {
        matches!(self, CloseReason::Eof | CloseReason::Cancelled)
    }
}

/// Outcome of one reader loop.
#[derive(Debug)]
pub struct ReaderReport {
    /// Frames handed to the engine, including a failing one.
    pub frames_processed: u64,
    pub reason: CloseReason,
}

/// Drive one inbound connection: decode frames and invoke the engine for each.
///
/// An engine session is opened before the first read and released on every
/// exit path. Frames are processed one at a time in arrival order; the first
/// decode error, engine failure, timeout or cancellation closes the stream.
/// Nothing is written back to the remote.
pub async fn run_reader<R, G>(
    io: R,
    gateway: Arc<G>,
    config: &ReaderConfig,
    cancel: CancellationToken,
) -> ReaderReport
where
    R: AsyncRead + Unpin,
    G: EngineGateway,
{
    let mut session = match tokio::task::spawn_blocking(move || EngineSession::open(gateway)).await
    {
        Ok(Ok(session)) => session,
        Ok(Err(err)) => return close(0, CloseReason::EngineUnavailable(err)),
        Err(_) => return close(0, CloseReason::EngineUnavailable(EngineError::Panicked)),
    };

    let mut frames = FramedRead::new(io, FrameCodec);
    let mut processed = 0u64;

    let reason = loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break CloseReason::Cancelled,
            next = next_frame(&mut frames, config.read_timeout) => next,
        };

        let frame = match next {
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(err))) => break CloseReason::DecodeError(err),
            Ok(None) => break CloseReason::Eof,
            Err(limit) => break CloseReason::ReadTimeout(limit),
        };
        debug!(shard = frame.shard_id, block = frame.block_id, "frame received");

        let (returned, result) = invoke_blocking(session, frame, config.invoke_timeout).await;
        processed += 1;
        match (returned, result) {
            (Some(returned), Ok(status)) if status.is_success() => session = returned,
            (_, Ok(status)) => break CloseReason::EngineFailure { frame, status },
            (_, Err(err)) => break CloseReason::EngineError(err),
        }
    };

    close(processed, reason)
}

async fn next_frame<R: AsyncRead + Unpin>(
    frames: &mut FramedRead<R, FrameCodec>,
    read_timeout: Option<Duration>,
) -> Result<Option<Result<Frame, FrameError>>, Duration> {
    match read_timeout {
        Some(limit) => tokio::time::timeout(limit, frames.next())
            .await
            .map_err(|_| limit),
        None => Ok(frames.next().await),
    }
}

/// Run one invocation on the blocking pool.
///
/// The session comes back unless the call timed out or panicked; in those
/// cases it is released on the blocking thread once the call returns.
async fn invoke_blocking<G: EngineGateway>(
    mut session: EngineSession<G>,
    frame: Frame,
    deadline: Option<Duration>,
) -> (Option<EngineSession<G>>, Result<ExecutionStatus, EngineError>) {
    let task = tokio::task::spawn_blocking(move || {
        let result = session.invoke(frame.into());
        (session, result)
    });

    let joined = match deadline {
        Some(limit) => match tokio::time::timeout(limit, task).await {
            Ok(joined) => joined,
            Err(_) => return (None, Err(EngineError::Timeout(limit))),
        },
        None => task.await,
    };

    match joined {
        Ok((session, result)) => (Some(session), result),
        Err(_) => (None, Err(EngineError::Panicked)),
    }
}

fn close(frames_processed: u64, reason: CloseReason) -> ReaderReport {
    match &reason {
        CloseReason::Eof => info!(frames = frames_processed, "stream closed by remote"),
        CloseReason::Cancelled => info!(frames = frames_processed, "stream closed on shutdown"),
        CloseReason::DecodeError(err) => {
            warn!(frames = frames_processed, error = %err, "closing stream on framing error")
        }
        CloseReason::EngineFailure { frame, status } => warn!(
            frames = frames_processed,
            shard = frame.shard_id,
            block = frame.block_id,
            %status,
            "engine run failed, closing stream"
        ),
        CloseReason::EngineError(err) => {
            warn!(frames = frames_processed, error = %err, "engine error, closing stream")
        }
        CloseReason::EngineUnavailable(err) => {
            warn!(error = %err, "engine could not be created, closing stream")
        }
        CloseReason::ReadTimeout(limit) => {
            warn!(frames = frames_processed, ?limit, "no frame within read timeout")
        }
    }
    ReaderReport {
        frames_processed,
        reason,
    }
}
