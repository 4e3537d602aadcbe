use std::io;

use shardlink_peer::{BootstrapError, DialError, NegotiationError, WriterCloseReason, WriterReport};

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

/// A failure reported as `error: <message>` with `code` as the exit status.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

fn io_code(err: &io::Error) -> i32 {
    match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::AddrInUse | io::ErrorKind::AddrNotAvailable => FAILURE,
        _ => INTERNAL,
    }
}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    CliError::new(io_code(&err), format!("{context}: {err}"))
}

pub fn bootstrap_error(context: &str, err: BootstrapError) -> CliError {
    let code = match &err {
        BootstrapError::Bind { source, .. } | BootstrapError::LocalAddr(source) => io_code(source),
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn dial_error(context: &str, err: DialError) -> CliError {
    let code = match &err {
        DialError::InvalidAddress(_) | DialError::MissingPeerId => USAGE,
        DialError::Timeout { .. } | DialError::Negotiation(NegotiationError::Timeout(_)) => TIMEOUT,
        DialError::Unreachable { source, .. }
            if source.kind() == io::ErrorKind::PermissionDenied =>
        {
            PERMISSION_DENIED
        }
        DialError::NoAddresses(_)
        | DialError::Unreachable { .. }
        | DialError::Negotiation(_)
        | DialError::PeerIdMismatch { .. } => TRANSPORT_ERROR,
    };
    CliError::new(code, format!("{context}: {err}"))
}

/// Exit code for a finished writer.
pub fn writer_outcome(report: WriterReport) -> CliResult<i32> {
    match report.reason {
        WriterCloseReason::InputClosed | WriterCloseReason::Cancelled => Ok(SUCCESS),
        WriterCloseReason::WriteError(err) => Err(CliError::new(
            TRANSPORT_ERROR,
            format!("stream failed after {} frames: {err}", report.frames_sent),
        )),
        WriterCloseReason::Aborted => Err(CliError::new(
            INTERNAL,
            format!("writer aborted after {} frames", report.frames_sent),
        )),
    }
}
