use std::net::SocketAddr;
use std::time::Duration;

/// Errors parsing peer ids and multiaddrs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddrError {
    /// The peer id is not valid base58 or has the wrong length.
    #[error("invalid peer id '{0}'")]
    InvalidPeerId(String),

    /// The multiaddr does not start with '/'.
    #[error("multiaddr must start with '/': '{0}'")]
    MissingLeadingSlash(String),

    /// A protocol name is not supported.
    #[error("unsupported multiaddr protocol '{0}'")]
    UnknownProtocol(String),

    /// A protocol is missing its value.
    #[error("multiaddr protocol '{0}' is missing a value")]
    MissingValue(String),

    /// A protocol value failed to parse.
    #[error("invalid value '{value}' for multiaddr protocol '{protocol}'")]
    InvalidValue { protocol: String, value: String },

    /// The address has no host and tcp components to dial.
    #[error("multiaddr '{0}' has no dialable host/tcp pair")]
    NotDialable(String),
}

/// Errors creating the local host. Fatal to the process.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    /// Failed to bind the listening socket.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// The bound socket did not report its local address.
    #[error("failed to read listener address: {0}")]
    LocalAddr(std::io::Error),
}

/// Errors during protocol negotiation at stream open.
#[derive(Debug, thiserror::Error)]
pub enum NegotiationError {
    /// I/O error on the underlying stream.
    #[error("negotiation I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed negotiation message.
    #[error("negotiation message is not valid json: {0}")]
    Json(#[from] serde_json::Error),

    /// Negotiation message exceeds the configured cap.
    #[error("negotiation payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// Inbound stream asked for a protocol without a handler.
    #[error("unsupported protocol '{0}'")]
    Unsupported(String),

    /// The remote side refused the stream.
    #[error("remote rejected stream: {0}")]
    Rejected(String),

    /// The remote answered for a different protocol.
    #[error("protocol mismatch (expected '{expected}', got '{actual}')")]
    ProtocolMismatch { expected: String, actual: String },

    /// The remote public key could not be decoded.
    #[error("invalid public key: {0}")]
    InvalidKey(String),

    /// The remote signature over the challenge does not verify.
    #[error("remote signature does not verify")]
    BadSignature,

    /// The remote identity is not the one expected.
    #[error("peer id mismatch (expected {expected}, got {actual})")]
    PeerIdMismatch { expected: String, actual: String },

    /// Negotiation did not finish in time.
    #[error("negotiation timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors opening an outbound stream. Fatal for that dial attempt.
#[derive(Debug, thiserror::Error)]
pub enum DialError {
    /// The destination is not a valid multiaddr.
    #[error("invalid destination address: {0}")]
    InvalidAddress(#[from] AddrError),

    /// The destination has no `/p2p/<peer-id>` component.
    #[error("destination address has no /p2p/<peer-id> component")]
    MissingPeerId,

    /// The address book has no address for the peer.
    #[error("no known addresses for peer {0}")]
    NoAddresses(String),

    /// Every known address failed to connect.
    #[error("peer {peer} unreachable: {source}")]
    Unreachable {
        peer: String,
        source: std::io::Error,
    },

    /// Connecting took longer than the connect timeout.
    #[error("connecting to peer {peer} timed out after {timeout:?}")]
    Timeout { peer: String, timeout: Duration },

    /// Protocol negotiation failed.
    #[error("protocol negotiation failed: {0}")]
    Negotiation(NegotiationError),

    /// The remote proved a different identity than the one dialed.
    #[error("dialed peer {expected} but connected to {actual}")]
    PeerIdMismatch { expected: String, actual: String },
}

impl From<NegotiationError> for DialError {
    fn from(err: NegotiationError) -> Self {
        match err {
            NegotiationError::PeerIdMismatch { expected, actual } => {
                DialError::PeerIdMismatch { expected, actual }
            }
            other => DialError::Negotiation(other),
        }
    }
}
