//! Peer-to-peer block streams between shardlink nodes.
//!
//! A [`Host`] owns a node's identity and listening socket. Streams are opened
//! by peer id and negotiated per protocol before any frame is exchanged. A
//! [`Node`] serves [`PROTOCOL_ID`]: inbound streams run a reader that invokes
//! the engine once per frame, outbound streams run a writer that flushes
//! frames from a channel.

pub mod addr;
pub mod address_book;
pub mod error;
pub mod host;
pub mod identity;
pub mod negotiate;
pub mod node;
pub mod reader;
pub mod registry;
pub mod writer;

/// Protocol identifier for block streams.
pub const PROTOCOL_ID: &str = "/node/1.0.0";

pub use addr::{Multiaddr, Protocol};
pub use address_book::AddressBook;
pub use error::{AddrError, BootstrapError, DialError, NegotiationError};
pub use host::{create_host, Connection, Host, HostConfig, StreamHandler, DEFAULT_CONNECT_TIMEOUT};
pub use identity::{Identity, PeerId};
pub use negotiate::{NegotiationConfig, Negotiated};
pub use node::{DialHandle, Node, NodeConfig, DEFAULT_SHUTDOWN_GRACE};
pub use reader::{run_reader, CloseReason, ReaderConfig, ReaderReport};
pub use registry::{ActiveConnection, ConnectionInfo, ConnectionRegistry, Direction};
pub use writer::{run_writer, FrameCounter, WriterCloseReason, WriterReport};
