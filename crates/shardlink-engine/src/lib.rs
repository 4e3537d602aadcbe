//! Gateway to the external execution engine.
//!
//! The engine is an opaque, synchronous service: it is created once per
//! connection and invoked with a shard id and block id, answering with a status
//! code. This crate defines that contract ([`EngineGateway`]), a scoped owner for
//! engine handles ([`EngineSession`]), and the engines shipped with the node.

pub mod command;
pub mod error;
pub mod gateway;
pub mod noop;
pub mod session;

pub use command::{CommandEngine, CommandRunner};
pub use error::{EngineError, Result};
pub use gateway::{EngineGateway, ExecutionRequest, ExecutionStatus};
pub use noop::NoopEngine;
pub use session::EngineSession;
