use std::fmt;

use shardlink_frame::Frame;

use crate::error::Result;

/// Arguments for one engine invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub shard_id: u64,
    pub block_id: u64,
}

impl From<Frame> for ExecutionRequest {
    fn from(frame: Frame) -> Self {
        Self {
            shard_id: frame.shard_id,
            block_id: frame.block_id,
        }
    }
}

/// Status code returned by the engine. Zero is success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionStatus(pub i32);

impl ExecutionStatus {
    pub const SUCCESS: ExecutionStatus = ExecutionStatus(0);

    pub fn is_success(self) -> bool {
        self.0 == 0
    }

    pub fn code(self) -> i32 {
        self.0
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Contract with the external execution engine.
///
/// `invoke` is synchronous and may block for as long as the engine needs;
/// async callers must move it onto a blocking thread. The gateway performs no
/// retries and imposes no deadline.
pub trait EngineGateway: Send + Sync + 'static {
    /// One instantiated engine runner. Never shared between connections.
    type Handle: Send + 'static;

    /// Instantiate a runner.
    fn create(&self) -> Result<Self::Handle>;

    /// Run one request on `handle`.
    fn invoke(&self, handle: &mut Self::Handle, request: ExecutionRequest)
        -> Result<ExecutionStatus>;

    /// Release a runner. The default drops it.
    fn release(&self, handle: Self::Handle) {
        drop(handle);
    }

    /// Ask in-flight and later invocations to stop early. Called once on
    /// shutdown, from a thread other than the invoking ones. The default does
    /// nothing.
    fn interrupt(&self) {}
}
