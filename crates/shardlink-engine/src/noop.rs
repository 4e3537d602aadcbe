use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use crate::error::Result;
use crate::gateway::{EngineGateway, ExecutionRequest, ExecutionStatus};

/// Engine that accepts every block without doing any work.
///
/// Used when the node runs without an external engine configured.
#[derive(Debug, Default)]
pub struct NoopEngine {
    invocations: AtomicU64,
}

impl NoopEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total invocations across all handles.
    pub fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }
}

impl EngineGateway for NoopEngine {
    type Handle = ();

    fn create(&self) -> Result<()> {
        Ok(())
    }

    fn invoke(&self, _handle: &mut (), request: ExecutionRequest) -> Result<ExecutionStatus> {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        debug!(
            shard = request.shard_id,
            block = request.block_id,
            "noop engine accepted block"
        );
        Ok(ExecutionStatus::SUCCESS)
    }
}
