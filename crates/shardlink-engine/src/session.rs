use std::sync::Arc;

use tracing::debug;

use crate::error::{EngineError, Result};
use crate::gateway::{EngineGateway, ExecutionRequest, ExecutionStatus};

/// Scoped ownership of one engine handle.
///
/// The handle is created by [`EngineSession::open`] and released through
/// [`EngineGateway::release`] exactly once, when the session is dropped.
pub struct EngineSession<G: EngineGateway> {
    gateway: Arc<G>,
    handle: Option<G::Handle>,
}

impl<G: EngineGateway> EngineSession<G> {
    /// Create a new engine handle.
    pub fn open(gateway: Arc<G>) -> Result<Self> {
        let handle = gateway.create()?;
        debug!("engine session opened");
        Ok(Self {
            gateway,
            handle: Some(handle),
        })
    }

    /// Invoke the engine (blocking).
    pub fn invoke(&mut self, request: ExecutionRequest) -> Result<ExecutionStatus> {
        let handle = self
            .handle
            .as_mut()
            .ok_or_else(|| EngineError::Invoke("engine session already released".to_string()))?;
        self.gateway.invoke(handle, request)
    }
}

impl<G: EngineGateway> Drop for EngineSession<G> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.gateway.release(handle);
            debug!("engine session released");
        }
    }
}

impl<G: EngineGateway> std::fmt::Debug for EngineSession<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineSession")
            .field("open", &self.handle.is_some())
            .finish()
    }
}
