use async_trait::async_trait;

use crate::{
    error::BackendError,
    types::{BackendState, HvacMode},
};

/// Capability surface the coordinator needs from the physical backends.
///
/// Command methods resolve once the backend has accepted the command. There is
/// no timeout; a stalled command stalls the operation that issued it.
#[async_trait]
pub trait BackendPort: Send + Sync {
    async fn set_mode(&self, backend_id: &str, mode: HvacMode) -> Result<(), BackendError>;

    async fn set_temperature(&self, backend_id: &str, value: f32) -> Result<(), BackendError>;

    async fn set_fan_mode(&self, backend_id: &str, fan_mode: &str) -> Result<(), BackendError>;

    /// Last known state of a backend, `None` if it has never reported.
    fn read_state(&self, backend_id: &str) -> Option<BackendState>;

    /// Start delivering change notifications for a backend.
    async fn subscribe(&self, backend_id: &str) -> Result<(), BackendError>;

    async fn unsubscribe(&self, backend_id: &str) -> Result<(), BackendError>;
}

/// A backend's observable state changed, for whatever reason.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendChange {
    pub backend_id: String,
    pub old: Option<BackendState>,
    pub new: BackendState,
    pub observed_at_ms: u64,
}
