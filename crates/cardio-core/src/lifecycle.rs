use crate::device::DeviceHandle;
use async_trait::async_trait;
use std::fmt;

/// Error reported by the device-lifecycle collaborator.
#[derive(Clone, Debug)]
pub struct LifecycleError {
    message: String,
}

impl LifecycleError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for LifecycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for LifecycleError {}

/// Device attach/detach collaborator.
///
/// `reinit` and `resume` block until the device is usable again (or not);
/// `remove` only schedules the teardown and must not block the caller.
#[async_trait]
pub trait DeviceLifecycle: Send + Sync {
    /// Re-run device initialization after a recovery decision.
    async fn reinit(&self, device: &DeviceHandle) -> Result<(), LifecycleError>;

    /// Bring the underlying bus back up after a suspend.
    async fn resume(&self, device: &DeviceHandle) -> Result<(), LifecycleError>;

    /// Notify that the device is being taken away. Asynchronous; the engine
    /// has already marked the handle detached when this is called.
    fn remove(&self, device: &DeviceHandle);
}
