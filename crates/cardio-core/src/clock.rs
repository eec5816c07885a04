use async_trait::async_trait;
use std::time::Duration;

/// Source of monotonic time and delay for the polling paths.
///
/// Kept behind a trait so tests can drive the engine on virtual time.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Time since an arbitrary fixed epoch.
    fn monotonic(&self) -> Duration;

    /// Suspend the calling task for at least `duration`.
    async fn sleep(&self, duration: Duration);
}
