use async_trait::async_trait;
use cardio_core::Clock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Virtual monotonic time. Sleeps complete immediately by advancing the
/// clock, so polling loops run their full schedule in microseconds of real
/// time.
#[derive(Clone, Default)]
pub struct SimClock {
    now_ns: Arc<AtomicU64>,
}

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, duration: Duration) {
        let ns = duration.as_nanos().min(u64::MAX as u128) as u64;
        self.now_ns.fetch_add(ns, Ordering::Relaxed);
    }
}

#[async_trait]
impl Clock for SimClock {
    fn monotonic(&self) -> Duration {
        Duration::from_nanos(self.now_ns.load(Ordering::Relaxed))
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    #[test]
    fn sleep_advances_virtual_time() {
        let clock = SimClock::new();
        assert_eq!(clock.monotonic(), Duration::ZERO);
        block_on(clock.sleep(Duration::from_millis(5)));
        assert_eq!(clock.monotonic(), Duration::from_millis(5));
    }
}
