use crate::device::DeviceCaps;
use std::ops::Range;
use std::time::Duration;

/// Slow-command observation thresholds.
#[derive(Clone, Copy, Debug)]
pub struct ProfilingPolicy {
    /// Commands slower than this get a debug log line; `None` disables it.
    pub slow_command: Option<Duration>,
}

impl Default for ProfilingPolicy {
    fn default() -> Self {
        Self {
            slow_command: Some(Duration::from_millis(250)),
        }
    }
}

/// Policy for bringing a suspended bus back before issuing I/O.
#[derive(Clone, Copy, Debug)]
pub struct DeferredResumePolicy {
    pub enabled: bool,
    /// Resume attempts before giving up on the bus.
    pub retries: u32,
}

impl Default for DeferredResumePolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            retries: 3,
        }
    }
}

/// Pre-I/O veto over write requests, e.g. protecting firmware sector
/// windows some vendors reserve. Violations are rejected as invalid input
/// before any transport call.
pub trait WriteGuard: Send + Sync {
    /// Returns a description of the violation, if any.
    fn check(&self, caps: &DeviceCaps, start_sector: u64, block_count: u32) -> Result<(), String>;
}

/// [`WriteGuard`] that rejects writes overlapping reserved sector ranges.
pub struct ReservedRangeGuard {
    ranges: Vec<Range<u64>>,
}

impl ReservedRangeGuard {
    pub fn new(ranges: Vec<Range<u64>>) -> Self {
        Self { ranges }
    }
}

impl WriteGuard for ReservedRangeGuard {
    fn check(&self, _caps: &DeviceCaps, start_sector: u64, block_count: u32) -> Result<(), String> {
        let end = start_sector.saturating_add(u64::from(block_count));
        for range in &self.ranges {
            if start_sector < range.end && end > range.start {
                return Err(format!(
                    "write {start_sector}..{end} overlaps reserved sectors {}..{}",
                    range.start, range.end
                ));
            }
        }
        Ok(())
    }
}

/// Engine construction-time configuration. The policies are orthogonal;
/// each can be swapped without touching the request path.
pub struct EngineConfig {
    pub profiling: ProfilingPolicy,
    pub deferred_resume: DeferredResumePolicy,
    pub write_guard: Option<Box<dyn WriteGuard>>,
    /// Wall-clock budget for the post-write busy poll.
    pub busy_wall_budget: Duration,
    /// Wall-clock budget for the readiness poll after a bus resume.
    pub resume_wall_budget: Duration,
    /// Timeout for status and configuration commands.
    pub control_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            profiling: ProfilingPolicy::default(),
            deferred_resume: DeferredResumePolicy::default(),
            write_guard: None,
            busy_wall_budget: Duration::from_secs(1),
            resume_wall_budget: Duration::from_secs(1),
            control_timeout: Duration::from_millis(100),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_range_guard_rejects_overlap() {
        let guard = ReservedRangeGuard::new(vec![0..131073]);
        let caps = DeviceCaps::default();
        assert!(guard.check(&caps, 131000, 8).is_err());
        assert!(guard.check(&caps, 131073, 8).is_ok());
        assert!(guard.check(&caps, 131072, 1).is_err());
    }

    #[test]
    fn reserved_range_guard_multiple_windows() {
        let guard = ReservedRangeGuard::new(vec![10..20, 40..50]);
        let caps = DeviceCaps::default();
        assert!(guard.check(&caps, 0, 10).is_ok());
        assert!(guard.check(&caps, 20, 20).is_ok());
        assert!(guard.check(&caps, 45, 1).is_err());
    }
}
