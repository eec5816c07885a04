use crate::clock::Clock;
use crate::device::DeviceHandle;
use crate::engine::DeviceClaim;
use crate::exec;
use crate::transport::{CommandTransport, TransportResult};
use cardio_proto::CardState;
use std::time::Duration;
use tracing::{debug, warn};

/// Outcome of a bounded readiness poll.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollVerdict {
    Ready,
    /// The wall budget ran out, but the final status read showed the device
    /// idle and ready; the observed state wins over the clock.
    ReadyAfterTimeout,
    /// The budget ran out with the device still busy.
    NotReadyTimeout,
}

impl PollVerdict {
    pub fn is_ready(self) -> bool {
        matches!(self, PollVerdict::Ready | PollVerdict::ReadyAfterTimeout)
    }
}

/// Poll the device's status until it leaves the busy/programming state.
///
/// Transport failures on the status command itself propagate as errors;
/// the caller treats those as unrecoverable for the request.
pub(crate) async fn wait_ready<T, K>(
    transport: &T,
    clock: &K,
    claim: &DeviceClaim<'_>,
    device: &DeviceHandle,
    wall_budget: Duration,
    control_timeout: Duration,
) -> TransportResult<PollVerdict>
where
    T: CommandTransport,
    K: Clock,
{
    let started = clock.monotonic();
    let mut polls: u32 = 0;
    loop {
        let status = exec::query_status(transport, claim, device, control_timeout).await?;
        let elapsed = clock.monotonic().saturating_sub(started);
        if elapsed >= wall_budget {
            if status.ready_for_data() && matches!(status.state(), Ok(CardState::Transfer)) {
                warn!(polls, "busy timeout but device reports ready");
                return Ok(PollVerdict::ReadyAfterTimeout);
            }
            warn!(polls, %status, "device not ready within budget");
            return Ok(PollVerdict::NotReadyTimeout);
        }
        if status.is_idle_ready() {
            return Ok(PollVerdict::Ready);
        }
        if let Some(delay) = backoff_delay(polls, device.caps().removable) {
            debug!(polls, delay_ms = delay.as_millis() as u64, "busy poll backing off");
            clock.sleep(delay).await;
        }
        polls = polls.saturating_add(1);
    }
}

fn fls(value: u32) -> u32 {
    32 - value.leading_zeros()
}

/// Inter-poll delay as a function of poll count.
///
/// The first couple thousand polls spin on the status command alone; past
/// that, delays grow with the log of the poll count. Non-removable media
/// leave programming state quickly, so sleeping there only adds latency.
pub fn backoff_delay(poll_count: u32, sleepy: bool) -> Option<Duration> {
    const SPIN_BITS: u32 = 11;
    if !sleepy || fls(poll_count) <= SPIN_BITS {
        return None;
    }
    Some(Duration::from_millis(u64::from(fls(poll_count >> SPIN_BITS))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn early_polls_spin() {
        for poll in [0, 1, 100, 2047] {
            assert_eq!(backoff_delay(poll, true), None);
        }
    }

    #[test]
    fn delay_grows_with_poll_count() {
        assert_eq!(backoff_delay(2048, true), Some(Duration::from_millis(1)));
        assert_eq!(backoff_delay(4096, true), Some(Duration::from_millis(2)));
        assert_eq!(backoff_delay(1 << 20, true), Some(Duration::from_millis(10)));

        let mut last = Duration::ZERO;
        for shift in 11..28 {
            let delay = backoff_delay(1 << shift, true).unwrap_or(Duration::ZERO);
            assert!(delay >= last);
            last = delay;
        }
    }

    #[test]
    fn fast_media_never_sleep() {
        for poll in [0u32, 2048, 1 << 24, u32::MAX] {
            assert_eq!(backoff_delay(poll, false), None);
        }
    }
}
