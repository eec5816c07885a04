use crate::clock::Clock;
use crate::config::ProfilingPolicy;
use crate::device::DeviceHandle;
use crate::engine::DeviceClaim;
use crate::metrics;
use crate::plan::TransferPlan;
use crate::transport::{
    Command, CommandTransport, DataDescriptor, TransportError, TransportErrorKind, TransportResult,
};
use cardio_proto::{OpCode, ResponseClass, StatusWord};
use std::time::Duration;
use tracing::{debug, error};

/// What one plan execution produced, phase by phase.
///
/// Consumed immediately by the recovery decision; never stored.
#[derive(Clone, Debug, Default)]
pub struct ExecutionOutcome {
    pub command_error: Option<TransportErrorKind>,
    pub data_error: Option<TransportErrorKind>,
    pub stop_error: Option<TransportErrorKind>,
    /// Bytes the device acknowledged; a lower bound when a phase failed.
    pub bytes_transferred: u32,
    pub device_status: Option<StatusWord>,
}

impl ExecutionOutcome {
    pub fn failed(&self) -> bool {
        self.command_error.is_some() || self.data_error.is_some() || self.stop_error.is_some()
    }

    /// The medium disappeared mid-exchange. Non-retryable.
    pub fn device_gone(&self) -> bool {
        [self.command_error, self.data_error, self.stop_error]
            .iter()
            .any(|slot| *slot == Some(TransportErrorKind::Removed))
    }
}

/// Issue exactly one data command (and the stop terminator for multi-block
/// plans). All retry policy lives with the caller.
pub(crate) async fn execute<T, K>(
    transport: &T,
    clock: &K,
    _claim: &DeviceClaim<'_>,
    device: &DeviceHandle,
    plan: &TransferPlan,
    profiling: &ProfilingPolicy,
) -> ExecutionOutcome
where
    T: CommandTransport,
    K: Clock,
{
    let started = clock.monotonic();
    let descriptor =
        DataDescriptor::sectors(plan.direction(), plan.block_count, plan.segments.clone());
    let command = Command::data(
        plan.opcode,
        plan.argument(device.caps()),
        descriptor,
        plan.timeout,
    );

    let mut outcome = ExecutionOutcome::default();
    match transport.send_command(&command).await {
        Ok(reply) => {
            outcome.device_status = reply.status;
            if let Some(data) = reply.data {
                outcome.bytes_transferred = data.bytes_transferred;
                if let Some(err) = data.error {
                    error!(
                        opcode = ?plan.opcode,
                        sector = plan.start_sector,
                        blocks = plan.block_count,
                        error = %err,
                        "error transferring data"
                    );
                    outcome.data_error = Some(err.kind());
                }
            }
        }
        Err(err) => {
            error!(
                opcode = ?plan.opcode,
                sector = plan.start_sector,
                error = %err,
                "error sending data command"
            );
            outcome.command_error = Some(err.kind());
        }
    }

    if plan.uses_stop && !outcome.device_gone() {
        let stop = Command::control(
            OpCode::StopTransmission,
            0,
            ResponseClass::R1B,
            plan.timeout,
        );
        match transport.send_command(&stop).await {
            Ok(reply) => {
                // After a data timeout the stop response carries the only
                // status register we will see for this exchange.
                if outcome.data_error == Some(TransportErrorKind::Timeout) {
                    if let Some(status) = reply.status {
                        outcome.device_status = Some(status);
                    }
                }
            }
            Err(err) => {
                error!(sector = plan.start_sector, error = %err, "error sending stop command");
                outcome.stop_error = Some(err.kind());
            }
        }
    }

    let elapsed = clock.monotonic().saturating_sub(started);
    metrics::observe_transfer(plan.direction(), u64::from(plan.byte_len()), elapsed);
    if let Some(threshold) = profiling.slow_command {
        if elapsed > threshold {
            debug!(
                opcode = ?plan.opcode,
                sector = plan.start_sector,
                elapsed_us = elapsed.as_micros() as u64,
                "slow command"
            );
        }
    }

    outcome
}

/// Read the device's status register.
pub(crate) async fn query_status<T: CommandTransport>(
    transport: &T,
    _claim: &DeviceClaim<'_>,
    device: &DeviceHandle,
    timeout: Duration,
) -> TransportResult<StatusWord> {
    metrics::record_status_poll();
    let command = Command::control(
        OpCode::SendStatus,
        device.status_argument(),
        ResponseClass::R1,
        timeout,
    );
    let reply = transport.send_command(&command).await?;
    reply.status.ok_or_else(|| {
        TransportError::with_message(
            TransportErrorKind::Protocol,
            "status response carried no register",
        )
    })
}
