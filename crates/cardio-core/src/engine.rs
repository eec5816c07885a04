use crate::clock::Clock;
use crate::complete::{CompletionReporter, CompletionSink};
use crate::config::EngineConfig;
use crate::device::DeviceHandle;
use crate::error::{EngineError, EngineErrorKind, EngineResult, IoError, IoErrorKind};
use crate::exec::{self, ExecutionOutcome};
use crate::lifecycle::DeviceLifecycle;
use crate::metrics;
use crate::plan::TransferPlanner;
use crate::poll;
use crate::recovery::{self, Action, Observation, Readiness, RecoveryState};
use crate::request::{Direction, Request, SegmentList};
use crate::transport::{Command, CommandTransport, DataDescriptor, TransportErrorKind};
use cardio_proto::{decode_write_count, OpCode, ResponseClass, SECTOR_SHIFT, SECTOR_SIZE,
    WRITE_COUNT_LEN};
use futures_util::lock::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Exclusive access to the device for one request's whole lifetime.
///
/// Doubles as the proof that the holder sits in a context that may block:
/// the executor and poller only run against a claim, and a claim only comes
/// out of the awaited [`BlockEngine::claim`], so neither can be reached
/// from a context that cannot suspend.
pub struct DeviceClaim<'a> {
    _guard: MutexGuard<'a, ()>,
}

/// How a processed request ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestOutcome {
    /// Bytes confirmed transferred and reported as successful.
    pub bytes_completed: u64,
    pub total_bytes: u64,
    pub error: Option<IoError>,
}

impl RequestOutcome {
    pub fn is_complete(&self) -> bool {
        self.error.is_none() && self.bytes_completed == self.total_bytes
    }
}

/// The per-device request engine.
///
/// Ties the transport, device-lifecycle, and clock collaborators to one
/// [`DeviceHandle`] and processes requests one at a time under the session
/// guard. Everything issued to the device for a request (transfers, status
/// polls, recovery commands) happens under a single claim.
pub struct BlockEngine<T, L, K> {
    transport: T,
    lifecycle: L,
    clock: K,
    device: Arc<DeviceHandle>,
    config: EngineConfig,
    session: Mutex<()>,
    bus_suspended: AtomicBool,
}

impl<T, L, K> BlockEngine<T, L, K>
where
    T: CommandTransport,
    L: DeviceLifecycle,
    K: Clock,
{
    pub fn new(
        transport: T,
        lifecycle: L,
        clock: K,
        device: Arc<DeviceHandle>,
        config: EngineConfig,
    ) -> Self {
        Self {
            transport,
            lifecycle,
            clock,
            device,
            config,
            session: Mutex::new(()),
            bus_suspended: AtomicBool::new(false),
        }
    }

    pub fn device(&self) -> &Arc<DeviceHandle> {
        &self.device
    }

    /// Note that the bus coordinator suspended the bus; the next request
    /// resumes it before any I/O.
    pub fn mark_bus_suspended(&self) {
        self.bus_suspended.store(true, Ordering::Release);
    }

    /// Take exclusive access to the device.
    pub async fn claim(&self) -> DeviceClaim<'_> {
        DeviceClaim {
            _guard: self.session.lock().await,
        }
    }

    /// Process one request to resolution.
    ///
    /// Returns `Err` only for requests rejected before any I/O (malformed
    /// input, detached device). Every other path runs the request and
    /// reports its byte-exact outcome through `sink`, one or more calls,
    /// covering the request monotonically.
    pub async fn submit(
        &self,
        request: &Request,
        sink: &mut dyn CompletionSink,
    ) -> EngineResult<RequestOutcome> {
        let caps = self.device.caps();
        request.validate(caps)?;
        if request.direction == Direction::Write {
            if let Some(guard) = &self.config.write_guard {
                if let Err(violation) =
                    guard.check(caps, request.start_sector, request.sector_count)
                {
                    error!(
                        sector = request.start_sector,
                        blocks = request.sector_count,
                        violation = violation.as_str(),
                        "write rejected"
                    );
                    return Err(EngineError::with_message(
                        EngineErrorKind::InvalidRequest,
                        violation,
                    ));
                }
            }
        }
        if !self.device.is_attached() {
            return Err(EngineError::new(EngineErrorKind::DeviceAbsent));
        }

        let claim = self.claim().await;
        let mut reporter = CompletionReporter::new(request.total_bytes(), sink);

        if self.bus_suspended.swap(false, Ordering::AcqRel) && self.config.deferred_resume.enabled
        {
            if let Err(err) = self.resume_bus(&claim).await {
                metrics::record_fatal_request();
                reporter.fail_remainder(err.clone());
                return Ok(RequestOutcome {
                    bytes_completed: reporter.completed_bytes(),
                    total_bytes: request.total_bytes(),
                    error: Some(err),
                });
            }
        }

        let mut planner = TransferPlanner::new(request, caps);
        let mut state = RecoveryState::new();
        let mut last_outcome = ExecutionOutcome::default();

        let fatal: IoError = loop {
            let Some(plan) = planner.next_plan() else {
                return Ok(RequestOutcome {
                    bytes_completed: reporter.completed_bytes(),
                    total_bytes: request.total_bytes(),
                    error: None,
                });
            };

            let outcome = exec::execute(
                &self.transport,
                &self.clock,
                &claim,
                &self.device,
                &plan,
                &self.config.profiling,
            )
            .await;

            if outcome.device_gone() {
                warn!(slot = self.device.slot(), "medium gone during transfer");
                self.evict_device();
                last_outcome = outcome;
                break IoError::new(IoErrorKind::Removed);
            }

            let failed = outcome.failed();
            let isolating = failed && plan.block_count > 1 && plan.direction() == Direction::Read;

            // For failures that will feed the escalation path, capture the
            // status register first; it usually names the real culprit.
            if failed && !isolating {
                match exec::query_status(
                    &self.transport,
                    &claim,
                    &self.device,
                    self.config.control_timeout,
                )
                .await
                {
                    Ok(status) => {
                        debug!(%status, sector = plan.start_sector, "status after failed transfer")
                    }
                    Err(err) if err.kind() == TransportErrorKind::Removed => {
                        self.evict_device();
                        last_outcome = outcome;
                        break IoError::new(IoErrorKind::Removed);
                    }
                    Err(err) => warn!(error = %err, "status query after failure failed"),
                }
            }

            // Writes leave the device in programming state; wait it out
            // before anything else touches the bus.
            let mut readiness = Readiness::NotChecked;
            if plan.direction() == Direction::Write {
                match poll::wait_ready(
                    &self.transport,
                    &self.clock,
                    &claim,
                    &self.device,
                    self.config.busy_wall_budget,
                    self.config.control_timeout,
                )
                .await
                {
                    Ok(verdict) if verdict.is_ready() => readiness = Readiness::Ready,
                    Ok(_) => readiness = Readiness::NotReady,
                    Err(err) => {
                        error!(error = %err, "busy poll failed");
                        last_outcome = outcome;
                        if err.kind() == TransportErrorKind::Removed {
                            self.evict_device();
                            break IoError::new(IoErrorKind::Removed);
                        }
                        break IoError::with_message(IoErrorKind::Command, "status poll failed");
                    }
                }
            }

            let observation = Observation {
                direction: plan.direction(),
                multi_block: plan.block_count > 1,
                failed,
                removable: caps.removable,
                readiness,
            };
            last_outcome = outcome;

            match recovery::decide(&observation, &mut state) {
                Action::Proceed => {
                    reporter.complete_bytes(u64::from(last_outcome.bytes_transferred));
                    planner.advance(plan.block_count);
                }
                Action::RetrySingleBlock => {
                    warn!(
                        sector = plan.start_sector,
                        "retrying with single-block transfers"
                    );
                    metrics::record_single_block_fallback();
                    planner.force_single_block();
                }
                Action::Reinit => {
                    metrics::record_reinit();
                    info!(slot = self.device.slot(), "reinitializing device");
                    match self.lifecycle.reinit(&self.device).await {
                        Ok(()) => self.assert_block_len(&claim).await,
                        Err(err) => {
                            warn!(error = %err, "device reinit failed");
                            if caps.removable {
                                self.evict_device();
                                break IoError::with_message(IoErrorKind::Removed, "reinit failed");
                            }
                            break classify_failure(&last_outcome, readiness);
                        }
                    }
                }
                Action::Remove => {
                    self.evict_device();
                    break IoError::new(IoErrorKind::Removed);
                }
                Action::Fail => break classify_failure(&last_outcome, readiness),
            }
        };

        // Terminal failure: salvage whatever prefix the device confirms,
        // then fail the rest exactly once.
        metrics::record_fatal_request();
        let salvaged = self
            .salvaged_bytes(&claim, request.direction, &last_outcome)
            .await;
        reporter.complete_bytes(salvaged);
        reporter.fail_remainder(fatal.clone());
        Ok(RequestOutcome {
            bytes_completed: reporter.completed_bytes(),
            total_bytes: request.total_bytes(),
            error: Some(fatal),
        })
    }

    /// Bring a suspended bus back before issuing I/O.
    async fn resume_bus(&self, claim: &DeviceClaim<'_>) -> Result<(), IoError> {
        let caps = self.device.caps();
        let mut last_err = None;
        for attempt in 1..=self.config.deferred_resume.retries.max(1) {
            match self.lifecycle.resume(&self.device).await {
                Ok(()) => {
                    last_err = None;
                    break;
                }
                Err(err) => {
                    warn!(attempt, error = %err, "bus resume failed");
                    last_err = Some(err);
                }
            }
        }
        if last_err.is_some() {
            if caps.removable {
                self.evict_device();
                return Err(IoError::with_message(
                    IoErrorKind::Removed,
                    "bus resume failed",
                ));
            }
            return Err(IoError::with_message(
                IoErrorKind::NotReady,
                "bus resume failed",
            ));
        }

        self.assert_block_len(claim).await;

        // Non-removable media can sit in programming state across a
        // suspend; confirm readiness before letting I/O through.
        if !caps.removable {
            match poll::wait_ready(
                &self.transport,
                &self.clock,
                claim,
                &self.device,
                self.config.resume_wall_budget,
                self.config.control_timeout,
            )
            .await
            {
                Ok(verdict) if verdict.is_ready() => {}
                Ok(_) => {
                    return Err(IoError::with_message(
                        IoErrorKind::NotReady,
                        "device not ready after resume",
                    ))
                }
                Err(err) => {
                    if err.kind() == TransportErrorKind::Removed {
                        self.evict_device();
                        return Err(IoError::new(IoErrorKind::Removed));
                    }
                    return Err(IoError::with_message(
                        IoErrorKind::Command,
                        "status poll failed after resume",
                    ));
                }
            }
        }
        Ok(())
    }

    /// Reassert the transfer block length after init-class events.
    async fn assert_block_len(&self, _claim: &DeviceClaim<'_>) {
        // Block-addressed media ignore the block-length configuration.
        if self.device.caps().block_addressed {
            return;
        }
        let command = Command::control(
            OpCode::SetBlockLen,
            SECTOR_SIZE,
            ResponseClass::R1,
            self.config.control_timeout,
        );
        if let Err(err) = self.transport.send_command(&command).await {
            warn!(error = %err, "unable to reassert block length");
        }
    }

    /// Bytes credited to a fatally failing request beyond what was already
    /// reported. Removable media answer a written-block-count query that is
    /// authoritative for the failed write; everything else falls back to
    /// the byte count the transport acknowledged.
    async fn salvaged_bytes(
        &self,
        claim: &DeviceClaim<'_>,
        direction: Direction,
        last: &ExecutionOutcome,
    ) -> u64 {
        // Eviction only schedules teardown, so the counter query is still
        // worth attempting on a just-evicted medium; a genuinely absent one
        // fails the query and salvages nothing.
        if direction == Direction::Write && self.device.caps().removable {
            return match self.query_written_blocks(claim).await {
                Some(blocks) => u64::from(blocks) << SECTOR_SHIFT,
                None => 0,
            };
        }
        u64::from(last.bytes_transferred)
    }

    /// Ask the device how many blocks of the last write actually landed.
    async fn query_written_blocks(&self, _claim: &DeviceClaim<'_>) -> Option<u32> {
        let timeout = self.config.control_timeout;
        let app = Command::control(
            OpCode::AppCmd,
            self.device.status_argument(),
            ResponseClass::R1,
            timeout,
        );
        match self.transport.send_command(&app).await {
            Ok(reply) => {
                if !reply.status.is_some_and(|s| s.app_cmd_accepted()) {
                    debug!("app-command prefix not acknowledged");
                    return None;
                }
            }
            Err(err) => {
                debug!(error = %err, "app-command prefix failed");
                return None;
            }
        }

        let descriptor = DataDescriptor {
            direction: Direction::Read,
            block_size: WRITE_COUNT_LEN as u32,
            block_count: 1,
            segments: SegmentList::single(WRITE_COUNT_LEN as u32),
        };
        let query = Command {
            opcode: OpCode::SendNumWrBlocks,
            argument: 0,
            response: ResponseClass::R1,
            data: Some(descriptor),
            timeout,
        };
        match self.transport.send_command(&query).await {
            Ok(reply) => {
                if reply.data.as_ref().is_some_and(|d| d.error.is_some()) {
                    return None;
                }
                let payload = reply.payload?;
                match decode_write_count(&payload) {
                    Ok(blocks) => {
                        info!(blocks, "device-reported written block count");
                        Some(blocks)
                    }
                    Err(err) => {
                        warn!(error = %err, "bad written-count payload");
                        None
                    }
                }
            }
            Err(err) => {
                debug!(error = %err, "written-count query failed");
                None
            }
        }
    }

    /// Mark the medium gone and notify the lifecycle collaborator once.
    fn evict_device(&self) {
        if self.device.detach() {
            metrics::record_removal();
            info!(slot = self.device.slot(), "removing device");
            self.lifecycle.remove(&self.device);
        } else {
            debug!(slot = self.device.slot(), "device already removed");
        }
    }
}

fn classify_failure(outcome: &ExecutionOutcome, readiness: Readiness) -> IoError {
    if outcome.device_gone() {
        return IoError::new(IoErrorKind::Removed);
    }
    if let Some(kind) = outcome.command_error {
        return IoError::with_message(IoErrorKind::Command, format!("{kind:?}"));
    }
    if let Some(kind) = outcome.data_error {
        return IoError::with_message(IoErrorKind::Data, format!("{kind:?}"));
    }
    if let Some(kind) = outcome.stop_error {
        return IoError::with_message(IoErrorKind::Stop, format!("{kind:?}"));
    }
    if readiness == Readiness::NotReady {
        return IoError::new(IoErrorKind::NotReady);
    }
    IoError::new(IoErrorKind::Data)
}
