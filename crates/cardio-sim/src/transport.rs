use crate::clock::SimClock;
use async_trait::async_trait;
use cardio_core::{
    Command, CommandReply, CommandTransport, DataResult, TransportError, TransportErrorKind,
    TransportResult,
};
use cardio_proto::{encode_write_count, CardState, OpCode, StatusWord};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

/// Which phase of an exchange a [`Fault`] hits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FaultPhase {
    /// The command itself errors: `send_command` returns `Err`.
    Command,
    /// The command is accepted but the data phase reports an error.
    Data,
}

/// One scripted failure. Faults are consumed in occurrence order; a fault
/// with `occurrences == u32::MAX` never runs out.
#[derive(Clone, Debug)]
pub struct Fault {
    opcode: Option<OpCode>,
    sector: Option<u64>,
    phase: FaultPhase,
    occurrences: u32,
    kind: TransportErrorKind,
    bytes_transferred: u32,
}

impl Fault {
    /// Fail the data phase of any data command covering `sector`.
    pub fn data_error(sector: u64, occurrences: u32, kind: TransportErrorKind) -> Self {
        Self {
            opcode: None,
            sector: Some(sector),
            phase: FaultPhase::Data,
            occurrences,
            kind,
            bytes_transferred: 0,
        }
    }

    /// Fail the command phase of every exchange using `opcode`.
    pub fn command_error(opcode: OpCode, occurrences: u32, kind: TransportErrorKind) -> Self {
        Self {
            opcode: Some(opcode),
            sector: None,
            phase: FaultPhase::Command,
            occurrences,
            kind,
            bytes_transferred: 0,
        }
    }

    /// Fail the multi-block stop command.
    pub fn stop_error(occurrences: u32, kind: TransportErrorKind) -> Self {
        Self::command_error(OpCode::StopTransmission, occurrences, kind)
    }

    /// Report `bytes` as transferred before the fault hit.
    pub fn with_bytes_transferred(mut self, bytes: u32) -> Self {
        self.bytes_transferred = bytes;
        self
    }

    fn matches(&self, command: &Command) -> bool {
        if self.occurrences == 0 {
            return false;
        }
        if let Some(opcode) = self.opcode {
            if command.opcode != opcode {
                return false;
            }
        } else if !command.opcode.is_data() {
            return false;
        }
        if let Some(sector) = self.sector {
            let Some(data) = &command.data else {
                return false;
            };
            let start = u64::from(command.argument);
            let end = start + u64::from(data.block_count);
            if !(start..end).contains(&sector) {
                return false;
            }
        }
        true
    }
}

/// One command as the device saw it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoggedCommand {
    pub opcode: OpCode,
    pub argument: u32,
    pub block_count: Option<u32>,
}

impl LoggedCommand {
    /// Sector addressed by a data command on block-addressed media.
    pub fn sector(&self) -> u64 {
        u64::from(self.argument)
    }
}

struct SimState {
    removed: bool,
    busy_polls_remaining: u32,
    write_busy_polls: u32,
    faults: Vec<Fault>,
    log: Vec<LoggedCommand>,
    written_count_answer: u32,
    app_cmd_armed: bool,
    block_len: Option<u32>,
    in_flight: bool,
    overlap_violations: u32,
}

/// Scripted command/response device.
///
/// Clones share one device; hand one clone to the engine and keep another
/// for scripting and assertions.
#[derive(Clone)]
pub struct SimTransport {
    state: Arc<Mutex<SimState>>,
    clock: SimClock,
    command_cost: Duration,
}

impl SimTransport {
    pub fn new(clock: SimClock) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                removed: false,
                busy_polls_remaining: 0,
                write_busy_polls: 0,
                faults: Vec::new(),
                log: Vec::new(),
                written_count_answer: 0,
                app_cmd_armed: false,
                block_len: None,
                in_flight: false,
                overlap_violations: 0,
            })),
            clock,
            command_cost: Duration::from_millis(1),
        }
    }

    pub fn push_fault(&self, fault: Fault) {
        self.state.lock().unwrap().faults.push(fault);
    }

    /// Answer the next `polls` status queries with a busy/programming state.
    pub fn force_busy(&self, polls: u32) {
        self.state.lock().unwrap().busy_polls_remaining = polls;
    }

    /// Report a programming state for `polls` status queries after every
    /// write command.
    pub fn set_write_busy_polls(&self, polls: u32) {
        self.state.lock().unwrap().write_busy_polls = polls;
    }

    /// Answer to the written-block-count query.
    pub fn set_written_count_answer(&self, blocks: u32) {
        self.state.lock().unwrap().written_count_answer = blocks;
    }

    /// Drop any pending busy answers, as a fresh initialization would.
    pub fn reset_busy(&self) {
        self.state.lock().unwrap().busy_polls_remaining = 0;
    }

    /// Yank the medium: every exchange from now on fails as removed.
    pub fn remove_medium(&self) {
        self.state.lock().unwrap().removed = true;
    }

    pub fn command_log(&self) -> Vec<LoggedCommand> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn clear_command_log(&self) {
        self.state.lock().unwrap().log.clear();
    }

    /// Block-length configuration last asserted by the engine.
    pub fn block_len(&self) -> Option<u32> {
        self.state.lock().unwrap().block_len
    }

    /// Times two exchanges overlapped in flight. Stays zero while the
    /// session guard does its job.
    pub fn overlap_violations(&self) -> u32 {
        self.state.lock().unwrap().overlap_violations
    }

    fn process(&self, command: &Command) -> TransportResult<CommandReply> {
        self.clock.advance(self.command_cost);
        let mut state = self.state.lock().unwrap();

        state.log.push(LoggedCommand {
            opcode: command.opcode,
            argument: command.argument,
            block_count: command.data.as_ref().map(|d| d.block_count),
        });

        if state.removed {
            return Err(TransportError::with_message(
                TransportErrorKind::Removed,
                "medium not present",
            ));
        }

        let fault = state
            .faults
            .iter_mut()
            .find(|f| f.matches(command))
            .map(|f| {
                if f.occurrences != u32::MAX {
                    f.occurrences -= 1;
                }
                f.clone()
            });
        if let Some(fault) = &fault {
            if fault.phase == FaultPhase::Command {
                return Err(TransportError::with_message(fault.kind, "scripted fault"));
            }
        }

        let armed = state.app_cmd_armed;
        state.app_cmd_armed = command.opcode == OpCode::AppCmd;

        match command.opcode {
            OpCode::SendStatus => {
                let status = if state.busy_polls_remaining > 0 {
                    state.busy_polls_remaining -= 1;
                    StatusWord::compose(CardState::Programming, false)
                } else {
                    StatusWord::compose(CardState::Transfer, true)
                };
                Ok(CommandReply {
                    status: Some(status),
                    ..CommandReply::default()
                })
            }
            OpCode::AppCmd => Ok(CommandReply {
                status: Some(StatusWord(
                    StatusWord::compose(CardState::Transfer, true).0 | cardio_proto::STATUS_APP_CMD,
                )),
                ..CommandReply::default()
            }),
            OpCode::SendNumWrBlocks => {
                if !armed {
                    return Err(TransportError::with_message(
                        TransportErrorKind::Protocol,
                        "query without app-command prefix",
                    ));
                }
                Ok(CommandReply {
                    status: Some(StatusWord::compose(CardState::Transfer, true)),
                    payload: Some(encode_write_count(state.written_count_answer).to_vec()),
                    data: Some(DataResult {
                        bytes_transferred: cardio_proto::WRITE_COUNT_LEN as u32,
                        error: None,
                    }),
                })
            }
            OpCode::SetBlockLen => {
                state.block_len = Some(command.argument);
                Ok(CommandReply {
                    status: Some(StatusWord::compose(CardState::Transfer, true)),
                    ..CommandReply::default()
                })
            }
            OpCode::StopTransmission => Ok(CommandReply {
                status: Some(StatusWord::compose(CardState::Transfer, true)),
                ..CommandReply::default()
            }),
            op if op.is_data() => {
                let Some(descriptor) = &command.data else {
                    return Err(TransportError::with_message(
                        TransportErrorKind::Protocol,
                        "data command without descriptor",
                    ));
                };
                let full = descriptor.byte_len().min(u64::from(u32::MAX)) as u32;
                let data = match &fault {
                    Some(fault) => DataResult {
                        bytes_transferred: fault.bytes_transferred,
                        error: Some(TransportError::with_message(fault.kind, "scripted fault")),
                    },
                    None => DataResult {
                        bytes_transferred: full,
                        error: None,
                    },
                };
                if !op.is_read() {
                    state.busy_polls_remaining = state.write_busy_polls;
                }
                Ok(CommandReply {
                    status: Some(StatusWord::compose(CardState::Transfer, true)),
                    data: Some(data),
                    payload: None,
                })
            }
            _ => Err(TransportError::with_message(
                TransportErrorKind::Protocol,
                "unsupported command",
            )),
        }
    }
}

#[async_trait]
impl CommandTransport for SimTransport {
    async fn send_command(&self, command: &Command) -> TransportResult<CommandReply> {
        {
            let mut state = self.state.lock().unwrap();
            if state.in_flight {
                state.overlap_violations += 1;
            }
            state.in_flight = true;
        }
        yield_now().await;
        let result = self.process(command);
        self.state.lock().unwrap().in_flight = false;
        result
    }
}

fn yield_now() -> YieldNow {
    YieldNow(false)
}

struct YieldNow(bool);

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.0 {
            Poll::Ready(())
        } else {
            self.0 = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cardio_core::{DataDescriptor, Direction, SegmentList};
    use cardio_proto::ResponseClass;
    use futures::executor::block_on;

    fn read_command(sector: u64, blocks: u32) -> Command {
        Command::data(
            if blocks > 1 {
                OpCode::ReadMulti
            } else {
                OpCode::ReadSingle
            },
            sector as u32,
            DataDescriptor::sectors(
                Direction::Read,
                blocks,
                SegmentList::single(blocks * 512),
            ),
            Duration::from_millis(100),
        )
    }

    #[test]
    fn clean_read_reports_full_transfer() {
        let transport = SimTransport::new(SimClock::new());
        let reply = block_on(transport.send_command(&read_command(4, 8))).unwrap();
        let data = reply.data.unwrap();
        assert_eq!(data.bytes_transferred, 8 * 512);
        assert!(data.error.is_none());
    }

    #[test]
    fn data_fault_fires_per_occurrence() {
        let transport = SimTransport::new(SimClock::new());
        transport.push_fault(Fault::data_error(6, 1, TransportErrorKind::Crc));

        let reply = block_on(transport.send_command(&read_command(4, 8))).unwrap();
        assert!(reply.data.unwrap().error.is_some());

        // Fault consumed; same range now succeeds.
        let reply = block_on(transport.send_command(&read_command(4, 8))).unwrap();
        assert!(reply.data.unwrap().error.is_none());
    }

    #[test]
    fn fault_outside_range_does_not_fire() {
        let transport = SimTransport::new(SimClock::new());
        transport.push_fault(Fault::data_error(100, u32::MAX, TransportErrorKind::Crc));
        let reply = block_on(transport.send_command(&read_command(4, 8))).unwrap();
        assert!(reply.data.unwrap().error.is_none());
    }

    #[test]
    fn removed_medium_fails_everything() {
        let transport = SimTransport::new(SimClock::new());
        transport.remove_medium();
        let err = block_on(transport.send_command(&read_command(0, 1))).unwrap_err();
        assert_eq!(err.kind(), TransportErrorKind::Removed);
    }

    #[test]
    fn write_arms_busy_polls() {
        let transport = SimTransport::new(SimClock::new());
        transport.set_write_busy_polls(2);

        let write = Command::data(
            OpCode::WriteSingle,
            0,
            DataDescriptor::sectors(Direction::Write, 1, SegmentList::single(512)),
            Duration::from_millis(100),
        );
        block_on(transport.send_command(&write)).unwrap();

        let status = Command::control(
            OpCode::SendStatus,
            0,
            ResponseClass::R1,
            Duration::from_millis(100),
        );
        let first = block_on(transport.send_command(&status)).unwrap();
        assert!(!first.status.unwrap().is_idle_ready());
        let second = block_on(transport.send_command(&status)).unwrap();
        assert!(!second.status.unwrap().is_idle_ready());
        let third = block_on(transport.send_command(&status)).unwrap();
        assert!(third.status.unwrap().is_idle_ready());
    }

    #[test]
    fn written_count_needs_app_cmd_prefix() {
        let transport = SimTransport::new(SimClock::new());
        transport.set_written_count_answer(3);

        let query = Command {
            opcode: OpCode::SendNumWrBlocks,
            argument: 0,
            response: ResponseClass::R1,
            data: None,
            timeout: Duration::from_millis(100),
        };
        assert!(block_on(transport.send_command(&query)).is_err());

        let app = Command::control(
            OpCode::AppCmd,
            0,
            ResponseClass::R1,
            Duration::from_millis(100),
        );
        let reply = block_on(transport.send_command(&app)).unwrap();
        assert!(reply.status.unwrap().app_cmd_accepted());

        let reply = block_on(transport.send_command(&query)).unwrap();
        assert_eq!(
            cardio_proto::decode_write_count(reply.payload.as_deref().unwrap()).unwrap(),
            3
        );
    }
}
