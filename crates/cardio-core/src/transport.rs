use crate::request::{Direction, SegmentList};
use async_trait::async_trait;
use cardio_proto::{OpCode, ResponseClass, StatusWord, SECTOR_SIZE};
use std::fmt;
use std::time::Duration;

pub type TransportResult<T> = Result<T, TransportError>;

/// Failure categories reported by the command transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// No response within the command timeout.
    Timeout,
    /// Response or data integrity check failed.
    Crc,
    /// The device rejected the command as malformed.
    Protocol,
    /// The device answered busy and the transport gave up.
    Busy,
    /// The medium is no longer present. Never retryable.
    Removed,
    /// The transport itself is gone.
    Disconnected,
}

/// Errors surfaced by [`CommandTransport`] implementations.
#[derive(Clone, Debug)]
pub struct TransportError {
    kind: TransportErrorKind,
    message: Option<String>,
}

impl TransportError {
    pub const fn new(kind: TransportErrorKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }

    pub fn with_message(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: Some(message.into()),
        }
    }

    pub const fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message() {
            Some(msg) => write!(f, "{:?}: {msg}", self.kind),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

impl std::error::Error for TransportError {}

/// Describes the data phase of a command: direction, geometry, and the
/// scatter-list of byte ranges the transport may touch. The memory behind
/// the ranges is owned by the transport's caller; the engine only ever
/// narrows the description, never widens it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataDescriptor {
    pub direction: Direction,
    pub block_size: u32,
    pub block_count: u32,
    pub segments: SegmentList,
}

impl DataDescriptor {
    /// Descriptor for a sector-sized transfer.
    pub fn sectors(direction: Direction, block_count: u32, segments: SegmentList) -> Self {
        Self {
            direction,
            block_size: SECTOR_SIZE,
            block_count,
            segments,
        }
    }

    pub fn byte_len(&self) -> u64 {
        u64::from(self.block_size) * u64::from(self.block_count)
    }
}

/// One command/response exchange.
#[derive(Clone, Debug)]
pub struct Command {
    pub opcode: OpCode,
    pub argument: u32,
    pub response: ResponseClass,
    pub data: Option<DataDescriptor>,
    pub timeout: Duration,
}

impl Command {
    /// A command with no data phase.
    pub fn control(
        opcode: OpCode,
        argument: u32,
        response: ResponseClass,
        timeout: Duration,
    ) -> Self {
        Self {
            opcode,
            argument,
            response,
            data: None,
            timeout,
        }
    }

    /// A command moving sector data.
    pub fn data(opcode: OpCode, argument: u32, descriptor: DataDescriptor, timeout: Duration) -> Self {
        Self {
            opcode,
            argument,
            response: ResponseClass::R1,
            data: Some(descriptor),
            timeout,
        }
    }
}

/// Result of the data phase of an exchange whose command phase succeeded.
#[derive(Clone, Debug)]
pub struct DataResult {
    /// Bytes the device acknowledged before the phase ended, in error cases
    /// a lower bound on what actually reached the medium.
    pub bytes_transferred: u32,
    pub error: Option<TransportError>,
}

/// Reply to a [`Command`] whose command phase completed.
#[derive(Clone, Debug, Default)]
pub struct CommandReply {
    /// Status register carried by R1-class responses.
    pub status: Option<StatusWord>,
    /// Present when the command had a data phase.
    pub data: Option<DataResult>,
    /// Inbound non-sector payload (e.g. the written-block-count answer).
    pub payload: Option<Vec<u8>>,
}

/// Executes a single command/response exchange against the device.
///
/// Implementations must not retry: every retry decision belongs to the
/// recovery layer. An `Err` means the command phase itself failed; data
/// phase failures travel inside [`CommandReply`].
#[async_trait]
pub trait CommandTransport: Send + Sync {
    async fn send_command(&self, command: &Command) -> TransportResult<CommandReply>;
}
