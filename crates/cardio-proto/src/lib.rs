#![no_std]

use core::{convert::TryFrom, fmt};

/// Logical sector size used by every data command.
pub const SECTOR_SIZE: u32 = 512;
/// log2 of [`SECTOR_SIZE`], for sector/byte address conversions.
pub const SECTOR_SHIFT: u32 = 9;

/// Ready-for-data bit in the card status register.
pub const STATUS_READY_FOR_DATA: u32 = 1 << 8;
/// Acknowledge bit set after a successful APP_CMD prefix.
pub const STATUS_APP_CMD: u32 = 1 << 5;
/// Number of bytes in the payload answering a written-block-count query.
pub const WRITE_COUNT_LEN: usize = 4;

/// Errors surfaced while decoding protocol values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProtoError {
    /// Buffer length did not match the protocol expectation.
    InvalidLength { expected: usize, actual: usize },
    /// Incoming command index is not part of the supported set.
    InvalidOpcode(u8),
    /// Status register carried a current-state value outside the known range.
    InvalidState(u8),
}

impl fmt::Display for ProtoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtoError::InvalidLength { expected, actual } => {
                write!(f, "invalid payload length {actual}, expected {expected}")
            }
            ProtoError::InvalidOpcode(op) => write!(f, "invalid command index {op}"),
            ProtoError::InvalidState(state) => write!(f, "invalid card state {state}"),
        }
    }
}

/// Result alias for protocol parsing operations.
pub type Result<T> = core::result::Result<T, ProtoError>;

/// Commands the engine issues to the device.
///
/// The discriminants are the command indices of the MMC/SD command set this
/// protocol is modeled on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    StopTransmission = 12,
    SendStatus = 13,
    SetBlockLen = 16,
    ReadSingle = 17,
    ReadMulti = 18,
    SendNumWrBlocks = 22,
    WriteSingle = 24,
    WriteMulti = 25,
    AppCmd = 55,
}

impl OpCode {
    /// Whether this command moves sector data.
    pub const fn is_data(self) -> bool {
        matches!(
            self,
            OpCode::ReadSingle | OpCode::ReadMulti | OpCode::WriteSingle | OpCode::WriteMulti
        )
    }

    /// Whether this command reads from the device.
    pub const fn is_read(self) -> bool {
        matches!(self, OpCode::ReadSingle | OpCode::ReadMulti)
    }

    /// Whether this command covers more than one block per exchange.
    pub const fn is_multi_block(self) -> bool {
        matches!(self, OpCode::ReadMulti | OpCode::WriteMulti)
    }
}

impl TryFrom<u8> for OpCode {
    type Error = ProtoError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            12 => Ok(Self::StopTransmission),
            13 => Ok(Self::SendStatus),
            16 => Ok(Self::SetBlockLen),
            17 => Ok(Self::ReadSingle),
            18 => Ok(Self::ReadMulti),
            22 => Ok(Self::SendNumWrBlocks),
            24 => Ok(Self::WriteSingle),
            25 => Ok(Self::WriteMulti),
            55 => Ok(Self::AppCmd),
            other => Err(ProtoError::InvalidOpcode(other)),
        }
    }
}

impl From<OpCode> for u8 {
    fn from(op: OpCode) -> Self {
        op as u8
    }
}

/// Response class expected for a command exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseClass {
    /// Normal status response.
    R1,
    /// Status response with a busy signal afterwards.
    R1B,
    /// Wide register response (CID/CSD class).
    R2,
}

/// Card state reported in bits 9..13 of the status register.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum CardState {
    Idle = 0,
    Ready = 1,
    Ident = 2,
    Standby = 3,
    Transfer = 4,
    Data = 5,
    Receive = 6,
    Programming = 7,
    Disconnect = 8,
}

impl TryFrom<u8> for CardState {
    type Error = ProtoError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Idle),
            1 => Ok(Self::Ready),
            2 => Ok(Self::Ident),
            3 => Ok(Self::Standby),
            4 => Ok(Self::Transfer),
            5 => Ok(Self::Data),
            6 => Ok(Self::Receive),
            7 => Ok(Self::Programming),
            8 => Ok(Self::Disconnect),
            other => Err(ProtoError::InvalidState(other)),
        }
    }
}

/// The 32-bit card status register carried in R1-class responses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusWord(pub u32);

impl StatusWord {
    const STATE_SHIFT: u32 = 9;
    const STATE_MASK: u32 = 0xF;

    /// Compose a status word from a state and the ready-for-data bit.
    pub const fn compose(state: CardState, ready_for_data: bool) -> Self {
        let mut raw = (state as u32) << Self::STATE_SHIFT;
        if ready_for_data {
            raw |= STATUS_READY_FOR_DATA;
        }
        Self(raw)
    }

    /// Whether the card signals it can accept data.
    pub const fn ready_for_data(self) -> bool {
        self.0 & STATUS_READY_FOR_DATA != 0
    }

    /// Whether the previous APP_CMD prefix was acknowledged.
    pub const fn app_cmd_accepted(self) -> bool {
        self.0 & STATUS_APP_CMD != 0
    }

    /// Current-state field of the register.
    pub fn state(self) -> Result<CardState> {
        let raw = ((self.0 >> Self::STATE_SHIFT) & Self::STATE_MASK) as u8;
        CardState::try_from(raw)
    }

    /// True when the card is ready and not stuck in programming state.
    ///
    /// Some cards mishandle the busy indication, so both the ready bit and
    /// the state field are checked.
    pub fn is_idle_ready(self) -> bool {
        self.ready_for_data() && !matches!(self.state(), Ok(CardState::Programming))
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Decode the big-endian written-block-count payload.
pub fn decode_write_count(payload: &[u8]) -> Result<u32> {
    if payload.len() != WRITE_COUNT_LEN {
        return Err(ProtoError::InvalidLength {
            expected: WRITE_COUNT_LEN,
            actual: payload.len(),
        });
    }
    Ok(u32::from_be_bytes([
        payload[0], payload[1], payload[2], payload[3],
    ]))
}

/// Encode a written-block count into its big-endian payload form.
pub fn encode_write_count(blocks: u32) -> [u8; WRITE_COUNT_LEN] {
    blocks.to_be_bytes()
}
