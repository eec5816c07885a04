use std::fmt;

pub type EngineResult<T> = Result<T, EngineError>;

/// Failure categories surfaced to the submitter before any I/O runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineErrorKind {
    /// Malformed input, rejected before a single transport call.
    InvalidRequest,
    /// The device handle is no longer attached.
    DeviceAbsent,
    Internal,
}

/// Errors surfaced by [`crate::BlockEngine`] for rejected requests.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineError {
    kind: EngineErrorKind,
    message: Option<String>,
}

impl EngineError {
    pub const fn new(kind: EngineErrorKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }

    pub fn with_message(kind: EngineErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: Some(message.into()),
        }
    }

    pub const fn kind(&self) -> EngineErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message() {
            Some(msg) => write!(f, "{:?}: {msg}", self.kind),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

impl std::error::Error for EngineError {}

/// Failure categories attached to completion reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IoErrorKind {
    /// The device rejected or never answered the command itself.
    Command,
    /// The data phase failed (CRC, transfer timeout).
    Data,
    /// The multi-block terminator command failed.
    Stop,
    /// The device never left its busy/programming state.
    NotReady,
    /// The medium is gone; not retryable.
    Removed,
}

/// Error delivered alongside the failed remainder of a request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IoError {
    kind: IoErrorKind,
    message: Option<String>,
}

impl IoError {
    pub const fn new(kind: IoErrorKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }

    pub fn with_message(kind: IoErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: Some(message.into()),
        }
    }

    pub const fn kind(&self) -> IoErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message() {
            Some(msg) => write!(f, "{:?}: {msg}", self.kind),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

impl std::error::Error for IoError {}
