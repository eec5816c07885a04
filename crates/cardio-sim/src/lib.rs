//! Scripted in-memory device for exercising the request engine.
//!
//! The transport answers the full command set against virtual time, with a
//! fault script deciding which exchanges fail and how. Tests assert against
//! the recorded command log and the completion stream.

mod clock;
mod lifecycle;
mod transport;

pub use clock::SimClock;
pub use lifecycle::SimLifecycle;
pub use transport::{Fault, LoggedCommand, SimTransport};
