pub mod clock;
pub mod complete;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod exec;
pub mod lifecycle;
pub mod metrics;
pub mod plan;
pub mod poll;
pub mod recovery;
pub mod request;
pub mod transport;
pub mod worker;

pub use clock::Clock;
pub use complete::{CompletionReporter, CompletionSink};
pub use config::{DeferredResumePolicy, EngineConfig, ProfilingPolicy, ReservedRangeGuard, WriteGuard};
pub use device::{DeviceCaps, DeviceHandle, DeviceRegistry, RegistryError};
pub use engine::{BlockEngine, DeviceClaim, RequestOutcome};
pub use error::{EngineError, EngineErrorKind, EngineResult, IoError, IoErrorKind};
pub use exec::ExecutionOutcome;
pub use lifecycle::{DeviceLifecycle, LifecycleError};
pub use plan::{TransferPlan, TransferPlanner};
pub use poll::PollVerdict;
pub use recovery::{Action, Observation, Readiness, RecoveryState};
pub use request::{Direction, Request, SegmentList};
pub use transport::{
    Command, CommandReply, CommandTransport, DataDescriptor, DataResult, TransportError,
    TransportErrorKind, TransportResult,
};
pub use worker::{start_io_worker, IoWorkerHandle, IoWorkerTask};
