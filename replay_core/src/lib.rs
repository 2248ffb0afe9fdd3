//! Tick-accurate replay of a canonical action trace.
//!
//! [`ReplayRunner::run`] starts a [`TickScheduler`], waits for each action's
//! tick, marshals the action into surface calls and hands them to a
//! [`Dispatcher`]. Failures stay per call; the surface is released when the
//! run ends on any path.

pub mod config;
pub mod diagnostics;
pub mod dispatch;
pub mod dry_run;
pub mod executor;
pub mod marshal;
pub mod runner;
pub mod scheduler;
mod session;
pub mod surface;

pub use config::{
    load_replay_config_from_env, ReplayConfig, ReplayConfigError, ReplayConfigMetadata,
    BUILTIN_REPLAY_CONFIG, REPLAY_CONFIG_PATH_ENV,
};
pub use diagnostics::{DiagnosticEnvelope, DiagnosticsSink};
pub use dispatch::{CallResult, DispatchMode, Dispatcher, Drained};
pub use dry_run::DryRunSurface;
pub use executor::{ExecutionError, ExecutionOutcome, Executor};
pub use marshal::{ItemsMode, MarshalError, Marshalled, Marshaller, DEFAULT_SEARCH_RADIUS};
pub use runner::{CancelToken, FailedCall, ReplayError, ReplayReport, ReplayRunner};
pub use scheduler::{SchedulerError, TickScheduler, WaitOutcome, MIN_SPEED};
pub use session::SessionGuard;
pub use surface::{
    CallValue, Direction, EntityHandle, ExecutionSurface, MarshalledCall, Position, Prototype,
    SurfaceError,
};
