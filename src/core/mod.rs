//! Runtime core: configuration, identity, and the supervisor loop.
//!
//! The only long-lived object here is the [`Supervisor`], which owns the
//! whole host lifecycle from credential acquisition to drain completion.
//!
//! Internal modules:
//! - [`supervisor`]: the event/tick-driven state machine;
//! - [`builder`]: wires the external seams together;
//! - [`config`]: every knob in one place;
//! - [`context`]: instance identity, threaded explicitly;
//! - [`service`]: graceful stop of the local runner unit;
//! - [`shutdown`]: termination signal handling.

mod builder;
mod config;
mod context;
mod service;
mod shutdown;
mod supervisor;

pub use builder::SupervisorBuilder;
pub use config::Config;
pub use context::InstanceContext;
pub use service::{RunnerService, SystemdUnit};
pub use shutdown::wait_for_shutdown_signal;
pub use supervisor::Supervisor;
