//! Kernel process-event channel and local process inspection.
//!
//! The kernel's process connector multicasts a datagram for every fork, exec,
//! exit (and more) on the host. This module turns that firehose into a typed
//! stream of the two events the supervisor cares about:
//!
//! ```text
//! kernel ──► connector socket ──► in-kernel filter ──► decoder ──► ProcEvent
//!                                 (proc/filter.rs)     (proc/wire.rs)
//! ```
//!
//! - [`wire`]: fixed-layout record types and explicit-offset decoding
//! - [`filter`]: the socket-filter program that drops everything except
//!   EXEC/EXIT process-connector packets before user space sees them
//! - [`ProcConnector`]: the socket setup and the async receive loop
//! - [`ProcessTable`] / [`ProcFs`]: the `/proc` view used to seed the watched
//!   set and to repair missed notifications
//!
//! Delivery over the connector is best-effort (datagram semantics): a burst
//! can overflow the receive buffer and the loss is accepted, compensated by
//! the supervisor's periodic poll.

pub mod filter;
mod monitor;
mod table;
pub mod wire;

pub use monitor::{EventSource, ProcConnector};
pub use table::{ProcFs, ProcessTable};
pub use wire::ProcEvent;
