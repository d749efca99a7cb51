//! Error types used by the runnervisor runtime and its external seams.
//!
//! This module defines one enum per concern:
//!
//! - [`SupervisorError`] — startup-time failures that abort the process.
//! - [`ParamError`] / [`LockError`] / [`CounterError`] / [`CloudError`] —
//!   errors surfaced by the external coordination services.
//! - [`MonitorError`] / [`WireError`] — kernel event channel failures.
//!
//! Propagation policy: only startup-time, unrecoverable provisioning problems
//! are fatal. Everything encountered after monitoring has armed is contained
//! locally and repaired by the next reconciliation tick.

use std::io;
use thiserror::Error;

/// Errors that abort supervisor startup.
///
/// Once [`Supervisor::run`](crate::Supervisor::run) has armed monitoring,
/// none of these are produced any more; transient trouble is logged and
/// retried on the next tick instead.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SupervisorError {
    /// The locked credential slot is missing required parameters.
    ///
    /// This indicates corrupted provisioning, not contention, and is fatal.
    #[error("credential slot {index} is missing expected parameters: {missing:?}")]
    IncompleteSlot {
        /// Index of the slot that was locked.
        index: String,
        /// Parameter basenames that were expected but absent.
        missing: Vec<String>,
    },

    /// No credential slots are provisioned for the repository at all.
    #[error("no credential slots provisioned for {repo:?}")]
    NoSlots {
        /// Repository the sweep was enumerated for.
        repo: String,
    },

    /// The parameter store failed while enumerating or reading slot material.
    #[error("parameter store: {0}")]
    Params(#[from] ParamError),

    /// The kernel event channel could not be opened, filtered, or read.
    #[error("process event monitor: {0}")]
    Monitor(#[from] MonitorError),

    /// Local filesystem failure while writing slot material.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Errors produced by the parameter/credential store.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ParamError {
    /// The named parameter does not exist.
    #[error("parameter {0:?} not found")]
    NotFound(String),

    /// A conditional write lost the race to another writer.
    #[error("parameter {0:?} already exists")]
    AlreadyExists(String),

    /// Any other service-side failure.
    #[error("parameter store error: {0}")]
    Service(String),
}

/// Errors produced by the distributed lock service.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum LockError {
    /// The lock is held by someone else and the retry budget ran out.
    #[error("lock unavailable")]
    Unavailable,

    /// Any other service-side failure.
    #[error("lock service error: {0}")]
    Service(String),
}

/// Errors produced by the distributed job counter.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum CounterError {
    /// The counter is already at its floor; the decrement was refused.
    ///
    /// Benign: it only means protection was double-counted somewhere.
    #[error("counter already at floor")]
    AtFloor,

    /// Any other service-side failure.
    #[error("counter service error: {0}")]
    Service(String),
}

/// Error produced by the autoscaling control plane.
///
/// The control plane may reject calls while the instance is mid-transition;
/// callers retry with backoff and defer to the next tick on exhaustion.
#[derive(Error, Debug)]
#[error("control plane error: {0}")]
pub struct CloudError(pub String);

/// Errors produced by the kernel process-event channel.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum MonitorError {
    /// The connector socket could not be created.
    #[error("failed to open process event socket: {0}")]
    Open(#[source] io::Error),

    /// The in-kernel filter program could not be attached.
    #[error("failed to attach event filter: {0}")]
    Filter(#[source] io::Error),

    /// Binding or the multicast-listen subscription failed.
    #[error("failed to subscribe to process events: {0}")]
    Subscribe(#[source] io::Error),

    /// A receive failed with something other than buffer overflow.
    ///
    /// Overflow (`ENOBUFS`) is swallowed inside the monitor; the periodic
    /// poll compensates for the lost events.
    #[error("receive failed: {0}")]
    Recv(#[from] io::Error),
}

/// Errors produced while decoding a raw connector datagram.
#[non_exhaustive]
#[derive(Error, Debug, PartialEq, Eq)]
pub enum WireError {
    /// The datagram is shorter than the layered headers require.
    #[error("datagram truncated: need {need} bytes, have {have}")]
    Truncated {
        /// Bytes required to decode up to the failing field.
        need: usize,
        /// Bytes actually present.
        have: usize,
    },
}
