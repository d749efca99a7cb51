//! Supervisor lifecycle events.
//!
//! [`Event`] classifies everything the supervisor reports outward: credential
//! acquisition, watched-process churn, protection flag changes, queue counter
//! updates, and the drain sequence. Events are handed to the
//! [`SubscriberSet`](crate::SubscriberSet) **sequentially on the control
//! thread**, in the exact order the supervisor produced them.
//!
//! ## Event flow
//! ```text
//! Supervisor ──► SubscriberSet::emit(&Event)
//!                    ├──► LogWriter   (log facade)
//!                    ├──► SdNotify    (readiness/status push)
//!                    └──► custom subscribers
//! ```

/// How a watched process entered the watched set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveredVia {
    /// Pushed by the kernel process-event channel.
    Connector,
    /// Found by the periodic process-table sweep.
    Poll,
}

/// Events emitted by the supervisor over its lifetime.
///
/// The variants follow the supervisor's phases: credential acquisition,
/// armed monitoring, the protected/idle seesaw, and the drain sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A credential slot was locked and its material written locally.
    SlotAcquired {
        /// Index of the slot within the repository's provisioned set.
        index: String,
    },

    /// Startup finished: the event channel is armed and the initial
    /// process-table scan has seeded the watched set.
    MonitoringArmed,

    /// A job-worker process entered the watched set.
    WorkerSeen {
        /// Process id of the worker.
        pid: i32,
        /// Which channel discovered it.
        via: DiscoveredVia,
    },

    /// A watched job-worker process left the watched set.
    WorkerGone {
        /// Process id of the worker.
        pid: i32,
    },

    /// Scale-in protection was applied (or released) on the control plane.
    ProtectionChanged {
        /// New value of the protection flag.
        protected: bool,
    },

    /// A protection change could not be applied within its retry budget and
    /// was deferred to the next reconciliation tick.
    ProtectionDeferred {
        /// The value that failed to apply.
        protect: bool,
    },

    /// The distributed job counter was decremented for a detected job start.
    QueueDecremented {
        /// Counter value after the decrement.
        remaining: i64,
    },

    /// The distributed job counter was already at its floor; the decrement
    /// was refused (benign double-count).
    QueueAtFloor,

    /// The autoscaling group asked to terminate this instance; the runner
    /// service is being stopped gracefully.
    DrainStarted,

    /// The job-listener process is gone; the terminal lifecycle hook was
    /// completed and the supervisor is about to exit.
    DrainCompleted,

    /// An interrupt/termination signal or caller cancellation was observed.
    ShutdownRequested,
}
