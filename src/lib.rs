//! # runnervisor
//!
//! **Runnervisor** supervises one ephemeral CI-runner host inside a cloud
//! autoscaling group: it obtains exclusive runner credentials, detects
//! locally when the host is actually executing a job, and coordinates that
//! fact with the group so the group never terminates a busy instance and
//! never keeps an idle one protected.
//!
//! ## Order of operations
//!
//! 1. **Obtain credentials.** A finite set of credential bundles is
//!    pre-provisioned per repository. Each host sweeps the candidate slots
//!    in a random order under a distributed lock until it wins one, then
//!    writes the slot's files locally. Locking matters: a runner started on
//!    already-used credentials waits forever without erroring.
//! 2. **Report in service.** Complete the group's launch lifecycle hook so
//!    the instance is marked `InService`.
//! 3. **Watch for jobs.** The kernel's process connector pushes an event for
//!    every exec/exit on the host; an in-kernel packet filter drops
//!    everything except the two event kinds we care about. When a job-worker
//!    process appears, the instance is protected from scale-in and the
//!    distributed job counter is decremented; when the last worker exits,
//!    protection is released. The channel is datagram-based and lossy, so a
//!    periodic poll of the process table repairs anything missed.
//! 4. **Drain on request.** When the group moves the instance to
//!    `Terminating:Wait`, the runner service is stopped gracefully (in-flight
//!    job allowed to finish) and, once the job-listener process is gone, the
//!    termination hook is completed and the supervisor exits.
//!
//! ## Architecture
//! ```text
//!     ┌──────────────────┐    ┌─────────────────┐
//!     │ ParameterStore   │    │  LockService    │
//!     └────────┬─────────┘    └────────┬────────┘
//!              └───────┬───────────────┘
//!                      ▼
//!          CredentialAcquirer ──► HeldSlot (lock held for the whole run)
//!                      │
//!                      ▼
//! ┌───────────────────────────────────────────────────────────┐
//! │  Supervisor (single-threaded select loop)                 │
//! │  - watched set of job-worker pids                         │
//! │  - protection / drain state machine                       │
//! │  - periodic reconciliation tick                           │
//! └───┬──────────────┬───────────────┬────────────────┬───────┘
//!     │              │               │                │
//!     ▼              ▼               ▼                ▼
//! ProcConnector  LifecycleCoordinator  JobCounter  SubscriberSet
//! (netlink +     (describe / hooks /   (decrement  (LogWriter,
//!  BPF filter)    protection+retry)     at start)   SdNotify, ...)
//! ```
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use runnervisor::{
//!     Config, InstanceContext, LogWriter, ProcConnector, Subscribe, Supervisor,
//!     memory::{MemoryAutoScaling, MemoryJobCounter, MemoryLockService, MemoryParameterStore},
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let ctx = InstanceContext::from_cloud_init()?;
//!     let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter)];
//!
//!     // Production wiring substitutes real control-plane clients here.
//!     let mut supervisor = Supervisor::builder(Config::new("apache/airflow"))
//!         .with_context(ctx)
//!         .with_autoscaling(MemoryAutoScaling::new("runners-asg", "i-local"))
//!         .with_lock_service(MemoryLockService::new())
//!         .with_job_counter(MemoryJobCounter::new(0))
//!         .with_parameter_store(MemoryParameterStore::new())
//!         .with_subscribers(subs)
//!         .build();
//!
//!     let mut source = ProcConnector::open()?;
//!     supervisor.run(&mut source, CancellationToken::new()).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Guarantees
//! | Area | Property |
//! |------|----------|
//! | **Protection** | converges to `watched set non-empty` within one tick, under arbitrary event loss |
//! | **Counter** | decremented exactly once per detected job start; the floor is enforced service-side |
//! | **Credentials** | at most one holder per slot; contention retries forever, corruption aborts |
//! | **Drain** | termination hook fires exactly when the listener is observed gone; protection calls cease |
//! | **Errors** | fatal only before monitoring arms; contained and tick-repaired afterwards |

mod cloud;
mod core;
mod creds;
mod error;
mod events;
mod policies;
pub mod proc;
mod subscribers;

// ---- Public re-exports ----

pub use cloud::memory;
pub use cloud::{
    AutoScalingApi, InstanceDetails, JobCounter, LifecycleCoordinator, LifecycleState, LockHandle,
    LockService, Parameter, ParameterStore,
};
pub use crate::core::{
    wait_for_shutdown_signal, Config, InstanceContext, RunnerService, Supervisor,
    SupervisorBuilder, SystemdUnit,
};
pub use creds::{CredentialAcquirer, HeldSlot};
pub use error::{
    CloudError, CounterError, LockError, MonitorError, ParamError, SupervisorError, WireError,
};
pub use events::{DiscoveredVia, Event};
pub use policies::{BackoffPolicy, JitterPolicy, RetryPolicy};
pub use proc::{EventSource, ProcConnector, ProcEvent, ProcFs, ProcessTable};
pub use subscribers::{LogWriter, SdNotify, Subscribe, SubscriberSet};
