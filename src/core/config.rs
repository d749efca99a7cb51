//! # Supervisor configuration.
//!
//! [`Config`] centralizes every knob the supervisor reads: where credentials
//! live and land, which process names mean "busy" and "serving", the
//! lifecycle hook names, and the timing of the reconciliation loop and its
//! retries.
//!
//! # Example
//! ```
//! use std::time::Duration;
//! use runnervisor::Config;
//!
//! let mut cfg = Config::new("apache/airflow");
//! cfg.poll_interval = Duration::from_secs(30);
//!
//! assert_eq!(cfg.worker_process, "Runner.Worker");
//! assert_eq!(cfg.ready_hook, "WaitForInstanceReportReady");
//! ```

use std::path::PathBuf;
use std::time::Duration;

use crate::policies::RetryPolicy;

/// Global configuration for the supervisor.
#[derive(Clone, Debug)]
pub struct Config {
    /// Repository the credential slots are provisioned for.
    pub repo: String,
    /// Root of the credential hierarchy in the parameter store.
    pub param_prefix: String,
    /// Directory the slot's credential files are written into.
    pub output_dir: PathBuf,
    /// Local user that gets ownership of the credential files
    /// (`None` = leave ownership alone).
    pub runner_user: Option<String>,
    /// Command name of the short-lived process that executes one job;
    /// its presence means the host is busy.
    pub worker_process: String,
    /// Command name of the long-lived process that waits for jobs;
    /// its disappearance means the host is fully drained.
    pub listener_process: String,
    /// Service unit stopped (gracefully) when the group asks to terminate.
    pub runner_unit: String,
    /// Lifecycle hook completed once the host is ready for work.
    pub ready_hook: String,
    /// Lifecycle hook completed once the host is fully drained.
    pub terminate_hook: String,
    /// Reconciliation interval: lifecycle check plus liveness sweep.
    pub poll_interval: Duration,
    /// Poll period for one lock acquisition attempt.
    pub lock_retry_period: Duration,
    /// Total budget for one lock acquisition attempt; kept tiny so a taken
    /// slot is skipped immediately.
    pub lock_retry_timeout: Duration,
    /// Retry budget for scale-in-protection calls.
    pub protection_retry: RetryPolicy,
}

impl Config {
    /// Returns the defaults for the given repository:
    /// - parameters under `/runners`, files to `/home/runner/actions-runner`
    ///   owned by `runner`;
    /// - `Runner.Worker` / `Runner.Listener` process names and the
    ///   `actions.runner` service unit;
    /// - `WaitForInstanceReportReady` / `OkayToTerminate` hooks;
    /// - 30s reconciliation interval, microsecond lock attempts.
    pub fn new(repo: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            param_prefix: "/runners".to_string(),
            output_dir: PathBuf::from("/home/runner/actions-runner"),
            runner_user: Some("runner".to_string()),
            worker_process: "Runner.Worker".to_string(),
            listener_process: "Runner.Listener".to_string(),
            runner_unit: "actions.runner".to_string(),
            ready_hook: "WaitForInstanceReportReady".to_string(),
            terminate_hook: "OkayToTerminate".to_string(),
            poll_interval: Duration::from_secs(30),
            lock_retry_period: Duration::from_micros(1),
            lock_retry_timeout: Duration::from_micros(1),
            protection_retry: RetryPolicy::default(),
        }
    }
}
