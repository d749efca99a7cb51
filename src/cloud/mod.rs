//! External coordination seams: autoscaling control plane, distributed lock
//! service, distributed job counter, and the parameter/credential store.
//!
//! The supervisor core never talks to a concrete cloud SDK; every external
//! collaborator sits behind one of the traits in this module, the same way
//! the rest of the crate puts tasks and subscribers behind traits. The
//! [`memory`] submodule provides in-process implementations used by tests,
//! doc examples, and local demos.
//!
//! ## Contents
//! - [`LifecycleState`] the instance's state within the autoscaling group
//! - [`AutoScalingApi`] describe/protect/complete-hook operations
//! - [`LockService`] / [`LockHandle`] leased mutual exclusion over slot keys
//! - [`JobCounter`] floor-bounded atomic decrement
//! - [`ParameterStore`] credential material and candidate-list cache
//! - [`LifecycleCoordinator`] the stateful wrapper the supervisor drives

mod coordinator;
pub mod memory;

pub use coordinator::LifecycleCoordinator;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{CloudError, CounterError, LockError, ParamError};

/// Lifecycle state of an instance within its autoscaling group.
///
/// The group owns this value; the supervisor only reads it and must treat a
/// read as possibly one reconciliation interval stale. Unrecognized states
/// pass through as [`LifecycleState::Other`] so that new control-plane states
/// never break the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleState {
    /// Waiting on the launch lifecycle hook.
    PendingWait,
    /// Fully in service.
    InService,
    /// Waiting on the termination lifecycle hook.
    TerminatingWait,
    /// The control plane could not be queried or the instance could not be
    /// uniquely resolved.
    Unknown,
    /// Any other state string, passed through untouched.
    Other(String),
}

impl LifecycleState {
    /// Parses the control plane's state string.
    pub fn parse(s: &str) -> Self {
        match s {
            "Pending:Wait" => LifecycleState::PendingWait,
            "InService" => LifecycleState::InService,
            "Terminating:Wait" => LifecycleState::TerminatingWait,
            other => LifecycleState::Other(other.to_string()),
        }
    }

    /// Returns the control plane's representation of this state.
    pub fn as_str(&self) -> &str {
        match self {
            LifecycleState::PendingWait => "Pending:Wait",
            LifecycleState::InService => "InService",
            LifecycleState::TerminatingWait => "Terminating:Wait",
            LifecycleState::Unknown => "UNKNOWN",
            LifecycleState::Other(s) => s,
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the control plane knows about one instance.
#[derive(Debug, Clone)]
pub struct InstanceDetails {
    /// Name of the autoscaling group the instance belongs to.
    pub group_name: String,
    /// Current lifecycle state.
    pub lifecycle_state: LifecycleState,
    /// Whether scale-in protection is currently set.
    pub protected: bool,
}

/// Autoscaling control-plane operations, each idempotent and retry-safe.
#[async_trait]
pub trait AutoScalingApi: Send + Sync {
    /// Describes the given instance, or `None` if the control plane cannot
    /// uniquely resolve it.
    async fn describe_instance(
        &self,
        instance_id: &str,
    ) -> Result<Option<InstanceDetails>, CloudError>;

    /// Completes a named lifecycle hook with the given result.
    ///
    /// Completing an already-completed hook is a control-plane error; callers
    /// treat that as idempotent success.
    async fn complete_lifecycle_action(
        &self,
        group_name: &str,
        instance_id: &str,
        hook_name: &str,
        result: &str,
    ) -> Result<(), CloudError>;

    /// Sets or clears scale-in protection on the instance.
    ///
    /// May be rejected while the instance is mid-transition; callers retry
    /// with backoff.
    async fn set_instance_protection(
        &self,
        group_name: &str,
        instance_id: &str,
        protect: bool,
    ) -> Result<(), CloudError>;
}

/// Ownership token over a locked key.
///
/// The lock is released when the handle is dropped; the service's lease
/// expiry covers the crash case where drop never runs.
pub trait LockHandle: Send {
    /// The locked key.
    fn key(&self) -> &str;
}

/// Distributed, leased mutual exclusion.
#[async_trait]
pub trait LockService: Send + Sync {
    /// Attempts to acquire `key`, polling every `retry_period` for at most
    /// `retry_timeout` before giving up with [`LockError::Unavailable`].
    async fn acquire(
        &self,
        key: &str,
        retry_period: Duration,
        retry_timeout: Duration,
    ) -> Result<Box<dyn LockHandle>, LockError>;
}

/// Distributed non-negative job counter.
#[async_trait]
pub trait JobCounter: Send + Sync {
    /// Decrements the counter by one unless it is already at its floor.
    ///
    /// The floor is enforced by the service's compare-and-update contract,
    /// never client-side. Returns the new value.
    async fn decrement(&self) -> Result<i64, CounterError>;
}

/// One named parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    /// Full hierarchical name, e.g. `/runners/apache/airflow/3/config`.
    pub name: String,
    /// Decrypted value.
    pub value: String,
}

/// Hierarchical parameter/credential store.
#[async_trait]
pub trait ParameterStore: Send + Sync {
    /// Reads one parameter by full name.
    async fn get(&self, name: &str) -> Result<String, ParamError>;

    /// Lists the direct children of `path` (non-recursive), with values.
    async fn get_by_path(&self, path: &str) -> Result<Vec<Parameter>, ParamError>;

    /// Lists all parameter names under `path`, recursively.
    async fn list_recursive(&self, path: &str) -> Result<Vec<String>, ParamError>;

    /// Writes `name` only if it does not exist yet.
    ///
    /// Losing the race surfaces as [`ParamError::AlreadyExists`].
    async fn put_if_absent(&self, name: &str, value: &str) -> Result<(), ParamError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_known_states() {
        assert_eq!(
            LifecycleState::parse("Pending:Wait"),
            LifecycleState::PendingWait
        );
        assert_eq!(LifecycleState::parse("InService"), LifecycleState::InService);
        assert_eq!(
            LifecycleState::parse("Terminating:Wait"),
            LifecycleState::TerminatingWait
        );
    }

    #[test]
    fn unrecognized_states_pass_through() {
        let state = LifecycleState::parse("Pending:Proceed");
        assert_eq!(state, LifecycleState::Other("Pending:Proceed".into()));
        assert_eq!(state.as_str(), "Pending:Proceed");
    }
}
