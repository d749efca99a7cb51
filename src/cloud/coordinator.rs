//! # LifecycleCoordinator: the supervisor's view of the autoscaling group.
//!
//! Wraps an [`AutoScalingApi`] with the error containment the loop relies on:
//!
//! - [`lifecycle_state`](LifecycleCoordinator::lifecycle_state) never fails —
//!   every control-plane problem maps to [`LifecycleState::Unknown`], which
//!   the loop treats as "retry on the next tick";
//! - [`complete_hook`](LifecycleCoordinator::complete_hook) is idempotent —
//!   a hook that was already completed (say, by a previous incarnation of
//!   this process) logs a warning and moves on;
//! - [`set_protection`](LifecycleCoordinator::set_protection) retries under a
//!   bounded [`RetryPolicy`] and reports whether the flag stuck, so the loop
//!   can re-assert it on the next tick instead of failing.
//!
//! The coordinator also owns the group-name cache: the group is learned from
//! the first successful describe and reused for every later call, replacing
//! the process-wide globals the problem is usually solved with.

use std::sync::Arc;

use log::{debug, info, warn};

use crate::cloud::{AutoScalingApi, LifecycleState};
use crate::core::InstanceContext;
use crate::policies::RetryPolicy;

/// Result a completed lifecycle hook reports to the control plane.
const HOOK_RESULT_CONTINUE: &str = "CONTINUE";

/// Stateful control-plane wrapper driven by the supervisor loop.
pub struct LifecycleCoordinator {
    api: Arc<dyn AutoScalingApi>,
    instance_id: String,
    group: Option<String>,
    draining: bool,
    retry: RetryPolicy,
}

impl LifecycleCoordinator {
    /// Creates a coordinator for the given instance.
    pub fn new(api: Arc<dyn AutoScalingApi>, ctx: &InstanceContext, retry: RetryPolicy) -> Self {
        Self {
            api,
            instance_id: ctx.instance_id().to_string(),
            group: None,
            draining: false,
            retry,
        }
    }

    /// The autoscaling group this instance belongs to, once learned.
    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    /// Marks the terminating lifecycle as entered.
    ///
    /// Irreversible: from here on protection calls are refused by contract.
    pub fn mark_draining(&mut self) {
        self.draining = true;
    }

    /// Reads the instance's lifecycle state.
    ///
    /// Never fails: control-plane errors and ambiguous lookups both come back
    /// as [`LifecycleState::Unknown`], to be retried on the next tick. The
    /// group name is cached from the first successful read.
    pub async fn lifecycle_state(&mut self) -> LifecycleState {
        match self.api.describe_instance(&self.instance_id).await {
            Ok(Some(details)) => {
                if self.group.is_none() {
                    self.group = Some(details.group_name);
                }
                details.lifecycle_state
            }
            Ok(None) => {
                debug!("instance {} not resolvable in any group", self.instance_id);
                LifecycleState::Unknown
            }
            Err(err) => {
                warn!("failed to describe instance {}: {err}", self.instance_id);
                LifecycleState::Unknown
            }
        }
    }

    /// Completes the named lifecycle hook with `CONTINUE`.
    ///
    /// Idempotent: if the hook was already completed (a re-run after restart,
    /// or a race with the poll path) the control-plane error is logged, not
    /// propagated.
    pub async fn complete_hook(&mut self, hook_name: &str) {
        let Some(group) = self.group.clone() else {
            warn!("cannot complete hook {hook_name}: group not known yet");
            return;
        };

        match self
            .api
            .complete_lifecycle_action(&group, &self.instance_id, hook_name, HOOK_RESULT_CONTINUE)
            .await
        {
            Ok(()) => info!(
                "lifecycle hook {hook_name} set to {HOOK_RESULT_CONTINUE} instance={}",
                self.instance_id
            ),
            // May already have been completed by an earlier run; not an error.
            Err(err) => warn!("failed to complete lifecycle hook {hook_name}: {err}"),
        }
    }

    /// Sets or clears scale-in protection, retrying under the configured
    /// policy.
    ///
    /// Returns whether the flag was applied. Returns `false` without calling
    /// the control plane when draining has begun (protection is meaningless
    /// once termination is in motion) or when the instance is not part of a
    /// group.
    pub async fn set_protection(&mut self, protect: bool) -> bool {
        if self.draining {
            info!("not setting instance protection, already in the terminating lifecycle");
            return false;
        }
        let Some(group) = self.group.clone() else {
            // Not part of an autoscaling group.
            return false;
        };

        let api = Arc::clone(&self.api);
        let instance_id = self.instance_id.clone();
        let result = self
            .retry
            .run(|| {
                let api = Arc::clone(&api);
                let group = group.clone();
                let instance_id = instance_id.clone();
                async move {
                    api.set_instance_protection(&group, &instance_id, protect)
                        .await
                }
            })
            .await;

        match result {
            Ok(()) => true,
            Err(err) => {
                // The group may still hold the instance in a transitional
                // state (e.g. protection requested before Pending:Proceed
                // finished). The next reconciliation tick re-attempts.
                warn!("failed to set scale-in protection: {err}");
                false
            }
        }
    }
}
