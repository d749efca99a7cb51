//! Builder wiring the supervisor's external seams together.

use std::sync::Arc;

use crate::cloud::{
    AutoScalingApi, JobCounter, LifecycleCoordinator, LockService, ParameterStore,
};
use crate::core::{Config, InstanceContext, RunnerService, Supervisor, SystemdUnit};
use crate::creds::CredentialAcquirer;
use crate::proc::{ProcFs, ProcessTable};
use crate::subscribers::{Subscribe, SubscriberSet};

/// Builder for constructing a [`Supervisor`].
///
/// The cloud seams and the instance context are required; the process table
/// defaults to `/proc` and the runner service to the configured systemd
/// unit.
pub struct SupervisorBuilder {
    cfg: Config,
    ctx: Option<InstanceContext>,
    autoscaling: Option<Arc<dyn AutoScalingApi>>,
    locks: Option<Arc<dyn LockService>>,
    counter: Option<Arc<dyn JobCounter>>,
    params: Option<Arc<dyn ParameterStore>>,
    table: Option<Arc<dyn ProcessTable>>,
    service: Option<Arc<dyn RunnerService>>,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl SupervisorBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            ctx: None,
            autoscaling: None,
            locks: None,
            counter: None,
            params: None,
            table: None,
            service: None,
            subscribers: Vec::new(),
        }
    }

    /// Sets the instance identity (required).
    pub fn with_context(mut self, ctx: InstanceContext) -> Self {
        self.ctx = Some(ctx);
        self
    }

    /// Sets the autoscaling control plane client (required).
    pub fn with_autoscaling(mut self, api: Arc<dyn AutoScalingApi>) -> Self {
        self.autoscaling = Some(api);
        self
    }

    /// Sets the distributed lock service (required).
    pub fn with_lock_service(mut self, locks: Arc<dyn LockService>) -> Self {
        self.locks = Some(locks);
        self
    }

    /// Sets the distributed job counter (required).
    pub fn with_job_counter(mut self, counter: Arc<dyn JobCounter>) -> Self {
        self.counter = Some(counter);
        self
    }

    /// Sets the parameter/credential store (required).
    pub fn with_parameter_store(mut self, params: Arc<dyn ParameterStore>) -> Self {
        self.params = Some(params);
        self
    }

    /// Overrides the process table (default: `/proc`).
    pub fn with_process_table(mut self, table: Arc<dyn ProcessTable>) -> Self {
        self.table = Some(table);
        self
    }

    /// Overrides the runner service control (default: the configured
    /// systemd unit).
    pub fn with_runner_service(mut self, service: Arc<dyn RunnerService>) -> Self {
        self.service = Some(service);
        self
    }

    /// Sets event subscribers for observability.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Builds the supervisor.
    ///
    /// # Panics
    /// Panics if any required seam was not provided.
    pub fn build(self) -> Supervisor {
        let ctx = self.ctx.expect("instance context must be provided");
        let autoscaling = self
            .autoscaling
            .expect("autoscaling client must be provided");
        let locks = self.locks.expect("lock service must be provided");
        let counter = self.counter.expect("job counter must be provided");
        let params = self.params.expect("parameter store must be provided");
        let table = self.table.unwrap_or_else(|| Arc::new(ProcFs));
        let service = self
            .service
            .unwrap_or_else(|| Arc::new(SystemdUnit::new(self.cfg.runner_unit.clone())));

        let coordinator =
            LifecycleCoordinator::new(autoscaling, &ctx, self.cfg.protection_retry);
        let acquirer = CredentialAcquirer::new(params, locks, self.cfg.clone());
        let subs = SubscriberSet::new(self.subscribers);

        Supervisor::new_internal(self.cfg, coordinator, acquirer, counter, table, service, subs)
    }
}
