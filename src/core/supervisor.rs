//! # Supervisor: the runner-lifecycle state machine.
//!
//! One supervisor runs per host, single-threaded and readiness-driven. It
//! owns the watched-process set and keeps three external facts converged:
//! the scale-in-protection flag, the lifecycle hooks, and the distributed
//! job counter.
//!
//! ## States (per host-process lifetime)
//! ```text
//! ACQUIRING_CREDENTIALS ──► MONITORING ──► {IDLE ⇄ PROTECTED} ──► DRAINING ──► TERMINATED
//!        │                      │                 │                   │
//!   lock one slot       ready hook + seed    watched set          listener
//!   (infinite sweep)    scan of /proc        empty/non-empty      exit ends run()
//! ```
//!
//! ## The loop
//! A single `select!` waits on three sources, strictly one at a time, in
//! delivery order:
//! - **cancellation / OS signal** → exit immediately, no further side
//!   effects (the interval timer dies with the loop);
//! - **periodic tick** → reconciliation: lifecycle check, liveness sweep,
//!   protection repair;
//! - **decoded process event** → EXEC/EXIT handling.
//!
//! Blocking control-plane calls run inline on this thread; they are short
//! relative to the tick interval, and a hanging call delaying event
//! processing is an accepted tradeoff at this event rate.
//!
//! ## Loss tolerance
//! The event channel is best-effort. Every transition the events drive is
//! therefore also derivable from the periodic tick:
//! - missed EXEC → the tick's process scan finds the worker;
//! - missed EXIT → the liveness sweep notices the corpse;
//! - missed protection change → re-asserted while the watched set is
//!   non-empty and the last attempt did not stick.
//!
//! Within one reconciliation interval, the protection flag and the watched
//! set's emptiness converge to the same truth value regardless of event
//! loss.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::cloud::{JobCounter, LifecycleCoordinator, LifecycleState};
use crate::core::{shutdown, Config, RunnerService, SupervisorBuilder};
use crate::creds::CredentialAcquirer;
use crate::error::{CounterError, SupervisorError};
use crate::events::{DiscoveredVia, Event};
use crate::proc::{EventSource, ProcEvent, ProcessTable};
use crate::subscribers::SubscriberSet;

/// What a handler decided about the loop's future.
#[derive(PartialEq, Eq)]
enum Outcome {
    Continue,
    DrainComplete,
}

/// Per-host runner lifecycle supervisor.
///
/// Constructed via [`Supervisor::builder`]; driven by [`Supervisor::run`].
pub struct Supervisor {
    cfg: Config,
    coordinator: LifecycleCoordinator,
    acquirer: CredentialAcquirer,
    counter: Arc<dyn JobCounter>,
    table: Arc<dyn ProcessTable>,
    service: Arc<dyn RunnerService>,
    subs: SubscriberSet,

    /// Job-worker processes currently believed to be running.
    watched: HashMap<i32, DiscoveredVia>,
    /// Last protection value the control plane accepted; `None` until the
    /// first successful call.
    protected: Option<bool>,
    /// Whether the terminating lifecycle has been entered. Never reverts.
    draining: bool,
}

impl Supervisor {
    /// Starts building a supervisor for the given configuration.
    pub fn builder(cfg: Config) -> SupervisorBuilder {
        SupervisorBuilder::new(cfg)
    }

    pub(crate) fn new_internal(
        cfg: Config,
        coordinator: LifecycleCoordinator,
        acquirer: CredentialAcquirer,
        counter: Arc<dyn JobCounter>,
        table: Arc<dyn ProcessTable>,
        service: Arc<dyn RunnerService>,
        subs: SubscriberSet,
    ) -> Self {
        Self {
            cfg,
            coordinator,
            acquirer,
            counter,
            table,
            service,
            subs,
            watched: HashMap::new(),
            protected: None,
            draining: false,
        }
    }

    /// Runs the supervisor until drain completion, a termination signal, or
    /// caller cancellation.
    ///
    /// The credential slot's lock is held for the whole run and released on
    /// every exit path. Startup errors (no slots, corrupt slot material, a
    /// dead event channel) are the only fatal outcomes.
    pub async fn run(
        &mut self,
        source: &mut dyn EventSource,
        token: CancellationToken,
    ) -> Result<(), SupervisorError> {
        let slot = self.acquirer.acquire().await?;
        self.subs
            .emit(&Event::SlotAcquired {
                index: slot.index().to_string(),
            })
            .await;

        if self.coordinator.lifecycle_state().await == LifecycleState::PendingWait {
            self.coordinator.complete_hook(&self.cfg.ready_hook).await;
        }

        self.subs.emit(&Event::MonitoringArmed).await;
        info!("watching for {} processes", self.cfg.worker_process);

        // Events delivered before the channel was armed are gone; seed the
        // watched set from the process table instead.
        if self.scan().await == Outcome::DrainComplete {
            return Ok(());
        }

        let mut tick = time::interval_at(
            time::Instant::now() + self.cfg.poll_interval,
            self.cfg.poll_interval,
        );
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let signal = shutdown::wait_for_shutdown_signal();
        tokio::pin!(signal);

        loop {
            tokio::select! {
                biased;

                _ = token.cancelled() => {
                    self.subs.emit(&Event::ShutdownRequested).await;
                    return Ok(());
                }
                _ = &mut signal => {
                    info!("got termination signal, exiting");
                    self.subs.emit(&Event::ShutdownRequested).await;
                    return Ok(());
                }
                _ = tick.tick() => {
                    if self.reconcile().await == Outcome::DrainComplete {
                        return Ok(());
                    }
                }
                event = source.next_event() => match event {
                    Ok(event) => {
                        if self.handle_event(event).await == Outcome::DrainComplete {
                            return Ok(());
                        }
                    }
                    Err(err) => return Err(err.into()),
                },
            }
        }
    }

    async fn handle_event(&mut self, event: ProcEvent) -> Outcome {
        match event {
            ProcEvent::Exec { pid, .. } => {
                self.handle_exec(pid).await;
                Outcome::Continue
            }
            ProcEvent::Exit { pid, .. } => self.handle_exit(pid).await,
            // The filter admits only EXEC/EXIT; tolerate anything else.
            ProcEvent::Other { .. } => Outcome::Continue,
        }
    }

    async fn handle_exec(&mut self, pid: i32) {
        if self.watched.contains_key(&pid) {
            return;
        }
        // A process that exited before we could inspect it was too
        // short-lived to matter.
        match self.table.comm(pid) {
            Some(name) if name == self.cfg.worker_process => {
                info!("found new {name} process {pid}");
                self.watch(pid, DiscoveredVia::Connector).await;
            }
            _ => {}
        }
    }

    async fn handle_exit(&mut self, pid: i32) -> Outcome {
        if self.watched.remove(&pid).is_some() {
            info!("watched process {pid} exited");
            self.subs.emit(&Event::WorkerGone { pid }).await;
            if self.watched.is_empty() {
                info!("watching no processes, disabling termination protection");
                self.protect(false).await;
            }
            return Outcome::Continue;
        }

        if self.draining {
            if let Some(name) = self.table.comm(pid) {
                if name == self.cfg.listener_process {
                    info!("{name} process {pid} exited, okay to terminate");
                    self.drain_complete().await;
                    return Outcome::DrainComplete;
                }
            }
        }
        Outcome::Continue
    }

    /// Adds a worker to the watched set, protecting the instance on the
    /// empty→non-empty transition and counting the job start.
    async fn watch(&mut self, pid: i32, via: DiscoveredVia) {
        let was_empty = self.watched.is_empty();
        self.watched.insert(pid, via);
        self.subs.emit(&Event::WorkerSeen { pid, via }).await;

        if was_empty {
            self.protect(true).await;
        }

        // Fire and forget: a refused decrement only means the queue length
        // was double-counted, which costs one spare instance, not safety.
        match self.counter.decrement().await {
            Ok(remaining) => {
                info!("updated job queue length: {remaining}");
                self.subs.emit(&Event::QueueDecremented { remaining }).await;
            }
            Err(CounterError::AtFloor) => {
                warn!("job queue was already 0, we won't decrease it any further");
                self.subs.emit(&Event::QueueAtFloor).await;
            }
            Err(err) => warn!("job queue decrement failed: {err}"),
        }
    }

    /// One reconciliation tick: lifecycle check, then liveness sweep or
    /// rescan.
    async fn reconcile(&mut self) -> Outcome {
        if !self.draining {
            match self.coordinator.lifecycle_state().await {
                LifecycleState::TerminatingWait => {
                    self.draining = true;
                    self.coordinator.mark_draining();
                    self.subs.emit(&Event::DrainStarted).await;
                    if let Err(err) = self.service.stop().await {
                        warn!("failed to stop runner service: {err}");
                    }
                }
                // Covers the startup race where the hook completion was
                // attempted before the group reached Pending:Wait.
                LifecycleState::PendingWait => {
                    self.coordinator.complete_hook(&self.cfg.ready_hook).await;
                }
                LifecycleState::InService => {}
                state => debug!("lifecycle state {state}, nothing to do"),
            }
        }

        if self.watched.is_empty() {
            return self.scan().await;
        }

        let pids: Vec<i32> = self.watched.keys().copied().collect();
        debug!("checking processes {pids:?} are still alive");
        for pid in pids {
            if !self.table.is_running(pid) {
                info!("proc {pid} dead but we didn't notice!");
                self.watched.remove(&pid);
                self.subs.emit(&Event::WorkerGone { pid }).await;
            }
        }

        if self.watched.is_empty() {
            info!("no watched processes left, unprotecting from scale in");
            self.protect(false).await;
        } else if self.protected != Some(true) {
            // The last protection attempt did not stick; try again.
            self.protect(true).await;
        }
        Outcome::Continue
    }

    /// Sweeps the process table for workers the event channel missed, and
    /// checks the listener is still serving.
    async fn scan(&mut self) -> Outcome {
        let mut listener_found = false;
        for (pid, name) in self.table.snapshot() {
            if name == self.cfg.worker_process
                && !self.watched.contains_key(&pid)
                && self.table.is_running(pid)
            {
                info!("found existing {name} process {pid}");
                self.watch(pid, DiscoveredVia::Poll).await;
            } else if name == self.cfg.listener_process {
                listener_found = true;
            }
        }

        if !listener_found {
            if self.draining {
                info!(
                    "{} process not found, okay to terminate",
                    self.cfg.listener_process
                );
                self.drain_complete().await;
                return Outcome::DrainComplete;
            }
            // The runner is somehow not serving at all; stop holding the
            // instance.
            self.protect(false).await;
        }
        Outcome::Continue
    }

    /// Applies a protection change, remembering only values the control
    /// plane accepted. Suppressed entirely once draining.
    async fn protect(&mut self, protect: bool) {
        if self.draining {
            debug!("suppressing protection change, already draining");
            return;
        }
        if self.coordinator.set_protection(protect).await {
            self.protected = Some(protect);
            self.subs
                .emit(&Event::ProtectionChanged { protected: protect })
                .await;
        } else {
            self.subs.emit(&Event::ProtectionDeferred { protect }).await;
        }
    }

    async fn drain_complete(&mut self) {
        self.coordinator.complete_hook(&self.cfg.terminate_hook).await;
        self.subs.emit(&Event::DrainCompleted).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::memory::{
        MemoryAutoScaling, MemoryJobCounter, MemoryLockService, MemoryParameterStore,
    };
    use crate::core::InstanceContext;
    use crate::error::MonitorError;
    use crate::policies::RetryPolicy;
    use crate::subscribers::Subscribe;
    use async_trait::async_trait;
    use std::io;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::task::JoinHandle;

    const INSTANCE: &str = "i-0abc123";
    const WORKER: &str = "Runner.Worker";
    const LISTENER: &str = "Runner.Listener";
    const LISTENER_PID: i32 = 50;

    // -- fakes --------------------------------------------------------------

    struct ChannelSource(mpsc::UnboundedReceiver<ProcEvent>);

    #[async_trait]
    impl EventSource for ChannelSource {
        async fn next_event(&mut self) -> Result<ProcEvent, MonitorError> {
            match self.0.recv().await {
                Some(event) => Ok(event),
                // Sender dropped: behave like a silent channel.
                None => std::future::pending().await,
            }
        }
    }

    struct FakeProc {
        comm: String,
        running: bool,
    }

    #[derive(Default)]
    struct FakeTable {
        procs: Mutex<HashMap<i32, FakeProc>>,
    }

    impl FakeTable {
        fn add(&self, pid: i32, comm: &str) {
            self.procs.lock().unwrap().insert(
                pid,
                FakeProc {
                    comm: comm.to_string(),
                    running: true,
                },
            );
        }

        /// Process fully reaped: no trace left.
        fn remove(&self, pid: i32) {
            self.procs.lock().unwrap().remove(&pid);
        }

        /// Process died but lingers as a zombie: comm readable, not running.
        fn zombify(&self, pid: i32) {
            if let Some(proc) = self.procs.lock().unwrap().get_mut(&pid) {
                proc.running = false;
            }
        }
    }

    impl ProcessTable for FakeTable {
        fn comm(&self, pid: i32) -> Option<String> {
            self.procs.lock().unwrap().get(&pid).map(|p| p.comm.clone())
        }

        fn is_running(&self, pid: i32) -> bool {
            self.procs
                .lock()
                .unwrap()
                .get(&pid)
                .is_some_and(|p| p.running)
        }

        fn snapshot(&self) -> Vec<(i32, String)> {
            self.procs
                .lock()
                .unwrap()
                .iter()
                .map(|(pid, p)| (*pid, p.comm.clone()))
                .collect()
        }
    }

    #[derive(Default)]
    struct FakeService {
        stops: Mutex<u32>,
    }

    impl FakeService {
        fn stop_count(&self) -> u32 {
            *self.stops.lock().unwrap()
        }
    }

    #[async_trait]
    impl RunnerService for FakeService {
        async fn stop(&self) -> io::Result<()> {
            *self.stops.lock().unwrap() += 1;
            Ok(())
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<Event>>,
    }

    impl Recorder {
        fn events(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }

        fn protection_history(&self) -> Vec<bool> {
            self.events()
                .into_iter()
                .filter_map(|e| match e {
                    Event::ProtectionChanged { protected } => Some(protected),
                    _ => None,
                })
                .collect()
        }

        fn count(&self, wanted: &Event) -> usize {
            self.events().iter().filter(|e| *e == wanted).count()
        }
    }

    #[async_trait]
    impl Subscribe for Recorder {
        async fn on_event(&self, event: &Event) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    // -- harness ------------------------------------------------------------

    struct Harness {
        asg: Arc<MemoryAutoScaling>,
        counter: Arc<MemoryJobCounter>,
        table: Arc<FakeTable>,
        service: Arc<FakeService>,
        recorder: Arc<Recorder>,
        tx: mpsc::UnboundedSender<ProcEvent>,
        token: CancellationToken,
        handle: JoinHandle<Result<(), SupervisorError>>,
        _dir: tempfile::TempDir,
    }

    impl Harness {
        /// Spawns a supervisor over in-memory seams with the listener
        /// already serving and the instance in `Pending:Wait`.
        fn spawn() -> Self {
            Self::spawn_with(|_cfg| {})
        }

        fn spawn_with(tweak: impl FnOnce(&mut Config)) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let mut cfg = Config::new("apache/airflow");
            cfg.output_dir = dir.path().to_path_buf();
            cfg.runner_user = None;
            // Keep protection retries snappy; individual tests override.
            cfg.protection_retry = RetryPolicy {
                max_elapsed: Duration::from_millis(50),
                ..RetryPolicy::default()
            };
            tweak(&mut cfg);

            let params = MemoryParameterStore::new();
            params.put("/runners/apache/airflow/runnersList", "0");
            params.put("/runners/apache/airflow/0/config", "{}");
            params.put("/runners/apache/airflow/0/credentials", "c");
            params.put("/runners/apache/airflow/0/rsaparams", "r");

            let asg = MemoryAutoScaling::new("runners-asg", INSTANCE);
            let counter = MemoryJobCounter::new(5);
            let table = Arc::new(FakeTable::default());
            table.add(LISTENER_PID, LISTENER);
            let service = Arc::new(FakeService::default());
            let recorder = Arc::new(Recorder::default());

            let mut supervisor = Supervisor::builder(cfg)
                .with_context(InstanceContext::new(INSTANCE))
                .with_autoscaling(asg.clone())
                .with_lock_service(MemoryLockService::new())
                .with_job_counter(counter.clone())
                .with_parameter_store(params)
                .with_process_table(table.clone())
                .with_runner_service(service.clone())
                .with_subscribers(vec![recorder.clone()])
                .build();

            let (tx, rx) = mpsc::unbounded_channel();
            let token = CancellationToken::new();
            let run_token = token.clone();
            let handle = tokio::spawn(async move {
                let mut source = ChannelSource(rx);
                supervisor.run(&mut source, run_token).await
            });

            Harness {
                asg,
                counter,
                table,
                service,
                recorder,
                tx,
                token,
                handle,
                _dir: dir,
            }
        }

        fn exec(&self, pid: i32) {
            self.tx.send(ProcEvent::Exec { pid, tid: pid }).unwrap();
        }

        fn exit(&self, pid: i32) {
            self.tx
                .send(ProcEvent::Exit {
                    pid,
                    tid: pid,
                    exit_code: 0,
                    signal: 0,
                })
                .unwrap();
        }

        /// Lets the supervisor drain its queues without reaching a tick.
        async fn settle(&self) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        /// Advances past one reconciliation tick.
        async fn tick(&self) {
            tokio::time::sleep(Duration::from_secs(31)).await;
        }

        async fn armed(&self) {
            self.settle().await;
            assert_eq!(self.recorder.count(&Event::MonitoringArmed), 1);
        }

        async fn stop(self) {
            self.token.cancel();
            self.handle.await.unwrap().unwrap();
        }
    }

    // -- startup ------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn startup_completes_ready_hook_from_pending_wait() {
        let h = Harness::spawn();
        h.armed().await;

        assert_eq!(
            h.asg.completed_hooks().await,
            vec!["WaitForInstanceReportReady"]
        );
        let events = h.recorder.events();
        assert_eq!(events[0], Event::SlotAcquired { index: "0".into() });
        assert_eq!(events[1], Event::MonitoringArmed);
        h.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn startup_seeds_watched_set_from_scan() {
        let h = Harness::spawn();
        // Worker already running before the supervisor armed.
        h.table.add(100, WORKER);
        h.armed().await;

        assert!(h.asg.protected().await);
        assert_eq!(h.counter.value(), 4);
        assert_eq!(
            h.recorder.count(&Event::WorkerSeen {
                pid: 100,
                via: DiscoveredVia::Poll
            }),
            1
        );
        h.stop().await;
    }

    // -- event-driven transitions -------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn exec_then_exit_toggles_protection_and_counts_once() {
        let h = Harness::spawn();
        h.armed().await;
        h.asg.set_lifecycle_state(LifecycleState::InService).await;

        h.table.add(100, WORKER);
        h.exec(100);
        h.settle().await;

        assert!(h.asg.protected().await);
        assert_eq!(h.counter.value(), 4);

        h.table.zombify(100);
        h.exit(100);
        h.settle().await;

        assert!(!h.asg.protected().await);
        // Decremented exactly once for the whole episode.
        assert_eq!(h.counter.value(), 4);
        assert_eq!(h.recorder.protection_history(), vec![true, false]);
        // No hook calls beyond startup.
        assert_eq!(
            h.asg.completed_hooks().await,
            vec!["WaitForInstanceReportReady"]
        );
        h.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_exec_events_count_once() {
        let h = Harness::spawn();
        h.armed().await;

        h.table.add(100, WORKER);
        h.exec(100);
        h.exec(100);
        h.settle().await;

        assert_eq!(h.counter.value(), 4);
        h.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn uninteresting_processes_are_ignored() {
        let h = Harness::spawn();
        h.armed().await;

        h.table.add(200, "bash");
        h.exec(200);
        h.settle().await;

        assert!(!h.asg.protected().await);
        assert_eq!(h.counter.value(), 5);
        h.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn second_worker_keeps_protection_until_both_exit() {
        let h = Harness::spawn();
        h.armed().await;

        h.table.add(100, WORKER);
        h.table.add(101, WORKER);
        h.exec(100);
        h.exec(101);
        h.settle().await;
        assert_eq!(h.counter.value(), 3);

        h.table.zombify(100);
        h.exit(100);
        h.settle().await;
        assert!(h.asg.protected().await);

        h.table.zombify(101);
        h.exit(101);
        h.settle().await;
        assert!(!h.asg.protected().await);
        assert_eq!(h.recorder.protection_history(), vec![true, false]);
        h.stop().await;
    }

    // -- reconciliation -----------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn lost_exit_event_converges_within_one_tick() {
        let h = Harness::spawn();
        h.armed().await;
        h.asg.set_lifecycle_state(LifecycleState::InService).await;

        h.table.add(100, WORKER);
        h.exec(100);
        h.settle().await;
        assert!(h.asg.protected().await);

        // The exit notification is lost entirely; only the table knows.
        h.table.remove(100);
        h.tick().await;

        assert!(!h.asg.protected().await);
        assert_eq!(h.recorder.count(&Event::WorkerGone { pid: 100 }), 1);
        h.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn lost_exec_event_is_found_by_poll() {
        let h = Harness::spawn();
        h.armed().await;
        h.asg.set_lifecycle_state(LifecycleState::InService).await;

        // Worker appears without any event reaching us.
        h.table.add(100, WORKER);
        h.tick().await;

        assert!(h.asg.protected().await);
        assert_eq!(h.counter.value(), 4);
        assert_eq!(
            h.recorder.count(&Event::WorkerSeen {
                pid: 100,
                via: DiscoveredVia::Poll
            }),
            1
        );
        h.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn zombies_are_dropped_by_the_sweep() {
        let h = Harness::spawn();
        h.armed().await;
        h.asg.set_lifecycle_state(LifecycleState::InService).await;

        h.table.add(100, WORKER);
        h.exec(100);
        h.settle().await;

        h.table.zombify(100);
        h.tick().await;

        assert!(!h.asg.protected().await);
        h.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn deferred_protection_is_reasserted_next_tick() {
        let h = Harness::spawn();
        h.armed().await;
        h.asg.set_lifecycle_state(LifecycleState::InService).await;

        // Reject every attempt in the first protect() call's budget.
        h.asg.fail_protection_calls(100).await;
        h.table.add(100, WORKER);
        h.exec(100);
        h.settle().await;

        assert!(!h.asg.protected().await);
        assert_eq!(
            h.recorder.count(&Event::ProtectionDeferred { protect: true }),
            1
        );

        // Control plane recovered; the tick repairs the flag.
        h.asg.fail_protection_calls(0).await;
        h.tick().await;

        assert!(h.asg.protected().await);
        assert_eq!(h.recorder.protection_history(), vec![true]);
        h.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_lifecycle_state_changes_nothing() {
        let h = Harness::spawn();
        h.armed().await;
        h.asg
            .set_lifecycle_state(LifecycleState::Other("Pending:Proceed".into()))
            .await;

        h.tick().await;
        h.tick().await;

        assert_eq!(h.service.stop_count(), 0);
        assert_eq!(
            h.asg.completed_hooks().await,
            vec!["WaitForInstanceReportReady"]
        );
        h.stop().await;
    }

    // -- drain --------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn terminating_wait_starts_the_drain_once() {
        let h = Harness::spawn();
        h.armed().await;
        h.asg
            .set_lifecycle_state(LifecycleState::TerminatingWait)
            .await;

        h.tick().await;
        assert_eq!(h.service.stop_count(), 1);
        assert_eq!(h.recorder.count(&Event::DrainStarted), 1);

        // Listener still serving: not done yet, and the drain does not restart.
        h.tick().await;
        assert_eq!(h.service.stop_count(), 1);
        assert_eq!(h.recorder.count(&Event::DrainCompleted), 0);
        h.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn no_terminate_hook_while_a_job_is_running() {
        let h = Harness::spawn();
        h.armed().await;
        h.asg.set_lifecycle_state(LifecycleState::InService).await;

        h.table.add(100, WORKER);
        h.exec(100);
        h.settle().await;

        // Pending:Wait → InService → Terminating:Wait while pid 100 runs.
        h.asg
            .set_lifecycle_state(LifecycleState::TerminatingWait)
            .await;
        h.tick().await;
        h.tick().await;

        let hooks = h.asg.completed_hooks().await;
        assert!(!hooks.contains(&"OkayToTerminate".to_string()));
        // Still protected from the pre-drain episode.
        assert!(h.asg.protected().await);

        // Job finishes, then the listener exits: now the drain completes.
        h.table.zombify(100);
        h.exit(100);
        h.settle().await;
        h.table.zombify(LISTENER_PID);
        h.exit(LISTENER_PID);

        let result = h.handle.await.unwrap();
        assert!(result.is_ok());
        assert!(h
            .asg
            .completed_hooks()
            .await
            .contains(&"OkayToTerminate".to_string()));
        assert_eq!(h.recorder.count(&Event::DrainCompleted), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_completes_by_poll_when_listener_vanishes_silently() {
        let h = Harness::spawn();
        h.armed().await;
        h.asg
            .set_lifecycle_state(LifecycleState::TerminatingWait)
            .await;
        h.tick().await;

        // Listener disappears without its exit event being delivered.
        h.table.remove(LISTENER_PID);
        h.tick().await;

        let result = h.handle.await.unwrap();
        assert!(result.is_ok());
        assert!(h
            .asg
            .completed_hooks()
            .await
            .contains(&"OkayToTerminate".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn protection_is_suppressed_while_draining() {
        let h = Harness::spawn();
        h.armed().await;
        h.asg.set_lifecycle_state(LifecycleState::InService).await;

        h.table.add(100, WORKER);
        h.exec(100);
        h.settle().await;
        let calls_before = h.asg.protection_calls().await;

        h.asg
            .set_lifecycle_state(LifecycleState::TerminatingWait)
            .await;
        h.tick().await;

        // Worker exits mid-drain: the unprotect is suppressed.
        h.table.zombify(100);
        h.exit(100);
        h.settle().await;

        assert_eq!(h.asg.protection_calls().await, calls_before);
        assert!(h.asg.protected().await);
        h.stop().await;
    }

    // -- shutdown -----------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn cancellation_exits_without_side_effects() {
        let h = Harness::spawn();
        h.armed().await;
        let hooks_before = h.asg.completed_hooks().await;

        h.token.cancel();
        h.handle.await.unwrap().unwrap();

        assert_eq!(h.asg.completed_hooks().await, hooks_before);
        assert_eq!(
            h.recorder.count(&Event::ShutdownRequested),
            1
        );
    }
}
