//! In-process implementations of the coordination seams.
//!
//! These back the crate's unit tests and doc examples, and are handy for
//! running the supervisor against nothing at all. They honor the same
//! contracts as their distributed counterparts:
//!
//! - [`MemoryLockService`] — at most one holder per key; released on handle
//!   drop; `Unavailable` after the caller's retry budget runs out.
//! - [`MemoryJobCounter`] — floor-bounded conditional decrement, enforced by
//!   the counter itself, never the caller.
//! - [`MemoryAutoScaling`] — one instance worth of group state, with
//!   failure-injection knobs for protection-call rejection.
//! - [`MemoryParameterStore`] — hierarchical names with path listing and
//!   conditional writes.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::cloud::{
    AutoScalingApi, InstanceDetails, JobCounter, LifecycleState, LockHandle, LockService,
    Parameter, ParameterStore,
};
use crate::error::{CloudError, CounterError, LockError, ParamError};

// ---------------------------------------------------------------------------
// Autoscaling group
// ---------------------------------------------------------------------------

struct AsgState {
    lifecycle_state: LifecycleState,
    protected: bool,
    completed_hooks: Vec<String>,
    fail_protection: u32,
    protection_calls: u64,
}

/// One instance's worth of autoscaling-group state.
pub struct MemoryAutoScaling {
    group_name: String,
    instance_id: String,
    state: Mutex<AsgState>,
}

impl MemoryAutoScaling {
    /// Creates a group containing one instance in `Pending:Wait`.
    pub fn new(group_name: &str, instance_id: &str) -> Arc<Self> {
        Arc::new(Self {
            group_name: group_name.to_string(),
            instance_id: instance_id.to_string(),
            state: Mutex::new(AsgState {
                lifecycle_state: LifecycleState::PendingWait,
                protected: false,
                completed_hooks: Vec::new(),
                fail_protection: 0,
                protection_calls: 0,
            }),
        })
    }

    /// Moves the instance to the given lifecycle state.
    pub async fn set_lifecycle_state(&self, state: LifecycleState) {
        self.state.lock().unwrap().lifecycle_state = state;
    }

    /// Makes the next `n` protection calls fail with a transitional-state
    /// rejection.
    pub async fn fail_protection_calls(&self, n: u32) {
        self.state.lock().unwrap().fail_protection = n;
    }

    /// Current value of the protection flag.
    pub async fn protected(&self) -> bool {
        self.state.lock().unwrap().protected
    }

    /// Hooks completed so far, in completion order.
    pub async fn completed_hooks(&self) -> Vec<String> {
        self.state.lock().unwrap().completed_hooks.clone()
    }

    /// Total protection calls observed, including rejected ones.
    pub async fn protection_calls(&self) -> u64 {
        self.state.lock().unwrap().protection_calls
    }
}

#[async_trait]
impl AutoScalingApi for MemoryAutoScaling {
    async fn describe_instance(
        &self,
        instance_id: &str,
    ) -> Result<Option<InstanceDetails>, CloudError> {
        if instance_id != self.instance_id {
            return Ok(None);
        }
        let state = self.state.lock().unwrap();
        Ok(Some(InstanceDetails {
            group_name: self.group_name.clone(),
            lifecycle_state: state.lifecycle_state.clone(),
            protected: state.protected,
        }))
    }

    async fn complete_lifecycle_action(
        &self,
        group_name: &str,
        instance_id: &str,
        hook_name: &str,
        _result: &str,
    ) -> Result<(), CloudError> {
        if group_name != self.group_name || instance_id != self.instance_id {
            return Err(CloudError("no such instance in group".into()));
        }
        let mut state = self.state.lock().unwrap();
        if state.completed_hooks.iter().any(|h| h == hook_name) {
            return Err(CloudError(format!(
                "lifecycle action for hook {hook_name} already completed"
            )));
        }
        state.completed_hooks.push(hook_name.to_string());
        Ok(())
    }

    async fn set_instance_protection(
        &self,
        group_name: &str,
        instance_id: &str,
        protect: bool,
    ) -> Result<(), CloudError> {
        if group_name != self.group_name || instance_id != self.instance_id {
            return Err(CloudError("no such instance in group".into()));
        }
        let mut state = self.state.lock().unwrap();
        state.protection_calls += 1;
        if state.fail_protection > 0 {
            state.fail_protection = state.fail_protection.saturating_sub(1);
            return Err(CloudError(
                "instance is in a transitional state, cannot change protection".into(),
            ));
        }
        state.protected = protect;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Lock service
// ---------------------------------------------------------------------------

/// In-process leased lock service.
#[derive(Default)]
pub struct MemoryLockService {
    held: Arc<Mutex<HashSet<String>>>,
}

impl MemoryLockService {
    /// Creates an empty lock table.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Whether `key` is currently held by anyone.
    pub fn is_held(&self, key: &str) -> bool {
        self.held.lock().unwrap().contains(key)
    }

    fn try_take(&self, key: &str) -> bool {
        self.held.lock().unwrap().insert(key.to_string())
    }
}

struct MemoryLockHandle {
    key: String,
    held: Arc<Mutex<HashSet<String>>>,
}

impl LockHandle for MemoryLockHandle {
    fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for MemoryLockHandle {
    fn drop(&mut self) {
        self.held.lock().unwrap().remove(&self.key);
    }
}

#[async_trait]
impl LockService for MemoryLockService {
    async fn acquire(
        &self,
        key: &str,
        retry_period: Duration,
        retry_timeout: Duration,
    ) -> Result<Box<dyn LockHandle>, LockError> {
        let deadline = tokio::time::Instant::now() + retry_timeout;
        loop {
            if self.try_take(key) {
                return Ok(Box::new(MemoryLockHandle {
                    key: key.to_string(),
                    held: Arc::clone(&self.held),
                }));
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(LockError::Unavailable);
            }
            tokio::time::sleep(retry_period).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Job counter
// ---------------------------------------------------------------------------

/// In-process floor-bounded job counter.
pub struct MemoryJobCounter {
    value: Mutex<i64>,
}

impl MemoryJobCounter {
    /// Creates a counter starting at `initial`.
    pub fn new(initial: i64) -> Arc<Self> {
        Arc::new(Self {
            value: Mutex::new(initial),
        })
    }

    /// Current counter value.
    pub fn value(&self) -> i64 {
        *self.value.lock().unwrap()
    }
}

#[async_trait]
impl JobCounter for MemoryJobCounter {
    async fn decrement(&self) -> Result<i64, CounterError> {
        let mut value = self.value.lock().unwrap();
        if *value > 0 {
            *value -= 1;
            Ok(*value)
        } else {
            Err(CounterError::AtFloor)
        }
    }
}

// ---------------------------------------------------------------------------
// Parameter store
// ---------------------------------------------------------------------------

/// In-process hierarchical parameter store.
#[derive(Default)]
pub struct MemoryParameterStore {
    params: Mutex<BTreeMap<String, String>>,
}

impl MemoryParameterStore {
    /// Creates an empty store.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Unconditionally writes a parameter (fixture setup).
    pub fn put(&self, name: &str, value: &str) {
        self.params
            .lock()
            .unwrap()
            .insert(name.to_string(), value.to_string());
    }
}

#[async_trait]
impl ParameterStore for MemoryParameterStore {
    async fn get(&self, name: &str) -> Result<String, ParamError> {
        self.params
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| ParamError::NotFound(name.to_string()))
    }

    async fn get_by_path(&self, path: &str) -> Result<Vec<Parameter>, ParamError> {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let params = self.params.lock().unwrap();
        Ok(params
            .iter()
            .filter(|(name, _)| {
                name.strip_prefix(&prefix)
                    .is_some_and(|rest| !rest.contains('/'))
            })
            .map(|(name, value)| Parameter {
                name: name.clone(),
                value: value.clone(),
            })
            .collect())
    }

    async fn list_recursive(&self, path: &str) -> Result<Vec<String>, ParamError> {
        let params = self.params.lock().unwrap();
        Ok(params
            .keys()
            .filter(|name| name.starts_with(path))
            .cloned()
            .collect())
    }

    async fn put_if_absent(&self, name: &str, value: &str) -> Result<(), ParamError> {
        let mut params = self.params.lock().unwrap();
        if params.contains_key(name) {
            return Err(ParamError::AlreadyExists(name.to_string()));
        }
        params.insert(name.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lock_is_exclusive_between_acquirers() {
        let locks = MemoryLockService::new();
        let period = Duration::from_micros(1);
        let timeout = Duration::from_micros(1);

        let first = locks.acquire("repo/1", period, timeout).await.unwrap();
        assert_eq!(first.key(), "repo/1");

        // Second acquirer observes Unavailable while the first holds it.
        let second = locks.acquire("repo/1", period, timeout).await;
        assert!(matches!(second, Err(LockError::Unavailable)));

        drop(first);
        let third = locks.acquire("repo/1", period, timeout).await;
        assert!(third.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_acquirers_hold_at_most_one() {
        let locks = MemoryLockService::new();
        let first = locks
            .acquire("repo/7", Duration::from_millis(1), Duration::from_secs(5))
            .await
            .unwrap();

        // A contender polls the whole time the first handle is held.
        let contending = Arc::clone(&locks);
        let contender = tokio::spawn(async move {
            contending
                .acquire("repo/7", Duration::from_millis(1), Duration::from_secs(5))
                .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        drop(first);
        let second = contender.await.unwrap();
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn counter_never_goes_below_zero() {
        let counter = MemoryJobCounter::new(3);
        let mut results = Vec::new();
        for _ in 0..10 {
            results.push(counter.decrement().await);
        }
        assert_eq!(counter.value(), 0);
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 3);
        assert!(results[3..]
            .iter()
            .all(|r| matches!(r, Err(CounterError::AtFloor))));
    }

    #[tokio::test]
    async fn path_listing_is_non_recursive() {
        let params = MemoryParameterStore::new();
        params.put("/runners/org/repo/1/config", "a");
        params.put("/runners/org/repo/1/credentials", "b");
        params.put("/runners/org/repo/1/nested/deep", "c");

        let direct = params.get_by_path("/runners/org/repo/1").await.unwrap();
        let names: Vec<_> = direct.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "/runners/org/repo/1/config",
                "/runners/org/repo/1/credentials"
            ]
        );
    }

    #[tokio::test]
    async fn conditional_write_loses_race_once() {
        let params = MemoryParameterStore::new();
        assert!(params.put_if_absent("/runners/list", "1,2").await.is_ok());
        assert!(matches!(
            params.put_if_absent("/runners/list", "3").await,
            Err(ParamError::AlreadyExists(_))
        ));
        assert_eq!(params.get("/runners/list").await.unwrap(), "1,2");
    }
}
