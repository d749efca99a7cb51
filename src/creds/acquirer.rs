//! # CredentialAcquirer: win exactly one credential slot.
//!
//! ## Sweep
//! ```text
//! loop {
//!   candidates() ──► shuffle ──► for each index:
//!        lock "<repo>/<index>" (microsecond retry budget)
//!            ├─ Unavailable ──► next candidate
//!            └─ held ──► write slot files, merge overlay, return HeldSlot
//!   all candidates taken ──► fresh shuffle, sweep again (forever)
//! }
//! ```
//!
//! Failing to win *any* slot is contention, never an error: another host
//! will free one eventually. The only fatal outcomes are an empty candidate
//! set and a won slot whose material is incomplete: both mean provisioning
//! is broken and a restart cannot help without operator action.
//!
//! ## Candidate list caching
//! Enumerating the store recursively is expensive and, under a scale-out
//! herd, gets the whole fleet throttled. The first host to finish a full
//! enumeration therefore writes the result to a well-known parameter with a
//! conditional put; losing that write race is fine, the winner's list is
//! equivalent.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;

use log::{debug, info, warn};
use nix::unistd::{chown, User};
use rand::seq::SliceRandom;
use serde_json::Value;

use crate::cloud::{LockHandle, LockService, ParameterStore};
use crate::core::Config;
use crate::error::{LockError, ParamError, SupervisorError};

/// Parameter basename → credential file written for it.
const SLOT_FILES: [(&str, &str); 3] = [
    ("config", ".runner"),
    ("credentials", ".credentials"),
    ("rsaparams", ".credentials_rsaparams"),
];

/// A credential slot this process holds exclusively.
///
/// The lock handle lives inside; dropping the slot releases the lock, and
/// the service's lease expiry covers a crash where drop never runs.
pub struct HeldSlot {
    index: String,
    _lock: Box<dyn LockHandle>,
}

impl std::fmt::Debug for HeldSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeldSlot")
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

impl HeldSlot {
    /// Index of the slot within the repository's provisioned set.
    pub fn index(&self) -> &str {
        &self.index
    }
}

/// Sweeps candidate credential slots until one is locked and written.
pub struct CredentialAcquirer {
    params: Arc<dyn ParameterStore>,
    locks: Arc<dyn LockService>,
    cfg: Config,
}

impl CredentialAcquirer {
    /// Creates an acquirer over the given store and lock service.
    pub fn new(params: Arc<dyn ParameterStore>, locks: Arc<dyn LockService>, cfg: Config) -> Self {
        Self { params, locks, cfg }
    }

    /// Acquires a slot, retrying forever across sweeps.
    ///
    /// Each sweep shuffles the candidate order so a fleet booting together
    /// spreads its contention across the slot set.
    pub async fn acquire(&self) -> Result<HeldSlot, SupervisorError> {
        loop {
            let mut candidates = self.candidate_indices().await?;
            candidates.shuffle(&mut rand::thread_rng());
            info!("trying to get a set of credentials in this order: {candidates:?}");

            for index in &candidates {
                let key = format!("{}/{index}", self.cfg.repo);
                match self
                    .locks
                    .acquire(&key, self.cfg.lock_retry_period, self.cfg.lock_retry_timeout)
                    .await
                {
                    Ok(lock) => {
                        info!("obtained lock on {index}");
                        self.write_slot_material(index).await?;
                        self.merge_overlay().await;
                        return Ok(HeldSlot {
                            index: index.clone(),
                            _lock: lock,
                        });
                    }
                    Err(LockError::Unavailable) => {
                        info!("could not lock {index}, trying next");
                    }
                    Err(LockError::Service(err)) => {
                        warn!("lock service failed for {index}: {err}");
                    }
                }
            }
        }
    }

    /// Enumerates candidate slot indices for the repository.
    ///
    /// Prefers the baked list; falls back to a recursive store sweep that
    /// keeps only single-level numeric indices, then opportunistically bakes
    /// the result for the rest of the fleet.
    async fn candidate_indices(&self) -> Result<Vec<String>, SupervisorError> {
        let base = format!("{}/{}", self.cfg.param_prefix, self.cfg.repo);
        let baked = format!("{base}/runnersList");

        match self.params.get(&baked).await {
            Ok(list) => {
                info!("using pre-computed credential indexes from {baked}");
                return Ok(list.split(',').map(str::to_string).collect());
            }
            Err(ParamError::NotFound(_)) => {}
            Err(err) => return Err(err.into()),
        }

        let prefix = format!("{base}/");
        info!("looking at {prefix} for possible credentials");

        let mut seen = BTreeSet::new();
        for name in self.params.list_recursive(&prefix).await? {
            let Some(local) = name.strip_prefix(&prefix) else {
                continue;
            };
            // Expect exactly "<index>/<file>"; anything nested belongs to a
            // different repository sharing the prefix.
            let mut parts = local.split('/');
            let (Some(index), Some(_file), None) = (parts.next(), parts.next(), parts.next())
            else {
                debug!("ignoring nested path {name}");
                continue;
            };
            if index.parse::<u64>().is_err() {
                debug!("ignoring non-numeric index {name}");
                continue;
            }
            seen.insert(index.to_string());
        }

        if seen.is_empty() {
            return Err(SupervisorError::NoSlots {
                repo: self.cfg.repo.clone(),
            });
        }

        let list: Vec<String> = seen.into_iter().collect();
        match self.params.put_if_absent(&baked, &list.join(",")).await {
            Ok(()) => info!("stored pre-computed credential indexes at {baked}"),
            // Race, we lost, never mind.
            Err(ParamError::AlreadyExists(_)) => debug!("another host baked the list first"),
            Err(err) => warn!("could not bake credential index list: {err}"),
        }

        Ok(list)
    }

    /// Fetches the slot's parameters and writes each known one to its file.
    ///
    /// A slot missing any expected parameter is corrupt provisioning and
    /// fatal; unknown extras are logged and skipped.
    async fn write_slot_material(&self, index: &str) -> Result<(), SupervisorError> {
        let path = format!("{}/{}/{index}", self.cfg.param_prefix, self.cfg.repo);
        let mut pending: HashMap<&str, &str> = SLOT_FILES.into_iter().collect();

        for param in self.params.get_by_path(&path).await? {
            let base = param.name.rsplit('/').next().unwrap_or(&param.name);
            let Some(filename) = pending.remove(base) else {
                info!("unknown parameter from store: {:?}", param.name);
                continue;
            };
            let dest = self.cfg.output_dir.join(filename);
            info!("writing {:?} to {dest:?}", param.name);
            fs::write(&dest, &param.value)?;
            fs::set_permissions(&dest, fs::Permissions::from_mode(0o600))?;
            self.assign_owner(&dest)?;
        }

        if !pending.is_empty() {
            let mut missing: Vec<String> = pending.keys().map(|k| k.to_string()).collect();
            missing.sort_unstable();
            return Err(SupervisorError::IncompleteSlot {
                index: index.to_string(),
                missing,
            });
        }
        Ok(())
    }

    fn assign_owner(&self, path: &Path) -> io::Result<()> {
        let Some(name) = &self.cfg.runner_user else {
            return Ok(());
        };
        let user = User::from_name(name)
            .map_err(|errno| io::Error::from_raw_os_error(errno as i32))?
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, format!("no such user: {name}"))
            })?;
        chown(path, Some(user.uid), Some(user.gid))
            .map_err(|errno| io::Error::from_raw_os_error(errno as i32))
    }

    /// Merges the repository's configuration overlay into the written runner
    /// settings, key-wise, overlay winning per key.
    ///
    /// The overlay is optional and best-effort: absent or unparsable means
    /// the settings stay as provisioned.
    async fn merge_overlay(&self) {
        let name = format!("{}/{}/configOverlay", self.cfg.param_prefix, self.cfg.repo);
        info!("loading config overlay from {name}");

        let raw = match self.params.get(&name).await {
            Ok(value) => value,
            Err(err) => {
                debug!("failed to load config overlay: {err}");
                return;
            }
        };
        let overlay = match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => map,
            Ok(_) | Err(_) => {
                debug!("config overlay is not a JSON object, ignoring");
                return;
            }
        };

        let dest = self.cfg.output_dir.join(".runner");
        let settings = fs::read_to_string(&dest)
            .ok()
            .and_then(|raw| serde_json::from_str::<Value>(&raw).ok());
        let Some(Value::Object(mut settings)) = settings else {
            warn!("runner settings at {dest:?} are not readable JSON, skipping overlay");
            return;
        };

        for (key, value) in overlay {
            settings.insert(key, value);
        }

        match serde_json::to_string_pretty(&Value::Object(settings)) {
            Ok(merged) => {
                if let Err(err) = fs::write(&dest, merged) {
                    warn!("failed to write merged runner settings: {err}");
                }
            }
            Err(err) => warn!("failed to serialize merged runner settings: {err}"),
        }
    }
}
