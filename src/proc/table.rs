//! # Local process table.
//!
//! [`ProcessTable`] is the supervisor's window into which processes exist
//! right now. It backs two duties:
//! - the startup sweep that seeds the watched set (events sent before the
//!   channel was armed are invisible),
//! - the periodic liveness sweep that repairs missed exit notifications.
//!
//! The production implementation, [`ProcFs`], reads `/proc`. Lookups racing
//! with process death simply return `None`/`false`: a process vanishing
//! between detection and inspection is a benign race, not an error.

use std::fs;

/// Read access to the host's process list.
pub trait ProcessTable: Send + Sync {
    /// The process's command name, or `None` if it is gone.
    fn comm(&self, pid: i32) -> Option<String>;

    /// Whether the process exists and is not a zombie.
    fn is_running(&self, pid: i32) -> bool;

    /// All current processes as `(pid, command name)` pairs.
    fn snapshot(&self) -> Vec<(i32, String)>;
}

/// `/proc`-backed process table.
pub struct ProcFs;

impl ProcFs {
    /// Extracts the state character from a `/proc/<pid>/stat` line.
    ///
    /// The command name is parenthesized and may itself contain spaces and
    /// closing parens, so the state is found after the *last* `)`.
    fn state_of(stat: &str) -> Option<char> {
        let after = &stat[stat.rfind(')')? + 1..];
        after.trim_start().chars().next()
    }
}

impl ProcessTable for ProcFs {
    fn comm(&self, pid: i32) -> Option<String> {
        let comm = fs::read_to_string(format!("/proc/{pid}/comm")).ok()?;
        Some(comm.trim_end().to_string())
    }

    fn is_running(&self, pid: i32) -> bool {
        match fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => !matches!(Self::state_of(&stat), Some('Z') | None),
            Err(_) => false,
        }
    }

    fn snapshot(&self) -> Vec<(i32, String)> {
        let Ok(entries) = fs::read_dir("/proc") else {
            return Vec::new();
        };
        entries
            .filter_map(|entry| {
                let entry = entry.ok()?;
                let pid: i32 = entry.file_name().to_str()?.parse().ok()?;
                // comm() returning None here means the process exited while
                // we were listing; skip it.
                Some((pid, self.comm(pid)?))
            })
            .collect()
    }
}
