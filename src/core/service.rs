//! # Local runner service control.
//!
//! When the group asks to terminate the instance, the runner service must
//! stop *gracefully*: no new jobs accepted, any in-flight job allowed to
//! finish. [`RunnerService`] is the seam; [`SystemdUnit`] is the production
//! implementation.

use std::io;

use async_trait::async_trait;
use tokio::process::Command;

/// Controls the local job-runner service.
#[async_trait]
pub trait RunnerService: Send + Sync {
    /// Begins a graceful stop: the service stops accepting work and exits
    /// once idle. Must not wait for the stop to finish.
    async fn stop(&self) -> io::Result<()>;
}

/// Stops a systemd unit without blocking on its shutdown.
pub struct SystemdUnit {
    unit: String,
}

impl SystemdUnit {
    /// Creates a controller for the named unit.
    pub fn new(unit: impl Into<String>) -> Self {
        Self { unit: unit.into() }
    }
}

#[async_trait]
impl RunnerService for SystemdUnit {
    async fn stop(&self) -> io::Result<()> {
        let status = Command::new("systemctl")
            .args(["stop", &self.unit, "--no-block"])
            .status()
            .await?;
        if status.success() {
            Ok(())
        } else {
            Err(io::Error::other(format!(
                "systemctl stop {} exited with {status}",
                self.unit
            )))
        }
    }
}
