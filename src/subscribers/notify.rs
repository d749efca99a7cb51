//! # Readiness notification subscriber.
//!
//! [`SdNotify`] pushes short status lines to the process supervisor's
//! notification socket (`$NOTIFY_SOCKET`, systemd's `sd_notify` protocol):
//! a `STATUS=` line once a credential slot is held and `READY=1` once
//! monitoring is fully armed. The external supervisor uses these for
//! restart/health decisions.
//!
//! Pushes are strictly best-effort: a missing socket or a failed send is
//! debug-logged and otherwise ignored.

use std::os::linux::net::SocketAddrExt;
use std::os::unix::net::{SocketAddr, UnixDatagram};

use async_trait::async_trait;
use log::debug;

use crate::events::Event;
use crate::subscribers::Subscribe;

/// Status pusher for the `sd_notify` datagram protocol.
pub struct SdNotify {
    sock: UnixDatagram,
    addr: SocketAddr,
}

impl SdNotify {
    /// Builds a notifier from the `NOTIFY_SOCKET` environment variable.
    ///
    /// Returns `None` when the variable is unset or the socket address is
    /// unusable; callers simply skip registering the subscriber then.
    pub fn from_env() -> Option<Self> {
        let path = std::env::var("NOTIFY_SOCKET").ok()?;
        Self::new(&path)
    }

    /// Builds a notifier for an explicit socket path.
    ///
    /// A leading `@` selects the abstract socket namespace, as systemd does.
    pub fn new(path: &str) -> Option<Self> {
        let addr = if let Some(name) = path.strip_prefix('@') {
            SocketAddr::from_abstract_name(name.as_bytes()).ok()?
        } else {
            SocketAddr::from_pathname(path).ok()?
        };
        let sock = UnixDatagram::unbound().ok()?;
        Some(Self { sock, addr })
    }

    fn push(&self, status: &str) {
        if let Err(err) = self.sock.send_to_addr(status.as_bytes(), &self.addr) {
            debug!("status push failed: {err}");
        }
    }
}

#[async_trait]
impl Subscribe for SdNotify {
    async fn on_event(&self, event: &Event) {
        match event {
            Event::SlotAcquired { index } => {
                self.push(&format!("STATUS=Obtained lock on {index}"));
            }
            Event::MonitoringArmed => self.push("READY=1"),
            Event::DrainStarted => self.push("STATUS=Draining, waiting for listener exit"),
            Event::DrainCompleted => self.push("STOPPING=1"),
            _ => {}
        }
    }
}
