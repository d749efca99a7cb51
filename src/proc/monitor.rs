//! # Process connector socket and the async event source.
//!
//! [`ProcConnector`] owns the kernel event channel end to end:
//!
//! 1. open a non-blocking connector datagram socket,
//! 2. attach the [`filter`](crate::proc::filter) program **before** binding,
//!    so not a single unfiltered datagram is ever queued,
//! 3. bind to the process-events multicast group,
//! 4. send the multicast-listen control datagram,
//! 5. serve decoded [`ProcEvent`]s through [`EventSource::next_event`].
//!
//! Delivery is best-effort: `ENOBUFS` on receive means a burst overflowed
//! the socket buffer and events were lost. The error is swallowed here and
//! the supervisor's periodic poll repairs whatever was missed. Datagrams
//! from non-kernel senders or that fail to decode are likewise dropped
//! without ceremony.

use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

use async_trait::async_trait;
use log::debug;
use nix::errno::Errno;
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;

use crate::error::MonitorError;
use crate::proc::filter::{self, SockFprog};
use crate::proc::wire::{self, ProcEvent};

/// Netlink protocol number of the kernel connector.
///
/// Absent from some libc builds, so pinned here like the reference
/// implementations do.
const NETLINK_CONNECTOR: libc::c_int = 11;

/// Receive buffer size; connector datagrams are far smaller.
const RECV_BUF_LEN: usize = 1024;

/// Typed stream of process lifecycle events.
///
/// The supervisor loop consumes this seam; tests feed it from a channel.
#[async_trait]
pub trait EventSource: Send {
    /// Waits for the next EXEC or EXIT event.
    async fn next_event(&mut self) -> Result<ProcEvent, MonitorError>;
}

/// The kernel process-event channel.
pub struct ProcConnector {
    fd: AsyncFd<OwnedFd>,
}

impl ProcConnector {
    /// Opens, filters, binds and subscribes the connector socket.
    ///
    /// Requires `CAP_NET_ADMIN` (in practice: root), like any process
    /// connector listener.
    pub fn open() -> Result<Self, MonitorError> {
        let raw = unsafe {
            libc::socket(
                libc::AF_NETLINK,
                libc::SOCK_DGRAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                NETLINK_CONNECTOR,
            )
        };
        if raw < 0 {
            return Err(MonitorError::Open(io::Error::last_os_error()));
        }
        // Owned from here on: every early return below closes the socket.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let prog = filter::proc_event_filter();
        let fprog = SockFprog {
            len: prog.len() as libc::c_ushort,
            filter: prog.as_ptr(),
        };
        let rc = unsafe {
            libc::setsockopt(
                fd.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_ATTACH_FILTER,
                &fprog as *const SockFprog as *const libc::c_void,
                mem::size_of::<SockFprog>() as libc::socklen_t,
            )
        };
        if rc != 0 {
            return Err(MonitorError::Filter(io::Error::last_os_error()));
        }

        let pid = std::process::id();
        let mut addr: libc::sockaddr_nl = unsafe { mem::zeroed() };
        addr.nl_family = libc::AF_NETLINK as libc::sa_family_t;
        addr.nl_pid = pid;
        addr.nl_groups = wire::CN_IDX_PROC;
        let rc = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                &addr as *const libc::sockaddr_nl as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            )
        };
        if rc != 0 {
            return Err(MonitorError::Subscribe(io::Error::last_os_error()));
        }

        let listen = wire::encode_mcast_listen(pid);
        let sent = unsafe {
            libc::send(
                fd.as_raw_fd(),
                listen.as_ptr() as *const libc::c_void,
                listen.len(),
                0,
            )
        };
        if sent != listen.len() as isize {
            return Err(MonitorError::Subscribe(io::Error::last_os_error()));
        }

        let fd = AsyncFd::with_interest(fd, Interest::READABLE).map_err(MonitorError::Open)?;
        Ok(Self { fd })
    }

    /// Receives one datagram, returning its length and the sender's netlink
    /// pid (zero for the kernel).
    async fn recv_from_kernel(&self, buf: &mut [u8]) -> io::Result<(usize, u32)> {
        loop {
            let mut guard = self.fd.readable().await?;
            let attempt = guard.try_io(|fd| {
                let mut addr: libc::sockaddr_nl = unsafe { mem::zeroed() };
                let mut addr_len = mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t;
                let n = unsafe {
                    libc::recvfrom(
                        fd.get_ref().as_raw_fd(),
                        buf.as_mut_ptr() as *mut libc::c_void,
                        buf.len(),
                        0,
                        &mut addr as *mut libc::sockaddr_nl as *mut libc::sockaddr,
                        &mut addr_len,
                    )
                };
                if n < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok((n as usize, addr.nl_pid))
                }
            });
            match attempt {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }
}

#[async_trait]
impl EventSource for ProcConnector {
    async fn next_event(&mut self) -> Result<ProcEvent, MonitorError> {
        let mut buf = [0u8; RECV_BUF_LEN];
        loop {
            let (len, sender) = match self.recv_from_kernel(&mut buf).await {
                Ok(pair) => pair,
                Err(err) if err.raw_os_error() == Some(Errno::ENOBUFS as i32) => {
                    // A burst overflowed the receive buffer; the periodic
                    // poll catches whatever was dropped.
                    debug!("process event buffer overran, continuing");
                    continue;
                }
                Err(err) => return Err(MonitorError::Recv(err)),
            };

            if sender != 0 {
                // Not kernel-originated.
                continue;
            }

            match wire::decode_event(&buf[..len]) {
                Ok(event @ (ProcEvent::Exec { .. } | ProcEvent::Exit { .. })) => return Ok(event),
                Ok(ProcEvent::Other { .. }) => continue,
                Err(err) => {
                    debug!("dropping garbled datagram: {err}");
                    continue;
                }
            }
        }
    }
}
