//! OS signal handling.
//!
//! This module provides a single async helper [`wait_for_shutdown_signal`]
//! that completes when the process receives a termination signal:
//! - **SIGINT** (Ctrl-C in terminal)
//! - **SIGTERM** (default kill signal, used by systemd)
//! - **SIGQUIT** (hard stop)
//!
//! Additionally, [`tokio::signal::ctrl_c`] is awaited as a fallback. The
//! actual signal handlers only wake the runtime; all handling logic runs on
//! the supervisor's control thread, outside signal context.

/// Completes when a termination signal is delivered.
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigint.recv()  => {},
        _ = sigterm.recv() => {},
        _ = sigquit.recv() => {},
    }
    Ok(())
}
