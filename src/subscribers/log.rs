//! # Logging subscriber.
//!
//! [`LogWriter`] forwards supervisor events to the `log` facade. The host
//! binary picks the actual logger implementation.
//!
//! ## Output format
//! ```text
//! obtained credential slot 3
//! watching worker pid=4711 via=connector
//! worker pid=4711 gone
//! scale-in protection set to true
//! ```

use async_trait::async_trait;
use log::{info, warn};

use crate::events::{DiscoveredVia, Event};
use crate::subscribers::Subscribe;

/// Forwards events to the `log` facade.
pub struct LogWriter;

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, event: &Event) {
        match event {
            Event::SlotAcquired { index } => info!("obtained credential slot {index}"),
            Event::MonitoringArmed => info!("monitoring armed"),
            Event::WorkerSeen { pid, via } => {
                let via = match via {
                    DiscoveredVia::Connector => "connector",
                    DiscoveredVia::Poll => "poll",
                };
                info!("watching worker pid={pid} via={via}");
            }
            Event::WorkerGone { pid } => info!("worker pid={pid} gone"),
            Event::ProtectionChanged { protected } => {
                info!("scale-in protection set to {protected}");
            }
            Event::ProtectionDeferred { protect } => {
                warn!("scale-in protection ({protect}) deferred to next tick");
            }
            Event::QueueDecremented { remaining } => {
                info!("job queue decremented, {remaining} remaining");
            }
            Event::QueueAtFloor => warn!("job queue already at floor, not decrementing"),
            Event::DrainStarted => info!("terminating lifecycle entered, draining runner"),
            Event::DrainCompleted => info!("drain complete, okay to terminate"),
            Event::ShutdownRequested => info!("shutdown requested"),
        }
    }
}
