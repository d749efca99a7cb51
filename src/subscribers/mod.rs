//! # Event subscribers for the runnervisor runtime.
//!
//! This module provides the [`Subscribe`] trait and the built-in
//! implementations for handling [`Event`](crate::Event)s emitted by the
//! supervisor.
//!
//! ## Architecture
//! ```text
//! Supervisor ── emit(&Event) ──► SubscriberSet
//!                                    │ (sequential, in emit order)
//!                              ┌─────┴─────┬──────────┐
//!                              ▼           ▼          ▼
//!                          LogWriter   SdNotify    Custom
//! ```
//!
//! Delivery is **sequential and awaited** on the supervisor's control thread:
//! no subscriber runs concurrently with another, and subscribers observe
//! events in exactly the order the supervisor produced them. A slow
//! subscriber therefore delays event processing; keep handlers short.
//!
//! ## Implementing custom subscribers
//! ```no_run
//! use runnervisor::{Event, Subscribe};
//! use async_trait::async_trait;
//!
//! struct Metrics;
//!
//! #[async_trait]
//! impl Subscribe for Metrics {
//!     async fn on_event(&self, event: &Event) {
//!         if let Event::ProtectionChanged { protected } = event {
//!             // gauge update
//!             let _ = protected;
//!         }
//!     }
//! }
//! ```

mod log;
mod notify;
mod subscriber;

pub use self::log::LogWriter;
pub use notify::SdNotify;
pub use subscriber::{Subscribe, SubscriberSet};
