//! Credential slot acquisition.
//!
//! A finite set of runner credential bundles is pre-provisioned per
//! repository; exactly one host may use a bundle at a time. This module
//! sweeps the candidate slots under the distributed lock service until one is
//! won, then materializes its files locally.

mod acquirer;

pub use acquirer::{CredentialAcquirer, HeldSlot};
