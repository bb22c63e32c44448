//! Resilient remote-query layer for the InfoLine education data backend.
//!
//! Every read goes UI → [`infoline::InfoLineClient`] → [`retry`] →
//! [`cache::CacheLayer`] → [`backend::RemoteBackend`]. The
//! [`monitor::ConnectionMonitor`] runs alongside and only reports.

pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod infoline;
pub mod logging;
pub mod monitor;
pub mod query;
pub mod retry;

#[cfg(test)]
mod testing;
