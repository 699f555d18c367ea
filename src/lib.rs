//! Copy-betting bot library for a round-based prediction market.

pub mod chain;
pub mod claims;
pub mod config;
pub mod connection;
pub mod heartbeat;
pub mod mirror;
pub mod notify;
pub mod paths;
pub mod store;
pub mod supervisor;
pub mod types;
pub mod watchdog;

#[cfg(test)]
pub(crate) mod testutil;
