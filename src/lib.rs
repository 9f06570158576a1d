//! Recent blocks monitor.
//!
//! Watches a block indexer and the host's active wallet, and maintains an observable list of the
//! most recent blocks annotated with the wallet's confirmed transactions.

pub mod config;
pub mod domain;
pub mod events;
pub mod indexer;
pub mod monitor;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_utils;
