//! Indexer integration
//!
//! Client and wire types for the GraphQL block indexer, and the synchronization service adapter
//! the block source connects through.

/// GraphQL client and sync service adapter
mod client;
/// Type definitions for indexer data structures
mod types;

pub use client::{BlockStream, IndexerBlockchainService, IndexerClient, IndexerSyncClient};
pub use types::*;
