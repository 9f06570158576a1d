//! Client seam for the external synchronization service.
//!
//! The block source depends only on these traits. The production implementation talks to a
//! GraphQL indexer (see `crate::indexer`); tests substitute an in-process fake.

use crate::domain::Block;
use crate::events::{BlockchainStateChanged, Broadcaster, ServiceDisconnected};
use crate::monitor::ServiceError;
use std::sync::Arc;

/// A live binding to the synchronization service.
#[async_trait::async_trait]
pub trait BlockchainService: Send + Sync {
	/// The most recent blocks, newest first, at most `limit` of them.
	async fn recent_blocks(&self, limit: usize) -> Result<Vec<Block>, ServiceError>;
}

/// Connection management for the synchronization service.
#[async_trait::async_trait]
pub trait SyncServiceClient: Send + Sync {
	/// Bind to the service. Resolves once the binding is usable.
	async fn connect(&self) -> Result<Arc<dyn BlockchainService>, ServiceError>;

	/// Release the binding. Calling it while not connected is a no-op.
	fn disconnect(&self);

	/// Channel announcing chain state changes.
	fn state_changes(&self) -> &Broadcaster<BlockchainStateChanged>;

	/// Channel announcing that an established binding was lost.
	///
	/// Not sent for bindings released through [`SyncServiceClient::disconnect`].
	fn disconnections(&self) -> &Broadcaster<ServiceDisconnected>;
}
