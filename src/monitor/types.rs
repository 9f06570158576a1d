use crate::indexer::IndexerError;

/// Failures talking to the synchronization service.
///
/// These never reach the presentation layer. A source that hits one logs it and keeps its last
/// value.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
	#[error("Indexer error: {0}")]
	IndexerError(#[from] IndexerError),

	#[error("Sync service not connected")]
	NotConnected,

	#[error("Sync service error: {0}")]
	ServiceError(String),
}

/// Errors surfaced by the monitor's outer API: configuration and navigation.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
	#[error("Config error: {0}")]
	ConfigError(String),

	#[error("IO error: {0}")]
	IoError(#[from] std::io::Error),

	#[error("JSON error: {0}")]
	JsonError(#[from] serde_json::Error),

	#[error("An aggregator is already attached to this model")]
	AlreadyAttached,

	#[error("Block browsing is disabled")]
	BrowseDisabled,

	#[error("Invalid block explorer URL {url}: {reason}")]
	InvalidExplorerUrl { url: String, reason: String },

	#[error("Indexer error: {0}")]
	IndexerError(#[from] IndexerError),
}
