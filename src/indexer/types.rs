//! Wire types of the GraphQL indexer.

use crate::domain::{Block, BlockHash, BlockHeader};
use chrono::DateTime;
use serde::{Deserialize, Serialize};

/// Fields selected for every block query and subscription.
pub const BLOCK_FIELDS: &str = "hash height protocolVersion timestamp author parent { hash }";

/// Reference to a parent block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockRef {
	pub hash: String,
}

/// A block as returned by the indexer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BlockData {
	/// Hex encoded block hash.
	pub hash: String,
	pub height: u64,
	pub protocol_version: u32,
	/// Milliseconds since the Unix epoch.
	pub timestamp: i64,
	pub author: Option<String>,
	pub parent: Option<BlockRef>,
}

fn parse_hash(hash: &str) -> Result<BlockHash, IndexerError> {
	hash.parse()
		.map_err(|e| IndexerError::InvalidData(format!("block hash {}: {}", hash, e)))
}

impl TryFrom<BlockData> for Block {
	type Error = IndexerError;

	fn try_from(data: BlockData) -> Result<Self, Self::Error> {
		let timestamp = DateTime::from_timestamp_millis(data.timestamp).ok_or_else(|| {
			IndexerError::InvalidData(format!(
				"timestamp {} of block {} out of range",
				data.timestamp, data.height
			))
		})?;
		// Genesis reports an all-zero parent.
		let prev_block_hash = match data.parent {
			Some(parent) => Some(parse_hash(&parent.hash)?).filter(|hash| hash.0 != [0u8; 32]),
			None => None,
		};

		Ok(Block {
			hash: parse_hash(&data.hash)?,
			height: data.height,
			timestamp,
			header: BlockHeader {
				prev_block_hash,
				protocol_version: data.protocol_version,
				author: data.author,
			},
		})
	}
}

/// Error types for indexer operations
#[derive(Debug, thiserror::Error)]
pub enum IndexerError {
	#[error("GraphQL error: {0}")]
	GraphQLError(String),

	#[error("No data returned")]
	NoData,

	#[error("WebSocket error: {0}")]
	WebSocketError(#[from] tokio_tungstenite::tungstenite::Error),

	#[error("HTTP error: {0}")]
	HttpError(#[from] reqwest::Error),

	#[error("JSON parse error: {0}")]
	JsonError(#[from] serde_json::Error),

	#[error("Subscription handshake failed: {0}")]
	HandshakeError(String),

	#[error("Invalid data: {0}")]
	InvalidData(String),
}
