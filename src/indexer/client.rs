//!
//! GraphQL client for the block indexer.
//!
//! [`IndexerClient`] runs queries over HTTP and block subscriptions over a
//! `graphql-transport-ws` WebSocket. [`IndexerSyncClient`] adapts it to the monitor's
//! synchronization service seam: connecting opens a block subscription whose items are forwarded
//! as state change notifications until the client disconnects. A subscription that ends on its
//! own is reported as a lost binding.

use super::types::*;
use crate::domain::Block;
use crate::events::{BlockchainStateChanged, Broadcaster, ServiceDisconnected};
use crate::monitor::{BlockchainService, ServiceError, SyncServiceClient};

use futures_util::{SinkExt, Stream, StreamExt};
use itertools::Itertools;
use reqwest::Client;
use serde_json::json;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
	connect_async,
	tungstenite::{Message, client::IntoClientRequest},
};
use tracing::{debug, info, warn};

pub type BlockStream = Pin<Box<dyn Stream<Item = Result<BlockData, IndexerError>> + Send>>;

/// GraphQL indexer client
#[derive(Clone)]
pub struct IndexerClient {
	http_client: Client,
	/// GraphQL HTTP endpoint.
	indexer_url: String,
	/// GraphQL WebSocket endpoint.
	ws_url: String,
}

impl IndexerClient {
	pub fn new(indexer_url: String, ws_url: String) -> Result<Self, IndexerError> {
		let http_client = Client::builder().timeout(Duration::from_secs(30)).build()?;

		Ok(Self {
			http_client,
			indexer_url,
			ws_url,
		})
	}

	pub fn indexer_url(&self) -> &str {
		&self.indexer_url
	}

	/// The current chain tip, `None` before the indexer has seen any block.
	pub async fn latest_block(&self) -> Result<Option<BlockData>, IndexerError> {
		let query = format!("query LatestBlock {{ block {{ {} }} }}", BLOCK_FIELDS);
		let response = self.execute_query(&query, None).await?;

		let block = response
			.get("data")
			.and_then(|data| data.get("block"))
			.ok_or(IndexerError::NoData)?;
		if block.is_null() {
			return Ok(None);
		}
		Ok(Some(serde_json::from_value(block.clone())?))
	}

	/// Fetch several blocks by height in a single aliased query.
	///
	/// Heights the indexer does not know are skipped.
	pub async fn blocks_at(&self, heights: &[u64]) -> Result<Vec<BlockData>, IndexerError> {
		if heights.is_empty() {
			return Ok(Vec::new());
		}
		let query = blocks_query(heights);
		let response = self.execute_query(&query, None).await?;
		let data = response.get("data").ok_or(IndexerError::NoData)?;

		heights
			.iter()
			.filter_map(|height| data.get(format!("b{}", height)))
			.filter(|block| !block.is_null())
			.map(|block| serde_json::from_value(block.clone()).map_err(IndexerError::from))
			.collect()
	}

	/// The most recent `limit` blocks, newest first.
	pub async fn recent_blocks(&self, limit: usize) -> Result<Vec<Block>, IndexerError> {
		let Some(latest) = self.latest_block().await? else {
			return Ok(Vec::new());
		};
		let older = (1..limit as u64)
			.map_while(|offset| latest.height.checked_sub(offset))
			.collect_vec();
		debug!(
			"Fetching {} blocks below tip {}",
			older.len(),
			latest.height
		);

		let mut blocks = vec![Block::try_from(latest)?];
		for data in self.blocks_at(&older).await? {
			blocks.push(Block::try_from(data)?);
		}
		Ok(blocks)
	}

	/// Subscribe to blocks, starting at `start_height` or at the tip.
	pub async fn subscribe_blocks(&self, start_height: Option<u64>) -> Result<BlockStream, IndexerError> {
		debug!(
			"Attempting WebSocket connection for blocks subscription to: {}",
			self.ws_url
		);

		let mut request = self.ws_url.clone().into_client_request()?;
		request.headers_mut().insert(
			"Sec-WebSocket-Protocol",
			"graphql-transport-ws".parse().map_err(|_| {
				IndexerError::HandshakeError("Invalid WebSocket subprotocol header value".to_string())
			})?,
		);

		let (ws_stream, response) = connect_async(request).await?;
		debug!(
			"WebSocket connection established for blocks, response status: {}",
			response.status()
		);
		let (mut ws_sender, mut ws_receiver) = ws_stream.split();

		ws_sender
			.send(Message::Text(json!({ "type": "connection_init" }).to_string()))
			.await?;

		match ws_receiver.next().await {
			Some(msg) => match msg? {
				Message::Text(text) => {
					let parsed: serde_json::Value = serde_json::from_str(&text)?;
					if parsed.get("type").and_then(|t| t.as_str()) != Some("connection_ack") {
						return Err(IndexerError::HandshakeError(
							"Connection not acknowledged".to_string(),
						));
					}
				}
				_ => {
					return Err(IndexerError::HandshakeError(
						"Unexpected message type during handshake".to_string(),
					));
				}
			},
			None => {
				return Err(IndexerError::HandshakeError(
					"Connection closed during handshake".to_string(),
				));
			}
		}

		let offset = start_height
			.map(|height| format!("(offset: {{ height: {} }})", height))
			.unwrap_or_default();
		let subscription_query = format!(
			"subscription Blocks {{ blocks{} {{ {} }} }}",
			offset, BLOCK_FIELDS
		);
		let start_message = json!({
			"id": "blocks",
			"type": "subscribe",
			"payload": {
				"query": subscription_query
			}
		});
		ws_sender
			.send(Message::Text(start_message.to_string()))
			.await?;

		// The sender half must outlive the stream or the server sees the socket close.
		let stream = ws_receiver
			.map(move |msg| {
				let _keep_open = &ws_sender;
				msg
			})
			.take_while(|msg| {
				let open = !matches!(msg, Ok(Message::Close(_)));
				async move { open }
			})
			.filter_map(|msg| async move {
				match msg {
					Ok(Message::Text(text)) => decode_block_message(&text),
					Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => None,
					Ok(_) => Some(Err(IndexerError::GraphQLError(
						"Unexpected message type".to_string(),
					))),
					Err(e) => Some(Err(IndexerError::WebSocketError(e))),
				}
			})
			.take_while(|item| {
				let done = matches!(item, Err(IndexerError::NoData));
				async move { !done }
			});

		Ok(Box::pin(stream))
	}

	/// Execute a GraphQL query.
	pub async fn execute_query(
		&self,
		query: &str,
		variables: Option<serde_json::Value>,
	) -> Result<serde_json::Value, IndexerError> {
		let request_body = json!({
			"query": query,
			"variables": variables
		});

		let response = self
			.http_client
			.post(&self.indexer_url)
			.header("Content-Type", "application/json")
			.json(&request_body)
			.send()
			.await?;

		if !response.status().is_success() {
			return Err(IndexerError::GraphQLError(format!(
				"HTTP error: {}",
				response.status()
			)));
		}

		let response_json: serde_json::Value = response.json().await?;

		if let Some(errors) = response_json.get("errors") {
			return Err(IndexerError::GraphQLError(format!(
				"GraphQL errors: {}",
				errors
			)));
		}

		Ok(response_json)
	}
}

fn blocks_query(heights: &[u64]) -> String {
	let fields = heights
		.iter()
		.map(|height| format!("b{0}: block(offset: {{ height: {0} }}) {{ ...BlockFields }}", height))
		.join(" ");
	format!(
		"query RecentBlocks {{ {} }} fragment BlockFields on Block {{ {} }}",
		fields, BLOCK_FIELDS
	)
}

/// Decode one `graphql-transport-ws` frame of the block subscription.
///
/// `None` skips the frame. A `complete` frame decodes to `Err(NoData)`, which ends the stream.
fn decode_block_message(text: &str) -> Option<Result<BlockData, IndexerError>> {
	let parsed = match serde_json::from_str::<serde_json::Value>(text) {
		Ok(parsed) => parsed,
		Err(e) => return Some(Err(IndexerError::JsonError(e))),
	};
	let Some(msg_type) = parsed.get("type").and_then(|t| t.as_str()) else {
		return Some(Err(IndexerError::GraphQLError(
			"Message missing type field".to_string(),
		)));
	};

	match msg_type {
		"next" => {
			let block = parsed
				.get("payload")
				.and_then(|p| p.get("data"))
				.and_then(|d| d.get("blocks"))
				.cloned();
			match block {
				Some(block) => Some(serde_json::from_value(block).map_err(IndexerError::from)),
				None => Some(Err(IndexerError::GraphQLError(
					"Subscription payload without blocks".to_string(),
				))),
			}
		}
		"error" => {
			let error_msg = parsed
				.get("payload")
				.and_then(|p| p.get(0).or(Some(p)))
				.and_then(|p| p.get("message"))
				.and_then(|m| m.as_str())
				.unwrap_or("Unknown subscription error");
			Some(Err(IndexerError::GraphQLError(error_msg.to_string())))
		}
		"complete" => {
			info!("Blocks subscription completed");
			Some(Err(IndexerError::NoData))
		}
		_ => {
			debug!("Ignoring message type: {}", msg_type);
			None
		}
	}
}

/// Live binding handed out by [`IndexerSyncClient::connect`].
pub struct IndexerBlockchainService {
	client: IndexerClient,
}

#[async_trait::async_trait]
impl BlockchainService for IndexerBlockchainService {
	async fn recent_blocks(&self, limit: usize) -> Result<Vec<Block>, ServiceError> {
		Ok(self.client.recent_blocks(limit).await?)
	}
}

/// The forwarder of the current binding and the epoch it belongs to.
///
/// `disconnect` bumps the epoch. A `connect` that started under an older epoch finishes
/// after the disconnect and must not install its forwarder.
#[derive(Default)]
struct ForwarderSlot {
	epoch: u64,
	forwarder: Option<JoinHandle<()>>,
}

impl ForwarderSlot {
	/// Install `forwarder` if no disconnect happened since `epoch` was read.
	///
	/// # Returns
	/// `false` when the binding is stale; the forwarder is aborted in that case.
	fn install(&mut self, epoch: u64, forwarder: JoinHandle<()>) -> bool {
		if epoch != self.epoch {
			forwarder.abort();
			return false;
		}
		if let Some(previous) = self.forwarder.replace(forwarder) {
			previous.abort();
		}
		true
	}

	/// End the current binding. Returns whether one was installed.
	fn clear(&mut self) -> bool {
		self.epoch += 1;
		match self.forwarder.take() {
			Some(forwarder) => {
				forwarder.abort();
				true
			}
			None => false,
		}
	}
}

/// Synchronization service backed by the indexer.
pub struct IndexerSyncClient {
	client: IndexerClient,
	state_changes: Broadcaster<BlockchainStateChanged>,
	disconnections: Broadcaster<ServiceDisconnected>,
	slot: Mutex<ForwarderSlot>,
}

impl IndexerSyncClient {
	pub fn new(client: IndexerClient) -> Self {
		Self {
			client,
			state_changes: Broadcaster::new("blockchain-state"),
			disconnections: Broadcaster::new("service-disconnected"),
			slot: Mutex::new(ForwarderSlot::default()),
		}
	}

	fn slot(&self) -> MutexGuard<'_, ForwarderSlot> {
		self.slot.lock().unwrap_or_else(PoisonError::into_inner)
	}
}

#[async_trait::async_trait]
impl SyncServiceClient for IndexerSyncClient {
	async fn connect(&self) -> Result<Arc<dyn BlockchainService>, ServiceError> {
		let epoch = self.slot().epoch;
		let tip = self.client.latest_block().await?;
		let start_height = tip.as_ref().map(|block| block.height + 1);
		let stream = self.client.subscribe_blocks(start_height).await?;

		let forwarder = tokio::spawn(forward_blocks(
			stream,
			self.state_changes.clone(),
			self.disconnections.clone(),
		));
		if !self.slot().install(epoch, forwarder) {
			debug!("Disconnected while connecting, dropping block subscription");
			return Err(ServiceError::NotConnected);
		}
		info!(
			"Connected to indexer at {} (tip {:?})",
			self.client.indexer_url(),
			tip.map(|block| block.height)
		);

		Ok(Arc::new(IndexerBlockchainService {
			client: self.client.clone(),
		}))
	}

	fn disconnect(&self) {
		if self.slot().clear() {
			info!("Disconnected from indexer");
		}
	}

	fn state_changes(&self) -> &Broadcaster<BlockchainStateChanged> {
		&self.state_changes
	}

	fn disconnections(&self) -> &Broadcaster<ServiceDisconnected> {
		&self.disconnections
	}
}

/// Announce every subscribed block as a state change, then report the binding lost.
///
/// An aborted forwarder (explicit disconnect) reports nothing.
async fn forward_blocks(
	mut stream: BlockStream,
	state_changes: Broadcaster<BlockchainStateChanged>,
	disconnections: Broadcaster<ServiceDisconnected>,
) {
	let mut last_error = None;
	while let Some(item) = stream.next().await {
		match item {
			Ok(block) => {
				let receivers = state_changes.send(BlockchainStateChanged {
					best_height: Some(block.height),
					best_hash: block.hash.parse().ok(),
				});
				debug!(height = block.height, receivers, "new block announced");
			}
			Err(e) => {
				warn!("Block subscription error: {}", e);
				last_error = Some(e.to_string());
			}
		}
	}

	let reason = last_error.unwrap_or_else(|| "block subscription ended".to_string());
	warn!("Block subscription ended: {}", reason);
	disconnections.send(ServiceDisconnected { reason });
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn aliased_query_names_every_height() {
		let query = blocks_query(&[99, 98]);
		assert!(query.starts_with("query RecentBlocks { b99: block(offset: { height: 99 })"));
		assert!(query.contains("b98: block(offset: { height: 98 }) { ...BlockFields }"));
		assert!(query.ends_with(&format!("fragment BlockFields on Block {{ {} }}", BLOCK_FIELDS)));
	}

	#[test]
	fn decodes_subscription_frames() {
		let next = json!({
			"id": "blocks",
			"type": "next",
			"payload": { "data": { "blocks": {
				"hash": hex::encode([3u8; 32]),
				"height": 3,
				"protocolVersion": 1,
				"timestamp": 1_000,
				"author": null,
				"parent": null
			} } }
		})
		.to_string();
		let block = decode_block_message(&next).expect("frame").expect("block");
		assert_eq!(block.height, 3);

		let error = json!({ "type": "error", "payload": [{ "message": "boom" }] }).to_string();
		assert!(matches!(
			decode_block_message(&error),
			Some(Err(IndexerError::GraphQLError(msg))) if msg == "boom"
		));

		assert!(decode_block_message(r#"{"type":"ka"}"#).is_none());
		assert!(matches!(
			decode_block_message(r#"{"type":"complete","id":"blocks"}"#),
			Some(Err(IndexerError::NoData))
		));
	}

	#[tokio::test]
	async fn disconnect_during_connect_rejects_late_forwarder() {
		let mut slot = ForwarderSlot::default();
		let epoch = slot.epoch;
		assert!(!slot.clear());

		let late = tokio::spawn(std::future::pending::<()>());
		assert!(!slot.install(epoch, late));
		assert!(slot.forwarder.is_none());

		let current = tokio::spawn(std::future::pending::<()>());
		assert!(slot.install(slot.epoch, current));
		assert!(slot.clear());
		assert!(slot.forwarder.is_none());
	}

	#[tokio::test]
	async fn ended_subscription_reports_lost_binding() {
		let state_changes = Broadcaster::new("state");
		let disconnections = Broadcaster::new("lost");
		let mut changes = state_changes.register();
		let mut lost = disconnections.register();

		let block = BlockData {
			hash: hex::encode([5u8; 32]),
			height: 5,
			protocol_version: 1,
			timestamp: 0,
			author: None,
			parent: None,
		};
		let stream: BlockStream = Box::pin(futures_util::stream::iter(vec![
			Ok(block),
			Err(IndexerError::GraphQLError("boom".to_string())),
		]));
		forward_blocks(stream, state_changes.clone(), disconnections.clone()).await;

		assert_eq!(changes.try_recv().map(|c| c.best_height).ok(), Some(Some(5)));
		let reason = lost.try_recv().expect("loss reported").reason;
		assert!(reason.contains("boom"));
	}
}
