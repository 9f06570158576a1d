//! Recent blocks from the synchronization service.
//!
//! While observed, the source registers on the service's state-change channel, binds to the
//! service and publishes a fresh snapshot on connect and after every notification. Notifications
//! that arrive before the binding completes are discarded: the snapshot fetched on connect
//! already reflects them. When the service reports that the binding was lost, the source drops
//! it and connects again with the same backoff.

use crate::domain::{Block, MAX_BLOCKS};
use crate::events::{BlockchainStateChanged, ServiceDisconnected};
use crate::monitor::live_data::{LiveData, Publisher, SourceLifecycle, Subscription};
use crate::monitor::service::{BlockchainService, SyncServiceClient};

use backoff::ExponentialBackoffBuilder;
use itertools::Itertools;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Newest-first snapshot of recent blocks.
pub type RecentBlocks = Vec<Block>;

/// Observer-counted source of the most recent blocks.
pub struct BlockSource {
	live: Arc<LiveData<RecentBlocks>>,
}

impl BlockSource {
	/// `limit` is clamped to `1..=MAX_BLOCKS`.
	pub fn new(client: Arc<dyn SyncServiceClient>, limit: usize, max_backoff: Duration) -> Self {
		let lifecycle = Arc::new(BlockSourceLifecycle {
			client,
			limit: limit.clamp(1, MAX_BLOCKS),
			max_backoff,
			task: Mutex::new(None),
		});
		Self {
			live: LiveData::with_lifecycle("blocks", lifecycle),
		}
	}

	/// Observe the source. The first subscription activates it.
	pub fn subscribe(&self) -> Subscription<RecentBlocks> {
		self.live.subscribe()
	}

	/// Last published value, kept across deactivation.
	pub fn value(&self) -> Option<Arc<RecentBlocks>> {
		self.live.value()
	}

	/// The underlying cell, for observer and activation checks.
	pub fn live(&self) -> &Arc<LiveData<RecentBlocks>> {
		&self.live
	}
}

struct BlockSourceLifecycle {
	client: Arc<dyn SyncServiceClient>,
	limit: usize,
	max_backoff: Duration,
	task: Mutex<Option<JoinHandle<()>>>,
}

impl SourceLifecycle<RecentBlocks> for BlockSourceLifecycle {
	fn start(&self, publisher: Publisher<RecentBlocks>) {
		// Register before binding so the registrations are in place for the whole activation.
		let mut notifications = self.client.state_changes().register();
		let mut disconnections = self.client.disconnections().register();
		let client = Arc::clone(&self.client);
		let limit = self.limit;
		let max_backoff = self.max_backoff;

		let task = tokio::spawn(async move {
			loop {
				// Losses of an earlier binding are already handled.
				disconnections = disconnections.resubscribe();
				let Some(service) = connect(client.as_ref(), max_backoff).await else {
					return;
				};
				info!("Connected to sync service, fetching {} recent blocks", limit);

				let dropped = notifications.len();
				if dropped > 0 {
					debug!(dropped, "discarding state notifications received before connect");
				}
				notifications = notifications.resubscribe();

				fetch_and_publish(service.as_ref(), limit, &publisher).await;

				match follow(
					service.as_ref(),
					limit,
					&publisher,
					&mut notifications,
					&mut disconnections,
				)
				.await
				{
					Binding::Lost(reason) => {
						warn!("Sync service connection lost, reconnecting: {}", reason);
					}
					Binding::Closed => break,
				}
			}
		});

		let previous = self
			.task
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.replace(task);
		if let Some(previous) = previous {
			previous.abort();
		}
	}

	fn stop(&self) {
		let task = self
			.task
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.take();
		if let Some(task) = task {
			// Dropping the task drops its notification registration.
			task.abort();
			self.client.disconnect();
			debug!("Disconnected from sync service");
		}
	}
}

/// How following a binding ended.
enum Binding {
	/// The service dropped the binding. The caller connects again.
	Lost(String),
	/// A notification channel closed; the client is gone.
	Closed,
}

/// Refetch on every state change until the binding is lost.
async fn follow(
	service: &dyn BlockchainService,
	limit: usize,
	publisher: &Publisher<RecentBlocks>,
	notifications: &mut broadcast::Receiver<BlockchainStateChanged>,
	disconnections: &mut broadcast::Receiver<ServiceDisconnected>,
) -> Binding {
	loop {
		tokio::select! {
			lost = disconnections.recv() => match lost {
				Ok(lost) => return Binding::Lost(lost.reason),
				Err(RecvError::Lagged(_)) => return Binding::Lost("missed disconnect notifications".to_string()),
				Err(RecvError::Closed) => return Binding::Closed,
			},
			changed = notifications.recv() => match changed {
				Ok(state) => {
					debug!(best_height = ?state.best_height, "blockchain state changed");
					fetch_and_publish(service, limit, publisher).await;
				}
				Err(RecvError::Lagged(skipped)) => {
					debug!(skipped, "state notifications lagged, refetching once");
					fetch_and_publish(service, limit, publisher).await;
				}
				Err(RecvError::Closed) => {
					debug!("state notification channel closed");
					return Binding::Closed;
				}
			},
		}
	}
}

/// Bind to the service, retrying without a deadline.
async fn connect(
	client: &dyn SyncServiceClient,
	max_backoff: Duration,
) -> Option<Arc<dyn BlockchainService>> {
	let policy = ExponentialBackoffBuilder::new()
		.with_max_interval(max_backoff)
		.with_max_elapsed_time(None)
		.build();

	backoff::future::retry_notify(
		policy,
		|| async move { client.connect().await.map_err(backoff::Error::transient) },
		|e, delay: Duration| {
			warn!("Sync service connection failed, retrying in {:?}: {}", delay, e);
		},
	)
	.await
	.ok()
}

async fn fetch_and_publish(
	service: &dyn BlockchainService,
	limit: usize,
	publisher: &Publisher<RecentBlocks>,
) {
	if !publisher.is_current() {
		debug!("block source deactivated, skipping fetch");
		return;
	}
	match service.recent_blocks(limit).await {
		Ok(blocks) => {
			let blocks = normalize_recent_blocks(blocks, limit);
			debug!(
				count = blocks.len(),
				best = ?blocks.first().map(|b| b.height),
				"publishing recent blocks"
			);
			publisher.publish(blocks);
		}
		Err(e) => warn!("Failed to fetch recent blocks, keeping previous snapshot: {}", e),
	}
}

/// Order newest first, drop duplicate heights and cap at `limit` (never above `MAX_BLOCKS`).
pub fn normalize_recent_blocks(blocks: Vec<Block>, limit: usize) -> RecentBlocks {
	let limit = limit.min(MAX_BLOCKS);
	blocks
		.into_iter()
		.sorted_by(|a, b| b.height.cmp(&a.height))
		.dedup_by(|a, b| a.height == b.height)
		.take(limit)
		.collect_vec()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_utils::{FakeSyncClient, block, settle};

	fn heights(blocks: &RecentBlocks) -> Vec<u64> {
		blocks.iter().map(|b| b.height).collect()
	}

	#[test]
	fn normalize_sorts_dedups_and_caps() {
		let blocks = vec![block(5), block(7), block(6), block(7)];
		assert_eq!(heights(&normalize_recent_blocks(blocks, 10)), vec![7, 6, 5]);

		let many = (0..150).map(block).collect_vec();
		let capped = normalize_recent_blocks(many, 500);
		assert_eq!(capped.len(), MAX_BLOCKS);
		assert_eq!(capped.first().map(|b| b.height), Some(149));
	}

	#[tokio::test(start_paused = true)]
	async fn publishes_snapshot_on_connect_and_on_notification() {
		let client = FakeSyncClient::with_blocks((95..=100).map(block));
		let source = BlockSource::new(client.clone(), MAX_BLOCKS, Duration::from_secs(1));

		let mut subscription = source.subscribe();
		let first = subscription.next().await.expect("initial snapshot");
		assert_eq!(heights(&first), vec![100, 99, 98, 97, 96, 95]);
		assert_eq!(client.connects(), 1);

		client.push_block(block(101));
		client.notify();
		let second = subscription.next().await.expect("refreshed snapshot");
		assert_eq!(second.first().map(|b| b.height), Some(101));
	}

	#[tokio::test(start_paused = true)]
	async fn never_exceeds_max_blocks() {
		let client = FakeSyncClient::with_blocks((0..250).map(block));
		let source = BlockSource::new(client.clone(), 1_000, Duration::from_secs(1));

		let mut subscription = source.subscribe();
		let snapshot = subscription.next().await.expect("snapshot");
		assert_eq!(snapshot.len(), MAX_BLOCKS);
		assert!(snapshot.windows(2).all(|w| w[0].height > w[1].height));
	}

	#[tokio::test(start_paused = true)]
	async fn notification_before_connect_is_dropped() {
		let client = FakeSyncClient::with_blocks([block(1)]);
		client.set_reachable(false);
		let source = BlockSource::new(client.clone(), MAX_BLOCKS, Duration::from_secs(1));

		let mut subscription = source.subscribe();
		settle().await;
		client.notify();
		client.notify();
		settle().await;
		assert!(subscription.try_next().is_none());

		client.set_reachable(true);
		subscription.next().await.expect("snapshot after connect");
		settle().await;
		assert!(subscription.try_next().is_none());
		assert_eq!(client.fetches(), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn reactivation_tears_down_and_reconnects() {
		let client = FakeSyncClient::with_blocks([block(10)]);
		let source = BlockSource::new(client.clone(), MAX_BLOCKS, Duration::from_secs(1));

		let mut subscription = source.subscribe();
		subscription.next().await.expect("snapshot");
		assert_eq!(client.state_changes().receiver_count(), 1);

		drop(subscription);
		settle().await;
		assert_eq!(client.disconnects(), 1);
		assert_eq!(client.state_changes().receiver_count(), 0);

		// Nobody is registered during the inactive window.
		client.push_block(block(11));
		assert_eq!(client.notify(), 0);
		settle().await;
		assert_eq!(client.fetches(), 1);

		let mut subscription = source.subscribe();
		let stale = subscription.next().await.expect("cached value");
		assert_eq!(heights(&stale), vec![10]);
		let fresh = subscription.next().await.expect("fresh snapshot");
		assert_eq!(heights(&fresh), vec![11, 10]);
		assert_eq!(client.connects(), 2);
		assert_eq!(client.fetches(), 2);

		settle().await;
		assert!(subscription.try_next().is_none());
	}

	#[tokio::test(start_paused = true)]
	async fn lost_connection_is_reestablished() {
		let client = FakeSyncClient::with_blocks([block(20)]);
		let source = BlockSource::new(client.clone(), MAX_BLOCKS, Duration::from_secs(1));

		let mut subscription = source.subscribe();
		subscription.next().await.expect("snapshot");
		assert_eq!(client.connects(), 1);

		client.set_reachable(false);
		assert_eq!(client.drop_connection(), 1);
		settle().await;

		// The lost binding is no longer followed.
		client.push_block(block(21));
		client.notify();
		settle().await;
		assert!(subscription.try_next().is_none());
		assert_eq!(client.fetches(), 1);

		client.set_reachable(true);
		let fresh = subscription.next().await.expect("snapshot after reconnect");
		assert_eq!(heights(&fresh), vec![21, 20]);
		assert_eq!(client.connects(), 2);
		assert_eq!(client.disconnects(), 0);
		assert!(source.live().is_active());

		client.push_block(block(22));
		client.notify();
		let next = subscription.next().await.expect("notification after reconnect");
		assert_eq!(next.first().map(|b| b.height), Some(22));
	}
}
