//! Combines the four sources into the published list.
//!
//! One task observes every source. Each delivered publish causes exactly one rebuild once a
//! block snapshot has been seen; publishes before that are only counted. A block publish also
//! asks the transaction source to rescan, so confirmations follow new blocks.

use crate::config::DisplayFormat;
use crate::domain::{AddressBookStore, WalletRef};
use crate::monitor::list_items::{ListItem, build_list_items};
use crate::monitor::live_data::{LiveData, Subscription};
use crate::monitor::sources::{ConfirmedTransactions, RecentBlocks};
use crate::monitor::stats::{AggregatorStats, RebuildTracker, SourceKind};

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Observer registrations on every source, owned by the aggregator while it runs.
pub struct SourceSubscriptions {
	pub blocks: Subscription<RecentBlocks>,
	pub transactions: Subscription<ConfirmedTransactions>,
	pub wallet: Subscription<WalletRef>,
	pub time: Subscription<DateTime<Utc>>,
}

/// Latest value seen from each source.
#[derive(Default)]
struct Inputs {
	blocks: Option<Arc<RecentBlocks>>,
	transactions: Option<Arc<ConfirmedTransactions>>,
	wallet: Option<Arc<WalletRef>>,
	now: Option<Arc<DateTime<Utc>>>,
}

struct Rebuilder {
	format: DisplayFormat,
	address_book: Arc<dyn AddressBookStore>,
	output: Arc<LiveData<Vec<ListItem>>>,
}

impl Rebuilder {
	fn rebuild(&self, inputs: &Inputs, blocks: &RecentBlocks) {
		let wallet = inputs.wallet.as_ref().and_then(|wallet| wallet.get());
		let address_book = self.address_book.snapshot();
		let items = build_list_items(
			blocks,
			inputs.now.as_deref().copied(),
			&self.format,
			inputs.transactions.as_deref().map(Vec::as_slice),
			wallet.as_deref(),
			address_book.as_deref(),
		);
		debug!(items = items.len(), "list rebuilt");
		self.output.publish(items);
	}
}

/// Handle to the running aggregation task.
///
/// Dropping the handle aborts the task, which releases every source subscription.
pub struct Aggregator {
	shutdown: watch::Sender<bool>,
	stats: watch::Receiver<AggregatorStats>,
	task: Option<JoinHandle<()>>,
	release: Option<Box<dyn FnOnce() + Send>>,
}

impl Aggregator {
	/// Start the aggregation task on the current runtime.
	///
	/// # Arguments
	/// * `sources` - Subscriptions the task takes ownership of
	/// * `on_blocks` - Called after every block publish, before the rebuild
	/// * `output` - Cell every rebuilt list is published to
	pub fn spawn(
		sources: SourceSubscriptions,
		on_blocks: Box<dyn Fn() + Send + Sync>,
		format: DisplayFormat,
		address_book: Arc<dyn AddressBookStore>,
		output: Arc<LiveData<Vec<ListItem>>>,
	) -> Self {
		let (shutdown, shutdown_rx) = watch::channel(false);
		let (stats_tx, stats) = watch::channel(AggregatorStats::default());
		let rebuilder = Rebuilder {
			format,
			address_book,
			output,
		};

		let task = tokio::spawn(run(sources, on_blocks, rebuilder, shutdown_rx, stats_tx));
		Self {
			shutdown,
			stats,
			task: Some(task),
			release: None,
		}
	}

	/// Run `release` once the handle is shut down or dropped.
	pub(crate) fn on_release(mut self, release: impl FnOnce() + Send + 'static) -> Self {
		self.release = Some(Box::new(release));
		self
	}

	/// Latest counters published by the task.
	pub fn stats(&self) -> AggregatorStats {
		*self.stats.borrow()
	}

	/// Stop the task and wait until every subscription has been released.
	pub async fn shutdown(mut self) {
		let _ = self.shutdown.send(true);
		if let Some(task) = self.task.take() {
			if let Err(e) = task.await {
				error!("Aggregator task failed: {}", e);
			}
		}
	}
}

impl Drop for Aggregator {
	fn drop(&mut self) {
		if let Some(task) = self.task.take() {
			task.abort();
		}
		if let Some(release) = self.release.take() {
			release();
		}
	}
}

async fn run(
	mut sources: SourceSubscriptions,
	on_blocks: Box<dyn Fn() + Send + Sync>,
	rebuilder: Rebuilder,
	mut shutdown: watch::Receiver<bool>,
	stats: watch::Sender<AggregatorStats>,
) {
	let mut inputs = Inputs::default();
	let mut tracker = RebuildTracker::new();
	info!("Aggregator started");

	loop {
		let source = tokio::select! {
			_ = shutdown.changed() => break,
			Some(blocks) = sources.blocks.next() => {
				inputs.blocks = Some(blocks);
				on_blocks();
				SourceKind::Blocks
			}
			Some(transactions) = sources.transactions.next() => {
				inputs.transactions = Some(transactions);
				SourceKind::Transactions
			}
			Some(wallet) = sources.wallet.next() => {
				inputs.wallet = Some(wallet);
				SourceKind::Wallet
			}
			Some(now) = sources.time.next() => {
				inputs.now = Some(now);
				SourceKind::Time
			}
			else => break,
		};

		tracker.record_publish(source);
		match &inputs.blocks {
			Some(blocks) => {
				rebuilder.rebuild(&inputs, blocks);
				tracker.record_rebuild();
			}
			None => {
				debug!(?source, "no block snapshot yet, skipping rebuild");
				tracker.record_skip();
			}
		}
		stats.send_replace(tracker.stats());
		tracker.log_progress(false);
	}

	tracker.log_progress(true);
	// Releasing the subscriptions deactivates sources nobody else observes.
	drop(sources);
	info!("Aggregator stopped");
}
