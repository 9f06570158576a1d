use crate::domain::{WalletHolder, WalletRef};
use crate::monitor::live_data::{LiveData, Publisher, SourceLifecycle, Subscription};

use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::debug;

/// Observer-counted source of the active wallet reference.
pub struct WalletSource {
	live: Arc<LiveData<WalletRef>>,
}

impl WalletSource {
	pub fn new(wallets: Arc<WalletHolder>) -> Self {
		let lifecycle = Arc::new(WalletSourceLifecycle {
			wallets,
			watcher: Mutex::new(None),
		});
		Self {
			live: LiveData::with_lifecycle("wallet", lifecycle),
		}
	}

	/// Observe the source. The first subscription activates it.
	pub fn subscribe(&self) -> Subscription<WalletRef> {
		self.live.subscribe()
	}

	pub fn value(&self) -> Option<Arc<WalletRef>> {
		self.live.value()
	}
}

struct WalletSourceLifecycle {
	wallets: Arc<WalletHolder>,
	watcher: Mutex<Option<JoinHandle<()>>>,
}

fn publish_current(wallets: &WalletHolder, publisher: &Publisher<WalletRef>) {
	match wallets.current() {
		Some(wallet) => {
			debug!(wallet = wallet.name(), "publishing active wallet");
			publisher.publish(WalletRef::new(&wallet));
		}
		None => debug!("no wallet loaded yet"),
	}
}

impl SourceLifecycle<WalletRef> for WalletSourceLifecycle {
	fn start(&self, publisher: Publisher<WalletRef>) {
		let mut changes = self.wallets.changes().register();
		publish_current(&self.wallets, &publisher);

		let wallets = Arc::clone(&self.wallets);
		let watcher = tokio::spawn(async move {
			loop {
				match changes.recv().await {
					Ok(_) | Err(RecvError::Lagged(_)) => publish_current(&wallets, &publisher),
					Err(RecvError::Closed) => break,
				}
			}
		});

		let previous = self
			.watcher
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.replace(watcher);
		if let Some(previous) = previous {
			previous.abort();
		}
	}

	fn stop(&self) {
		let watcher = self
			.watcher
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.take();
		if let Some(watcher) = watcher {
			watcher.abort();
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::domain::{InMemoryWallet, Wallet};
	use crate::test_utils::settle;

	#[tokio::test(start_paused = true)]
	async fn publishes_current_wallet_and_changes() {
		let holder = Arc::new(WalletHolder::new());
		let first: Arc<dyn Wallet> = Arc::new(InMemoryWallet::new("first", []));
		holder.set_wallet(first.clone());

		let source = WalletSource::new(holder.clone());
		let mut subscription = source.subscribe();
		let published = subscription.try_next().expect("published on start");
		assert_eq!(published.name(), "first");

		let second: Arc<dyn Wallet> = Arc::new(InMemoryWallet::new("second", []));
		holder.set_wallet(second.clone());
		let published = subscription.next().await.expect("published on change");
		assert_eq!(published.name(), "second");
		assert!(published.get().is_some());

		drop(subscription);
		settle().await;
		assert_eq!(holder.changes().receiver_count(), 0);
	}
}
