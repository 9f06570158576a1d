//! Confirmed wallet transactions.
//!
//! Filtering runs on the blocking pool so the aggregator never waits on a wallet scan. Each
//! request takes a ticket; a result is published only if no newer request has published first,
//! so an older scan finishing late can never replace a newer snapshot.

use crate::domain::{Transaction, Wallet, WalletError, WalletHolder};
use crate::monitor::live_data::{LiveData, Publisher, SourceLifecycle, Subscription};

use itertools::Itertools;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Confirmed transactions of the active wallet, ordered by hash.
pub type ConfirmedTransactions = Vec<Transaction>;

/// Keep only transactions that appear in at least one block.
pub fn filter_confirmed(transactions: impl IntoIterator<Item = Transaction>) -> ConfirmedTransactions {
	transactions
		.into_iter()
		.filter(Transaction::is_confirmed)
		.sorted_by_key(|tx| tx.hash)
		.collect_vec()
}

/// Observer-counted source of the active wallet's confirmed transactions.
pub struct TransactionSource {
	live: Arc<LiveData<ConfirmedTransactions>>,
	loader: Arc<TransactionLoader>,
}

impl TransactionSource {
	pub fn new(wallets: Arc<WalletHolder>) -> Self {
		let loader = Arc::new_cyclic(|me| TransactionLoader {
			me: Weak::clone(me),
			wallets,
			publisher: Mutex::new(None),
			watcher: Mutex::new(None),
			next_ticket: AtomicU64::new(0),
			newest_published: Mutex::new(0),
		});
		Self {
			live: LiveData::with_lifecycle("transactions", loader.clone()),
			loader,
		}
	}

	/// Observe the source. The first subscription activates it.
	pub fn subscribe(&self) -> Subscription<ConfirmedTransactions> {
		self.live.subscribe()
	}

	pub fn value(&self) -> Option<Arc<ConfirmedTransactions>> {
		self.live.value()
	}

	/// Request a fresh scan of the active wallet.
	///
	/// Does nothing while the source is inactive or no wallet is loaded.
	pub fn load_transactions(&self) {
		self.loader.load();
	}
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
	mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct TransactionLoader {
	me: Weak<TransactionLoader>,
	wallets: Arc<WalletHolder>,
	publisher: Mutex<Option<Publisher<ConfirmedTransactions>>>,
	watcher: Mutex<Option<JoinHandle<()>>>,
	next_ticket: AtomicU64,
	newest_published: Mutex<u64>,
}

impl TransactionLoader {
	fn load(&self) {
		let Some(publisher) = lock(&self.publisher).clone() else {
			debug!("transaction source inactive, not loading");
			return;
		};
		if !publisher.is_current() {
			debug!("transaction source deactivated, not loading");
			return;
		}
		let Some(wallet) = self.wallets.current() else {
			debug!("no wallet loaded, not loading transactions");
			return;
		};
		let Some(loader) = self.me.upgrade() else {
			return;
		};

		let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst) + 1;
		debug!(ticket, wallet = wallet.name(), "scanning wallet transactions");

		tokio::spawn(async move {
			let scan = tokio::task::spawn_blocking(move || scan_wallet(wallet.as_ref())).await;
			match scan {
				Ok(Ok(transactions)) => {
					loader.deliver(&publisher, ticket, transactions);
				}
				Ok(Err(e)) => warn!(ticket, "Skipping transaction publish: {}", e),
				Err(e) => error!(ticket, "Transaction scan worker failed: {}", e),
			}
		});
	}

	/// Publish a scan result unless a newer one already went out.
	fn deliver(
		&self,
		publisher: &Publisher<ConfirmedTransactions>,
		ticket: u64,
		transactions: ConfirmedTransactions,
	) -> bool {
		let mut newest = lock(&self.newest_published);
		if ticket <= *newest {
			debug!(ticket, newest = *newest, "discarding stale transaction scan");
			return false;
		}
		let count = transactions.len();
		if publisher.publish(transactions) {
			*newest = ticket;
			debug!(ticket, count, "published confirmed transactions");
			true
		} else {
			false
		}
	}
}

fn scan_wallet(wallet: &dyn Wallet) -> Result<ConfirmedTransactions, WalletError> {
	Ok(filter_confirmed(wallet.transactions()?))
}

impl SourceLifecycle<ConfirmedTransactions> for TransactionLoader {
	fn start(&self, publisher: Publisher<ConfirmedTransactions>) {
		*lock(&self.publisher) = Some(publisher);

		let mut changes = self.wallets.changes().register();
		let me = Weak::clone(&self.me);
		let watcher = tokio::spawn(async move {
			loop {
				match changes.recv().await {
					Ok(_) | Err(RecvError::Lagged(_)) => match me.upgrade() {
						Some(loader) => loader.load(),
						None => break,
					},
					Err(RecvError::Closed) => break,
				}
			}
		});
		if let Some(previous) = lock(&self.watcher).replace(watcher) {
			previous.abort();
		}

		// The wallet may already be loaded.
		self.load();
	}

	fn stop(&self) {
		lock(&self.publisher).take();
		if let Some(watcher) = lock(&self.watcher).take() {
			watcher.abort();
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::domain::InMemoryWallet;
	use crate::test_utils::{FaultyWallet, PanickingWallet, confirmed_tx};

	#[test]
	fn filter_keeps_only_confirmed() {
		let transactions = vec![
			confirmed_tx(1, &[10]),
			confirmed_tx(2, &[]),
			confirmed_tx(3, &[11, 12]),
			confirmed_tx(4, &[]),
			confirmed_tx(5, &[13]),
		];
		let n = transactions.len();
		let k = transactions.iter().filter(|tx| !tx.is_confirmed()).count();

		let confirmed = filter_confirmed(transactions);
		assert_eq!(confirmed.len(), n - k);
		assert!(confirmed.iter().all(Transaction::is_confirmed));
	}

	fn wallet_with(transactions: Vec<Transaction>) -> Arc<InMemoryWallet> {
		let wallet = Arc::new(InMemoryWallet::new("main", []));
		for tx in transactions {
			wallet.upsert_transaction(tx);
		}
		wallet
	}

	#[tokio::test]
	async fn loads_when_active_and_wallet_present() {
		let holder = Arc::new(WalletHolder::new());
		holder.set_wallet(wallet_with(vec![confirmed_tx(1, &[5]), confirmed_tx(2, &[])]));
		let source = TransactionSource::new(holder.clone());

		let mut subscription = source.subscribe();
		let confirmed = subscription.next().await.expect("confirmed set");
		assert_eq!(confirmed.len(), 1);
	}

	#[tokio::test]
	async fn reloads_on_wallet_change() {
		let holder = Arc::new(WalletHolder::new());
		let source = TransactionSource::new(holder.clone());
		let mut subscription = source.subscribe();
		assert!(subscription.try_next().is_none());

		holder.set_wallet(wallet_with(vec![confirmed_tx(1, &[5]), confirmed_tx(2, &[6])]));
		let confirmed = subscription.next().await.expect("confirmed set");
		assert_eq!(confirmed.len(), 2);
	}

	#[tokio::test]
	async fn faulty_scan_is_skipped() {
		let holder = Arc::new(WalletHolder::new());
		holder.set_wallet(Arc::new(FaultyWallet::new("broken")));
		let source = TransactionSource::new(holder.clone());
		let mut subscription = source.subscribe();

		holder.set_wallet(wallet_with(vec![confirmed_tx(7, &[1])]));
		let confirmed = subscription.next().await.expect("confirmed set");
		assert_eq!(confirmed.len(), 1);
		assert_eq!(source.value().map(|v| v.len()), Some(1));
	}

	#[tokio::test]
	async fn panicking_scan_publishes_nothing_and_next_scan_recovers() {
		let holder = Arc::new(WalletHolder::new());
		holder.set_wallet(Arc::new(PanickingWallet));
		let source = TransactionSource::new(holder.clone());
		let mut subscription = source.subscribe();

		holder.set_wallet(wallet_with(vec![confirmed_tx(3, &[2]), confirmed_tx(4, &[])]));
		let confirmed = subscription.next().await.expect("confirmed set");
		assert_eq!(confirmed.len(), 1);
		assert!(subscription.try_next().is_none());
		assert!(lock(&source.loader.publisher).is_some());
	}

	#[tokio::test]
	async fn stale_ticket_never_overwrites_newer_result() {
		let holder = Arc::new(WalletHolder::new());
		let source = TransactionSource::new(holder);
		let mut subscription = source.subscribe();
		let publisher = lock(&source.loader.publisher).clone().expect("active publisher");

		assert!(source.loader.deliver(&publisher, 2, vec![confirmed_tx(2, &[1])]));
		assert!(!source.loader.deliver(&publisher, 1, vec![confirmed_tx(1, &[1])]));

		let published = subscription.next().await.expect("published");
		assert_eq!(published[0].hash, confirmed_tx(2, &[1]).hash);
		assert!(subscription.try_next().is_none());
	}

	#[tokio::test]
	async fn late_result_after_deactivation_is_dropped() {
		let holder = Arc::new(WalletHolder::new());
		let source = TransactionSource::new(holder);
		let subscription = source.subscribe();
		let publisher = lock(&source.loader.publisher).clone().expect("active publisher");
		drop(subscription);

		assert!(!source.loader.deliver(&publisher, 1, vec![confirmed_tx(1, &[1])]));
		assert!(source.value().is_none());
		source.load_transactions();
		assert!(lock(&source.loader.publisher).is_none());
	}
}
