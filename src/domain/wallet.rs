//! Wallet seam and the application-level holder of the active wallet.

use crate::domain::{Address, Transaction};
use crate::events::{Broadcaster, WalletChanged};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, Weak};

#[derive(Debug, thiserror::Error)]
pub enum WalletError {
	#[error("Wallet transactions were modified during the scan")]
	ConcurrentModification,

	#[error("Wallet unavailable: {0}")]
	Unavailable(String),
}

/// A wallet owned by the host application.
pub trait Wallet: Send + Sync {
	fn name(&self) -> &str;

	/// Snapshot of every transaction the wallet knows about.
	fn transactions(&self) -> Result<Vec<Transaction>, WalletError>;

	/// Whether the address belongs to this wallet.
	fn is_mine(&self, address: &Address) -> bool;
}

/// Non-owning handle to the active wallet.
///
/// The monitor never keeps a wallet alive. Once the host drops it, `get` returns `None` and the
/// wallet is treated as not loaded.
#[derive(Clone)]
pub struct WalletRef {
	name: String,
	wallet: Weak<dyn Wallet>,
}

impl WalletRef {
	pub fn new(wallet: &Arc<dyn Wallet>) -> Self {
		Self {
			name: wallet.name().to_string(),
			wallet: Arc::downgrade(wallet),
		}
	}

	pub fn get(&self) -> Option<Arc<dyn Wallet>> {
		self.wallet.upgrade()
	}

	pub fn name(&self) -> &str {
		&self.name
	}
}

impl fmt::Debug for WalletRef {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("WalletRef")
			.field("name", &self.name)
			.field("alive", &(self.wallet.strong_count() > 0))
			.finish()
	}
}

/// Holds the application's active wallet and announces when it changes.
pub struct WalletHolder {
	current: RwLock<Option<Arc<dyn Wallet>>>,
	changes: Broadcaster<WalletChanged>,
}

impl WalletHolder {
	pub fn new() -> Self {
		Self {
			current: RwLock::new(None),
			changes: Broadcaster::new("wallet-changed"),
		}
	}

	pub fn current(&self) -> Option<Arc<dyn Wallet>> {
		self.current
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.clone()
	}

	/// Replace the active wallet and notify registered receivers.
	pub fn set_wallet(&self, wallet: Arc<dyn Wallet>) {
		*self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(wallet);
		self.changes.send(WalletChanged);
	}

	/// Announce that the active wallet's contents changed without replacing it.
	pub fn notify_changed(&self) {
		self.changes.send(WalletChanged);
	}

	pub fn changes(&self) -> &Broadcaster<WalletChanged> {
		&self.changes
	}
}

impl Default for WalletHolder {
	fn default() -> Self {
		Self::new()
	}
}

/// Watch-only wallet kept in memory.
pub struct InMemoryWallet {
	name: String,
	addresses: HashSet<Address>,
	transactions: RwLock<Vec<Transaction>>,
}

impl InMemoryWallet {
	pub fn new(name: impl Into<String>, addresses: impl IntoIterator<Item = Address>) -> Self {
		Self {
			name: name.into(),
			addresses: addresses.into_iter().collect(),
			transactions: RwLock::new(Vec::new()),
		}
	}

	/// Insert a transaction, replacing any previous version with the same hash.
	pub fn upsert_transaction(&self, transaction: Transaction) {
		let mut transactions = self
			.transactions
			.write()
			.unwrap_or_else(PoisonError::into_inner);
		match transactions.iter_mut().find(|tx| tx.hash == transaction.hash) {
			Some(existing) => *existing = transaction,
			None => transactions.push(transaction),
		}
	}
}

impl Wallet for InMemoryWallet {
	fn name(&self) -> &str {
		&self.name
	}

	fn transactions(&self) -> Result<Vec<Transaction>, WalletError> {
		self.transactions
			.read()
			.map(|transactions| transactions.clone())
			.map_err(|_| WalletError::Unavailable(format!("{} transaction lock poisoned", self.name)))
	}

	fn is_mine(&self, address: &Address) -> bool {
		self.addresses.contains(address)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_utils::confirmed_tx;

	#[test]
	fn wallet_ref_does_not_keep_wallet_alive() {
		let wallet: Arc<dyn Wallet> = Arc::new(InMemoryWallet::new("main", []));
		let wallet_ref = WalletRef::new(&wallet);
		assert!(wallet_ref.get().is_some());

		drop(wallet);
		assert!(wallet_ref.get().is_none());
		assert_eq!(wallet_ref.name(), "main");
	}

	#[test]
	fn upsert_replaces_by_hash() {
		let wallet = InMemoryWallet::new("main", []);
		wallet.upsert_transaction(confirmed_tx(1, &[]));
		wallet.upsert_transaction(confirmed_tx(1, &[100]));
		wallet.upsert_transaction(confirmed_tx(2, &[]));

		let transactions = wallet.transactions().expect("snapshot");
		assert_eq!(transactions.len(), 2);
		assert!(transactions[0].is_confirmed());
	}

	#[test]
	fn set_wallet_notifies_receivers() {
		let holder = WalletHolder::new();
		let mut receiver = holder.changes().register();
		holder.set_wallet(Arc::new(InMemoryWallet::new("main", [])));

		assert_eq!(receiver.try_recv().ok(), Some(WalletChanged));
		assert_eq!(holder.current().map(|w| w.name().to_string()), Some("main".to_string()));
	}
}
