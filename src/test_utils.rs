//! Fixtures shared by the unit tests.

use crate::domain::{
	Address, Block, BlockHash, BlockHeader, Hash256, Transaction, TxInput, TxOutput, Wallet,
	WalletError,
};
use crate::events::{BlockchainStateChanged, Broadcaster, ServiceDisconnected};
use crate::monitor::{BlockchainService, ServiceError, SyncServiceClient};

use chrono::DateTime;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

pub fn block_hash(height: u64) -> BlockHash {
	let mut bytes = [0xb1u8; 32];
	bytes[..8].copy_from_slice(&height.to_be_bytes());
	Hash256(bytes)
}

/// Block at `height`, ten minutes after its parent.
pub fn block(height: u64) -> Block {
	Block {
		hash: block_hash(height),
		height,
		timestamp: DateTime::from_timestamp(1_600_000_000 + height as i64 * 600, 0)
			.expect("timestamp in range"),
		header: BlockHeader {
			prev_block_hash: height.checked_sub(1).map(block_hash),
			protocol_version: 1,
			author: None,
		},
	}
}

/// Transaction with no inputs or outputs, seen in the blocks at `heights`.
pub fn confirmed_tx(seed: u8, heights: &[u64]) -> Transaction {
	Transaction {
		hash: Hash256([seed; 32]),
		appears_in: heights.iter().map(|h| (block_hash(*h), *h)).collect(),
		inputs: Vec::new(),
		outputs: Vec::new(),
		is_coinbase: false,
	}
}

/// `value` paid from `from` (unknown sender when `None`) to `to`, confirmed at `height`.
pub fn payment_tx(seed: u8, height: u64, from: Option<&str>, to: &str, value: i64) -> Transaction {
	Transaction {
		hash: Hash256([seed; 32]),
		appears_in: BTreeMap::from([(block_hash(height), height)]),
		inputs: from
			.map(|from| TxInput {
				address: Some(Address::from(from)),
				value: Some(value),
			})
			.into_iter()
			.collect(),
		outputs: vec![TxOutput {
			address: Some(Address::from(to)),
			value,
		}],
		is_coinbase: false,
	}
}

/// Let spawned tasks run until they block.
pub async fn settle() {
	tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Wallet whose scans always fail.
pub struct FaultyWallet {
	name: String,
}

impl FaultyWallet {
	pub fn new(name: &str) -> Self {
		Self {
			name: name.to_string(),
		}
	}
}

impl Wallet for FaultyWallet {
	fn name(&self) -> &str {
		&self.name
	}

	fn transactions(&self) -> Result<Vec<Transaction>, WalletError> {
		Err(WalletError::ConcurrentModification)
	}

	fn is_mine(&self, _address: &Address) -> bool {
		false
	}
}

/// Wallet whose scans panic on the worker thread.
pub struct PanickingWallet;

impl Wallet for PanickingWallet {
	fn name(&self) -> &str {
		"panicking"
	}

	fn transactions(&self) -> Result<Vec<Transaction>, WalletError> {
		panic!("wallet storage corrupted")
	}

	fn is_mine(&self, _address: &Address) -> bool {
		false
	}
}

/// In-process sync service. `connect` waits while the service is unreachable.
pub struct FakeSyncClient {
	blocks: Arc<Mutex<Vec<Block>>>,
	reachable: watch::Sender<bool>,
	connects: AtomicUsize,
	disconnects: AtomicUsize,
	fetches: Arc<AtomicUsize>,
	state_changes: Broadcaster<BlockchainStateChanged>,
	disconnections: Broadcaster<ServiceDisconnected>,
}

impl FakeSyncClient {
	pub fn with_blocks(blocks: impl IntoIterator<Item = Block>) -> Arc<Self> {
		Arc::new(Self {
			blocks: Arc::new(Mutex::new(blocks.into_iter().collect())),
			reachable: watch::Sender::new(true),
			connects: AtomicUsize::new(0),
			disconnects: AtomicUsize::new(0),
			fetches: Arc::new(AtomicUsize::new(0)),
			state_changes: Broadcaster::new("fake-state"),
			disconnections: Broadcaster::new("fake-disconnect"),
		})
	}

	pub fn set_reachable(&self, reachable: bool) {
		self.reachable.send_replace(reachable);
	}

	pub fn push_block(&self, block: Block) {
		self.blocks.lock().expect("blocks lock").push(block);
	}

	/// Announce the current tip. Returns the number of registered receivers.
	pub fn notify(&self) -> usize {
		let tip = self
			.blocks
			.lock()
			.expect("blocks lock")
			.iter()
			.max_by_key(|b| b.height)
			.map(|b| (b.height, b.hash));
		self.state_changes.send(BlockchainStateChanged {
			best_height: tip.map(|(height, _)| height),
			best_hash: tip.map(|(_, hash)| hash),
		})
	}

	/// Report the current binding as lost. Returns the number of registered receivers.
	pub fn drop_connection(&self) -> usize {
		self.disconnections.send(ServiceDisconnected {
			reason: "connection reset".to_string(),
		})
	}

	pub fn connects(&self) -> usize {
		self.connects.load(Ordering::SeqCst)
	}

	pub fn disconnects(&self) -> usize {
		self.disconnects.load(Ordering::SeqCst)
	}

	pub fn fetches(&self) -> usize {
		self.fetches.load(Ordering::SeqCst)
	}
}

struct FakeService {
	blocks: Arc<Mutex<Vec<Block>>>,
	fetches: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl BlockchainService for FakeService {
	async fn recent_blocks(&self, _limit: usize) -> Result<Vec<Block>, ServiceError> {
		self.fetches.fetch_add(1, Ordering::SeqCst);
		Ok(self.blocks.lock().expect("blocks lock").clone())
	}
}

#[async_trait::async_trait]
impl SyncServiceClient for FakeSyncClient {
	async fn connect(&self) -> Result<Arc<dyn BlockchainService>, ServiceError> {
		let mut reachable = self.reachable.subscribe();
		reachable
			.wait_for(|reachable| *reachable)
			.await
			.map_err(|_| ServiceError::NotConnected)?;
		self.connects.fetch_add(1, Ordering::SeqCst);
		Ok(Arc::new(FakeService {
			blocks: Arc::clone(&self.blocks),
			fetches: Arc::clone(&self.fetches),
		}))
	}

	fn disconnect(&self) {
		self.disconnects.fetch_add(1, Ordering::SeqCst);
	}

	fn state_changes(&self) -> &Broadcaster<BlockchainStateChanged> {
		&self.state_changes
	}

	fn disconnections(&self) -> &Broadcaster<ServiceDisconnected> {
		&self.disconnections
	}
}
