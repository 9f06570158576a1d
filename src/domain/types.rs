//! Chain data as seen by the monitor: blocks, transactions and addresses.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Maximum number of recent blocks the monitor ever holds.
pub const MAX_BLOCKS: usize = 100;

/// A 32-byte hash, displayed as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash256(pub [u8; 32]);

pub type BlockHash = Hash256;
pub type TxHash = Hash256;

impl Hash256 {
	pub fn as_bytes(&self) -> &[u8; 32] {
		&self.0
	}
}

impl fmt::Display for Hash256 {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&hex::encode(self.0))
	}
}

impl fmt::Debug for Hash256 {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Hash256({})", self)
	}
}

impl FromStr for Hash256 {
	type Err = hex::FromHexError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let mut bytes = [0u8; 32];
		hex::decode_to_slice(s.trim_start_matches("0x"), &mut bytes)?;
		Ok(Self(bytes))
	}
}

impl Serialize for Hash256 {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.collect_str(self)
	}
}

/// An address as rendered by the chain, kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
	pub fn new(address: impl Into<String>) -> Self {
		Self(address.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for Address {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for Address {
	fn from(address: &str) -> Self {
		Self::new(address)
	}
}

/// Header metadata carried alongside a block.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlockHeader {
	/// Hash of the parent block, absent for genesis.
	pub prev_block_hash: Option<BlockHash>,
	pub protocol_version: u32,
	/// Block producer, if the chain reports one.
	pub author: Option<String>,
}

/// A block known to the synchronization service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
	pub hash: BlockHash,
	pub height: u64,
	pub timestamp: DateTime<Utc>,
	pub header: BlockHeader,
}

/// A spent output referenced by a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInput {
	pub address: Option<Address>,
	/// Value of the spent output in base units, when the wallet knows it.
	pub value: Option<i64>,
}

/// An output created by a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
	pub address: Option<Address>,
	/// Value in base units.
	pub value: i64,
}

/// A wallet transaction together with the blocks it has been seen in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
	pub hash: TxHash,
	/// Containing block hash to block height.
	pub appears_in: BTreeMap<BlockHash, u64>,
	pub inputs: Vec<TxInput>,
	pub outputs: Vec<TxOutput>,
	pub is_coinbase: bool,
}

impl Transaction {
	/// A transaction is confirmed once it appears in at least one block.
	pub fn is_confirmed(&self) -> bool {
		!self.appears_in.is_empty()
	}

	pub fn appears_in_block(&self, block_hash: &BlockHash) -> bool {
		self.appears_in.contains_key(block_hash)
	}
}
