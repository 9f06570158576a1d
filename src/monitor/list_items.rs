//! Pure construction of the recent blocks list.

use crate::config::DisplayFormat;
use crate::domain::{Address, AddressBook, Block, BlockHash, Transaction, TxHash, Wallet};
use crate::utils::format_relative_time;

use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TxDirection {
	Sent,
	Received,
	/// Every output went back to the wallet.
	Internal,
}

/// A wallet transaction confirmed in the block an item represents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListTransaction {
	pub tx_hash: TxHash,
	pub direction: Option<TxDirection>,
	/// Net effect on the wallet in base units.
	pub value: Option<i64>,
	pub formatted_value: Option<String>,
	/// Counterparty address.
	pub address: Option<Address>,
	/// Address book label for `address`, or the raw address.
	pub address_label: Option<String>,
	pub is_coinbase: bool,
}

/// One row of the recent blocks list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListItem {
	pub block_hash: BlockHash,
	pub height: u64,
	/// Relative time label, absent until a time tick has been seen.
	pub time: Option<String>,
	/// Block timestamp lies ahead of the local clock.
	pub is_future: bool,
	pub transactions: Vec<ListTransaction>,
}

/// Build one item per block, in block order.
///
/// Never fails and never reads anything beyond its arguments: equal inputs give equal output.
pub fn build_list_items(
	blocks: &[Block],
	now: Option<DateTime<Utc>>,
	format: &DisplayFormat,
	transactions: Option<&[Transaction]>,
	wallet: Option<&dyn Wallet>,
	address_book: Option<&AddressBook>,
) -> Vec<ListItem> {
	blocks
		.iter()
		.map(|block| ListItem {
			block_hash: block.hash,
			height: block.height,
			time: now.map(|now| format_relative_time(now, block.timestamp)),
			is_future: now.is_some_and(|now| block.timestamp > now),
			transactions: transactions
				.unwrap_or_default()
				.iter()
				.filter(|tx| tx.appears_in_block(&block.hash))
				.map(|tx| annotate(tx, format, wallet, address_book))
				.collect_vec(),
		})
		.collect_vec()
}

fn annotate(
	tx: &Transaction,
	format: &DisplayFormat,
	wallet: Option<&dyn Wallet>,
	address_book: Option<&AddressBook>,
) -> ListTransaction {
	let (direction, value, address) = match wallet {
		Some(wallet) => {
			let (direction, value, address) = wallet_view(tx, wallet);
			(direction, Some(value), address)
		}
		None => (
			None,
			None,
			tx.outputs.iter().find_map(|output| output.address.clone()),
		),
	};

	let address_label = address.as_ref().map(|address| match address_book {
		Some(book) => book.resolve(address),
		None => address.to_string(),
	});

	ListTransaction {
		tx_hash: tx.hash,
		direction,
		value,
		formatted_value: value.map(|value| format.format(value)),
		address,
		address_label,
		is_coinbase: tx.is_coinbase,
	}
}

fn wallet_view(tx: &Transaction, wallet: &dyn Wallet) -> (Option<TxDirection>, i64, Option<Address>) {
	let is_mine = |address: &Option<Address>| address.as_ref().is_some_and(|a| wallet.is_mine(a));

	let sent: i64 = tx
		.inputs
		.iter()
		.filter(|input| is_mine(&input.address))
		.filter_map(|input| input.value)
		.sum();
	let spends_mine = tx.inputs.iter().any(|input| is_mine(&input.address));
	let received: i64 = tx
		.outputs
		.iter()
		.filter(|output| is_mine(&output.address))
		.map(|output| output.value)
		.sum();

	if spends_mine {
		let counterparty = tx
			.outputs
			.iter()
			.find(|output| output.address.is_some() && !is_mine(&output.address));
		match counterparty {
			Some(output) => (Some(TxDirection::Sent), received - sent, output.address.clone()),
			None => (
				Some(TxDirection::Internal),
				received - sent,
				tx.outputs.iter().find_map(|output| output.address.clone()),
			),
		}
	} else {
		let own = tx.outputs.iter().find(|output| is_mine(&output.address));
		(
			own.map(|_| TxDirection::Received),
			received,
			own.and_then(|output| output.address.clone()),
		)
	}
}
