use block_monitor::config::MonitorConfig;
use block_monitor::domain::{
	Address, AddressBookEntry, InMemoryAddressBook, InMemoryWallet, WalletHolder,
};
use block_monitor::indexer::{IndexerClient, IndexerSyncClient};
use block_monitor::monitor::{BlockListModel, LoggingNavigator, MonitorError};

use std::sync::Arc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() {
	let filter = EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| EnvFilter::new("info,block_monitor=debug"));
	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	if let Err(e) = run().await {
		error!("Block monitor failed: {}", e);
		std::process::exit(1);
	}
}

async fn run() -> Result<(), MonitorError> {
	info!("Starting block monitor");
	let config = MonitorConfig::from_env()?;

	let indexer_client = IndexerClient::new(config.indexer_url.clone(), config.ws_url.clone())?;
	let sync_client = Arc::new(IndexerSyncClient::new(indexer_client));
	info!("Created indexer client for {}", config.indexer_url);

	let wallets = Arc::new(WalletHolder::new());
	let wallet = Arc::new(InMemoryWallet::new(
		"watch-only",
		config.watch_addresses.iter().map(|a| Address::new(a.as_str())),
	));
	wallets.set_wallet(wallet);

	let address_book = Arc::new(InMemoryAddressBook::new());
	address_book.load(
		config
			.address_labels
			.iter()
			.map(|(address, label)| AddressBookEntry::new(address.as_str(), label.as_str())),
	);
	info!(
		"Watching {} addresses, {} address book labels",
		config.watch_addresses.len(),
		config.address_labels.len()
	);

	let model = BlockListModel::new(
		config,
		sync_client,
		wallets,
		address_book,
		Arc::new(LoggingNavigator),
	);
	let mut list = model.list().subscribe();
	let aggregator = model.attach()?;
	info!("Watching recent blocks, press Ctrl-C to stop");

	let mut newest_opened = None;
	loop {
		tokio::select! {
			_ = tokio::signal::ctrl_c() => break,
			Some(items) = list.next() => {
				info!(
					"Recent blocks: {} items, newest {:?}",
					items.len(),
					items.first().map(|item| item.height)
				);
				debug!("{}", serde_json::to_string(&*items)?);

				// Show the explorer link once per new tip.
				let Some(newest) = items.first() else { continue };
				if newest_opened != Some(newest.block_hash) {
					newest_opened = Some(newest.block_hash);
					if let Err(e) = model.open_block_reference(&newest.block_hash) {
						warn!("Not opening block {}: {}", newest.block_hash, e);
					}
				}
			}
		}
	}

	let stats = aggregator.stats();
	aggregator.shutdown().await;
	info!("Block monitor stopped: {}", stats.summary());
	Ok(())
}
