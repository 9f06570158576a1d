//! The recent blocks model exposed to the presentation layer.
//!
//! Sources are created on first access and stay inert until observed. [`BlockListModel::attach`]
//! subscribes an aggregator to all of them; dropping or shutting down the returned handle
//! deactivates them again. Only one aggregator may be attached at a time.

use crate::config::MonitorConfig;
use crate::domain::{AddressBookStore, BlockHash, WalletHolder};
use crate::monitor::aggregator::{Aggregator, SourceSubscriptions};
use crate::monitor::list_items::ListItem;
use crate::monitor::live_data::LiveData;
use crate::monitor::service::SyncServiceClient;
use crate::monitor::sources::{BlockSource, TimeSource, TransactionSource, WalletSource};
use crate::monitor::MonitorError;

use reqwest::Url;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

/// Opens URLs on behalf of the model.
pub trait Navigator: Send + Sync {
	fn open(&self, url: &Url);
}

/// Navigator that only logs the URL.
pub struct LoggingNavigator;

impl Navigator for LoggingNavigator {
	fn open(&self, url: &Url) {
		info!("Open {} in a browser to view the block", url);
	}
}

pub struct BlockListModel {
	config: MonitorConfig,
	client: Arc<dyn SyncServiceClient>,
	wallets: Arc<WalletHolder>,
	address_book: Arc<dyn AddressBookStore>,
	navigator: Arc<dyn Navigator>,
	blocks: OnceLock<BlockSource>,
	transactions: OnceLock<Arc<TransactionSource>>,
	wallet: OnceLock<WalletSource>,
	time: OnceLock<TimeSource>,
	list: Arc<LiveData<Vec<ListItem>>>,
	attached: Arc<AtomicBool>,
}

impl BlockListModel {
	pub fn new(
		config: MonitorConfig,
		client: Arc<dyn SyncServiceClient>,
		wallets: Arc<WalletHolder>,
		address_book: Arc<dyn AddressBookStore>,
		navigator: Arc<dyn Navigator>,
	) -> Self {
		Self {
			config,
			client,
			wallets,
			address_book,
			navigator,
			blocks: OnceLock::new(),
			transactions: OnceLock::new(),
			wallet: OnceLock::new(),
			time: OnceLock::new(),
			list: LiveData::new("list"),
			attached: Arc::new(AtomicBool::new(false)),
		}
	}

	/// The block source, created on first call.
	pub fn blocks(&self) -> &BlockSource {
		self.blocks.get_or_init(|| {
			debug!("creating block source");
			BlockSource::new(
				Arc::clone(&self.client),
				self.config.recent_block_limit(),
				self.config.connect_max_backoff(),
			)
		})
	}

	pub fn transactions(&self) -> &Arc<TransactionSource> {
		self.transactions.get_or_init(|| {
			debug!("creating transaction source");
			Arc::new(TransactionSource::new(Arc::clone(&self.wallets)))
		})
	}

	/// The active wallet source, created on first call.
	pub fn wallet(&self) -> &WalletSource {
		self.wallet.get_or_init(|| {
			debug!("creating wallet source");
			WalletSource::new(Arc::clone(&self.wallets))
		})
	}

	pub fn time(&self) -> &TimeSource {
		self.time.get_or_init(|| {
			debug!("creating time source");
			TimeSource::new(self.config.time_tick())
		})
	}

	/// The published list of items, newest block first.
	pub fn list(&self) -> &Arc<LiveData<Vec<ListItem>>> {
		&self.list
	}

	/// Start observing every source. Must be called from within a Tokio runtime.
	///
	/// # Returns
	/// The running aggregator, or [`MonitorError::AlreadyAttached`] while a previous handle is
	/// still alive. Shutting down or dropping that handle allows attaching again.
	pub fn attach(&self) -> Result<Aggregator, MonitorError> {
		if self.attached.swap(true, Ordering::AcqRel) {
			warn!("Aggregator already attached, refusing a second one");
			return Err(MonitorError::AlreadyAttached);
		}
		let sources = SourceSubscriptions {
			blocks: self.blocks().subscribe(),
			transactions: self.transactions().subscribe(),
			wallet: self.wallet().subscribe(),
			time: self.time().subscribe(),
		};
		let transactions = Arc::clone(self.transactions());
		let attached = Arc::clone(&self.attached);
		let aggregator = Aggregator::spawn(
			sources,
			Box::new(move || transactions.load_transactions()),
			self.config.display_format.clone(),
			Arc::clone(&self.address_book),
			Arc::clone(&self.list),
		)
		.on_release(move || attached.store(false, Ordering::Release));
		Ok(aggregator)
	}

	/// Open the configured block explorer on `hash`.
	pub fn open_block_reference(&self, hash: &BlockHash) -> Result<Url, MonitorError> {
		if !self.config.enable_browse {
			return Err(MonitorError::BrowseDisabled);
		}
		let url = block_url(&self.config.block_explorer, hash)?;
		info!(
			"Viewing block {} on {}",
			hash,
			url.host_str().unwrap_or(url.as_str())
		);
		self.navigator.open(&url);
		Ok(url)
	}
}

fn invalid_explorer(explorer: &str, reason: impl std::fmt::Display) -> MonitorError {
	MonitorError::InvalidExplorerUrl {
		url: explorer.to_string(),
		reason: reason.to_string(),
	}
}

/// `<explorer>/block/<hash>`, tolerating a missing trailing slash on the explorer URL.
fn block_url(explorer: &str, hash: &BlockHash) -> Result<Url, MonitorError> {
	let base = if explorer.ends_with('/') {
		Url::parse(explorer)
	} else {
		Url::parse(&format!("{}/", explorer))
	}
	.map_err(|e| invalid_explorer(explorer, e))?;
	if base.cannot_be_a_base() {
		return Err(invalid_explorer(explorer, "not a base URL"));
	}
	base.join(&format!("block/{}", hash))
		.map_err(|e| invalid_explorer(explorer, e))
}
