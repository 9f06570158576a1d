//! Monitor configuration.
//!
//! Every field has a default so a partial (or absent) JSON file is valid. The file is located
//! through `BLOCK_MONITOR_CONFIG`; the indexer endpoints can be overridden individually through
//! `BLOCK_MONITOR_INDEXER_URL` and `BLOCK_MONITOR_WS_URL`.

use crate::domain::MAX_BLOCKS;
use crate::monitor::MonitorError;
use crate::utils::format_coin_amount;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub const CONFIG_PATH_VAR: &str = "BLOCK_MONITOR_CONFIG";
pub const INDEXER_URL_VAR: &str = "BLOCK_MONITOR_INDEXER_URL";
pub const WS_URL_VAR: &str = "BLOCK_MONITOR_WS_URL";

/// Unit amounts are rendered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Denomination {
	Btc,
	Mbtc,
	Ubtc,
}

impl Denomination {
	pub fn code(&self) -> &'static str {
		match self {
			Denomination::Btc => "BTC",
			Denomination::Mbtc => "mBTC",
			Denomination::Ubtc => "µBTC",
		}
	}

	/// Decimal places between a base unit and one of this denomination.
	pub fn exponent(&self) -> u32 {
		match self {
			Denomination::Btc => 8,
			Denomination::Mbtc => 5,
			Denomination::Ubtc => 2,
		}
	}
}

/// How values are rendered in list items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayFormat {
	pub denomination: Denomination,
	/// Fraction digits shown, capped at the denomination's exponent.
	pub precision: u32,
}

impl Default for DisplayFormat {
	fn default() -> Self {
		Self {
			denomination: Denomination::Mbtc,
			precision: 2,
		}
	}
}

impl DisplayFormat {
	pub fn format(&self, amount: i64) -> String {
		format!(
			"{} {}",
			format_coin_amount(amount, self.denomination.exponent(), self.precision),
			self.denomination.code()
		)
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
	/// GraphQL HTTP endpoint of the indexer.
	pub indexer_url: String,
	/// GraphQL WebSocket endpoint of the indexer.
	pub ws_url: String,
	/// Number of recent blocks to show, clamped to `1..=MAX_BLOCKS`.
	pub max_blocks: usize,
	/// Seconds between relative time refreshes.
	pub time_tick_secs: u64,
	/// Ceiling for the reconnect backoff, in seconds.
	pub connect_max_backoff_secs: u64,
	pub display_format: DisplayFormat,
	/// Base URL of the block explorer used by "open block".
	pub block_explorer: String,
	pub enable_browse: bool,
	/// Addresses of the watch-only wallet run by the binary.
	pub watch_addresses: Vec<String>,
	/// Address book entries loaded by the binary.
	pub address_labels: BTreeMap<String, String>,
}

impl Default for MonitorConfig {
	fn default() -> Self {
		Self {
			indexer_url: "https://indexer.testnet-02.midnight.network/api/v1/graphql".to_string(),
			ws_url: "wss://indexer.testnet-02.midnight.network/api/v1/graphql/ws".to_string(),
			max_blocks: MAX_BLOCKS,
			time_tick_secs: 60,
			connect_max_backoff_secs: 30,
			display_format: DisplayFormat::default(),
			block_explorer: "https://blockstream.info/".to_string(),
			enable_browse: true,
			watch_addresses: Vec::new(),
			address_labels: BTreeMap::new(),
		}
	}
}

impl MonitorConfig {
	/// Load from the environment: config file first, then endpoint overrides.
	pub fn from_env() -> Result<Self, MonitorError> {
		Self::from_lookup(|key| std::env::var(key).ok())
	}

	/// Same as [`MonitorConfig::from_env`] with an injectable variable lookup.
	pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, MonitorError> {
		let mut config = match lookup(CONFIG_PATH_VAR) {
			Some(path) => Self::load(Path::new(&path))?,
			None => Self::default(),
		};
		if let Some(url) = lookup(INDEXER_URL_VAR) {
			config.indexer_url = url;
		}
		if let Some(url) = lookup(WS_URL_VAR) {
			config.ws_url = url;
		}
		config.validate()?;
		Ok(config)
	}

	/// Read a JSON config file. A missing file yields the defaults.
	pub fn load(path: &Path) -> Result<Self, MonitorError> {
		if !path.exists() {
			info!("No config file at {:?}, using defaults", path);
			return Ok(Self::default());
		}
		let content = std::fs::read_to_string(path)?;
		let config: Self = serde_json::from_str(&content)?;
		info!("Loaded config from {:?}", path);
		Ok(config)
	}

	pub fn validate(&self) -> Result<(), MonitorError> {
		if self.indexer_url.is_empty() || self.ws_url.is_empty() {
			return Err(MonitorError::ConfigError(
				"indexer_url and ws_url must be set".to_string(),
			));
		}
		if self.time_tick_secs == 0 {
			return Err(MonitorError::ConfigError(
				"time_tick_secs must be positive".to_string(),
			));
		}
		Ok(())
	}

	pub fn recent_block_limit(&self) -> usize {
		self.max_blocks.clamp(1, MAX_BLOCKS)
	}

	pub fn time_tick(&self) -> Duration {
		Duration::from_secs(self.time_tick_secs)
	}

	pub fn connect_max_backoff(&self) -> Duration {
		Duration::from_secs(self.connect_max_backoff_secs.max(1))
	}
}
