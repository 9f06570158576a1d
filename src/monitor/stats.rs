//! Rebuild statistics for the aggregator.
//!
//! The tracker counts publishes per source and how each one was handled: a rebuild once a block
//! snapshot has been seen, a skip before that. Progress is logged every `LOG_EVERY` rebuilds or
//! when forced.

use tracing::info;

const LOG_EVERY: u64 = 100;

/// Which source delivered a publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
	Blocks,
	Transactions,
	Wallet,
	Time,
}

/// Snapshot of the tracker's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregatorStats {
	pub block_publishes: u64,
	pub transaction_publishes: u64,
	pub wallet_publishes: u64,
	pub time_publishes: u64,
	/// Rebuilds performed, one per publish after the first block snapshot.
	pub rebuilds: u64,
	/// Publishes that arrived before any block snapshot.
	pub skipped: u64,
}

impl AggregatorStats {
	/// Publishes delivered by all four sources.
	pub fn publishes(&self) -> u64 {
		self.block_publishes + self.transaction_publishes + self.wallet_publishes + self.time_publishes
	}

	/// One-line rendering used in progress logs.
	pub fn summary(&self) -> String {
		format!(
			"{} rebuilds, {} skipped ({} block, {} transaction, {} wallet, {} time publishes)",
			self.rebuilds,
			self.skipped,
			self.block_publishes,
			self.transaction_publishes,
			self.wallet_publishes,
			self.time_publishes
		)
	}
}

/// Counts what the aggregator did with each publish.
#[derive(Debug, Clone, Default)]
pub struct RebuildTracker {
	stats: AggregatorStats,
	last_logged_rebuilds: u64,
}

impl RebuildTracker {
	pub fn new() -> Self {
		Self::default()
	}

	/// Count a publish delivered by `source`.
	pub fn record_publish(&mut self, source: SourceKind) {
		match source {
			SourceKind::Blocks => self.stats.block_publishes += 1,
			SourceKind::Transactions => self.stats.transaction_publishes += 1,
			SourceKind::Wallet => self.stats.wallet_publishes += 1,
			SourceKind::Time => self.stats.time_publishes += 1,
		}
	}

	/// Count a publish that produced a new list.
	pub fn record_rebuild(&mut self) {
		self.stats.rebuilds += 1;
	}

	/// Count a publish that arrived before any block snapshot.
	pub fn record_skip(&mut self) {
		self.stats.skipped += 1;
	}

	pub fn stats(&self) -> AggregatorStats {
		self.stats
	}

	/// Log the counters at info level.
	///
	/// # Arguments
	/// * `force` - Log even if fewer than `LOG_EVERY` rebuilds happened since the last line
	pub fn log_progress(&mut self, force: bool) {
		let since_last_log = self.stats.rebuilds.saturating_sub(self.last_logged_rebuilds);
		if force || since_last_log >= LOG_EVERY {
			info!("Aggregator: {}", self.stats.summary());
			self.last_logged_rebuilds = self.stats.rebuilds;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn counts_publishes_per_source() {
		let mut tracker = RebuildTracker::new();
		tracker.record_publish(SourceKind::Time);
		tracker.record_skip();
		tracker.record_publish(SourceKind::Blocks);
		tracker.record_rebuild();
		tracker.record_publish(SourceKind::Wallet);
		tracker.record_rebuild();

		let stats = tracker.stats();
		assert_eq!(stats.publishes(), 3);
		assert_eq!(stats.rebuilds + stats.skipped, stats.publishes());
		assert_eq!(
			stats.summary(),
			"2 rebuilds, 1 skipped (1 block, 0 transaction, 1 wallet, 1 time publishes)"
		);
	}
}
