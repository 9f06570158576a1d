//! The four observer-counted sources feeding the aggregator.
//!
//! Each source wraps a [`LiveData`](crate::monitor::LiveData) cell and a lifecycle that acquires
//! its external resources (service binding, notification registration, ticker, worker) only while
//! the cell has observers.

/// Recent blocks from the synchronization service
pub mod blocks;
/// Periodic "now" ticks
pub mod time;
/// Confirmed transactions of the active wallet
pub mod transactions;
/// Active wallet reference
pub mod wallet;

pub use blocks::{BlockSource, RecentBlocks, normalize_recent_blocks};
pub use time::TimeSource;
pub use transactions::{ConfirmedTransactions, TransactionSource, filter_confirmed};
pub use wallet::WalletSource;
