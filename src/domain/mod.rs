//! Domain types consumed by the monitor.
//!
//! Blocks and transactions are plain values copied out of the synchronization service and the
//! wallet. The wallet and the address book stay owned by the host application; the monitor only
//! reads them through the [`Wallet`] and [`AddressBookStore`] seams.

/// Address book entries and the store seam
pub mod address_book;
/// Blocks, transactions, hashes and addresses
pub mod types;
/// Wallet seam and the active-wallet holder
pub mod wallet;

pub use address_book::*;
pub use types::*;
pub use wallet::*;
