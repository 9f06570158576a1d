//!
//! Utility module for the block monitor.
//!
//! Re-exports formatting helpers used when rendering list items.
/// Amount and relative time formatting
pub mod format;

pub use format::{format_coin_amount, format_relative_time};
