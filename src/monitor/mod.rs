//! Reactive aggregation core of the recent blocks monitor.
//!
//! Four observer-counted sources (blocks, confirmed transactions, active wallet and time) feed a
//! single aggregator, which rebuilds the list of items on every publish and writes it to an
//! observable list cell.

pub mod aggregator;
pub mod list_items;
pub mod live_data;
pub mod model;
pub mod service;
pub mod sources;
pub mod stats;
mod types;

pub use aggregator::{Aggregator, SourceSubscriptions};
pub use list_items::{ListItem, ListTransaction, TxDirection, build_list_items};
pub use live_data::{LiveData, Publisher, SourceLifecycle, Subscription};
pub use model::{BlockListModel, LoggingNavigator, Navigator};
pub use service::{BlockchainService, SyncServiceClient};
pub use stats::AggregatorStats;
pub use types::{MonitorError, ServiceError};
