//! Notification channels shared between the monitor and the components it watches.
//!
//! A [`Broadcaster`] is a scoped publish-subscribe registry: it is owned by whichever component
//! emits the notification (the sync client, the wallet holder) and lives exactly as long as that
//! owner. Receivers register by calling [`Broadcaster::register`] and unregister by dropping the
//! returned receiver, so a deactivated source never leaves a registration behind.
//!
//! Notifications carry no payload the monitor depends on for correctness. They only tell a
//! source that its authoritative state may have moved and should be fetched again.

use crate::domain::BlockHash;
use tokio::sync::broadcast;
use tracing::trace;

/// Default queue depth for a broadcaster. Lagging receivers skip ahead rather than block senders.
pub const DEFAULT_CAPACITY: usize = 64;

/// The synchronization service moved to a new chain state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockchainStateChanged {
	/// Height of the best block, when the service reports it.
	pub best_height: Option<u64>,
	pub best_hash: Option<BlockHash>,
}

/// A binding to the synchronization service stopped working after it was established.
///
/// Consumers holding a service from that binding must drop it and connect again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDisconnected {
	/// Why the binding ended, for logging.
	pub reason: String,
}

/// The application replaced or reloaded the active wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalletChanged;

/// Publish-subscribe registry for one notification type.
#[derive(Debug, Clone)]
pub struct Broadcaster<E: Clone> {
	name: &'static str,
	sender: broadcast::Sender<E>,
}

impl<E: Clone> Broadcaster<E> {
	/// Create a broadcaster with the default capacity.
	pub fn new(name: &'static str) -> Self {
		Self::with_capacity(name, DEFAULT_CAPACITY)
	}

	pub fn with_capacity(name: &'static str, capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity.max(1));
		Self { name, sender }
	}

	/// Deliver a notification to every registered receiver.
	///
	/// Returns the number of receivers reached. Sending with nobody registered is not an error.
	pub fn send(&self, event: E) -> usize {
		match self.sender.send(event) {
			Ok(receivers) => receivers,
			Err(_) => {
				trace!(channel = self.name, "notification sent with no receivers registered");
				0
			}
		}
	}

	/// Register a new receiver. It sees only notifications sent after this call.
	pub fn register(&self) -> broadcast::Receiver<E> {
		self.sender.subscribe()
	}

	/// Number of live registrations.
	pub fn receiver_count(&self) -> usize {
		self.sender.receiver_count()
	}

	pub fn name(&self) -> &'static str {
		self.name
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn dropping_receiver_unregisters() {
		let broadcaster = Broadcaster::<WalletChanged>::new("wallet");
		assert_eq!(broadcaster.send(WalletChanged), 0);

		let first = broadcaster.register();
		let second = broadcaster.register();
		assert_eq!(broadcaster.receiver_count(), 2);
		assert_eq!(broadcaster.send(WalletChanged), 2);

		drop(first);
		drop(second);
		assert_eq!(broadcaster.receiver_count(), 0);
	}

	#[tokio::test]
	async fn receiver_only_sees_later_notifications() {
		let broadcaster = Broadcaster::new("chain");
		broadcaster.send(BlockchainStateChanged {
			best_height: Some(1),
			best_hash: None,
		});

		let mut receiver = broadcaster.register();
		broadcaster.send(BlockchainStateChanged {
			best_height: Some(2),
			best_hash: None,
		});

		let event = receiver.recv().await.expect("notification");
		assert_eq!(event.best_height, Some(2));
		assert!(receiver.try_recv().is_err());
	}
}
