//! Observer-counted observable cells.
//!
//! A [`LiveData`] holds the latest value of one piece of state and fans every published value
//! out to its observers. Values are stored behind `Arc` and replaced wholesale, never mutated in
//! place. Each observer owns an unbounded queue, so every publish reaches every observer exactly
//! once and nothing is coalesced.
//!
//! A cell may carry a [`SourceLifecycle`]. The lifecycle is started when the first observer
//! subscribes and stopped when the last [`Subscription`] is dropped. Every activation gets a fresh
//! [`Publisher`] tagged with a generation number; values published through a publisher from an
//! earlier activation are discarded, which is how late results from deactivated sources are
//! dropped without cancelling the work that produced them.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Hooks run when a cell gains its first observer and loses its last one.
pub trait SourceLifecycle<T>: Send + Sync {
	/// Acquire external resources. Values are published through `publisher`.
	fn start(&self, publisher: Publisher<T>);

	/// Release everything acquired by `start`. Must be idempotent.
	fn stop(&self);
}

struct CellState<T> {
	value: Option<Arc<T>>,
	observers: Vec<(u64, mpsc::UnboundedSender<Arc<T>>)>,
	next_observer: u64,
	generation: u64,
	active: bool,
}

/// Observable cell holding the latest value of a source.
pub struct LiveData<T> {
	name: &'static str,
	state: Mutex<CellState<T>>,
	// Serializes activation and deactivation so start/stop hooks never interleave.
	transitions: Mutex<()>,
	lifecycle: Option<Arc<dyn SourceLifecycle<T>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
	mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T: Send + Sync + 'static> LiveData<T> {
	/// A plain cell with no lifecycle, written through [`LiveData::publish`].
	pub fn new(name: &'static str) -> Arc<Self> {
		Arc::new(Self::build(name, None))
	}

	/// A cell whose lifecycle follows its observer count.
	pub fn with_lifecycle(name: &'static str, lifecycle: Arc<dyn SourceLifecycle<T>>) -> Arc<Self> {
		Arc::new(Self::build(name, Some(lifecycle)))
	}

	fn build(name: &'static str, lifecycle: Option<Arc<dyn SourceLifecycle<T>>>) -> Self {
		Self {
			name,
			state: Mutex::new(CellState {
				value: None,
				observers: Vec::new(),
				next_observer: 0,
				generation: 0,
				active: false,
			}),
			transitions: Mutex::new(()),
			lifecycle,
		}
	}

	/// Name used in log lines.
	pub fn name(&self) -> &'static str {
		self.name
	}

	/// Latest published value, `None` until the first publish.
	pub fn value(&self) -> Option<Arc<T>> {
		lock(&self.state).value.clone()
	}

	/// Number of live subscriptions.
	pub fn observer_count(&self) -> usize {
		lock(&self.state).observers.len()
	}

	/// Whether the cell currently has observers.
	pub fn is_active(&self) -> bool {
		lock(&self.state).active
	}

	/// Register an observer.
	///
	/// The current value, if any, is queued for the new observer straight away. The first
	/// observer activates the cell's lifecycle.
	pub fn subscribe(self: &Arc<Self>) -> Subscription<T> {
		let _transition = lock(&self.transitions);
		let (sender, receiver) = mpsc::unbounded_channel();

		let activated = {
			let mut state = lock(&self.state);
			let id = state.next_observer;
			state.next_observer += 1;
			if let Some(value) = &state.value {
				let _ = sender.send(Arc::clone(value));
			}
			state.observers.push((id, sender));

			let first = !state.active;
			if first {
				state.active = true;
				state.generation += 1;
			}
			(id, first.then_some(state.generation))
		};

		let (id, generation) = activated;
		if let Some(generation) = generation {
			debug!(source = self.name, generation, "source active");
			if let Some(lifecycle) = &self.lifecycle {
				lifecycle.start(Publisher {
					cell: Arc::downgrade(self),
					generation,
				});
			}
		}

		Subscription {
			id,
			cell: Arc::clone(self),
			receiver,
		}
	}

	fn unsubscribe(&self, id: u64) {
		let _transition = lock(&self.transitions);
		let deactivated = {
			let mut state = lock(&self.state);
			state.observers.retain(|(observer, _)| *observer != id);
			let last = state.active && state.observers.is_empty();
			if last {
				state.active = false;
				// Invalidate the publisher handed out on activation.
				state.generation += 1;
			}
			last
		};

		if deactivated {
			debug!(source = self.name, "source inactive");
			if let Some(lifecycle) = &self.lifecycle {
				lifecycle.stop();
			}
		}
	}

	/// Replace the value and deliver it to every observer.
	pub fn publish(&self, value: T) {
		self.publish_at(None, value);
	}

	/// Returns `false` when the value was dropped because `generation` is stale.
	fn publish_at(&self, generation: Option<u64>, value: T) -> bool {
		let value = Arc::new(value);
		let mut state = lock(&self.state);
		if let Some(generation) = generation {
			if !state.active || generation != state.generation {
				debug!(
					source = self.name,
					generation,
					current = state.generation,
					"dropping value published after deactivation"
				);
				return false;
			}
		}

		state.value = Some(Arc::clone(&value));
		state
			.observers
			.retain(|(_, sender)| sender.send(Arc::clone(&value)).is_ok());
		trace!(source = self.name, observers = state.observers.len(), "published");
		true
	}
}

/// Write handle given to a lifecycle for one activation.
pub struct Publisher<T> {
	cell: Weak<LiveData<T>>,
	generation: u64,
}

impl<T> Clone for Publisher<T> {
	fn clone(&self) -> Self {
		Self {
			cell: Weak::clone(&self.cell),
			generation: self.generation,
		}
	}
}

impl<T: Send + Sync + 'static> Publisher<T> {
	/// Publish a full replacement value. Returns `false` if the activation has ended.
	pub fn publish(&self, value: T) -> bool {
		match self.cell.upgrade() {
			Some(cell) => cell.publish_at(Some(self.generation), value),
			None => false,
		}
	}

	/// Whether this publisher still belongs to the cell's current activation.
	pub fn is_current(&self) -> bool {
		match self.cell.upgrade() {
			Some(cell) => {
				let state = lock(&cell.state);
				state.active && state.generation == self.generation
			}
			None => false,
		}
	}
}

impl<T> fmt::Debug for Publisher<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Publisher")
			.field("generation", &self.generation)
			.finish()
	}
}

/// An observer registration. Dropping it unregisters the observer.
pub struct Subscription<T: Send + Sync + 'static> {
	id: u64,
	cell: Arc<LiveData<T>>,
	receiver: mpsc::UnboundedReceiver<Arc<T>>,
}

impl<T: Send + Sync + 'static> Subscription<T> {
	/// Wait for the next published value.
	pub async fn next(&mut self) -> Option<Arc<T>> {
		self.receiver.recv().await
	}

	/// Take the next queued value without waiting.
	pub fn try_next(&mut self) -> Option<Arc<T>> {
		self.receiver.try_recv().ok()
	}

	pub fn source(&self) -> &Arc<LiveData<T>> {
		&self.cell
	}
}

impl<T: Send + Sync + 'static> Drop for Subscription<T> {
	fn drop(&mut self) {
		self.cell.unsubscribe(self.id);
	}
}
