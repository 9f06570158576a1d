use crate::monitor::live_data::{LiveData, Publisher, SourceLifecycle, Subscription};

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::trace;

/// Periodic wall-clock ticks that keep relative time labels fresh.
pub struct TimeSource {
	live: Arc<LiveData<DateTime<Utc>>>,
}

impl TimeSource {
	/// Ticks every `period` while observed, starting immediately.
	pub fn new(period: Duration) -> Self {
		let lifecycle = Arc::new(TickerLifecycle {
			period: period.max(Duration::from_millis(1)),
			ticker: Mutex::new(None),
		});
		Self {
			live: LiveData::with_lifecycle("time", lifecycle),
		}
	}

	/// Observe the source. The first subscription activates it.
	pub fn subscribe(&self) -> Subscription<DateTime<Utc>> {
		self.live.subscribe()
	}

	/// Last published value, kept across deactivation.
	pub fn value(&self) -> Option<Arc<DateTime<Utc>>> {
		self.live.value()
	}
}

struct TickerLifecycle {
	period: Duration,
	ticker: Mutex<Option<JoinHandle<()>>>,
}

impl SourceLifecycle<DateTime<Utc>> for TickerLifecycle {
	fn start(&self, publisher: Publisher<DateTime<Utc>>) {
		let period = self.period;
		let ticker = tokio::spawn(async move {
			let mut interval = time::interval(period);
			interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
			loop {
				// The first tick completes immediately.
				interval.tick().await;
				let now = Utc::now();
				trace!(%now, "time tick");
				if !publisher.publish(now) {
					break;
				}
			}
		});

		let previous = self
			.ticker
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.replace(ticker);
		if let Some(previous) = previous {
			previous.abort();
		}
	}

	fn stop(&self) {
		let ticker = self
			.ticker
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.take();
		if let Some(ticker) = ticker {
			ticker.abort();
		}
	}
}
