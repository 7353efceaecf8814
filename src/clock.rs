//! Time sources used for staleness checks and trigger scheduling.

// std
use std::{fmt::Debug, sync::Mutex};
// self
use crate::_prelude::*;

/// Source of wall-clock time.
pub trait Clock: Debug + Send + Sync {
	/// Current UTC time.
	fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;
impl Clock for SystemClock {
	fn now(&self) -> DateTime<Utc> {
		Utc::now()
	}
}

/// Manually driven clock for deterministic tests.
#[derive(Debug)]
pub struct ManualClock {
	now: Mutex<DateTime<Utc>>,
}
impl ManualClock {
	/// Create a clock frozen at `now`.
	pub fn new(now: DateTime<Utc>) -> Arc<Self> {
		Arc::new(Self { now: Mutex::new(now) })
	}

	/// Advance the clock by `delta`.
	pub fn advance(&self, delta: TimeDelta) {
		let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

		*now += delta;
	}
}
impl Clock for ManualClock {
	fn now(&self) -> DateTime<Utc> {
		*self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
	}
}
