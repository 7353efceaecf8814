//! Coordinator lifecycle state and sweep/status projections.

// std
use std::fmt;
// crates.io
use serde::{Deserialize, Serialize};
// self
use crate::{
	_prelude::*,
	config::{BackoffPolicy, RefreshConfig},
	metrics::{RefreshMetricsSnapshot, SweepCounts},
	provider::IdentityRefresher,
	store::AttributeStore,
};

/// Public representation of the coordinator lifecycle.
#[derive(Clone, Debug, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum CoordinatorState {
	/// No collaborators installed; every operation is rejected.
	Uninitialized,
	/// Collaborators installed; refreshes and reconfiguration are accepted.
	Ready,
}

/// External collaborators installed by `initialize`.
pub(crate) struct Collaborators {
	pub(crate) store: Arc<dyn AttributeStore>,
	pub(crate) refresher: Arc<dyn IdentityRefresher>,
}
impl fmt::Debug for Collaborators {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Collaborators")
			.field("store", &self.store)
			.field("refresher", &self.refresher)
			.finish()
	}
}

/// Summary of one sweep over the attribute store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
	/// Whether every record was refreshed regardless of staleness.
	pub forced: bool,
	/// UTC timestamp when the sweep started.
	pub started_at: DateTime<Utc>,
	/// UTC timestamp when the sweep finished.
	pub finished_at: Option<DateTime<Utc>>,
	/// Whether the sweep was aborted before examining records.
	pub aborted: bool,
	/// Records listed from the store.
	pub examined: usize,
	/// Records refreshed and written back.
	pub refreshed: usize,
	/// Records whose refresh failed.
	pub failed: usize,
	/// Records not yet due, or made fresh by a concurrent refresh.
	pub skipped: usize,
	/// Due records left alone because their identity is backing off after failures.
	pub backed_off: usize,
}
impl SweepReport {
	pub(crate) fn new(forced: bool, started_at: DateTime<Utc>) -> Self {
		Self {
			forced,
			started_at,
			finished_at: None,
			aborted: false,
			examined: 0,
			refreshed: 0,
			failed: 0,
			skipped: 0,
			backed_off: 0,
		}
	}

	pub(crate) fn record(&mut self, outcome: SweepOutcome) {
		self.examined += 1;

		match outcome {
			SweepOutcome::Refreshed => self.refreshed += 1,
			SweepOutcome::Failed => self.failed += 1,
			SweepOutcome::Skipped => self.skipped += 1,
			SweepOutcome::BackedOff => self.backed_off += 1,
		}
	}

	pub(crate) fn counts(&self) -> SweepCounts {
		SweepCounts {
			aborted: self.aborted,
			refreshed: self.refreshed,
			failed: self.failed,
			skipped: self.skipped + self.backed_off,
		}
	}
}

/// Per-record result inside a sweep.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SweepOutcome {
	Refreshed,
	Failed,
	Skipped,
	BackedOff,
}

/// Consecutive failure bookkeeping for one identity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureState {
	/// Identity whose refresh failed.
	pub identity: String,
	/// Count of consecutive failed refreshes.
	pub failures: u32,
	/// Message of the most recent failure.
	pub last_error: String,
	/// UTC timestamp of the most recent failure.
	pub last_failure_at: DateTime<Utc>,
	/// Earliest time a scheduled sweep retries this identity when backoff is enabled.
	pub retry_at: DateTime<Utc>,
}
impl FailureState {
	pub(crate) fn new(identity: &str, now: DateTime<Utc>) -> Self {
		Self {
			identity: identity.to_owned(),
			failures: 0,
			last_error: String::new(),
			last_failure_at: now,
			retry_at: now,
		}
	}

	/// Update bookkeeping after another failed refresh.
	pub(crate) fn bump(&mut self, error: &Error, now: DateTime<Utc>, policy: &BackoffPolicy) {
		self.failures = self.failures.saturating_add(1);
		self.last_error = error.to_string();
		self.last_failure_at = now;

		let backoff = TimeDelta::from_std(policy.compute_backoff(self.failures))
			.unwrap_or(TimeDelta::MAX);

		self.retry_at = now.checked_add_signed(backoff).unwrap_or(DateTime::<Utc>::MAX_UTC);
	}

	/// Whether scheduled sweeps must still skip this identity at `now`.
	pub fn is_backing_off(&self, now: DateTime<Utc>) -> bool {
		now < self.retry_at
	}
}

/// Status projection for the coordinator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CoordinatorStatus {
	/// Lifecycle state.
	pub state: CoordinatorState,
	/// Current staleness and schedule settings.
	pub config: RefreshConfig,
	/// Expression of the armed trigger, if any.
	pub armed_schedule: Option<String>,
	/// Next scheduled sweep, if a trigger is armed.
	pub next_sweep_at: Option<DateTime<Utc>>,
	/// Report of the most recent sweep.
	pub last_sweep: Option<SweepReport>,
	/// Identities whose most recent refresh failed.
	pub failing: Vec<FailureState>,
	/// Identities with a refresh currently in flight.
	pub in_flight: usize,
	/// Telemetry counters.
	pub metrics: RefreshMetricsSnapshot,
}
