//! Metrics helpers and in-process refresh telemetry bookkeeping.

// std
use std::sync::atomic::{AtomicU64, Ordering};
#[cfg(feature = "prometheus")] use std::sync::OnceLock;
// crates.io
use metrics::Label;
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
// self
use crate::_prelude::*;

type LabelSet = SmallVec<[Label; 2]>;

const METRIC_REFRESH_TOTAL: &str = "userattr_refresh_total";
const METRIC_REFRESH_DURATION: &str = "userattr_refresh_duration_seconds";
const METRIC_REFRESH_ERRORS: &str = "userattr_refresh_errors_total";
const METRIC_SWEEP_TOTAL: &str = "userattr_sweep_total";
const METRIC_SWEEP_RECORDS: &str = "userattr_sweep_records";

/// Shared Prometheus handle installed by [`install_default_exporter`].
#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Thread-safe accumulator for refresh and sweep outcomes.
#[derive(Debug, Default)]
pub struct RefreshMetrics {
	refresh_successes: AtomicU64,
	refresh_errors: AtomicU64,
	sweeps_completed: AtomicU64,
	sweeps_aborted: AtomicU64,
	last_refresh_micros: AtomicU64,
}
impl RefreshMetrics {
	/// Create a new metrics accumulator.
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Record a successful refresh and its latency.
	pub fn record_refresh_success(&self, duration: Duration) {
		self.refresh_successes.fetch_add(1, Ordering::Relaxed);
		self.last_refresh_micros.store(duration.as_micros() as u64, Ordering::Relaxed);
	}

	/// Record a failed refresh.
	pub fn record_refresh_error(&self) {
		self.refresh_errors.fetch_add(1, Ordering::Relaxed);
	}

	/// Record the end of a sweep.
	pub fn record_sweep(&self, aborted: bool) {
		if aborted {
			self.sweeps_aborted.fetch_add(1, Ordering::Relaxed);
		} else {
			self.sweeps_completed.fetch_add(1, Ordering::Relaxed);
		}
	}

	/// Take a point-in-time snapshot for status reporting.
	pub fn snapshot(&self) -> RefreshMetricsSnapshot {
		RefreshMetricsSnapshot {
			refresh_successes: self.refresh_successes.load(Ordering::Relaxed),
			refresh_errors: self.refresh_errors.load(Ordering::Relaxed),
			sweeps_completed: self.sweeps_completed.load(Ordering::Relaxed),
			sweeps_aborted: self.sweeps_aborted.load(Ordering::Relaxed),
			last_refresh_micros: match self.last_refresh_micros.load(Ordering::Relaxed) {
				0 => None,
				value => Some(value),
			},
		}
	}
}

/// Read-only snapshot of refresh telemetry counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshMetricsSnapshot {
	/// Count of successful single-record refreshes.
	pub refresh_successes: u64,
	/// Count of refreshes that failed at the provider or the store.
	pub refresh_errors: u64,
	/// Count of sweeps that ran to completion.
	pub sweeps_completed: u64,
	/// Count of sweeps aborted because records could not be listed.
	pub sweeps_aborted: u64,
	/// Microsecond latency of the most recent successful refresh.
	pub last_refresh_micros: Option<u64>,
}

/// Install the default Prometheus recorder backed by `metrics`.
///
/// Multiple invocations are safe; subsequent calls become no-ops once the recorder is installed.
#[cfg(feature = "prometheus")]
pub fn install_default_exporter() -> Result<()> {
	if PROMETHEUS_HANDLE.get().is_some() {
		return Ok(());
	}

	let handle = PrometheusBuilder::new()
		.install_recorder()
		.map_err(|err| Error::Metrics(err.to_string()))?;
	let _ = PROMETHEUS_HANDLE.set(handle);

	Ok(())
}

/// Access the global Prometheus exporter handle when installed.
#[cfg(feature = "prometheus")]
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
	PROMETHEUS_HANDLE.get()
}

/// Record a successful single-record refresh along with its latency.
pub fn record_refresh_success(trigger: &'static str, duration: Duration) {
	metrics::counter!(METRIC_REFRESH_TOTAL, status_labels(trigger, "success").iter()).increment(1);
	metrics::histogram!(METRIC_REFRESH_DURATION, trigger_labels(trigger).iter())
		.record(duration.as_secs_f64());
}

/// Record a failed single-record refresh.
pub fn record_refresh_error(trigger: &'static str) {
	metrics::counter!(METRIC_REFRESH_TOTAL, status_labels(trigger, "error").iter()).increment(1);
	metrics::counter!(METRIC_REFRESH_ERRORS, trigger_labels(trigger).iter()).increment(1);
}

/// Record the outcome of a sweep and how its records were handled.
pub fn record_sweep(report: &SweepCounts) {
	let outcome = if report.aborted { "aborted" } else { "completed" };

	metrics::counter!(METRIC_SWEEP_TOTAL, "outcome" => outcome).increment(1);

	for (result, value) in [
		("refreshed", report.refreshed),
		("failed", report.failed),
		("skipped", report.skipped),
	] {
		metrics::histogram!(METRIC_SWEEP_RECORDS, "result" => result).record(value as f64);
	}
}

/// Per-sweep counts fed into [`record_sweep`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SweepCounts {
	/// Whether the sweep was aborted before examining records.
	pub aborted: bool,
	/// Records refreshed successfully.
	pub refreshed: usize,
	/// Records whose refresh failed.
	pub failed: usize,
	/// Records left untouched.
	pub skipped: usize,
}

fn trigger_labels(trigger: &'static str) -> LabelSet {
	let mut labels = LabelSet::new();

	labels.push(Label::new("trigger", trigger));

	labels
}

fn status_labels(trigger: &'static str, status: &'static str) -> LabelSet {
	let mut labels = trigger_labels(trigger);

	labels.push(Label::new("status", status));

	labels
}
