//! Refresh coordinator owning staleness settings, the live trigger, and refresh execution.

// std
use std::{
	collections::{HashMap, HashSet},
	sync::Weak,
};
// crates.io
use tokio::sync::{Mutex, RwLock};
// self
use crate::{
	_prelude::*,
	clock::{Clock, SystemClock},
	config::{BackoffPolicy, RefreshConfig},
	metrics::{self, RefreshMetrics},
	policy,
	provider::IdentityRefresher,
	record::UserAttributeRecord,
	refresh::{
		inflight::InFlightRegistry,
		state::{
			Collaborators, CoordinatorState, CoordinatorStatus, FailureState, SweepOutcome,
			SweepReport,
		},
		trigger::Trigger,
	},
	schedule::CronSchedule,
	store::AttributeStore,
};

const TRIGGER_SWEEP: &str = "sweep";
const TRIGGER_ON_DEMAND: &str = "on_demand";

/// Builder for [`RefreshCoordinator`].
#[derive(Debug, Default)]
pub struct CoordinatorBuilder {
	clock: Option<Arc<dyn Clock>>,
	backoff: BackoffPolicy,
}
impl CoordinatorBuilder {
	/// Create a builder using the system clock and no failure backoff.
	pub fn new() -> Self {
		Self::default()
	}

	/// Use `clock` for staleness checks, refresh timestamps, and trigger scheduling.
	pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = Some(clock);

		self
	}

	/// Apply `policy` to identities whose refresh keeps failing.
	pub fn backoff(mut self, policy: BackoffPolicy) -> Self {
		self.backoff = policy;

		self
	}

	/// Finalise the configuration and construct an uninitialized [`RefreshCoordinator`].
	pub fn build(self) -> Result<RefreshCoordinator> {
		if self.backoff.enabled {
			self.backoff.validate()?;
		}

		let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

		Ok(RefreshCoordinator::with_parts(clock, self.backoff))
	}
}

/// Coordinates scheduled sweeps and on-demand refreshes of user attributes.
///
/// Handles are cheap to clone and share one state. Reconfiguration is serialized through
/// the mutex guarding the live trigger, so at most one trigger is ever armed. Refreshes are
/// serialized per identity and never hold that mutex.
#[derive(Clone, Debug)]
pub struct RefreshCoordinator {
	inner: Arc<Inner>,
}
impl RefreshCoordinator {
	/// Create an uninitialized coordinator using the system clock.
	pub fn new() -> Self {
		Self::with_parts(Arc::new(SystemClock), BackoffPolicy::default())
	}

	/// Create a [`CoordinatorBuilder`] for advanced configuration.
	pub fn builder() -> CoordinatorBuilder {
		CoordinatorBuilder::new()
	}

	fn with_parts(clock: Arc<dyn Clock>, backoff: BackoffPolicy) -> Self {
		Self {
			inner: Arc::new(Inner {
				clock,
				backoff,
				collaborators: RwLock::new(None),
				config: RwLock::new(RefreshConfig::default()),
				trigger: Mutex::new(None),
				in_flight: InFlightRegistry::new(),
				failures: Mutex::new(HashMap::new()),
				last_sweep: RwLock::new(None),
				metrics: RefreshMetrics::new(),
			}),
		}
	}

	/// Install collaborators and the initial settings, moving to `Ready`.
	///
	/// No trigger is armed; call [`Self::set_schedule`] for that. Re-initializing disarms any
	/// live trigger and clears failure bookkeeping.
	pub async fn initialize(
		&self,
		store: Arc<dyn AttributeStore>,
		refresher: Arc<dyn IdentityRefresher>,
		config: RefreshConfig,
	) -> Result<()> {
		config.validate()?;

		let mut trigger = self.inner.trigger.lock().await;

		if let Some(previous) = trigger.take() {
			previous.disarm();
		}

		self.inner.failures.lock().await.clear();
		*self.inner.config.write().await = config;
		*self.inner.collaborators.write().await = Some(Arc::new(Collaborators { store, refresher }));

		tracing::debug!("refresh coordinator initialized");

		Ok(())
	}

	/// Current lifecycle state.
	pub async fn state(&self) -> CoordinatorState {
		if self.inner.collaborators.read().await.is_some() {
			CoordinatorState::Ready
		} else {
			CoordinatorState::Uninitialized
		}
	}

	/// Whether [`Self::initialize`] has completed.
	pub async fn is_initialized(&self) -> bool {
		self.state().await == CoordinatorState::Ready
	}

	/// Consistent snapshot of the current settings.
	///
	/// `cron_expression` is the configured expression, which is armed only by
	/// [`Self::set_schedule`]; after [`Self::initialize`] it may name a schedule that is not
	/// firing. Use [`Self::schedule`] for the live trigger.
	pub async fn config(&self) -> RefreshConfig {
		self.inner.config.read().await.clone()
	}

	/// Expression of the currently armed trigger, if any.
	pub async fn schedule(&self) -> Option<String> {
		self.inner.trigger.lock().await.as_ref().map(|trigger| trigger.schedule().to_string())
	}

	/// Replace the max age from a setting expressed in whole seconds.
	///
	/// A malformed value leaves the previous max age in effect.
	pub async fn set_max_age(&self, setting: &str) -> Result<()> {
		self.collaborators().await?;

		let max_age = policy::parse_max_age(setting)?;

		self.set_max_age_duration(max_age).await
	}

	/// Replace the max age used by refreshes issued after this call returns.
	pub async fn set_max_age_duration(&self, max_age: Duration) -> Result<()> {
		self.collaborators().await?;

		let _reconfigure = self.inner.trigger.lock().await;

		self.inner.config.write().await.max_age = max_age;

		tracing::debug!(max_age_secs = max_age.as_secs(), "updated refresh max age");

		Ok(())
	}

	/// Replace the recurring trigger with one firing on `expression`.
	///
	/// An empty expression disarms scheduled sweeps. A malformed expression is rejected and
	/// the previously armed trigger keeps firing. A sweep in progress is not interrupted.
	pub async fn set_schedule(&self, expression: &str) -> Result<()> {
		self.collaborators().await?;

		let schedule = CronSchedule::parse(expression)?;
		let mut trigger = self.inner.trigger.lock().await;

		if let Some(previous) = trigger.take() {
			previous.disarm();
		}

		*trigger = schedule.map(|schedule| Trigger::arm(schedule, self.downgrade(), self.now()));
		self.inner.config.write().await.cron_expression = expression.trim().to_owned();

		tracing::debug!(
			cron = expression.trim(),
			armed = trigger.is_some(),
			"updated refresh schedule"
		);

		Ok(())
	}

	/// Disarm the live trigger, if any, keeping the configured settings.
	pub async fn disarm(&self) {
		if let Some(previous) = self.inner.trigger.lock().await.take() {
			previous.disarm();
		}
	}

	/// Sweep every stored record, refreshing those that are due (or all when `force`).
	///
	/// Per-record failures are logged and counted; the sweep always continues. Failing to
	/// list records aborts this sweep only.
	#[tracing::instrument(skip(self))]
	pub async fn refresh_all(&self, force: bool) -> SweepReport {
		let mut report = SweepReport::new(force, self.now());
		let collaborators = match self.collaborators().await {
			Ok(collaborators) => collaborators,
			Err(err) => {
				tracing::debug!(error = %err, "skipping attribute sweep");

				report.aborted = true;
				report.finished_at = Some(self.now());

				return report;
			},
		};
		let max_age = self.inner.config.read().await.max_age;

		match collaborators.store.list().await {
			Ok(records) => {
				self.forget_missing(&records).await;

				for record in records {
					let outcome = self.sweep_record(&collaborators, record, force, max_age).await;

					report.record(outcome);
				}
			},
			Err(err) => {
				tracing::error!(error = %err, "failed to list user attributes; sweep aborted");

				report.aborted = true;
			},
		}

		report.finished_at = Some(self.now());

		tracing::debug!(
			examined = report.examined,
			refreshed = report.refreshed,
			failed = report.failed,
			skipped = report.skipped,
			backed_off = report.backed_off,
			"attribute sweep finished"
		);

		metrics::record_sweep(&report.counts());
		self.inner.metrics.record_sweep(report.aborted);
		*self.inner.last_sweep.write().await = Some(report.clone());

		report
	}

	/// Refresh `record` now, regardless of staleness.
	///
	/// Provider and store errors are returned unchanged; on provider failure nothing is
	/// written.
	#[tracing::instrument(skip(self, record), fields(identity = %record.identity))]
	pub async fn refresh_one(&self, record: &UserAttributeRecord) -> Result<UserAttributeRecord> {
		let collaborators = self.collaborators().await?;

		tracing::debug!("starting refresh process");

		let _guard = self.inner.in_flight.acquire(&record.identity).await;
		let updated = self.refresh_locked(&collaborators, record, TRIGGER_ON_DEMAND).await?;

		tracing::debug!("finished refresh process");

		Ok(updated)
	}

	/// Look up the stored record for `identity` and refresh it now.
	pub async fn refresh_identity(&self, identity: &str) -> Result<UserAttributeRecord> {
		let collaborators = self.collaborators().await?;
		let record = collaborators
			.store
			.get(identity)
			.await?
			.ok_or_else(|| Error::RecordNotFound { identity: identity.to_owned() })?;

		self.refresh_one(&record).await
	}

	/// Capture coordinator status for reporting.
	pub async fn status(&self) -> CoordinatorStatus {
		let now = self.now();
		let (armed_schedule, next_sweep_at) = {
			let trigger = self.inner.trigger.lock().await;

			match trigger.as_ref() {
				Some(trigger) => (
					Some(trigger.schedule().to_string()),
					trigger.schedule().next_after(now),
				),
				None => (None, None),
			}
		};
		let mut failing = self.inner.failures.lock().await.values().cloned().collect::<Vec<_>>();

		failing.sort_by(|a, b| a.identity.cmp(&b.identity));

		CoordinatorStatus {
			state: self.state().await,
			config: self.config().await,
			armed_schedule,
			next_sweep_at,
			last_sweep: self.inner.last_sweep.read().await.clone(),
			failing,
			in_flight: self.inner.in_flight.len(),
			metrics: self.inner.metrics.snapshot(),
		}
	}

	pub(crate) fn now(&self) -> DateTime<Utc> {
		self.inner.clock.now()
	}

	pub(crate) fn downgrade(&self) -> WeakCoordinator {
		WeakCoordinator(Arc::downgrade(&self.inner))
	}

	async fn collaborators(&self) -> Result<Arc<Collaborators>> {
		self.inner.collaborators.read().await.clone().ok_or(Error::NotInitialized)
	}

	async fn sweep_record(
		&self,
		collaborators: &Collaborators,
		record: UserAttributeRecord,
		force: bool,
		max_age: Duration,
	) -> SweepOutcome {
		if !force {
			let now = self.now();

			if !policy::is_due(&record, max_age, now) {
				return SweepOutcome::Skipped;
			}
			if self.is_backing_off(&record.identity, now).await {
				tracing::debug!(identity = %record.identity, "skipping identity in failure backoff");

				return SweepOutcome::BackedOff;
			}
		}

		let guard = self.inner.in_flight.acquire(&record.identity).await;
		// A concurrent refresh may have finished while this sweep waited for the identity.
		let record = if guard.waited() && !force {
			match collaborators.store.get(&record.identity).await {
				Ok(Some(latest)) if policy::is_due(&latest, max_age, self.now()) => latest,
				Ok(_) => return SweepOutcome::Skipped,
				Err(err) => {
					tracing::warn!(identity = %record.identity, error = %err, "failed to reload user attributes");

					return SweepOutcome::Failed;
				},
			}
		} else {
			record
		};

		match self.refresh_locked(collaborators, &record, TRIGGER_SWEEP).await {
			Ok(_) => SweepOutcome::Refreshed,
			Err(err) => {
				tracing::warn!(identity = %record.identity, error = %err, "failed to refresh user attributes");

				SweepOutcome::Failed
			},
		}
	}

	// Callers must hold the identity guard for `record`.
	async fn refresh_locked(
		&self,
		collaborators: &Collaborators,
		record: &UserAttributeRecord,
		trigger: &'static str,
	) -> Result<UserAttributeRecord> {
		let started = Instant::now();
		let result = async {
			let payload = collaborators.refresher.fetch(&record.identity).await?;
			let updated = record.refreshed(payload, self.now());

			collaborators.store.write(&updated).await?;

			Ok::<_, Error>(updated)
		}
		.await;

		match &result {
			Ok(_) => {
				self.inner.failures.lock().await.remove(&record.identity);
				self.inner.metrics.record_refresh_success(started.elapsed());

				metrics::record_refresh_success(trigger, started.elapsed());
			},
			Err(err) => {
				let now = self.now();

				self.inner
					.failures
					.lock()
					.await
					.entry(record.identity.clone())
					.or_insert_with(|| FailureState::new(&record.identity, now))
					.bump(err, now, &self.inner.backoff);
				self.inner.metrics.record_refresh_error();

				metrics::record_refresh_error(trigger);
			},
		}

		result
	}

	// Failure bookkeeping for identities no longer in the store.
	async fn forget_missing(&self, records: &[UserAttributeRecord]) {
		let present = records.iter().map(|record| record.identity.as_str()).collect::<HashSet<_>>();

		self.inner.failures.lock().await.retain(|identity, _| present.contains(identity.as_str()));
	}

	async fn is_backing_off(&self, identity: &str, now: DateTime<Utc>) -> bool {
		self.inner.backoff.enabled
			&& self
				.inner
				.failures
				.lock()
				.await
				.get(identity)
				.is_some_and(|failure| failure.is_backing_off(now))
	}
}
impl Default for RefreshCoordinator {
	fn default() -> Self {
		Self::new()
	}
}

/// Non-owning handle held by the trigger task.
#[derive(Clone, Debug)]
pub(crate) struct WeakCoordinator(Weak<Inner>);
impl WeakCoordinator {
	pub(crate) fn upgrade(&self) -> Option<RefreshCoordinator> {
		self.0.upgrade().map(|inner| RefreshCoordinator { inner })
	}
}

#[derive(Debug)]
struct Inner {
	clock: Arc<dyn Clock>,
	backoff: BackoffPolicy,
	collaborators: RwLock<Option<Arc<Collaborators>>>,
	config: RwLock<RefreshConfig>,
	// Doubles as the reconfiguration guard.
	trigger: Mutex<Option<Trigger>>,
	in_flight: Arc<InFlightRegistry>,
	failures: Mutex<HashMap<String, FailureState>>,
	last_sweep: RwLock<Option<SweepReport>>,
	metrics: Arc<RefreshMetrics>,
}
