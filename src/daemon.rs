//! Lifecycle wrapper wiring collaborators into the coordinator and applying settings.

// crates.io
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
// self
use crate::{
	_prelude::*,
	config::RefreshConfig,
	provider::IdentityRefresher,
	refresh::coordinator::{RefreshCoordinator, WeakCoordinator},
	store::AttributeStore,
};

/// Owns the live refresh schedule for the lifetime of a cancellation token.
#[derive(Debug)]
pub struct SchedulerDaemon {
	coordinator: RefreshCoordinator,
	store: Arc<dyn AttributeStore>,
	refresher: Arc<dyn IdentityRefresher>,
	session: Arc<Mutex<Session>>,
}
impl SchedulerDaemon {
	/// Create a daemon driving `coordinator` with the given collaborators.
	pub fn new(
		coordinator: RefreshCoordinator,
		store: Arc<dyn AttributeStore>,
		refresher: Arc<dyn IdentityRefresher>,
	) -> Self {
		Self { coordinator, store, refresher, session: Default::default() }
	}

	/// Coordinator driven by this daemon.
	pub fn coordinator(&self) -> &RefreshCoordinator {
		&self.coordinator
	}

	/// Initialize the coordinator and apply the initial settings.
	///
	/// A malformed max age or cron expression fails startup. Cancelling `cancel` disarms the
	/// trigger. Starting again replaces the previous run; its token no longer disarms anything.
	pub async fn start(
		&self,
		cancel: CancellationToken,
		initial_max_age: &str,
		initial_cron: &str,
	) -> Result<()> {
		let mut session = self.session.lock().await;
		let generation = session.retire();

		self.coordinator
			.initialize(self.store.clone(), self.refresher.clone(), RefreshConfig::default())
			.await?;
		self.coordinator.set_max_age(initial_max_age).await?;
		self.coordinator.set_schedule(initial_cron).await?;

		let token = cancel.child_token();

		tokio::spawn(watch(
			self.session.clone(),
			generation,
			token.clone(),
			self.coordinator.downgrade(),
		));

		session.token = Some(token);

		tracing::info!(max_age = initial_max_age, cron = initial_cron, "refresh daemon started");

		Ok(())
	}

	/// Apply changed settings from the settings source.
	///
	/// Both values are applied independently; the first error is returned.
	pub async fn apply_settings(&self, max_age: &str, cron: &str) -> Result<()> {
		let max_age = self.coordinator.set_max_age(max_age).await;
		let schedule = self.coordinator.set_schedule(cron).await;

		max_age.and(schedule)
	}

	/// Stop scheduled sweeps started by [`Self::start`].
	pub async fn stop(&self) {
		let mut session = self.session.lock().await;

		session.retire();
		self.coordinator.disarm().await;

		tracing::info!("refresh daemon stopped");
	}
}

// Token of the current run. Each start or stop bumps the generation so watchers of earlier
// runs wake up as no-ops.
#[derive(Debug, Default)]
struct Session {
	generation: u64,
	token: Option<CancellationToken>,
}
impl Session {
	fn retire(&mut self) -> u64 {
		if let Some(token) = self.token.take() {
			token.cancel();
		}

		self.generation += 1;

		self.generation
	}
}

async fn watch(
	session: Arc<Mutex<Session>>,
	generation: u64,
	token: CancellationToken,
	coordinator: WeakCoordinator,
) {
	token.cancelled().await;

	let mut session = session.lock().await;

	if session.generation != generation {
		return;
	}

	session.token = None;

	if let Some(coordinator) = coordinator.upgrade() {
		coordinator.disarm().await;
	}

	tracing::info!("refresh daemon cancelled");
}
