//! Live timer that fires scheduled sweeps.

// crates.io
use tokio::time;
use tokio_util::sync::CancellationToken;
// self
use crate::{_prelude::*, refresh::coordinator::WeakCoordinator, schedule::CronSchedule};

/// Armed recurring trigger invoking a non-forced sweep on every fire.
///
/// Disarming cancels the pending sleep only; a sweep already running finishes and the
/// task then exits.
#[derive(Debug)]
pub struct Trigger {
	schedule: CronSchedule,
	cancel: CancellationToken,
}
impl Trigger {
	/// Start firing on `schedule`, counting fire times from `armed_at`.
	pub(crate) fn arm(
		schedule: CronSchedule,
		coordinator: WeakCoordinator,
		armed_at: DateTime<Utc>,
	) -> Self {
		let cancel = CancellationToken::new();

		tokio::spawn(run(schedule.clone(), coordinator, cancel.clone(), armed_at));

		tracing::debug!(schedule = %schedule, armed_at = %armed_at, "armed refresh trigger");

		Self { schedule, cancel }
	}

	/// Schedule this trigger fires on.
	pub fn schedule(&self) -> &CronSchedule {
		&self.schedule
	}

	/// Stop firing; consumes the trigger.
	pub(crate) fn disarm(self) {
		tracing::debug!(schedule = %self.schedule, "disarmed refresh trigger");
	}
}
impl Drop for Trigger {
	fn drop(&mut self) {
		self.cancel.cancel();
	}
}

async fn run(
	schedule: CronSchedule,
	coordinator: WeakCoordinator,
	cancel: CancellationToken,
	armed_at: DateTime<Utc>,
) {
	let mut last_fire: Option<DateTime<Utc>> = None;

	loop {
		let (next, delay) = {
			let Some(coordinator) = coordinator.upgrade() else {
				break;
			};
			let now = coordinator.now();
			// The first fire counts from arming so a tick passing before this task is polled still
			// fires. Later fires never repeat an instant and drop ticks missed during a sweep.
			let from = last_fire.map_or(armed_at, |last| last.max(now));
			let Some(next) = schedule.next_after(from) else {
				tracing::debug!(schedule = %schedule, "schedule has no upcoming fire time");

				break;
			};

			(next, (next - now).to_std().unwrap_or_default())
		};

		tokio::select! {
			biased;
			_ = cancel.cancelled() => break,
			_ = time::sleep(delay) => {},
		}

		let Some(coordinator) = coordinator.upgrade() else {
			break;
		};

		last_fire = Some(next);

		tracing::debug!(schedule = %schedule, fire_at = %next, "triggering scheduled attribute refresh");

		coordinator.refresh_all(false).await;
	}
}
