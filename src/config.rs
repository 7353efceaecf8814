//! Refresh settings, failure backoff policy, and their validation.

// std
use std::cell::RefCell;
// crates.io
use rand::{Rng, SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
// self
use crate::{_prelude::*, policy, schedule::CronSchedule};

thread_local! {
	static SMALL_RNG: RefCell<SmallRng> = RefCell::new(SmallRng::from_rng(&mut rand::rng()));
}

/// Default maximum attribute age before a refresh is due.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(3_600);
/// Default resync schedule: daily at midnight UTC.
pub const DEFAULT_CRON_EXPRESSION: &str = "0 0 * * *";
/// Default first backoff applied after a failed refresh.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(60);
/// Default ceiling for failure backoff growth.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(60 * 60 * 6);

/// Supported jitter strategies for failure backoff.
#[derive(Clone, Debug, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
	/// No jitter; deterministic backoff schedule.
	None,
	/// Full jitter; randomize delay between 80% and 100% of the current backoff.
	#[default]
	Full,
	/// Decorrelated jitter per AWS architecture guidance.
	Decorrelated,
}

/// Staleness and schedule settings applied by the coordinator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshConfig {
	/// Maximum age of cached attributes before they are refreshed.
	#[serde(default = "default_max_age")]
	pub max_age: Duration,
	/// Standard 5-field cron expression; empty disables scheduled sweeps.
	#[serde(default = "default_cron_expression")]
	pub cron_expression: String,
}
impl RefreshConfig {
	/// Build a config from raw setting strings (max age in seconds, cron expression).
	pub fn from_settings(max_age: &str, cron_expression: &str) -> Result<Self> {
		let config = Self {
			max_age: policy::parse_max_age(max_age)?,
			cron_expression: cron_expression.trim().to_owned(),
		};

		config.validate()?;

		Ok(config)
	}

	/// Validate that the cron expression parses.
	pub fn validate(&self) -> Result<()> {
		CronSchedule::parse(&self.cron_expression)?;

		Ok(())
	}
}
impl Default for RefreshConfig {
	fn default() -> Self {
		Self { max_age: DEFAULT_MAX_AGE, cron_expression: DEFAULT_CRON_EXPRESSION.to_owned() }
	}
}

/// Backoff applied to identities whose refresh keeps failing.
///
/// Scheduled sweeps skip an identity until its backoff elapses; forced sweeps and
/// on-demand refreshes ignore it. Disabled by default so every due record is attempted
/// on each sweep.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
	/// Whether failing identities are skipped by scheduled sweeps.
	#[serde(default)]
	pub enabled: bool,
	/// Delay applied after the first failure.
	#[serde(default = "default_initial_backoff")]
	pub initial_backoff: Duration,
	/// Upper bound applied to exponential backoff growth.
	#[serde(default = "default_max_backoff")]
	pub max_backoff: Duration,
	/// Strategy used to randomize the computed backoff.
	#[serde(default)]
	pub jitter: JitterStrategy,
}
impl BackoffPolicy {
	/// Enabled policy with the given bounds and no jitter.
	pub fn fixed(initial_backoff: Duration, max_backoff: Duration) -> Self {
		Self { enabled: true, initial_backoff, max_backoff, jitter: JitterStrategy::None }
	}

	/// Validate invariants for backoff configuration.
	pub fn validate(&self) -> Result<()> {
		if self.initial_backoff.is_zero() {
			return Err(Error::Validation {
				field: "backoff.initial_backoff",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.max_backoff < self.initial_backoff {
			return Err(Error::Validation {
				field: "backoff.max_backoff",
				reason: "Must be greater than or equal to initial_backoff.".into(),
			});
		}

		Ok(())
	}

	/// Backoff after `failures` consecutive failures (the first failure is 1).
	pub fn compute_backoff(&self, failures: u32) -> Duration {
		let exponent = failures.saturating_sub(1).min(32);
		let base = self.initial_backoff.saturating_mul(1_u32 << exponent.min(31));
		let bounded = base.min(self.max_backoff).max(self.initial_backoff);

		self.apply_jitter(bounded, exponent)
	}

	// Full jitter keeps a failing identity out of scheduled sweeps for 80% to 100% of its
	// backoff, never less than `initial_backoff`. Decorrelated jitter may retry as early as
	// `initial_backoff`.
	fn apply_jitter(&self, bounded: Duration, attempt: u32) -> Duration {
		match self.jitter {
			JitterStrategy::None => bounded,
			JitterStrategy::Full => {
				let lower = bounded.mul_f64(0.8).max(self.initial_backoff);

				random_within(lower, bounded)
			},
			JitterStrategy::Decorrelated => {
				let prev = if attempt == 0 { self.initial_backoff } else { bounded };
				let ceiling = self.max_backoff.min(prev.mul_f64(3.0));

				random_within(self.initial_backoff, ceiling.max(self.initial_backoff))
			},
		}
	}
}
impl Default for BackoffPolicy {
	fn default() -> Self {
		Self {
			enabled: false,
			initial_backoff: DEFAULT_INITIAL_BACKOFF,
			max_backoff: DEFAULT_MAX_BACKOFF,
			jitter: JitterStrategy::Full,
		}
	}
}

/// Uniform delay in `[min, max]` drawn from the thread-local generator.
fn random_within(min: Duration, max: Duration) -> Duration {
	if max <= min {
		return max;
	}
	SMALL_RNG.with(|cell| {
		let mut rng = cell.borrow_mut();
		let nanos = max.as_nanos() - min.as_nanos();
		let jitter = rng.random_range(0..=nanos.min(u64::MAX as u128));

		min + Duration::from_nanos(jitter as u64)
	})
}

fn default_max_age() -> Duration {
	DEFAULT_MAX_AGE
}

fn default_cron_expression() -> String {
	DEFAULT_CRON_EXPRESSION.to_owned()
}

fn default_initial_backoff() -> Duration {
	DEFAULT_INITIAL_BACKOFF
}

fn default_max_backoff() -> Duration {
	DEFAULT_MAX_BACKOFF
}
