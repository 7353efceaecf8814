//! Cron-driven refresh scheduler that keeps cached user identity attributes from going stale,
//! with per-identity single-flight refresh.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod clock;
pub mod config;
pub mod daemon;
pub mod metrics;
pub mod policy;
pub mod provider;
pub mod record;
pub mod refresh;
pub mod schedule;
pub mod store;

mod error;
mod _prelude {
	pub use std::{sync::Arc, time::Duration};

	pub use chrono::{DateTime, TimeDelta, Utc};
	pub use tokio::time::Instant;

	pub use crate::{Error, Result};
}

#[cfg(feature = "prometheus")] pub use crate::metrics::install_default_exporter;
pub use crate::{
	clock::{Clock, ManualClock, SystemClock},
	config::{BackoffPolicy, JitterStrategy, RefreshConfig},
	daemon::SchedulerDaemon,
	error::{Error, Result},
	policy::{is_due, parse_max_age},
	provider::IdentityRefresher,
	record::UserAttributeRecord,
	refresh::{
		coordinator::{CoordinatorBuilder, RefreshCoordinator},
		state::{CoordinatorState, CoordinatorStatus, FailureState, SweepReport},
	},
	schedule::CronSchedule,
	store::{AttributeStore, MemoryAttributeStore},
};
