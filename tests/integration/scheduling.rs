//! Trigger arming, replacement, and disarming under paused time.

// std
use std::{sync::Arc, time::Duration};
// crates.io
use chrono::{TimeDelta, TimeZone, Utc};
use tokio_util::sync::CancellationToken;
use userattr_refresh::{
	Error, ManualClock, RefreshConfig, RefreshCoordinator, Result, SchedulerDaemon,
	UserAttributeRecord,
};
// self
use crate::support::{self, FakeRefresher, FlakyStore};

async fn coordinator(
	clock: &Arc<ManualClock>,
) -> Result<(RefreshCoordinator, Arc<FakeRefresher>)> {
	let store = FlakyStore::with_records([UserAttributeRecord::new("alice")]);
	let refresher = FakeRefresher::new();
	let coordinator = RefreshCoordinator::builder().clock(clock.clone()).build()?;
	let config = RefreshConfig { max_age: Duration::ZERO, cron_expression: String::new() };

	coordinator.initialize(store, refresher.clone(), config).await?;

	Ok((coordinator, refresher))
}

/// Move wall-clock and timer time forward together.
async fn tick(clock: &ManualClock, seconds: u64) {
	clock.advance(TimeDelta::seconds(seconds as i64));
	tokio::time::sleep(Duration::from_secs(seconds)).await;
}

async fn sweeps(coordinator: &RefreshCoordinator) -> u64 {
	coordinator.status().await.metrics.sweeps_completed
}

#[tokio::test(start_paused = true)]
async fn every_minute_schedule_fires_non_forced_sweeps() -> Result<()> {
	support::init_tracing();

	let clock = support::manual_clock();
	let (coordinator, refresher) = coordinator(&clock).await?;

	coordinator.set_schedule("* * * * *").await?;

	assert_eq!(
		coordinator.status().await.next_sweep_at,
		Some(Utc.with_ymd_and_hms(2024, 6, 5, 12, 1, 0).unwrap())
	);
	assert_eq!(sweeps(&coordinator).await, 0);

	tick(&clock, 31).await;

	assert_eq!(sweeps(&coordinator).await, 1);
	assert_eq!(refresher.calls("alice"), 1);

	let last = coordinator.status().await.last_sweep.expect("last sweep");

	assert!(!last.forced);

	tick(&clock, 60).await;

	assert_eq!(sweeps(&coordinator).await, 2);

	Ok(())
}

#[tokio::test(start_paused = true)]
async fn malformed_schedule_keeps_previous_trigger() -> Result<()> {
	let clock = support::manual_clock();
	let (coordinator, _) = coordinator(&clock).await?;

	coordinator.set_schedule("* * * * *").await?;

	assert!(matches!(
		coordinator.set_schedule("bad expr").await,
		Err(Error::ScheduleSyntax { expression, .. }) if expression == "bad expr"
	));
	assert_eq!(coordinator.schedule().await.as_deref(), Some("* * * * *"));
	assert_eq!(coordinator.config().await.cron_expression, "* * * * *");

	tick(&clock, 31).await;

	assert_eq!(sweeps(&coordinator).await, 1);

	Ok(())
}

#[tokio::test(start_paused = true)]
async fn replacing_schedule_leaves_one_trigger() -> Result<()> {
	let clock = support::manual_clock();
	let (coordinator, _) = coordinator(&clock).await?;

	coordinator.set_schedule("* * * * *").await?;
	coordinator.set_schedule("*/1 * * * *").await?;

	tick(&clock, 31).await;

	assert_eq!(sweeps(&coordinator).await, 1);
	assert_eq!(coordinator.schedule().await.as_deref(), Some("*/1 * * * *"));

	coordinator.set_schedule("0 * * * *").await?;
	tick(&clock, 120).await;

	assert_eq!(sweeps(&coordinator).await, 1);
	assert_eq!(
		coordinator.status().await.next_sweep_at,
		Some(Utc.with_ymd_and_hms(2024, 6, 5, 13, 0, 0).unwrap())
	);

	Ok(())
}

#[tokio::test(start_paused = true)]
async fn empty_schedule_disarms() -> Result<()> {
	let clock = support::manual_clock();
	let (coordinator, refresher) = coordinator(&clock).await?;

	coordinator.set_schedule("* * * * *").await?;
	coordinator.set_schedule("").await?;

	assert!(coordinator.schedule().await.is_none());
	assert!(coordinator.status().await.next_sweep_at.is_none());

	tick(&clock, 300).await;

	assert_eq!(sweeps(&coordinator).await, 0);
	assert_eq!(refresher.total_calls(), 0);

	Ok(())
}

#[tokio::test(start_paused = true)]
async fn reinitialize_disarms_the_live_trigger() -> Result<()> {
	let clock = support::manual_clock();
	let (coordinator, _) = coordinator(&clock).await?;

	coordinator.set_schedule("* * * * *").await?;

	let store = FlakyStore::with_records(Vec::new());

	coordinator.initialize(store, FakeRefresher::new(), RefreshConfig::default()).await?;

	assert!(coordinator.schedule().await.is_none());

	tick(&clock, 90).await;

	assert_eq!(sweeps(&coordinator).await, 0);

	Ok(())
}

#[tokio::test(start_paused = true)]
async fn dropping_the_coordinator_stops_the_trigger() -> Result<()> {
	let clock = support::manual_clock();
	let (coordinator, refresher) = coordinator(&clock).await?;

	coordinator.set_schedule("* * * * *").await?;
	drop(coordinator);

	tick(&clock, 90).await;

	assert_eq!(refresher.total_calls(), 0);

	Ok(())
}

#[tokio::test(start_paused = true)]
async fn tick_passing_before_the_timer_runs_still_fires() -> Result<()> {
	let clock = support::manual_clock();
	let (coordinator, _) = coordinator(&clock).await?;

	coordinator.set_schedule("* * * * *").await?;
	// Past 12:01:00 before the timer task is first polled.
	clock.advance(TimeDelta::seconds(45));
	tokio::time::sleep(Duration::from_secs(1)).await;

	assert_eq!(sweeps(&coordinator).await, 1);

	Ok(())
}

#[tokio::test(start_paused = true)]
async fn restricted_day_fields_fire_on_either_day() -> Result<()> {
	let clock = support::manual_clock();
	let (coordinator, _) = coordinator(&clock).await?;

	// Midnight on the 1st or on Mondays; the 1st is weeks away, Monday 2024-06-10 is not.
	coordinator.set_schedule("0 0 1 * 1").await?;

	assert_eq!(
		coordinator.status().await.next_sweep_at,
		Some(Utc.with_ymd_and_hms(2024, 6, 10, 0, 0, 0).unwrap())
	);

	// 2024-06-05 12:00:30 plus 4 days 12 hours is 2024-06-10 00:00:30.
	tick(&clock, 4 * 86_400 + 12 * 3_600).await;

	assert_eq!(sweeps(&coordinator).await, 1);

	Ok(())
}

#[tokio::test(start_paused = true)]
async fn initialize_configures_but_does_not_arm_the_schedule() -> Result<()> {
	let clock = support::manual_clock();
	let coordinator = RefreshCoordinator::builder().clock(clock.clone()).build()?;
	let store = FlakyStore::with_records([UserAttributeRecord::new("alice")]);

	coordinator.initialize(store, FakeRefresher::new(), RefreshConfig::default()).await?;

	assert_eq!(coordinator.config().await.cron_expression, "0 0 * * *");
	assert!(coordinator.schedule().await.is_none());

	coordinator.set_schedule("0 0 * * *").await?;

	assert_eq!(coordinator.schedule().await.as_deref(), Some("0 0 * * *"));

	Ok(())
}

#[tokio::test(start_paused = true)]
async fn restarted_daemon_keeps_firing() -> Result<()> {
	let clock = support::manual_clock();
	let coordinator = RefreshCoordinator::builder().clock(clock.clone()).build()?;
	let store = FlakyStore::with_records([UserAttributeRecord::new("alice")]);
	let refresher = FakeRefresher::new();
	let daemon = SchedulerDaemon::new(coordinator.clone(), store, refresher.clone());
	let first = CancellationToken::new();

	daemon.start(first.clone(), "0", "* * * * *").await?;
	daemon.stop().await;
	daemon.start(CancellationToken::new(), "0", "* * * * *").await?;
	first.cancel();

	tick(&clock, 31).await;

	assert_eq!(coordinator.schedule().await.as_deref(), Some("* * * * *"));
	assert_eq!(sweeps(&coordinator).await, 1);
	assert_eq!(refresher.calls("alice"), 1);

	Ok(())
}
