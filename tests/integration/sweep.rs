//! Bulk sweep behaviour: staleness selection, failure isolation, and backoff.

// std
use std::time::Duration;
// crates.io
use chrono::TimeDelta;
use userattr_refresh::{
	BackoffPolicy, Clock, RefreshConfig, RefreshCoordinator, Result, UserAttributeRecord,
};
// self
use crate::support::{self, FakeRefresher, FlakyStore};

fn config(max_age_secs: u64) -> RefreshConfig {
	RefreshConfig { max_age: Duration::from_secs(max_age_secs), cron_expression: String::new() }
}

fn aged(identity: &str, seconds: i64) -> UserAttributeRecord {
	UserAttributeRecord::new(identity)
		.with_last_refresh(support::epoch() - TimeDelta::seconds(seconds))
}

#[tokio::test]
async fn refreshes_only_due_records() -> Result<()> {
	support::init_tracing();

	let mut records = (0..7).map(|i| aged(&format!("fresh-{i}"), 100)).collect::<Vec<_>>();

	records.push(aged("stale-a", 10_000));
	records.push(aged("stale-b", 3_600));
	records.push(aged("flagged", 10).with_needs_refresh(true));

	let store = FlakyStore::with_records(records);
	let refresher = FakeRefresher::new();
	let coordinator = RefreshCoordinator::builder().clock(support::manual_clock()).build()?;

	coordinator.initialize(store.clone(), refresher.clone(), config(3_600)).await?;

	let report = coordinator.refresh_all(false).await;

	assert_eq!(refresher.total_calls(), 3);
	assert_eq!(refresher.calls("stale-a"), 1);
	assert_eq!(refresher.calls("stale-b"), 1);
	assert_eq!(refresher.calls("flagged"), 1);
	assert_eq!(report.examined, 10);
	assert_eq!(report.refreshed, 3);
	assert_eq!(report.skipped, 7);
	assert!(!report.aborted);

	for write in store.writes() {
		assert!(!write.needs_refresh);
		assert_eq!(write.last_refresh, Some(support::epoch()));
	}

	Ok(())
}

#[tokio::test]
async fn forced_sweep_refreshes_everything() -> Result<()> {
	let store = FlakyStore::with_records((0..4).map(|i| aged(&format!("user-{i}"), 1)));
	let refresher = FakeRefresher::new();
	let coordinator = RefreshCoordinator::builder().clock(support::manual_clock()).build()?;

	coordinator.initialize(store.clone(), refresher.clone(), config(3_600)).await?;

	let report = coordinator.refresh_all(true).await;

	assert!(report.forced);
	assert_eq!(report.refreshed, 4);
	assert_eq!(refresher.total_calls(), 4);

	Ok(())
}

#[tokio::test]
async fn per_record_failures_do_not_stop_the_sweep() -> Result<()> {
	let store = FlakyStore::with_records([
		aged("alice", 10_000),
		aged("bob", 10_000),
		aged("carol", 10_000),
	]);
	let refresher = FakeRefresher::new();

	refresher.fail_for("alice");
	store.fail_writes_for("bob");

	let coordinator = RefreshCoordinator::builder().clock(support::manual_clock()).build()?;

	coordinator.initialize(store.clone(), refresher.clone(), config(3_600)).await?;

	let report = coordinator.refresh_all(false).await;

	assert_eq!(report.failed, 2);
	assert_eq!(report.refreshed, 1);
	assert_eq!(refresher.total_calls(), 3);
	assert_eq!(
		store.writes().into_iter().map(|r| r.identity).collect::<Vec<_>>(),
		["carol"]
	);

	let status = coordinator.status().await;

	assert_eq!(
		status.failing.iter().map(|f| f.identity.as_str()).collect::<Vec<_>>(),
		["alice", "bob"]
	);
	assert_eq!(status.metrics.refresh_errors, 2);
	assert_eq!(status.last_sweep, Some(report));

	Ok(())
}

#[tokio::test]
async fn listing_failure_aborts_the_sweep() -> Result<()> {
	let store = FlakyStore::with_records([aged("alice", 10_000)]);
	let refresher = FakeRefresher::new();
	let coordinator = RefreshCoordinator::new();

	coordinator.initialize(store.clone(), refresher.clone(), config(3_600)).await?;
	store.fail_list(true);

	let report = coordinator.refresh_all(false).await;

	assert!(report.aborted);
	assert_eq!(report.examined, 0);
	assert_eq!(refresher.total_calls(), 0);
	assert_eq!(coordinator.status().await.metrics.sweeps_aborted, 1);

	store.fail_list(false);

	assert_eq!(coordinator.refresh_all(false).await.refreshed, 1);

	Ok(())
}

#[tokio::test]
async fn max_age_changes_apply_to_the_next_sweep() -> Result<()> {
	let store = FlakyStore::with_records([aged("alice", 600)]);
	let refresher = FakeRefresher::new();
	let coordinator = RefreshCoordinator::builder().clock(support::manual_clock()).build()?;

	coordinator.initialize(store.clone(), refresher.clone(), config(3_600)).await?;

	assert_eq!(coordinator.refresh_all(false).await.refreshed, 0);

	coordinator.set_max_age("300").await?;

	assert_eq!(coordinator.refresh_all(false).await.refreshed, 1);
	assert_eq!(coordinator.config().await.max_age, Duration::from_secs(300));

	Ok(())
}

#[tokio::test]
async fn failing_identities_back_off_between_scheduled_sweeps() -> Result<()> {
	let clock = support::manual_clock();
	let store = FlakyStore::with_records([aged("alice", 10_000), aged("bob", 10_000)]);
	let refresher = FakeRefresher::new();

	refresher.fail_for("bob");

	let coordinator = RefreshCoordinator::builder()
		.clock(clock.clone())
		.backoff(BackoffPolicy::fixed(Duration::from_secs(60), Duration::from_secs(600)))
		.build()?;

	coordinator.initialize(store.clone(), refresher.clone(), config(0)).await?;

	let first = coordinator.refresh_all(false).await;

	assert_eq!((first.refreshed, first.failed), (1, 1));

	clock.advance(TimeDelta::seconds(30));

	let second = coordinator.refresh_all(false).await;

	assert_eq!(second.backed_off, 1);
	assert_eq!(refresher.calls("bob"), 1);

	let forced = coordinator.refresh_all(true).await;

	assert_eq!(forced.failed, 1);
	assert_eq!(refresher.calls("bob"), 2);

	let failing = coordinator.status().await.failing;

	assert_eq!(failing.len(), 1);
	assert_eq!(failing[0].failures, 2);
	assert_eq!(failing[0].retry_at, clock.now() + TimeDelta::seconds(120));

	refresher.recover("bob");
	clock.advance(TimeDelta::seconds(121));

	let recovered = coordinator.refresh_all(false).await;

	assert_eq!(recovered.refreshed, 2);
	assert!(coordinator.status().await.failing.is_empty());

	Ok(())
}

#[tokio::test]
async fn sweep_skips_records_refreshed_while_it_waited() -> Result<()> {
	let store = FlakyStore::with_records([aged("alice", 10_000)]);
	let refresher = FakeRefresher::gated();
	let coordinator = RefreshCoordinator::builder().clock(support::manual_clock()).build()?;

	coordinator.initialize(store.clone(), refresher.clone(), config(3_600)).await?;

	let on_demand = {
		let coordinator = coordinator.clone();
		let record = aged("alice", 10_000);

		tokio::spawn(async move { coordinator.refresh_one(&record).await })
	};

	refresher.wait_entered().await;

	let sweep = {
		let coordinator = coordinator.clone();

		tokio::spawn(async move { coordinator.refresh_all(false).await })
	};

	for _ in 0..10 {
		tokio::task::yield_now().await;
	}

	refresher.open_gate();

	let refreshed = on_demand.await.expect("on-demand task")?;
	let report = sweep.await.expect("sweep task");

	assert!(!refreshed.needs_refresh);
	assert_eq!(refresher.calls("alice"), 1);
	assert_eq!((report.refreshed, report.skipped), (0, 1));
	assert_eq!(store.writes().len(), 1);

	Ok(())
}

#[tokio::test]
async fn failures_of_deleted_identities_are_forgotten() -> Result<()> {
	let store = FlakyStore::with_records([aged("alice", 10_000), aged("bob", 10_000)]);
	let refresher = FakeRefresher::new();

	refresher.fail_for("alice");
	refresher.fail_for("bob");

	let coordinator = RefreshCoordinator::builder().clock(support::manual_clock()).build()?;

	coordinator.initialize(store.clone(), refresher.clone(), config(3_600)).await?;

	assert_eq!(coordinator.refresh_all(false).await.failed, 2);
	assert_eq!(coordinator.status().await.failing.len(), 2);

	store.remove("bob").await;

	let report = coordinator.refresh_all(false).await;

	assert_eq!(report.examined, 1);
	assert_eq!(
		coordinator.status().await.failing.iter().map(|f| f.identity.as_str()).collect::<Vec<_>>(),
		["alice"]
	);

	Ok(())
}
