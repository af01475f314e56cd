// Tests for the script health tracker: status upserts, previous_status
// capture, daily-window bookkeeping, and at-most-once restart consumption.

use serial_test::serial;
use weather_archiver::db::{ScriptKey, ScriptStatus, TrackingRepository};
use weather_archiver::services::{HealthService, HealthSignals};

mod common;

fn key(name: &str) -> ScriptKey {
    ScriptKey::new(name, "TrackerTest", "timemachine")
}

async fn cleanup(pool: &sqlx::PgPool) {
    sqlx::query("DELETE FROM api_script_tracking WHERE platform = 'TrackerTest'")
        .execute(pool)
        .await
        .ok();
}

#[tokio::test]
#[serial]
#[ignore = "requires a Postgres instance"]
async fn test_upsert_captures_previous_status() {
    let pool = common::test_pool().await;
    cleanup(pool).await;
    let repo = TrackingRepository::new(pool.clone());
    let key = key("prev-status");

    repo.upsert(&key, &ScriptStatus::Running, None, false)
        .await
        .unwrap();
    let t = repo.find(&key).await.unwrap().unwrap();
    assert_eq!(t.status, ScriptStatus::Running);
    assert_eq!(t.previous_status, None);

    repo.upsert(&key, &ScriptStatus::RateLimited, None, false)
        .await
        .unwrap();
    let t = repo.find(&key).await.unwrap().unwrap();
    assert_eq!(t.status, ScriptStatus::RateLimited);
    assert_eq!(t.previous_status, Some(ScriptStatus::Running));

    cleanup(pool).await;
}

#[tokio::test]
#[serial]
#[ignore = "requires a Postgres instance"]
async fn test_tracker_key_is_three_part() {
    let pool = common::test_pool().await;
    cleanup(pool).await;
    let repo = TrackingRepository::new(pool.clone());

    // Same script name, different call type: two independent trackers.
    let a = ScriptKey::new("shared-script", "TrackerTest", "timemachine");
    let b = ScriptKey::new("shared-script", "TrackerTest", "day_summary");

    repo.upsert(&a, &ScriptStatus::Running, None, false)
        .await
        .unwrap();
    repo.upsert(&b, &ScriptStatus::Stopped, Some("done"), false)
        .await
        .unwrap();

    assert_eq!(
        repo.find(&a).await.unwrap().unwrap().status,
        ScriptStatus::Running
    );
    let b_row = repo.find(&b).await.unwrap().unwrap();
    assert_eq!(b_row.status, ScriptStatus::Stopped);
    assert_eq!(b_row.stopped_reason.as_deref(), Some("done"));

    cleanup(pool).await;
}

#[tokio::test]
#[serial]
#[ignore = "requires a Postgres instance"]
async fn test_daily_window_bookkeeping() {
    let pool = common::test_pool().await;
    cleanup(pool).await;
    let repo = TrackingRepository::new(pool.clone());
    let key = key("daily-window");

    repo.upsert(&key, &ScriptStatus::Running, None, false)
        .await
        .unwrap();
    repo.increment_requests_today(&key).await.unwrap();
    repo.increment_requests_today(&key).await.unwrap();
    repo.set_daily_limit_reached(&key).await.unwrap();

    let t = repo.find(&key).await.unwrap().unwrap();
    assert_eq!(t.requests_made_today, 2);
    assert!(t.daily_limit_reached);

    repo.reset_daily_window(&key).await.unwrap();
    let t = repo.find(&key).await.unwrap().unwrap();
    assert_eq!(t.requests_made_today, 0);
    assert!(!t.daily_limit_reached);

    cleanup(pool).await;
}

#[tokio::test]
#[serial]
#[ignore = "requires a Postgres instance"]
async fn test_restart_consumed_at_most_once() {
    let pool = common::test_pool().await;
    cleanup(pool).await;
    let repo = TrackingRepository::new(pool.clone());
    let key = key("restart-once");

    repo.upsert(&key, &ScriptStatus::Stopped, Some("crash"), false)
        .await
        .unwrap();
    repo.request_restart(&key).await.unwrap();

    assert!(repo.consume_restart(&key).await.unwrap());
    assert!(!repo.consume_restart(&key).await.unwrap());

    let t = repo.find(&key).await.unwrap().unwrap();
    assert!(!t.force_restart);

    cleanup(pool).await;
}

#[tokio::test]
#[serial]
#[ignore = "requires a Postgres instance"]
async fn test_health_evaluate_resumes_stopped_task_via_restart() {
    let pool = common::test_pool().await;
    cleanup(pool).await;
    let repo = TrackingRepository::new(pool.clone());
    let health = HealthService::new(repo.clone());
    let key = key("resume-flow");

    health
        .report_stopped(&key, "invalid API key", false)
        .await
        .unwrap();
    assert_eq!(
        repo.find(&key).await.unwrap().unwrap().status,
        ScriptStatus::Stopped
    );

    // Without a restart request, evaluation leaves the task stopped.
    let moved = health
        .evaluate(&key, &HealthSignals::default())
        .await
        .unwrap();
    assert_eq!(moved, None);

    repo.request_restart(&key).await.unwrap();
    let moved = health
        .evaluate(&key, &HealthSignals::default())
        .await
        .unwrap();
    assert_eq!(moved, Some(ScriptStatus::Running));

    // The restart flag is spent; a second evaluation stays put.
    let t = repo.find(&key).await.unwrap().unwrap();
    assert_eq!(t.status, ScriptStatus::Running);
    assert!(!t.force_restart);

    cleanup(pool).await;
}

#[tokio::test]
#[serial]
#[ignore = "requires a Postgres instance"]
async fn test_health_evaluate_registers_unknown_task() {
    let pool = common::test_pool().await;
    cleanup(pool).await;
    let repo = TrackingRepository::new(pool.clone());
    let health = HealthService::new(repo.clone());
    let key = key("first-sighting");

    let moved = health
        .evaluate(&key, &HealthSignals::default())
        .await
        .unwrap();
    assert_eq!(moved, Some(ScriptStatus::Running));
    assert!(repo.find(&key).await.unwrap().is_some());

    cleanup(pool).await;
}
