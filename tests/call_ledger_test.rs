// Tests for the API call ledger: retry bookkeeping stays on one row, the
// insertion audit log appends, and windowed counts feed the call budget.

use chrono::Utc;
use serial_test::serial;
use weather_archiver::db::{
    AuditRepository, CallLedgerRepository, InsertStatus, NewApiCall,
};

mod common;

const TEST_PLATFORM: &str = "LedgerTest";

fn new_call(type_id: i32, ts: i64) -> NewApiCall {
    NewApiCall {
        call_timestamp: ts,
        api_call_type_id: Some(type_id),
        call_event: "API Call".to_string(),
        request_payload: Some("https://example.test/onecall?dt=1700000000".to_string()),
        response_code: None,
        response_message: None,
        call_log_message: Some("ledger test".to_string()),
    }
}

async fn cleanup(pool: &sqlx::PgPool) {
    sqlx::query(
        "DELETE FROM sql_handling WHERE api_call_id IN \
         (SELECT api_call_id FROM api_calls WHERE api_call_type_id IN \
          (SELECT api_call_type_id FROM api_call_types WHERE platform = $1))",
    )
    .bind(TEST_PLATFORM)
    .execute(pool)
    .await
    .ok();
    sqlx::query(
        "DELETE FROM api_calls WHERE api_call_type_id IN \
         (SELECT api_call_type_id FROM api_call_types WHERE platform = $1)",
    )
    .bind(TEST_PLATFORM)
    .execute(pool)
    .await
    .ok();
    sqlx::query("DELETE FROM api_call_types WHERE platform = $1")
        .bind(TEST_PLATFORM)
        .execute(pool)
        .await
        .ok();
}

#[tokio::test]
#[serial]
#[ignore = "requires a Postgres instance"]
async fn test_register_call_type_is_idempotent() {
    let pool = common::test_pool().await;
    cleanup(pool).await;
    let ledger = CallLedgerRepository::new(pool.clone());

    let first = ledger
        .register_call_type(TEST_PLATFORM, "Test Call", "https://example.test/v1?x={x}")
        .await
        .unwrap();
    let second = ledger
        .register_call_type(TEST_PLATFORM, "Test Call", "https://example.test/v2?x={x}")
        .await
        .unwrap();
    assert_eq!(first, second);

    // Re-registering updates the prototype in place.
    let proto = ledger
        .find_prototype(TEST_PLATFORM, "Test Call")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(proto.api_call_prototype, "https://example.test/v2?x={x}");

    cleanup(pool).await;
}

#[tokio::test]
#[serial]
#[ignore = "requires a Postgres instance"]
async fn test_retry_increments_in_place() {
    let pool = common::test_pool().await;
    cleanup(pool).await;
    let ledger = CallLedgerRepository::new(pool.clone());

    let type_id = ledger
        .register_call_type(TEST_PLATFORM, "Retry Call", "https://example.test/?x={x}")
        .await
        .unwrap();
    let now = Utc::now().timestamp();
    let call_id = ledger.record_call(&new_call(type_id, now)).await.unwrap();

    assert_eq!(ledger.increment_retry(call_id).await.unwrap(), 1);
    assert_eq!(ledger.increment_retry(call_id).await.unwrap(), 2);

    // Two retries, still exactly one ledger row.
    let calls = ledger.calls_since(type_id, now - 1).await.unwrap();
    assert_eq!(calls, 1);

    let call = ledger.find_call(call_id).await.unwrap().unwrap();
    assert_eq!(call.retry_count, 2);
    assert_eq!(call.response_code, None);

    cleanup(pool).await;
}

#[tokio::test]
#[serial]
#[ignore = "requires a Postgres instance"]
async fn test_response_lands_on_existing_row() {
    let pool = common::test_pool().await;
    cleanup(pool).await;
    let ledger = CallLedgerRepository::new(pool.clone());

    let type_id = ledger
        .register_call_type(TEST_PLATFORM, "Response Call", "https://example.test/?x={x}")
        .await
        .unwrap();
    let call_id = ledger
        .record_call(&new_call(type_id, Utc::now().timestamp()))
        .await
        .unwrap();

    ledger
        .record_response(call_id, Some(200), "Successfully retrieved timestamp 1700000000")
        .await
        .unwrap();

    let call = ledger.find_call(call_id).await.unwrap().unwrap();
    assert_eq!(call.response_code, Some(200));
    assert!(call
        .response_message
        .unwrap()
        .starts_with("Successfully retrieved"));

    cleanup(pool).await;
}

#[tokio::test]
#[serial]
#[ignore = "requires a Postgres instance"]
async fn test_outcome_counts_split_success_and_failure() {
    let pool = common::test_pool().await;
    cleanup(pool).await;
    let ledger = CallLedgerRepository::new(pool.clone());

    let type_id = ledger
        .register_call_type(TEST_PLATFORM, "Count Call", "https://example.test/?x={x}")
        .await
        .unwrap();
    let now = Utc::now().timestamp();

    for code in [200, 200, 500, 429] {
        let id = ledger.record_call(&new_call(type_id, now)).await.unwrap();
        ledger
            .record_response(id, Some(code), "recorded")
            .await
            .unwrap();
    }
    // One call with no response yet: counted by pacing, not by outcomes.
    ledger.record_call(&new_call(type_id, now)).await.unwrap();

    let type_ids = ledger.type_ids_for_platform(TEST_PLATFORM).await.unwrap();
    let counts = ledger
        .outcome_counts_since(&type_ids, now - 1)
        .await
        .unwrap();
    assert_eq!(counts.successes, 2);
    assert_eq!(counts.failures, 2);

    let paced = ledger
        .calls_for_types_since(&type_ids, now - 1)
        .await
        .unwrap();
    assert_eq!(paced, 5);

    cleanup(pool).await;
}

#[tokio::test]
#[serial]
#[ignore = "requires a Postgres instance"]
async fn test_audit_log_appends_per_attempt() {
    let pool = common::test_pool().await;
    cleanup(pool).await;
    let ledger = CallLedgerRepository::new(pool.clone());
    let audit = AuditRepository::new(pool.clone());

    let type_id = ledger
        .register_call_type(TEST_PLATFORM, "Audit Call", "https://example.test/?x={x}")
        .await
        .unwrap();
    let call_id = ledger
        .record_call(&new_call(type_id, Utc::now().timestamp()))
        .await
        .unwrap();

    let now = Utc::now().timestamp();
    audit
        .record_insertion(call_id, now, &InsertStatus::Failure, Some("deadlock"), 0)
        .await
        .unwrap();
    audit
        .record_insertion(call_id, now + 1, &InsertStatus::Success, None, 1)
        .await
        .unwrap();

    // Unlike the ledger's in-place retry counter, each persistence attempt
    // keeps its own row.
    let attempts = audit.attempts_for_call(call_id).await.unwrap();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0].insert_status, InsertStatus::Failure);
    assert_eq!(attempts[0].error_message.as_deref(), Some("deadlock"));
    assert_eq!(attempts[1].insert_status, InsertStatus::Success);
    assert_eq!(attempts[1].retry_count, 1);

    cleanup(pool).await;
}
