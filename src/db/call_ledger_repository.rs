use sqlx::PgPool;
use tracing::{debug, info, instrument};

use crate::db::{ApiCall, ApiCallType, DbError, NewApiCall};

/// Success/failure tallies over a ledger window, used for failure-streak
/// detection. Success means HTTP 200; anything else recorded counts as a
/// failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeCounts {
    pub successes: i64,
    pub failures: i64,
}

/// Ledger of outbound API call attempts and their outcomes, plus the static
/// call-type catalog.
///
/// Recording a call must never block on the call's own success: every
/// attempt gets a row up front, and the response lands on the same row
/// later. Resending the same logical call increments `retry_count` in place
/// instead of appending (the persistence audit log makes the opposite
/// choice; the two are deliberately distinct).
#[derive(Clone)]
pub struct CallLedgerRepository {
    pool: PgPool,
}

impl CallLedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append a ledger entry for an outbound call attempt.
    #[instrument(skip(self, call), fields(call_event = %call.call_event))]
    pub async fn record_call(&self, call: &NewApiCall) -> Result<i32, DbError> {
        let call_id: i32 = sqlx::query_scalar(
            r#"
            INSERT INTO api_calls
                (call_timestamp, api_call_type_id, call_event, request_payload,
                 response_code, response_message, retry_count, call_log_message)
            VALUES ($1, $2, $3, $4, $5, $6, 0, $7)
            RETURNING api_call_id
            "#,
        )
        .bind(call.call_timestamp)
        .bind(call.api_call_type_id)
        .bind(&call.call_event)
        .bind(&call.request_payload)
        .bind(call.response_code)
        .bind(&call.response_message)
        .bind(&call.call_log_message)
        .fetch_one(&self.pool)
        .await?;

        debug!("Recorded api call {}", call_id);
        Ok(call_id)
    }

    /// Attach the provider's response to an existing ledger entry. A call
    /// that died before any response keeps a NULL code.
    #[instrument(skip(self, message))]
    pub async fn record_response(
        &self,
        call_id: i32,
        code: Option<i32>,
        message: &str,
    ) -> Result<(), DbError> {
        sqlx::query(
            r#"
            UPDATE api_calls
            SET response_code = $2, response_message = $3
            WHERE api_call_id = $1
            "#,
        )
        .bind(call_id)
        .bind(code)
        .bind(message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Bump `retry_count` in place: the same logical call was resent.
    /// No new ledger row is created.
    #[instrument(skip(self))]
    pub async fn increment_retry(&self, call_id: i32) -> Result<i32, DbError> {
        let retry_count: i32 = sqlx::query_scalar(
            r#"
            UPDATE api_calls
            SET retry_count = retry_count + 1
            WHERE api_call_id = $1
            RETURNING retry_count
            "#,
        )
        .bind(call_id)
        .fetch_one(&self.pool)
        .await?;

        debug!("Call {} retry count now {}", call_id, retry_count);
        Ok(retry_count)
    }

    pub async fn find_call(&self, call_id: i32) -> Result<Option<ApiCall>, DbError> {
        let call =
            sqlx::query_as::<_, ApiCall>("SELECT * FROM api_calls WHERE api_call_id = $1")
                .bind(call_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(call)
    }

    // Call-type catalog

    #[instrument(skip(self, prototype))]
    pub async fn register_call_type(
        &self,
        platform: &str,
        api_call_type: &str,
        prototype: &str,
    ) -> Result<i32, DbError> {
        let id: i32 = sqlx::query_scalar(
            r#"
            INSERT INTO api_call_types (platform, api_call_type, api_call_prototype)
            VALUES ($1, $2, $3)
            ON CONFLICT (platform, api_call_type)
            DO UPDATE SET api_call_prototype = EXCLUDED.api_call_prototype
            RETURNING api_call_type_id
            "#,
        )
        .bind(platform)
        .bind(api_call_type)
        .bind(prototype)
        .fetch_one(&self.pool)
        .await?;

        info!("Registered call type {} for {}/{}", id, platform, api_call_type);
        Ok(id)
    }

    /// Look up the URL template for a call type.
    #[instrument(skip(self))]
    pub async fn find_prototype(
        &self,
        platform: &str,
        api_call_type: &str,
    ) -> Result<Option<ApiCallType>, DbError> {
        let call_type = sqlx::query_as::<_, ApiCallType>(
            "SELECT * FROM api_call_types WHERE platform = $1 AND api_call_type = $2",
        )
        .bind(platform)
        .bind(api_call_type)
        .fetch_optional(&self.pool)
        .await?;

        Ok(call_type)
    }

    pub async fn type_ids_for_platform(&self, platform: &str) -> Result<Vec<i32>, DbError> {
        let ids: Vec<i32> = sqlx::query_scalar(
            "SELECT api_call_type_id FROM api_call_types WHERE platform = $1",
        )
        .bind(platform)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    // Windowed counts feeding the call-budget control

    /// Number of ledger entries for one call type since the given epoch.
    #[instrument(skip(self))]
    pub async fn calls_since(&self, type_id: i32, since_epoch: i64) -> Result<i64, DbError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM api_calls
            WHERE api_call_type_id = $1 AND call_timestamp >= $2
            "#,
        )
        .bind(type_id)
        .bind(since_epoch)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// Total ledger entries across a set of call types since the given
    /// epoch, regardless of outcome. Feeds rate pacing.
    #[instrument(skip(self, type_ids))]
    pub async fn calls_for_types_since(
        &self,
        type_ids: &[i32],
        since_epoch: i64,
    ) -> Result<i64, DbError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM api_calls
            WHERE api_call_type_id = ANY($1) AND call_timestamp >= $2
            "#,
        )
        .bind(type_ids)
        .bind(since_epoch)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// Success vs. failure tallies for a set of call types since the given
    /// epoch. Calls without a recorded response yet are excluded.
    #[instrument(skip(self, type_ids))]
    pub async fn outcome_counts_since(
        &self,
        type_ids: &[i32],
        since_epoch: i64,
    ) -> Result<OutcomeCounts, DbError> {
        let row: (i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE response_code = 200),
                COUNT(*) FILTER (WHERE response_code IS NOT NULL AND response_code != 200)
            FROM api_calls
            WHERE api_call_type_id = ANY($1) AND call_timestamp >= $2
            "#,
        )
        .bind(type_ids)
        .bind(since_epoch)
        .fetch_one(&self.pool)
        .await?;

        Ok(OutcomeCounts {
            successes: row.0,
            failures: row.1,
        })
    }
}
