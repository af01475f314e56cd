use sqlx::Row;
use sqlx::{postgres::PgRow, PgPool};
use tracing::{debug, instrument};

use crate::db::{DbError, InsertStatus, InsertionAudit};

/// Append-only log of persistence attempts, one row per attempt.
///
/// Unlike the call ledger's in-place retry counter, a failed insertion
/// often needs a different remedial payload or manual intervention, so
/// every attempt is preserved for audit rather than collapsed into one row.
#[derive(Clone)]
pub struct AuditRepository {
    pool: PgPool,
}

impl AuditRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append one insertion-attempt row referencing the originating call.
    #[instrument(skip(self, error_message), fields(api_call_id = api_call_id, status = %status))]
    pub async fn record_insertion(
        &self,
        api_call_id: i32,
        insert_timestamp: i64,
        status: &InsertStatus,
        error_message: Option<&str>,
        retry_count: i32,
    ) -> Result<i32, DbError> {
        let sql_log_id: i32 = sqlx::query_scalar(
            r#"
            INSERT INTO sql_handling
                (api_call_id, insert_timestamp, insert_status, error_message, retry_count)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING sql_log_id
            "#,
        )
        .bind(api_call_id)
        .bind(insert_timestamp)
        .bind(status.as_str())
        .bind(error_message)
        .bind(retry_count)
        .fetch_one(&self.pool)
        .await?;

        debug!(
            "Recorded insertion attempt {} for call {}",
            sql_log_id, api_call_id
        );
        Ok(sql_log_id)
    }

    /// All persistence attempts for one call, oldest first.
    #[instrument(skip(self))]
    pub async fn attempts_for_call(
        &self,
        api_call_id: i32,
    ) -> Result<Vec<InsertionAudit>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT sql_log_id, api_call_id, insert_timestamp, insert_status,
                   error_message, retry_count
            FROM sql_handling
            WHERE api_call_id = $1
            ORDER BY sql_log_id
            "#,
        )
        .bind(api_call_id)
        .map(audit_from_row)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

fn audit_from_row(row: PgRow) -> InsertionAudit {
    InsertionAudit {
        sql_log_id: row.get("sql_log_id"),
        api_call_id: row.get("api_call_id"),
        insert_timestamp: row.get("insert_timestamp"),
        insert_status: InsertStatus::parse(row.get::<&str, _>("insert_status")),
        error_message: row.get("error_message"),
        retry_count: row.get("retry_count"),
    }
}
