use sqlx::Row;
use sqlx::{postgres::PgRow, PgPool};
use tracing::{debug, info, instrument};

use crate::db::{DbError, ScriptKey, ScriptStatus, ScriptTracker};

/// Per-task health tracker over `api_script_tracking`.
///
/// One row per `(script_name, platform, api_call_alt_name)`; that uniqueness
/// is also the single-writer guarantee for a collection task. Every write
/// here refreshes `last_checked` as the liveness heartbeat.
#[derive(Clone)]
pub struct TrackingRepository {
    pool: PgPool,
}

impl TrackingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert or update the tracker row for a task, recording the prior
    /// status into `previous_status` before overwriting `status`.
    #[instrument(skip(self, key, stopped_reason), fields(script = %key.script_name, status = %status))]
    pub async fn upsert(
        &self,
        key: &ScriptKey,
        status: &ScriptStatus,
        stopped_reason: Option<&str>,
        force_restart: bool,
    ) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO api_script_tracking
                (script_name, platform, api_call_alt_name, status, previous_status,
                 last_checked, requests_made_today, stopped_reason, force_restart)
            VALUES ($1, $2, $3, $4, NULL, NOW(), 0, $5, $6)
            ON CONFLICT (script_name, platform, api_call_alt_name)
            DO UPDATE SET
                previous_status = api_script_tracking.status,
                status = EXCLUDED.status,
                last_checked = NOW(),
                stopped_reason = EXCLUDED.stopped_reason,
                force_restart = EXCLUDED.force_restart
            "#,
        )
        .bind(&key.script_name)
        .bind(&key.platform)
        .bind(&key.api_call_alt_name)
        .bind(status.as_str())
        .bind(stopped_reason)
        .bind(force_restart)
        .execute(&self.pool)
        .await?;

        debug!("Tracker for '{}' now '{}'", key.script_name, status);
        Ok(())
    }

    #[instrument(skip(self, key), fields(script = %key.script_name))]
    pub async fn find(&self, key: &ScriptKey) -> Result<Option<ScriptTracker>, DbError> {
        let tracker = sqlx::query(
            r#"
            SELECT * FROM api_script_tracking
            WHERE script_name = $1 AND platform = $2 AND api_call_alt_name = $3
            "#,
        )
        .bind(&key.script_name)
        .bind(&key.platform)
        .bind(&key.api_call_alt_name)
        .map(tracker_from_row)
        .fetch_optional(&self.pool)
        .await?;

        Ok(tracker)
    }

    pub async fn list(&self) -> Result<Vec<ScriptTracker>, DbError> {
        let trackers = sqlx::query(
            "SELECT * FROM api_script_tracking ORDER BY script_name, platform, api_call_alt_name",
        )
        .map(tracker_from_row)
        .fetch_all(&self.pool)
        .await?;

        Ok(trackers)
    }

    #[instrument(skip(self, key), fields(script = %key.script_name))]
    pub async fn set_daily_limit_reached(&self, key: &ScriptKey) -> Result<(), DbError> {
        sqlx::query(
            r#"
            UPDATE api_script_tracking
            SET daily_limit_reached = TRUE, last_checked = NOW()
            WHERE script_name = $1 AND platform = $2 AND api_call_alt_name = $3
            "#,
        )
        .bind(&key.script_name)
        .bind(&key.platform)
        .bind(&key.api_call_alt_name)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// A new budget day has started: zero the counter and clear the flag.
    #[instrument(skip(self, key), fields(script = %key.script_name))]
    pub async fn reset_daily_window(&self, key: &ScriptKey) -> Result<(), DbError> {
        sqlx::query(
            r#"
            UPDATE api_script_tracking
            SET requests_made_today = 0, daily_limit_reached = FALSE, last_checked = NOW()
            WHERE script_name = $1 AND platform = $2 AND api_call_alt_name = $3
            "#,
        )
        .bind(&key.script_name)
        .bind(&key.platform)
        .bind(&key.api_call_alt_name)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn increment_requests_today(&self, key: &ScriptKey) -> Result<(), DbError> {
        sqlx::query(
            r#"
            UPDATE api_script_tracking
            SET requests_made_today = requests_made_today + 1, last_checked = NOW()
            WHERE script_name = $1 AND platform = $2 AND api_call_alt_name = $3
            "#,
        )
        .bind(&key.script_name)
        .bind(&key.platform)
        .bind(&key.api_call_alt_name)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Externally-set signal: an operator or supervisor wants a stuck
    /// collector restarted.
    #[instrument(skip(self, key), fields(script = %key.script_name))]
    pub async fn request_restart(&self, key: &ScriptKey) -> Result<(), DbError> {
        sqlx::query(
            r#"
            UPDATE api_script_tracking
            SET force_restart = TRUE, last_checked = NOW()
            WHERE script_name = $1 AND platform = $2 AND api_call_alt_name = $3
            "#,
        )
        .bind(&key.script_name)
        .bind(&key.platform)
        .bind(&key.api_call_alt_name)
        .execute(&self.pool)
        .await?;

        info!("Restart requested for '{}'", key.script_name);
        Ok(())
    }

    /// Atomically clear `force_restart`, returning whether it was set.
    /// The flag is consumed at most once: two racing callers cannot both
    /// observe it.
    #[instrument(skip(self, key), fields(script = %key.script_name))]
    pub async fn consume_restart(&self, key: &ScriptKey) -> Result<bool, DbError> {
        let consumed: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE api_script_tracking
            SET force_restart = FALSE, last_checked = NOW()
            WHERE script_name = $1 AND platform = $2 AND api_call_alt_name = $3
              AND force_restart = TRUE
            RETURNING id
            "#,
        )
        .bind(&key.script_name)
        .bind(&key.platform)
        .bind(&key.api_call_alt_name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(consumed.is_some())
    }
}

fn tracker_from_row(row: PgRow) -> ScriptTracker {
    ScriptTracker {
        id: row.get("id"),
        script_name: row.get("script_name"),
        platform: row.get("platform"),
        api_call_alt_name: row.get("api_call_alt_name"),
        status: ScriptStatus::parse(row.get::<&str, _>("status")),
        previous_status: row
            .get::<Option<&str>, _>("previous_status")
            .map(ScriptStatus::parse),
        last_checked: row.get("last_checked"),
        requests_made_today: row.get("requests_made_today"),
        daily_limit_reached: row.get("daily_limit_reached"),
        force_restart: row.get("force_restart"),
        stopped_reason: row.get("stopped_reason"),
    }
}
