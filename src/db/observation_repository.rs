use sqlx::PgPool;
use tracing::{debug, info, instrument};

use crate::db::{DailySummary, DbError, HourlyObservation, NewDailySummary, NewHourlyObservation};

/// Append-only store for hourly observations and daily aggregates.
///
/// Writes are insert-or-reject: the dedup constraints (`idx_unique_dt`,
/// `(lat, lon, date)`) are the sole idempotency mechanism, and a violation
/// surfaces as `DbError::DuplicateObservation` rather than an overwrite.
#[derive(Clone)]
pub struct ObservationRepository {
    pool: PgPool,
}

impl ObservationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert one hourly observation, rejecting duplicates by `dt`.
    #[instrument(skip(self, obs), fields(dt = obs.dt))]
    pub async fn insert_hourly(&self, obs: &NewHourlyObservation) -> Result<i32, DbError> {
        debug!("Inserting hourly observation for dt {}", obs.dt);

        let id: i32 = sqlx::query_scalar(
            r#"
            INSERT INTO hourly_data
                (dt, lat, lon, tz, tzoff, sunrise, sunset, temp, feels_like,
                 pressure, humidity, dew_point, vis, description, clouds,
                 wind_speed, wind_deg, location_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9,
                    $10, $11, $12, $13, $14, $15, $16, $17, $18)
            RETURNING id
            "#,
        )
        .bind(obs.dt)
        .bind(obs.lat)
        .bind(obs.lon)
        .bind(&obs.tz)
        .bind(obs.tzoff)
        .bind(obs.sunrise)
        .bind(obs.sunset)
        .bind(obs.temp)
        .bind(obs.feels_like)
        .bind(obs.pressure)
        .bind(obs.humidity)
        .bind(obs.dew_point)
        .bind(obs.vis)
        .bind(&obs.description)
        .bind(obs.clouds)
        .bind(obs.wind_speed)
        .bind(obs.wind_deg)
        .bind(obs.location_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| DbError::on_conflict(e, &format!("hourly record for dt {}", obs.dt)))?;

        info!("Inserted hourly observation {} for dt {}", id, obs.dt);
        Ok(id)
    }

    /// Insert one daily summary, rejecting duplicates by `(lat, lon, date)`.
    #[instrument(skip(self, summary), fields(date = summary.date))]
    pub async fn insert_daily(&self, summary: &NewDailySummary) -> Result<i32, DbError> {
        debug!("Inserting daily summary for date {}", summary.date);

        let id: i32 = sqlx::query_scalar(
            r#"
            INSERT INTO daily_summary_data
                (lat, lon, tzoff, date, units, cloud_cover_afternoon,
                 humidity_afternoon, precipitation_total, temperature_min,
                 temperature_max, temperature_afternoon, temperature_night,
                 temperature_evening, temperature_morning, pressure_afternoon,
                 wind_max_speed, wind_max_direction, location_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9,
                    $10, $11, $12, $13, $14, $15, $16, $17, $18)
            RETURNING id
            "#,
        )
        .bind(summary.lat)
        .bind(summary.lon)
        .bind(summary.tzoff)
        .bind(summary.date)
        .bind(&summary.units)
        .bind(summary.cloud_cover_afternoon)
        .bind(summary.humidity_afternoon)
        .bind(summary.precipitation_total)
        .bind(summary.temperature_min)
        .bind(summary.temperature_max)
        .bind(summary.temperature_afternoon)
        .bind(summary.temperature_night)
        .bind(summary.temperature_evening)
        .bind(summary.temperature_morning)
        .bind(summary.pressure_afternoon)
        .bind(summary.wind_max_speed)
        .bind(summary.wind_max_direction)
        .bind(summary.location_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            DbError::on_conflict(
                e,
                &format!(
                    "daily summary for ({}, {}, {})",
                    summary.lat, summary.lon, summary.date
                ),
            )
        })?;

        info!("Inserted daily summary {} for date {}", id, summary.date);
        Ok(id)
    }

    /// Point lookup by timestamp.
    #[instrument(skip(self))]
    pub async fn find_hourly_by_dt(&self, dt: i64) -> Result<Option<HourlyObservation>, DbError> {
        let obs = sqlx::query_as::<_, HourlyObservation>(
            "SELECT * FROM hourly_data WHERE dt = $1",
        )
        .bind(dt)
        .fetch_optional(&self.pool)
        .await?;

        Ok(obs)
    }

    /// Time-series scan over `[from, to)`, ordered by timestamp.
    #[instrument(skip(self))]
    pub async fn find_hourly_range(
        &self,
        from: i64,
        to: i64,
    ) -> Result<Vec<HourlyObservation>, DbError> {
        debug!("Querying hourly observations from {} to {}", from, to);

        let rows = sqlx::query_as::<_, HourlyObservation>(
            "SELECT * FROM hourly_data WHERE dt >= $1 AND dt < $2 ORDER BY dt",
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        debug!("Found {} hourly observations", rows.len());
        Ok(rows)
    }

    /// Dedup pre-filter used by the backfill path before spending an API call.
    pub async fn hourly_exists(&self, dt: i64) -> Result<bool, DbError> {
        let exists: Option<i32> =
            sqlx::query_scalar("SELECT 1 FROM hourly_data WHERE dt = $1")
                .bind(dt)
                .fetch_optional(&self.pool)
                .await?;

        Ok(exists.is_some())
    }

    #[instrument(skip(self))]
    pub async fn find_daily(
        &self,
        lat: f32,
        lon: f32,
        date: i64,
    ) -> Result<Option<DailySummary>, DbError> {
        let summary = sqlx::query_as::<_, DailySummary>(
            "SELECT * FROM daily_summary_data WHERE lat = $1 AND lon = $2 AND date = $3",
        )
        .bind(lat)
        .bind(lon)
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;

        Ok(summary)
    }

    /// Day-granularity scan over `[from, to)` for one point, ordered by date.
    #[instrument(skip(self))]
    pub async fn find_daily_range(
        &self,
        lat: f32,
        lon: f32,
        from: i64,
        to: i64,
    ) -> Result<Vec<DailySummary>, DbError> {
        let rows = sqlx::query_as::<_, DailySummary>(
            r#"
            SELECT * FROM daily_summary_data
            WHERE lat = $1 AND lon = $2 AND date >= $3 AND date < $4
            ORDER BY date
            "#,
        )
        .bind(lat)
        .bind(lon)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn daily_exists(&self, lat: f32, lon: f32, date: i64) -> Result<bool, DbError> {
        let exists: Option<i32> = sqlx::query_scalar(
            "SELECT 1 FROM daily_summary_data WHERE lat = $1 AND lon = $2 AND date = $3",
        )
        .bind(lat)
        .bind(lon)
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;

        Ok(exists.is_some())
    }
}
