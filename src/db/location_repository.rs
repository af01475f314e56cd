use sqlx::PgPool;
use tracing::{debug, info, instrument};

use crate::db::models::round4;
use crate::db::{DbError, Location, NewLocation};

/// Canonical registry of monitored locations. Rows are immutable once
/// created apart from metadata corrections.
#[derive(Clone)]
pub struct LocationRepository {
    pool: PgPool,
}

impl LocationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[instrument(skip(self, location), fields(friendly_name = %location.friendly_name))]
    pub async fn create(&self, location: &NewLocation) -> Result<i32, DbError> {
        debug!("Registering location '{}'", location.friendly_name);

        let id: i32 = sqlx::query_scalar(
            r#"
            INSERT INTO locations
                (friendly_name, official_station_name, zip_code,
                 lat_detail, lon_detail, lat_rounded, lon_rounded)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(&location.friendly_name)
        .bind(&location.official_station_name)
        .bind(&location.zip_code)
        .bind(location.lat_detail)
        .bind(location.lon_detail)
        .bind(location.lat_rounded())
        .bind(location.lon_rounded())
        .fetch_one(&self.pool)
        .await?;

        info!("Registered location {} '{}'", id, location.friendly_name);
        Ok(id)
    }

    pub async fn find_by_id(&self, id: i32) -> Result<Option<Location>, DbError> {
        let location = sqlx::query_as::<_, Location>("SELECT * FROM locations WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(location)
    }

    /// Resolve a location from provider-reported coordinates, which arrive
    /// truncated to 4 decimals. Matches against the rounded columns only.
    #[instrument(skip(self))]
    pub async fn find_by_rounded(&self, lat: f64, lon: f64) -> Result<Option<Location>, DbError> {
        let location = sqlx::query_as::<_, Location>(
            "SELECT * FROM locations WHERE lat_rounded = $1 AND lon_rounded = $2",
        )
        .bind(round4(lat))
        .bind(round4(lon))
        .fetch_optional(&self.pool)
        .await?;

        Ok(location)
    }

    pub async fn list(&self) -> Result<Vec<Location>, DbError> {
        let locations = sqlx::query_as::<_, Location>("SELECT * FROM locations ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        Ok(locations)
    }

    /// Metadata correction; coordinates stay immutable.
    #[instrument(skip(self))]
    pub async fn update_metadata(
        &self,
        id: i32,
        official_station_name: Option<&str>,
        zip_code: Option<&str>,
    ) -> Result<(), DbError> {
        sqlx::query(
            r#"
            UPDATE locations
            SET official_station_name = COALESCE($2, official_station_name),
                zip_code = COALESCE($3, zip_code)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(official_station_name)
        .bind(zip_code)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
