use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::db::{
    AuditRepository, DbError, InsertStatus, LocationRepository, ObservationRepository,
};
use crate::provider::{
    validate_day_summary, validate_timemachine, DaySummaryResponse, TimemachineResponse,
    ValidationError,
};

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// The dedup constraint rejected the row: already ingested. The caller
    /// skips and moves on.
    #[error("already ingested: {0}")]
    Duplicate(String),
    #[error("payload validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("persistence failed: {0}")]
    Persistence(DbError),
}

/// Validate-insert-audit pipeline from a provider payload to the
/// observation store.
///
/// Every attempted persistence leaves a row in the insertion audit log
/// referencing the originating ledger entry, success or not. Location
/// resolution is best-effort: a payload whose coordinates match no
/// registered location is still captured, with a NULL reference.
#[derive(Clone)]
pub struct IngestService {
    observations: ObservationRepository,
    locations: LocationRepository,
    audit: AuditRepository,
}

impl IngestService {
    pub fn new(
        observations: ObservationRepository,
        locations: LocationRepository,
        audit: AuditRepository,
    ) -> Self {
        Self {
            observations,
            locations,
            audit,
        }
    }

    /// Persist a timemachine payload as one hourly observation.
    /// `attempt` numbers this persistence attempt in the audit log.
    #[instrument(skip(self, resp), fields(api_call_id = api_call_id, attempt = attempt))]
    pub async fn ingest_hourly(
        &self,
        api_call_id: i32,
        resp: &TimemachineResponse,
        attempt: i32,
    ) -> Result<i32, IngestError> {
        let location_id = self.resolve_location(resp.lat, resp.lon).await;

        let obs = match validate_timemachine(resp, location_id) {
            Ok(obs) => obs,
            Err(e) => {
                self.audit_failure(api_call_id, &e.to_string(), attempt).await;
                return Err(e.into());
            }
        };

        match self.observations.insert_hourly(&obs).await {
            Ok(id) => {
                self.audit_success(api_call_id, attempt).await;
                info!("Ingested hourly observation {} for dt {}", id, obs.dt);
                Ok(id)
            }
            Err(e) => Err(self.audit_insert_error(api_call_id, e, attempt).await),
        }
    }

    /// Persist a day-summary payload as one daily aggregate row.
    #[instrument(skip(self, resp), fields(api_call_id = api_call_id, attempt = attempt))]
    pub async fn ingest_daily(
        &self,
        api_call_id: i32,
        resp: &DaySummaryResponse,
        attempt: i32,
    ) -> Result<i32, IngestError> {
        let location_id = self.resolve_location(resp.lat, resp.lon).await;

        let summary = match validate_day_summary(resp, location_id) {
            Ok(summary) => summary,
            Err(e) => {
                self.audit_failure(api_call_id, &e.to_string(), attempt).await;
                return Err(e.into());
            }
        };

        match self.observations.insert_daily(&summary).await {
            Ok(id) => {
                self.audit_success(api_call_id, attempt).await;
                info!("Ingested daily summary {} for date {}", id, summary.date);
                Ok(id)
            }
            Err(e) => Err(self.audit_insert_error(api_call_id, e, attempt).await),
        }
    }

    async fn resolve_location(&self, lat: f64, lon: f64) -> Option<i32> {
        match self.locations.find_by_rounded(lat, lon).await {
            Ok(Some(location)) => Some(location.id),
            Ok(None) => {
                debug!("No registered location for ({}, {})", lat, lon);
                None
            }
            Err(e) => {
                // Data capture proceeds without the taxonomy reference.
                warn!("Location resolution failed for ({}, {}): {}", lat, lon, e);
                None
            }
        }
    }

    async fn audit_success(&self, api_call_id: i32, attempt: i32) {
        if let Err(e) = self
            .audit
            .record_insertion(
                api_call_id,
                Utc::now().timestamp(),
                &InsertStatus::Success,
                None,
                attempt,
            )
            .await
        {
            warn!("Failed to audit successful insertion: {}", e);
        }
    }

    async fn audit_failure(&self, api_call_id: i32, error: &str, attempt: i32) {
        if let Err(e) = self
            .audit
            .record_insertion(
                api_call_id,
                Utc::now().timestamp(),
                &InsertStatus::Failure,
                Some(error),
                attempt,
            )
            .await
        {
            warn!("Failed to audit insertion failure: {}", e);
        }
    }

    async fn audit_insert_error(
        &self,
        api_call_id: i32,
        err: DbError,
        attempt: i32,
    ) -> IngestError {
        if err.is_duplicate() {
            self.audit_failure(api_call_id, "Duplicate record", attempt).await;
            IngestError::Duplicate(err.to_string())
        } else {
            self.audit_failure(api_call_id, &err.to_string(), attempt).await;
            IngestError::Persistence(err)
        }
    }
}
