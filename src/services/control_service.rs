use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, instrument};

use crate::db::{CallLedgerRepository, DbError, OutcomeCounts, ScriptKey, TrackingRepository};
use crate::units::truncate_to_day;

/// Length of the pacing window in seconds.
const PACING_WINDOW_SECS: f64 = 300.0;
/// Fraction of the pacing window the collector is allowed to fill.
const PACING_UTILIZATION: f64 = 0.9;
/// Failure-streak window in seconds.
const FAILURE_WINDOW_SECS: i64 = 120;

/// True when recent failures cross both thresholds: more than 10 failures
/// in the window and a failure/success ratio above 20%.
pub fn failure_streak(counts: OutcomeCounts) -> bool {
    counts.failures > 10
        && counts.successes > 0
        && (counts.failures as f64 / counts.successes as f64) > 0.2
}

/// Inter-call delay keeping the call rate inside the window budget.
///
/// The base interval fills 90% of a 5-minute window; observed traffic in
/// the window stretches it proportionally. Pure so the caller owns the
/// actual sleep.
pub fn pacing_delay(calls_in_window: i64) -> Duration {
    let allowed_calls = PACING_WINDOW_SECS * PACING_UTILIZATION;
    let allowed_interval = PACING_WINDOW_SECS / allowed_calls;
    let current_rate = calls_in_window as f64 / PACING_WINDOW_SECS;
    Duration::from_secs_f64(allowed_interval + current_rate * allowed_interval)
}

/// Enforces per-task call budgets against the ledger: daily limits,
/// failure streaks, and pacing.
#[derive(Clone)]
pub struct ControlService {
    ledger: CallLedgerRepository,
    tracking: TrackingRepository,
}

impl ControlService {
    pub fn new(ledger: CallLedgerRepository, tracking: TrackingRepository) -> Self {
        Self { ledger, tracking }
    }

    /// Calls made for this type since 00:00 UTC today.
    pub async fn requests_today(&self, type_id: i32) -> Result<i64, DbError> {
        let midnight = truncate_to_day(Utc::now().timestamp());
        self.ledger.calls_since(type_id, midnight).await
    }

    /// Check the daily budget. Marks the tracker rate-limit flag when the
    /// budget is exhausted; resets the window when a new day has started.
    /// Returns true when the limit is reached.
    #[instrument(skip(self, key), fields(script = %key.script_name, daily_limit = daily_limit))]
    pub async fn check_daily_limit(
        &self,
        key: &ScriptKey,
        type_id: i32,
        daily_limit: i64,
    ) -> Result<bool, DbError> {
        let made_today = self.requests_today(type_id).await?;
        debug!("Requests made today: {} of {}", made_today, daily_limit);

        if made_today >= daily_limit {
            self.tracking.set_daily_limit_reached(key).await?;
            info!("Daily limit reached for '{}'", key.script_name);
            return Ok(true);
        }

        if made_today == 0 {
            // First call of a new day: clear yesterday's bookkeeping.
            self.tracking.reset_daily_window(key).await?;
            debug!("Daily window reset for '{}'", key.script_name);
        }

        Ok(false)
    }

    /// Record one more request against the task's daily counter.
    pub async fn note_request(&self, key: &ScriptKey) -> Result<(), DbError> {
        self.tracking.increment_requests_today(key).await
    }

    /// True when the platform's recent calls show a failure streak.
    #[instrument(skip(self))]
    pub async fn failure_rate_exceeded(&self, platform: &str) -> Result<bool, DbError> {
        let type_ids = self.ledger.type_ids_for_platform(platform).await?;
        let since = Utc::now().timestamp() - FAILURE_WINDOW_SECS;
        let counts = self.ledger.outcome_counts_since(&type_ids, since).await?;

        let exceeded = failure_streak(counts);
        if exceeded {
            info!(
                "Failure streak on {}: {} failures / {} successes in last {}s",
                platform, counts.failures, counts.successes, FAILURE_WINDOW_SECS
            );
        }
        Ok(exceeded)
    }

    /// Delay to wait before the next call to this platform.
    #[instrument(skip(self))]
    pub async fn pacing_for_platform(&self, platform: &str) -> Result<Duration, DbError> {
        let type_ids = self.ledger.type_ids_for_platform(platform).await?;
        let since = Utc::now().timestamp() - PACING_WINDOW_SECS as i64;
        let calls = self.ledger.calls_for_types_since(&type_ids, since).await?;

        let delay = pacing_delay(calls);
        debug!(
            "{} calls in pacing window, next interval {:.2}s",
            calls,
            delay.as_secs_f64()
        );
        Ok(delay)
    }
}
