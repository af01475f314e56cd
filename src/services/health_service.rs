use tracing::{info, instrument, warn};

use crate::db::{DbError, ScriptKey, ScriptStatus, TrackingRepository};

/// Observations fed into one health evaluation cycle. `force_restart` is
/// not a signal: it lives on the tracker row and is read (and consumed)
/// from there.
#[derive(Debug, Clone, Default)]
pub struct HealthSignals {
    /// The call budget for the current day is exhausted.
    pub daily_limit_reached: bool,
    /// The budget day has rolled over (external clock check).
    pub window_reset: bool,
    /// An unrecoverable error occurred; carries the stopped_reason.
    pub fatal_error: Option<String>,
}

/// Compute the next status for a tracked task, or `None` to stay put.
///
/// Transitions:
/// - running -> rate_limited when the daily limit is reached;
/// - rate_limited -> running once the window resets, unless a restart is
///   pending (the operator path owns that resume);
/// - running | rate_limited -> stopped on fatal error;
/// - stopped -> running only through `force_restart`.
///
/// Free-text statuses carried in `Other` behave like `running`.
pub fn next_status(
    current: &ScriptStatus,
    force_restart: bool,
    signals: &HealthSignals,
) -> Option<ScriptStatus> {
    if signals.fatal_error.is_some() {
        return match current {
            ScriptStatus::Stopped => None,
            _ => Some(ScriptStatus::Stopped),
        };
    }

    match current {
        ScriptStatus::Running | ScriptStatus::Other(_) => {
            if signals.daily_limit_reached {
                Some(ScriptStatus::RateLimited)
            } else {
                None
            }
        }
        ScriptStatus::RateLimited => {
            if signals.window_reset && !force_restart {
                Some(ScriptStatus::Running)
            } else {
                None
            }
        }
        ScriptStatus::Stopped => {
            if force_restart {
                Some(ScriptStatus::Running)
            } else {
                None
            }
        }
    }
}

/// Drives the per-task status state machine over the tracking table.
#[derive(Clone)]
pub struct HealthService {
    tracking: TrackingRepository,
}

impl HealthService {
    pub fn new(tracking: TrackingRepository) -> Self {
        Self { tracking }
    }

    /// Mark a task as running (collection started or resumed).
    pub async fn start(&self, key: &ScriptKey) -> Result<(), DbError> {
        self.tracking
            .upsert(key, &ScriptStatus::Running, None, false)
            .await
    }

    /// Record an unrecoverable stop. `request_restart` pre-arms the
    /// supervisor restart path for failures known to be environmental.
    #[instrument(skip(self, key, reason), fields(script = %key.script_name))]
    pub async fn report_stopped(
        &self,
        key: &ScriptKey,
        reason: &str,
        request_restart: bool,
    ) -> Result<(), DbError> {
        warn!("Task '{}' stopped: {}", key.script_name, reason);
        self.tracking
            .upsert(key, &ScriptStatus::Stopped, Some(reason), request_restart)
            .await
    }

    /// Evaluate the state machine for one task and persist any transition.
    ///
    /// Returns the status transitioned to, if any. The `stopped -> running`
    /// edge consumes `force_restart` atomically: if another evaluator got
    /// there first, no transition happens here.
    #[instrument(skip(self, key, signals), fields(script = %key.script_name))]
    pub async fn evaluate(
        &self,
        key: &ScriptKey,
        signals: &HealthSignals,
    ) -> Result<Option<ScriptStatus>, DbError> {
        let Some(tracker) = self.tracking.find(key).await? else {
            // Unknown task: first sighting registers it as running.
            self.start(key).await?;
            return Ok(Some(ScriptStatus::Running));
        };

        let Some(next) = next_status(&tracker.status, tracker.force_restart, signals) else {
            return Ok(None);
        };

        if tracker.status == ScriptStatus::Stopped && next == ScriptStatus::Running {
            // Honor force_restart exactly once.
            if !self.tracking.consume_restart(key).await? {
                return Ok(None);
            }
        }

        let reason = signals.fatal_error.as_deref();
        self.tracking.upsert(key, &next, reason, false).await?;

        info!(
            "Task '{}' transitioned {} -> {}",
            key.script_name, tracker.status, next
        );
        Ok(Some(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signals() -> HealthSignals {
        HealthSignals::default()
    }

    #[test]
    fn test_running_to_rate_limited_on_daily_limit() {
        let s = HealthSignals {
            daily_limit_reached: true,
            ..signals()
        };
        assert_eq!(
            next_status(&ScriptStatus::Running, false, &s),
            Some(ScriptStatus::RateLimited)
        );
    }

    #[test]
    fn test_running_stays_put_without_signals() {
        assert_eq!(next_status(&ScriptStatus::Running, false, &signals()), None);
    }

    #[test]
    fn test_rate_limited_resumes_on_window_reset() {
        let s = HealthSignals {
            window_reset: true,
            ..signals()
        };
        assert_eq!(
            next_status(&ScriptStatus::RateLimited, false, &s),
            Some(ScriptStatus::Running)
        );
    }

    #[test]
    fn test_rate_limited_does_not_resume_while_restart_pending() {
        let s = HealthSignals {
            window_reset: true,
            ..signals()
        };
        assert_eq!(next_status(&ScriptStatus::RateLimited, true, &s), None);
    }

    #[test]
    fn test_fatal_error_stops_running_and_rate_limited() {
        let s = HealthSignals {
            fatal_error: Some("invalid API key".to_string()),
            ..signals()
        };
        assert_eq!(
            next_status(&ScriptStatus::Running, false, &s),
            Some(ScriptStatus::Stopped)
        );
        assert_eq!(
            next_status(&ScriptStatus::RateLimited, false, &s),
            Some(ScriptStatus::Stopped)
        );
    }

    #[test]
    fn test_stopped_stays_stopped_without_restart() {
        let s = HealthSignals {
            window_reset: true,
            daily_limit_reached: true,
            ..signals()
        };
        assert_eq!(next_status(&ScriptStatus::Stopped, false, &s), None);
    }

    #[test]
    fn test_stopped_resumes_only_via_force_restart() {
        assert_eq!(
            next_status(&ScriptStatus::Stopped, true, &signals()),
            Some(ScriptStatus::Running)
        );
    }

    #[test]
    fn test_fatal_error_wins_over_restart_while_stopped() {
        let s = HealthSignals {
            fatal_error: Some("disk full".to_string()),
            ..signals()
        };
        // Already stopped: no self-transition, reason unchanged.
        assert_eq!(next_status(&ScriptStatus::Stopped, true, &s), None);
    }

    #[test]
    fn test_free_text_status_behaves_like_running() {
        let s = HealthSignals {
            daily_limit_reached: true,
            ..signals()
        };
        let current = ScriptStatus::Other("Processing: 3 of 10".to_string());
        assert_eq!(
            next_status(&current, false, &s),
            Some(ScriptStatus::RateLimited)
        );
    }
}
