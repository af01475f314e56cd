use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

/// Script/collector status. Closed variants cover the states the health
/// tracker reasons about; `Other` preserves unanticipated provider or
/// operator states verbatim so dashboard queries keep working.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptStatus {
    Running,
    RateLimited,
    Stopped,
    Other(String),
}

impl ScriptStatus {
    pub fn as_str(&self) -> &str {
        match self {
            ScriptStatus::Running => "running",
            ScriptStatus::RateLimited => "rate_limited",
            ScriptStatus::Stopped => "stopped",
            ScriptStatus::Other(s) => s,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "running" => ScriptStatus::Running,
            "rate_limited" => ScriptStatus::RateLimited,
            "stopped" => ScriptStatus::Stopped,
            other => ScriptStatus::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ScriptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for ScriptStatus {
    fn from(s: &str) -> Self {
        ScriptStatus::parse(s)
    }
}

/// Outcome of one persistence attempt in the insertion audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertStatus {
    Success,
    Failure,
    Other(String),
}

impl InsertStatus {
    pub fn as_str(&self) -> &str {
        match self {
            InsertStatus::Success => "success",
            InsertStatus::Failure => "failure",
            InsertStatus::Other(s) => s,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "success" => InsertStatus::Success,
            "failure" => InsertStatus::Failure,
            other => InsertStatus::Other(other.to_string()),
        }
    }
}

impl fmt::Display for InsertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Database entity models

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Location {
    pub id: i32,
    pub friendly_name: String,
    pub official_station_name: Option<String>,
    pub zip_code: Option<String>,
    pub lat_detail: f64,
    pub lon_detail: f64,
    pub lat_rounded: f32,
    pub lon_rounded: f32,
}

/// A location to register. Rounded coordinates are derived, never supplied:
/// the provider truncates to 4 decimals and dedup matching has to agree.
#[derive(Debug, Clone)]
pub struct NewLocation {
    pub friendly_name: String,
    pub official_station_name: Option<String>,
    pub zip_code: Option<String>,
    pub lat_detail: f64,
    pub lon_detail: f64,
}

impl NewLocation {
    pub fn lat_rounded(&self) -> f32 {
        round4(self.lat_detail)
    }

    pub fn lon_rounded(&self) -> f32 {
        round4(self.lon_detail)
    }
}

/// Round to the 4-decimal precision the provider reports coordinates at.
pub fn round4(value: f64) -> f32 {
    ((value * 10_000.0).round() / 10_000.0) as f32
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct HourlyObservation {
    pub id: i32,
    pub dt: i64,
    pub lat: f32,
    pub lon: f32,
    pub tz: String,
    pub tzoff: i32,
    pub sunrise: Option<i64>,
    pub sunset: Option<i64>,
    pub temp: f32,
    pub feels_like: f32,
    pub pressure: f32,
    pub humidity: f32,
    pub dew_point: Option<f32>,
    pub vis: Option<f32>,
    pub description: Option<String>,
    pub clouds: Option<f32>,
    pub wind_speed: Option<f32>,
    pub wind_deg: Option<f32>,
    pub location_id: Option<i32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewHourlyObservation {
    pub dt: i64,
    pub lat: f32,
    pub lon: f32,
    pub tz: String,
    pub tzoff: i32,
    pub sunrise: Option<i64>,
    pub sunset: Option<i64>,
    pub temp: f32,
    pub feels_like: f32,
    pub pressure: f32,
    pub humidity: f32,
    pub dew_point: Option<f32>,
    pub vis: Option<f32>,
    pub description: Option<String>,
    pub clouds: Option<f32>,
    pub wind_speed: Option<f32>,
    pub wind_deg: Option<f32>,
    pub location_id: Option<i32>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DailySummary {
    pub id: i32,
    pub lat: f32,
    pub lon: f32,
    pub tzoff: i32,
    /// Epoch seconds truncated to 00:00 of the day.
    pub date: i64,
    pub units: String,
    pub cloud_cover_afternoon: f32,
    pub humidity_afternoon: f32,
    pub precipitation_total: f32,
    pub temperature_min: f32,
    pub temperature_max: f32,
    pub temperature_afternoon: f32,
    pub temperature_night: f32,
    pub temperature_evening: f32,
    pub temperature_morning: f32,
    pub pressure_afternoon: f32,
    pub wind_max_speed: f32,
    pub wind_max_direction: f32,
    pub location_id: Option<i32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewDailySummary {
    pub lat: f32,
    pub lon: f32,
    pub tzoff: i32,
    pub date: i64,
    pub units: String,
    pub cloud_cover_afternoon: f32,
    pub humidity_afternoon: f32,
    pub precipitation_total: f32,
    pub temperature_min: f32,
    pub temperature_max: f32,
    pub temperature_afternoon: f32,
    pub temperature_night: f32,
    pub temperature_evening: f32,
    pub temperature_morning: f32,
    pub pressure_afternoon: f32,
    pub wind_max_speed: f32,
    pub wind_max_direction: f32,
    pub location_id: Option<i32>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ApiCallType {
    pub api_call_type_id: i32,
    pub platform: String,
    pub api_call_type: String,
    pub api_call_prototype: String,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ApiCall {
    pub api_call_id: i32,
    pub call_timestamp: i64,
    pub api_call_type_id: Option<i32>,
    pub call_event: String,
    pub request_payload: Option<String>,
    pub response_code: Option<i32>,
    pub response_message: Option<String>,
    pub retry_count: i32,
    pub call_log_message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewApiCall {
    pub call_timestamp: i64,
    pub api_call_type_id: Option<i32>,
    pub call_event: String,
    pub request_payload: Option<String>,
    pub response_code: Option<i32>,
    pub response_message: Option<String>,
    pub call_log_message: Option<String>,
}

/// Identity of one tracked collection task. The tracker is unique per key,
/// not per script file: one script may run several tracked call types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptKey {
    pub script_name: String,
    pub platform: String,
    pub api_call_alt_name: String,
}

impl ScriptKey {
    pub fn new(script_name: &str, platform: &str, api_call_alt_name: &str) -> Self {
        Self {
            script_name: script_name.to_string(),
            platform: platform.to_string(),
            api_call_alt_name: api_call_alt_name.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScriptTracker {
    pub id: i32,
    pub script_name: String,
    pub platform: String,
    pub api_call_alt_name: String,
    pub status: ScriptStatus,
    pub previous_status: Option<ScriptStatus>,
    pub last_checked: DateTime<Utc>,
    pub requests_made_today: i32,
    pub daily_limit_reached: bool,
    pub force_restart: bool,
    pub stopped_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InsertionAudit {
    pub sql_log_id: i32,
    pub api_call_id: i32,
    pub insert_timestamp: i64,
    pub insert_status: InsertStatus,
    pub error_message: Option<String>,
    pub retry_count: i32,
}

#[derive(Debug, Clone, FromRow)]
pub struct Credential {
    pub key_name: String,
    pub username: String,
    pub password: String,
    pub dbname: Option<String>,
    pub target_service: Option<String>,
    pub notes: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_status_round_trip() {
        for s in ["running", "rate_limited", "stopped"] {
            assert_eq!(ScriptStatus::parse(s).as_str(), s);
        }
    }

    #[test]
    fn test_script_status_preserves_unknown() {
        let status = ScriptStatus::parse("stopped-warn");
        assert_eq!(status, ScriptStatus::Other("stopped-warn".to_string()));
        assert_eq!(status.as_str(), "stopped-warn");
    }

    #[test]
    fn test_insert_status_round_trip() {
        assert_eq!(InsertStatus::parse("success"), InsertStatus::Success);
        assert_eq!(InsertStatus::parse("failure"), InsertStatus::Failure);
        assert_eq!(
            InsertStatus::parse("deferred").as_str(),
            "deferred"
        );
    }

    #[test]
    fn test_round4() {
        assert_eq!(round4(33.689_060), 33.6891);
        assert_eq!(round4(-78.886_696), -78.8867);
    }
}
