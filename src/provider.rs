//! OpenWeather payload models and their validation into storage rows.
//!
//! The raw models keep every field optional so a malformed payload fails
//! validation with a useful field list instead of failing deserialization
//! opaquely; validation then enforces which fields are actually required.

use chrono::NaiveDate;
use serde::Deserialize;

use crate::db::{NewDailySummary, NewHourlyObservation};
use crate::units::tz_label_to_seconds;

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("missing critical data: {fields:?}")]
    MissingFields { fields: Vec<&'static str> },
    #[error("payload contains no weather data points")]
    EmptyPayload,
    #[error("unparseable date '{0}'")]
    BadDate(String),
}

/// Timemachine endpoint response: one weather point for a queried timestamp.
#[derive(Debug, Clone, Deserialize)]
pub struct TimemachineResponse {
    pub lat: f64,
    pub lon: f64,
    pub timezone: String,
    pub timezone_offset: i32,
    #[serde(default)]
    pub data: Vec<WeatherPoint>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WeatherPoint {
    pub dt: Option<i64>,
    pub sunrise: Option<i64>,
    pub sunset: Option<i64>,
    pub temp: Option<f64>,
    pub feels_like: Option<f64>,
    pub pressure: Option<f64>,
    pub humidity: Option<f64>,
    pub dew_point: Option<f64>,
    pub visibility: Option<f64>,
    pub clouds: Option<f64>,
    pub wind_speed: Option<f64>,
    pub wind_deg: Option<f64>,
    #[serde(default)]
    pub weather: Vec<WeatherCondition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WeatherCondition {
    pub description: Option<String>,
}

/// Day-summary endpoint response: nested per-period aggregates.
#[derive(Debug, Clone, Deserialize)]
pub struct DaySummaryResponse {
    pub lat: f64,
    pub lon: f64,
    pub tz: Option<String>,
    pub date: Option<String>,
    pub units: Option<String>,
    #[serde(default)]
    pub cloud_cover: PeriodValue,
    #[serde(default)]
    pub humidity: PeriodValue,
    #[serde(default)]
    pub precipitation: TotalValue,
    #[serde(default)]
    pub temperature: TemperatureSummary,
    #[serde(default)]
    pub pressure: PeriodValue,
    #[serde(default)]
    pub wind: WindSummary,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PeriodValue {
    pub afternoon: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TotalValue {
    pub total: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TemperatureSummary {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub afternoon: Option<f64>,
    pub night: Option<f64>,
    pub evening: Option<f64>,
    pub morning: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WindSummary {
    #[serde(default)]
    pub max: WindMax,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WindMax {
    pub speed: Option<f64>,
    pub direction: Option<f64>,
}

/// Validate a timemachine payload into an insertable hourly row.
///
/// Required physical fields follow the schema: dt, temp, feels_like,
/// pressure, humidity, plus a weather description. Fields the provider may
/// legitimately omit (dew_point, visibility, clouds, wind) pass through as
/// NULLs.
pub fn validate_timemachine(
    resp: &TimemachineResponse,
    location_id: Option<i32>,
) -> Result<NewHourlyObservation, ValidationError> {
    let point = resp.data.first().ok_or(ValidationError::EmptyPayload)?;

    let mut missing = Vec::new();
    if point.dt.is_none() {
        missing.push("dt");
    }
    if point.temp.is_none() {
        missing.push("temp");
    }
    if point.feels_like.is_none() {
        missing.push("feels_like");
    }
    if point.pressure.is_none() {
        missing.push("pressure");
    }
    if point.humidity.is_none() {
        missing.push("humidity");
    }

    let description = point
        .weather
        .first()
        .and_then(|w| w.description.clone())
        .filter(|d| !d.is_empty());
    if description.is_none() {
        missing.push("description");
    }

    if !missing.is_empty() {
        return Err(ValidationError::MissingFields { fields: missing });
    }

    Ok(NewHourlyObservation {
        dt: point.dt.unwrap(),
        lat: resp.lat as f32,
        lon: resp.lon as f32,
        tz: resp.timezone.clone(),
        tzoff: resp.timezone_offset,
        sunrise: point.sunrise,
        sunset: point.sunset,
        temp: point.temp.unwrap() as f32,
        feels_like: point.feels_like.unwrap() as f32,
        pressure: point.pressure.unwrap() as f32,
        humidity: point.humidity.unwrap() as f32,
        dew_point: point.dew_point.map(|v| v as f32),
        vis: point.visibility.map(|v| v as f32),
        description,
        clouds: point.clouds.map(|v| v as f32),
        wind_speed: point.wind_speed.map(|v| v as f32),
        wind_deg: point.wind_deg.map(|v| v as f32),
        location_id,
    })
}

/// Validate a day-summary payload into an insertable daily row.
///
/// The `date` string becomes epoch seconds at 00:00 UTC of that day, which
/// is the canonical encoding of `daily_summary_data.date`.
pub fn validate_day_summary(
    resp: &DaySummaryResponse,
    location_id: Option<i32>,
) -> Result<NewDailySummary, ValidationError> {
    let date_str = resp.date.as_deref().unwrap_or("");
    let date = NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
        .map_err(|_| ValidationError::BadDate(date_str.to_string()))?
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always valid")
        .and_utc()
        .timestamp();

    let mut missing = Vec::new();
    if resp.cloud_cover.afternoon.is_none() {
        missing.push("cloud_cover.afternoon");
    }
    if resp.humidity.afternoon.is_none() {
        missing.push("humidity.afternoon");
    }
    if resp.precipitation.total.is_none() {
        missing.push("precipitation.total");
    }
    if resp.temperature.min.is_none() {
        missing.push("temperature.min");
    }
    if resp.temperature.max.is_none() {
        missing.push("temperature.max");
    }
    if resp.pressure.afternoon.is_none() {
        missing.push("pressure.afternoon");
    }
    if resp.wind.max.speed.is_none() {
        missing.push("wind.max.speed");
    }

    if !missing.is_empty() {
        return Err(ValidationError::MissingFields { fields: missing });
    }

    let tzoff = resp
        .tz
        .as_deref()
        .and_then(tz_label_to_seconds)
        .unwrap_or(0);

    Ok(NewDailySummary {
        lat: resp.lat as f32,
        lon: resp.lon as f32,
        tzoff,
        date,
        units: resp.units.clone().unwrap_or_else(|| "metric".to_string()),
        cloud_cover_afternoon: resp.cloud_cover.afternoon.unwrap() as f32,
        humidity_afternoon: resp.humidity.afternoon.unwrap() as f32,
        precipitation_total: resp.precipitation.total.unwrap() as f32,
        temperature_min: resp.temperature.min.unwrap() as f32,
        temperature_max: resp.temperature.max.unwrap() as f32,
        temperature_afternoon: resp.temperature.afternoon.unwrap_or(0.0) as f32,
        temperature_night: resp.temperature.night.unwrap_or(0.0) as f32,
        temperature_evening: resp.temperature.evening.unwrap_or(0.0) as f32,
        temperature_morning: resp.temperature.morning.unwrap_or(0.0) as f32,
        pressure_afternoon: resp.pressure.afternoon.unwrap() as f32,
        wind_max_speed: resp.wind.max.speed.unwrap() as f32,
        wind_max_direction: resp.wind.max.direction.unwrap_or(0.0) as f32,
        location_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEMACHINE_JSON: &str = r#"{
        "lat": 33.6891,
        "lon": -78.8867,
        "timezone": "America/New_York",
        "timezone_offset": -14400,
        "data": [{
            "dt": 1700000000,
            "sunrise": 1699963200,
            "sunset": 1700000400,
            "temp": 12.3,
            "feels_like": 11.1,
            "pressure": 1015,
            "humidity": 68,
            "dew_point": 6.5,
            "visibility": 10000,
            "clouds": 40,
            "wind_speed": 4.6,
            "wind_deg": 210,
            "weather": [{"id": 802, "main": "Clouds", "description": "scattered clouds"}]
        }]
    }"#;

    const DAY_SUMMARY_JSON: &str = r#"{
        "lat": 33.6891,
        "lon": -78.8867,
        "tz": "-04:00",
        "date": "2023-06-15",
        "units": "metric",
        "cloud_cover": {"afternoon": 30.0},
        "humidity": {"afternoon": 55.0},
        "precipitation": {"total": 1.2},
        "temperature": {"min": 18.0, "max": 29.5, "afternoon": 28.0,
                        "night": 21.0, "evening": 25.0, "morning": 19.5},
        "pressure": {"afternoon": 1012.0},
        "wind": {"max": {"speed": 7.8, "direction": 180.0}}
    }"#;

    #[test]
    fn test_validate_timemachine_full_payload() {
        let resp: TimemachineResponse = serde_json::from_str(TIMEMACHINE_JSON).unwrap();
        let obs = validate_timemachine(&resp, Some(1)).unwrap();

        assert_eq!(obs.dt, 1_700_000_000);
        assert_eq!(obs.tz, "America/New_York");
        assert_eq!(obs.tzoff, -14_400);
        assert_eq!(obs.temp, 12.3);
        assert_eq!(obs.description.as_deref(), Some("scattered clouds"));
        assert_eq!(obs.vis, Some(10_000.0));
        assert_eq!(obs.location_id, Some(1));
    }

    #[test]
    fn test_validate_timemachine_optional_fields_pass_through_null() {
        let mut resp: TimemachineResponse = serde_json::from_str(TIMEMACHINE_JSON).unwrap();
        let point = &mut resp.data[0];
        point.dew_point = None;
        point.visibility = None;
        point.clouds = None;
        point.wind_speed = None;
        point.wind_deg = None;

        let obs = validate_timemachine(&resp, None).unwrap();
        assert_eq!(obs.dew_point, None);
        assert_eq!(obs.vis, None);
        assert_eq!(obs.clouds, None);
        assert_eq!(obs.location_id, None);
    }

    #[test]
    fn test_validate_timemachine_reports_missing_criticals() {
        let mut resp: TimemachineResponse = serde_json::from_str(TIMEMACHINE_JSON).unwrap();
        resp.data[0].temp = None;
        resp.data[0].humidity = None;

        let err = validate_timemachine(&resp, None).unwrap_err();
        match err {
            ValidationError::MissingFields { fields } => {
                assert_eq!(fields, vec!["temp", "humidity"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_validate_timemachine_empty_data() {
        let resp: TimemachineResponse =
            serde_json::from_str(r#"{"lat":0,"lon":0,"timezone":"UTC","timezone_offset":0}"#)
                .unwrap();
        assert!(matches!(
            validate_timemachine(&resp, None),
            Err(ValidationError::EmptyPayload)
        ));
    }

    #[test]
    fn test_validate_day_summary() {
        let resp: DaySummaryResponse = serde_json::from_str(DAY_SUMMARY_JSON).unwrap();
        let summary = validate_day_summary(&resp, Some(1)).unwrap();

        // 2023-06-15 00:00:00 UTC
        assert_eq!(summary.date, 1_686_787_200);
        assert_eq!(summary.date % 86_400, 0);
        assert_eq!(summary.tzoff, -14_400);
        assert_eq!(summary.temperature_max, 29.5);
        assert_eq!(summary.wind_max_direction, 180.0);
        assert_eq!(summary.units, "metric");
    }

    #[test]
    fn test_validate_day_summary_bad_date() {
        let mut resp: DaySummaryResponse = serde_json::from_str(DAY_SUMMARY_JSON).unwrap();
        resp.date = Some("15/06/2023".to_string());
        assert!(matches!(
            validate_day_summary(&resp, None),
            Err(ValidationError::BadDate(_))
        ));
    }

    #[test]
    fn test_validate_day_summary_missing_criticals() {
        let mut resp: DaySummaryResponse = serde_json::from_str(DAY_SUMMARY_JSON).unwrap();
        resp.precipitation.total = None;
        resp.wind.max.speed = None;

        let err = validate_day_summary(&resp, None).unwrap_err();
        match err {
            ValidationError::MissingFields { fields } => {
                assert_eq!(fields, vec!["precipitation.total", "wind.max.speed"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
