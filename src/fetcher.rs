use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use crate::fetch_error::FetchError;
use crate::provider::{DaySummaryResponse, TimemachineResponse};

/// What a response code means for the collection loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// 200: payload available, proceed to ingestion.
    Success,
    /// 400 with the provider's out-of-range marker: the queried date is
    /// outside the archive. Skip and continue.
    InvalidRange,
    /// Transient or unclassified. The caller may resend the same call.
    Recoverable,
    /// Wrong URL, bad API key, or server-side failure. The collector stops
    /// and flags itself for restart.
    Fatal,
}

/// Classify a provider response into the loop's error taxonomy.
pub fn classify_response(code: u16, body: &str) -> Disposition {
    match code {
        200 => Disposition::Success,
        400 if body.contains("out the available range") => Disposition::InvalidRange,
        403 | 404 => Disposition::Fatal,
        c if c >= 500 => Disposition::Fatal,
        _ => Disposition::Recoverable,
    }
}

/// Outcome of one HTTP exchange with the provider, carrying what the call
/// ledger needs (code, message) alongside the decoded payload on success.
#[derive(Debug, Clone)]
pub struct ProviderResponse<T> {
    pub code: u16,
    pub message: String,
    pub payload: Option<T>,
}

impl<T> ProviderResponse<T> {
    pub fn disposition(&self) -> Disposition {
        classify_response(self.code, &self.message)
    }
}

/// Substitute `{name}` placeholders in a call prototype from the catalog.
///
/// Prototypes look like
/// `https://api.openweathermap.org/data/3.0/onecall/timemachine?lat={lat}&lon={lon}&dt={time}&appid={API_key}`.
pub fn render_prototype(prototype: &str, params: &[(&str, String)]) -> String {
    let mut url = prototype.to_string();
    for (name, value) in params {
        url = url.replace(&format!("{{{name}}}"), value);
    }
    url
}

#[derive(Clone)]
pub struct OpenWeatherClient {
    client: reqwest::Client,
    api_key: String,
}

impl OpenWeatherClient {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
        }
    }

    /// Fetch one historical weather point for a Unix timestamp.
    #[instrument(skip(self, prototype))]
    pub async fn fetch_timemachine(
        &self,
        prototype: &str,
        lat: f64,
        lon: f64,
        dt: i64,
    ) -> Result<ProviderResponse<TimemachineResponse>, FetchError> {
        let url = render_prototype(
            prototype,
            &[
                ("lat", lat.to_string()),
                ("lon", lon.to_string()),
                ("time", dt.to_string()),
                ("API_key", self.api_key.clone()),
            ],
        );
        self.get(&url, &format!("timestamp {dt}")).await
    }

    /// Fetch the aggregated summary for one calendar date ("YYYY-MM-DD").
    #[instrument(skip(self, prototype))]
    pub async fn fetch_day_summary(
        &self,
        prototype: &str,
        lat: f64,
        lon: f64,
        date: &str,
    ) -> Result<ProviderResponse<DaySummaryResponse>, FetchError> {
        let url = render_prototype(
            prototype,
            &[
                ("lat", lat.to_string()),
                ("lon", lon.to_string()),
                ("date", date.to_string()),
                ("API_key", self.api_key.clone()),
            ],
        );
        self.get(&url, &format!("date {date}")).await
    }

    async fn get<T: DeserializeOwned>(
        &self,
        url: &str,
        what: &str,
    ) -> Result<ProviderResponse<T>, FetchError> {
        debug!("Sending provider request for {}", what);
        let response = self
            .client
            .get(url)
            .query(&[("units", "metric")])
            .send()
            .await?;

        let code = response.status().as_u16();
        let body = response.text().await?;
        debug!("Provider responded with status {} ({} bytes)", code, body.len());

        if code == 200 {
            let payload: T = serde_json::from_str(&body)?;
            Ok(ProviderResponse {
                code,
                message: format!("Successfully retrieved {what}"),
                payload: Some(payload),
            })
        } else {
            warn!("Provider call for {} failed with status {}", what, code);
            Ok(ProviderResponse {
                code,
                message: format!("API call failed with status {code} - {body}"),
                payload: None,
            })
        }
    }
}
