use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Provider API key. When unset, the collector falls back to the
    /// `credentials` table.
    pub api_key: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub timemachine_daily_limit: i64,
    pub day_summary_daily_limit: i64,
    pub persistence_retry_limit: i32,
    pub fetch_retry_limit: i32,
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        Ok(Config {
            database_url: env::var("DATABASE_URL")?,
            api_key: env::var("OPENWEATHER_API_KEY").ok(),
            latitude: env::var("LATITUDE")
                .unwrap_or_else(|_| "33.6891".to_string())
                .parse()
                .unwrap_or(33.6891),
            longitude: env::var("LONGITUDE")
                .unwrap_or_else(|_| "-78.8867".to_string())
                .parse()
                .unwrap_or(-78.8867),
            timemachine_daily_limit: env::var("TIMEMACHINE_DAILY_LIMIT")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(10),
            day_summary_daily_limit: env::var("DAY_SUMMARY_DAILY_LIMIT")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(10),
            persistence_retry_limit: env::var("PERSISTENCE_RETRY_LIMIT")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .unwrap_or(3),
            fetch_retry_limit: env::var("FETCH_RETRY_LIMIT")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .unwrap_or(3),
        })
    }
}
