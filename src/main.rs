use std::path::{Path, PathBuf};

use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tokio::time::sleep;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use weather_archiver::config::Config;
use weather_archiver::db::{
    round4, AuditRepository, CallLedgerRepository, CredentialsRepository, LocationRepository,
    NewApiCall, ObservationRepository, ScriptKey, ScriptStatus, TrackingRepository,
};
use weather_archiver::fetcher::{render_prototype, Disposition, OpenWeatherClient, ProviderResponse};
use weather_archiver::provider::{DaySummaryResponse, TimemachineResponse};
use weather_archiver::services::{
    ControlService, HealthService, HealthSignals, IngestError, IngestService,
};

const PLATFORM: &str = "OpenWeather";
const TIMEMACHINE_PROTOTYPE: &str = "https://api.openweathermap.org/data/3.0/onecall/timemachine?lat={lat}&lon={lon}&dt={time}&appid={API_key}";
const DAY_SUMMARY_PROTOTYPE: &str = "https://api.openweathermap.org/data/3.0/onecall/day_summary?lat={lat}&lon={lon}&date={date}&appid={API_key}";

#[derive(Parser)]
#[command(name = "weather-archiver")]
#[command(about = "OpenWeather historical collector and archive", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Backfill hourly observations from a JSON batch file of Unix timestamps
    BackfillHourly {
        /// Path to a JSON array of epoch seconds
        #[arg(long)]
        input: PathBuf,
    },
    /// Backfill daily summaries from a JSON batch file of YYYY-MM-DD dates
    BackfillDaily {
        /// Path to a JSON array of date strings
        #[arg(long)]
        input: PathBuf,
    },
    /// Show tracker status for all collection tasks
    Status,
}

/// Everything a backfill loop needs, wired once at startup.
struct Collector {
    config: Config,
    client: OpenWeatherClient,
    ledger: CallLedgerRepository,
    ingest: IngestService,
    control: ControlService,
    health: HealthService,
    tracking: TrackingRepository,
    observations: ObservationRepository,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,weather_archiver=debug")),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;

    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    let api_key = match config.api_key.clone() {
        Some(key) => key,
        None => {
            let credentials = CredentialsRepository::new(pool.clone());
            credentials
                .get_credentials("openweather_api")
                .await?
                .map(|c| c.password)
                .ok_or("OPENWEATHER_API_KEY is unset and no 'openweather_api' credential exists")?
        }
    };

    let ledger = CallLedgerRepository::new(pool.clone());
    let tracking = TrackingRepository::new(pool.clone());
    let observations = ObservationRepository::new(pool.clone());
    let locations = LocationRepository::new(pool.clone());
    let audit = AuditRepository::new(pool.clone());

    let collector = Collector {
        client: OpenWeatherClient::new(api_key),
        ingest: IngestService::new(observations.clone(), locations, audit),
        control: ControlService::new(ledger.clone(), tracking.clone()),
        health: HealthService::new(tracking.clone()),
        config,
        ledger,
        tracking,
        observations,
    };

    match cli.command {
        Command::BackfillHourly { input } => run_hourly_backfill(&collector, &input).await,
        Command::BackfillDaily { input } => run_daily_backfill(&collector, &input).await,
        Command::Status => show_status(&collector).await,
    }
}

async fn run_hourly_backfill(
    c: &Collector,
    input: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let key = ScriptKey::new("openweather_timemachine_get", PLATFORM, "timemachine");
    let timestamps: Vec<i64> = load_batch_file(c, &key, input).await?;

    let type_id = c
        .ledger
        .register_call_type(PLATFORM, "Weather Data for Timestamp", TIMEMACHINE_PROTOTYPE)
        .await?;
    c.health.start(&key).await?;

    // Skip timestamps already archived before spending any API budget.
    let mut pending = Vec::new();
    for &dt in &timestamps {
        if !c.observations.hourly_exists(dt).await? {
            pending.push(dt);
        }
    }
    info!(
        "{} of {} timestamps pending (rest already archived)",
        pending.len(),
        timestamps.len()
    );

    let total = pending.len();
    let mut failed_requests = 0usize;
    let mut failed_inserts = 0usize;

    for (idx, dt) in pending.iter().copied().enumerate() {
        if preflight(c, &key, type_id, c.config.timemachine_daily_limit).await? {
            return Ok(());
        }

        let call_id = c
            .ledger
            .record_call(&new_ledger_entry(
                type_id,
                render_prototype(
                    TIMEMACHINE_PROTOTYPE,
                    &[
                        ("lat", c.config.latitude.to_string()),
                        ("lon", c.config.longitude.to_string()),
                        ("time", dt.to_string()),
                    ],
                ),
                "OpenWeather historical timemachine",
            ))
            .await?;

        let response: ProviderResponse<TimemachineResponse> = {
            let fetched = fetch_with_retries(c, call_id, || {
                c.client.fetch_timemachine(
                    TIMEMACHINE_PROTOTYPE,
                    c.config.latitude,
                    c.config.longitude,
                    dt,
                )
            })
            .await?;
            match fetched {
                Some(r) => r,
                None => {
                    failed_requests += 1;
                    continue;
                }
            }
        };

        c.ledger
            .record_response(call_id, Some(response.code as i32), &response.message)
            .await?;
        c.control.note_request(&key).await?;

        match response.disposition() {
            Disposition::Success => {
                let Some(payload) = response.payload else {
                    warn!("Success response for dt {} carried no payload", dt);
                    failed_requests += 1;
                    continue;
                };
                info!("Processing: {} of {}", idx + 1, total);
                if !ingest_hourly_with_retries(c, &key, call_id, &payload).await? {
                    failed_inserts += 1;
                }
            }
            Disposition::InvalidRange => {
                warn!("Timestamp {} is outside the provider archive; skipping", dt);
                failed_requests += 1;
            }
            Disposition::Recoverable => {
                warn!("Unhandled provider error for dt {}: {}", dt, response.message);
                failed_requests += 1;
            }
            Disposition::Fatal => {
                error!("Fatal provider error: {}", response.message);
                c.health.report_stopped(&key, &response.message, true).await?;
                return Err(response.message.into());
            }
        }
    }

    finish_batch(c, &key, total, failed_requests, failed_inserts).await
}

async fn run_daily_backfill(
    c: &Collector,
    input: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let key = ScriptKey::new("openweather_summary_get", PLATFORM, "day_summary");
    let dates: Vec<String> = load_batch_file(c, &key, input).await?;

    for date in &dates {
        if NaiveDate::parse_from_str(date, "%Y-%m-%d").is_err() {
            let message = format!("Invalid input format: '{date}' is not a YYYY-MM-DD date");
            c.health.report_stopped(&key, &message, false).await?;
            return Err(message.into());
        }
    }

    let type_id = c
        .ledger
        .register_call_type(PLATFORM, "Daily Aggregation", DAY_SUMMARY_PROTOTYPE)
        .await?;
    c.health.start(&key).await?;

    let lat = round4(c.config.latitude);
    let lon = round4(c.config.longitude);

    let mut pending = Vec::new();
    for date in &dates {
        let epoch = date_to_epoch(date);
        if !c.observations.daily_exists(lat, lon, epoch).await? {
            pending.push(date.clone());
        }
    }
    if pending.is_empty() {
        warn!("All dates submitted exist in the database");
    }

    let total = pending.len();
    let mut failed_requests = 0usize;
    let mut failed_inserts = 0usize;

    for (idx, date) in pending.iter().enumerate() {
        if preflight(c, &key, type_id, c.config.day_summary_daily_limit).await? {
            return Ok(());
        }

        let call_id = c
            .ledger
            .record_call(&new_ledger_entry(
                type_id,
                render_prototype(
                    DAY_SUMMARY_PROTOTYPE,
                    &[
                        ("lat", c.config.latitude.to_string()),
                        ("lon", c.config.longitude.to_string()),
                        ("date", date.clone()),
                    ],
                ),
                "OpenWeather daily summary",
            ))
            .await?;

        let response: ProviderResponse<DaySummaryResponse> = {
            let fetched = fetch_with_retries(c, call_id, || {
                c.client.fetch_day_summary(
                    DAY_SUMMARY_PROTOTYPE,
                    c.config.latitude,
                    c.config.longitude,
                    date,
                )
            })
            .await?;
            match fetched {
                Some(r) => r,
                None => {
                    failed_requests += 1;
                    continue;
                }
            }
        };

        c.ledger
            .record_response(call_id, Some(response.code as i32), &response.message)
            .await?;
        c.control.note_request(&key).await?;

        match response.disposition() {
            Disposition::Success => {
                let Some(payload) = response.payload else {
                    warn!("Success response for {} carried no payload", date);
                    failed_requests += 1;
                    continue;
                };
                info!("Processing: {} of {}", idx + 1, total);
                if !ingest_daily_with_retries(c, &key, call_id, &payload).await? {
                    failed_inserts += 1;
                }
            }
            Disposition::InvalidRange => {
                warn!("Date {} is outside the provider archive; skipping", date);
                failed_requests += 1;
            }
            Disposition::Recoverable => {
                warn!("Unhandled provider error for {}: {}", date, response.message);
                failed_requests += 1;
            }
            Disposition::Fatal => {
                error!("Fatal provider error: {}", response.message);
                c.health.report_stopped(&key, &response.message, true).await?;
                return Err(response.message.into());
            }
        }
    }

    finish_batch(c, &key, total, failed_requests, failed_inserts).await
}

async fn show_status(c: &Collector) -> Result<(), Box<dyn std::error::Error>> {
    let trackers = c.tracking.list().await?;
    if trackers.is_empty() {
        println!("No tracked collection tasks.");
        return Ok(());
    }

    for t in trackers {
        println!(
            "{}/{}/{}: {} (prev: {}) last_checked={} requests_today={} limit_reached={} force_restart={}{}",
            t.script_name,
            t.platform,
            t.api_call_alt_name,
            t.status,
            t.previous_status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string()),
            t.last_checked,
            t.requests_made_today,
            t.daily_limit_reached,
            t.force_restart,
            t.stopped_reason
                .map(|r| format!(" reason: {r}"))
                .unwrap_or_default(),
        );
    }
    Ok(())
}

/// Load and decode a JSON batch file, stopping the tracker on failure.
async fn load_batch_file<T: serde::de::DeserializeOwned>(
    c: &Collector,
    key: &ScriptKey,
    input: &Path,
) -> Result<T, Box<dyn std::error::Error>> {
    let raw = match std::fs::read_to_string(input) {
        Ok(raw) => raw,
        Err(e) => {
            let message = format!("Input file {} not found: {e}", input.display());
            c.health.report_stopped(key, &message, false).await?;
            return Err(message.into());
        }
    };

    match serde_json::from_str(&raw) {
        Ok(parsed) => Ok(parsed),
        Err(e) => {
            let message = format!("Failed to decode JSON from {}: {e}", input.display());
            c.health.report_stopped(key, &message, false).await?;
            Err(message.into())
        }
    }
}

/// Budget, pacing, and failure-streak checks before each call.
/// Returns true when the loop should stop for today.
async fn preflight(
    c: &Collector,
    key: &ScriptKey,
    type_id: i32,
    daily_limit: i64,
) -> Result<bool, Box<dyn std::error::Error>> {
    if c.control.check_daily_limit(key, type_id, daily_limit).await? {
        c.health
            .evaluate(
                key,
                &HealthSignals {
                    daily_limit_reached: true,
                    ..Default::default()
                },
            )
            .await?;
        warn!("Daily API limit reached; no further processing today");
        return Ok(true);
    }

    sleep(c.control.pacing_for_platform(PLATFORM).await?).await;

    if c.control.failure_rate_exceeded(PLATFORM).await? {
        c.health
            .report_stopped(key, "Failure rate exceeded threshold", false)
            .await?;
        return Ok(true);
    }

    Ok(false)
}

fn new_ledger_entry(type_id: i32, request_payload: String, log_message: &str) -> NewApiCall {
    NewApiCall {
        call_timestamp: Utc::now().timestamp(),
        api_call_type_id: Some(type_id),
        call_event: "API Call".to_string(),
        request_payload: Some(request_payload),
        response_code: None,
        response_message: None,
        call_log_message: Some(log_message.to_string()),
    }
}

/// Resend the same logical call on transport errors, bumping the ledger's
/// in-place retry counter each time. Returns None once retries are spent.
async fn fetch_with_retries<T, F, Fut>(
    c: &Collector,
    call_id: i32,
    fetch: F,
) -> Result<Option<ProviderResponse<T>>, Box<dyn std::error::Error>>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<
        Output = Result<ProviderResponse<T>, weather_archiver::fetch_error::FetchError>,
    >,
{
    let mut attempt = 0;
    loop {
        match fetch().await {
            Ok(response) => return Ok(Some(response)),
            Err(e) => {
                attempt += 1;
                if attempt >= c.config.fetch_retry_limit {
                    let message = format!("Error fetching data after {attempt} attempts: {e}");
                    warn!("{message}");
                    c.ledger.record_response(call_id, None, &message).await?;
                    return Ok(None);
                }
                warn!(
                    "Error fetching data: {e}. Retrying ({attempt}/{})...",
                    c.config.fetch_retry_limit
                );
                c.ledger.increment_retry(call_id).await?;
            }
        }
    }
}

/// Each persistence attempt appends its own audit row; duplicates and
/// validation failures are final, other failures retry up to the limit and
/// then stop the tracker.
async fn ingest_hourly_with_retries(
    c: &Collector,
    key: &ScriptKey,
    call_id: i32,
    payload: &TimemachineResponse,
) -> Result<bool, Box<dyn std::error::Error>> {
    let mut attempt = 0;
    loop {
        match c.ingest.ingest_hourly(call_id, payload, attempt).await {
            Ok(_) => return Ok(true),
            Err(IngestError::Duplicate(msg)) => {
                warn!("Record already exists: {msg}");
                return Ok(false);
            }
            Err(IngestError::Validation(e)) => {
                warn!("Payload rejected: {e}");
                return Ok(false);
            }
            Err(IngestError::Persistence(e)) => {
                attempt += 1;
                if attempt >= c.config.persistence_retry_limit {
                    let message = format!("Persistence failed after {attempt} attempts: {e}");
                    c.health.report_stopped(key, &message, false).await?;
                    return Err(message.into());
                }
                warn!(
                    "Persistence failed: {e}. Retrying ({attempt}/{})...",
                    c.config.persistence_retry_limit
                );
            }
        }
    }
}

async fn ingest_daily_with_retries(
    c: &Collector,
    key: &ScriptKey,
    call_id: i32,
    payload: &DaySummaryResponse,
) -> Result<bool, Box<dyn std::error::Error>> {
    let mut attempt = 0;
    loop {
        match c.ingest.ingest_daily(call_id, payload, attempt).await {
            Ok(_) => return Ok(true),
            Err(IngestError::Duplicate(msg)) => {
                warn!("Record already exists: {msg}");
                return Ok(false);
            }
            Err(IngestError::Validation(e)) => {
                warn!("Payload rejected: {e}");
                return Ok(false);
            }
            Err(IngestError::Persistence(e)) => {
                attempt += 1;
                if attempt >= c.config.persistence_retry_limit {
                    let message = format!("Persistence failed after {attempt} attempts: {e}");
                    c.health.report_stopped(key, &message, false).await?;
                    return Err(message.into());
                }
                warn!(
                    "Persistence failed: {e}. Retrying ({attempt}/{})...",
                    c.config.persistence_retry_limit
                );
            }
        }
    }
}

async fn finish_batch(
    c: &Collector,
    key: &ScriptKey,
    total: usize,
    failed_requests: usize,
    failed_inserts: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let reason = if failed_requests + failed_inserts > 0 {
        Some(format!(
            "Completed with {failed_requests} request failures and {failed_inserts} failed inserts"
        ))
    } else {
        None
    };
    c.tracking
        .upsert(key, &ScriptStatus::Stopped, reason.as_deref(), false)
        .await?;

    info!(
        "Batch completed: {} processed, {} request failures, {} failed inserts",
        total, failed_requests, failed_inserts
    );
    Ok(())
}

fn date_to_epoch(date: &str) -> i64 {
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or(0)
}
