use std::time::Duration;

use chrono::{NaiveDate, Utc};
use marlo_contracts::Observation;
use marlo_store::{PgStore, StoreError};
use serde::Deserialize;

#[derive(Debug)]
enum FetchError {
    MissingConfig(&'static str),
    InvalidConfig(&'static str),
    Timeout,
    Http(reqwest::Error),
    BadStatus(reqwest::StatusCode),
    UnexpectedPayload,
    Store(StoreError),
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::MissingConfig(key) => write!(f, "missing required config key {}", key),
            FetchError::InvalidConfig(key) => write!(f, "{} must be an integer", key),
            FetchError::Timeout => write!(f, "measurement fetch timed out"),
            FetchError::Http(err) => write!(f, "measurement fetch HTTP error: {}", err),
            FetchError::BadStatus(status) => {
                write!(f, "measurement endpoint returned status {}", status)
            }
            FetchError::UnexpectedPayload => {
                write!(f, "measurement endpoint returned an unexpected payload shape")
            }
            FetchError::Store(err) => write!(f, "failed to append observations: {}", err),
        }
    }
}

impl std::error::Error for FetchError {}

impl From<reqwest::Error> for FetchError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Http(value)
        }
    }
}

impl From<StoreError> for FetchError {
    fn from(value: StoreError) -> Self {
        FetchError::Store(value)
    }
}

#[derive(Debug, Clone)]
struct FetcherConfig {
    db_url: String,
    fetch_url: String,
    fetch_timeout: Duration,
    store_timeout: Duration,
}

impl FetcherConfig {
    fn load() -> Result<Self, FetchError> {
        Ok(Self {
            db_url: require_env("MARLO_DB_URL")?,
            fetch_url: require_env("MARLO_FETCH_URL")?,
            fetch_timeout: Duration::from_millis(env_u64("MARLO_FETCH_TIMEOUT_MS", 10_000)?),
            store_timeout: Duration::from_millis(env_u64("MARLO_STORE_TIMEOUT_MS", 2000)?),
        })
    }
}

fn require_env(key: &'static str) -> Result<String, FetchError> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(FetchError::MissingConfig(key))
}

fn env_u64(key: &'static str, default: u64) -> Result<u64, FetchError> {
    match std::env::var(key) {
        Err(_) => Ok(default),
        Ok(v) if v.trim().is_empty() => Ok(default),
        Ok(v) => v
            .trim()
            .parse::<u64>()
            .map_err(|_| FetchError::InvalidConfig(key)),
    }
}

/// Shape of one raw measurement as served by the upstream endpoint; the
/// fetch timestamp is stamped locally, not trusted from upstream.
#[derive(Debug, Deserialize)]
struct RawMeasurement {
    group: String,
    id: String,
    date: NaiveDate,
    value: f64,
}

fn parse_measurements(body: serde_json::Value) -> Result<Vec<RawMeasurement>, FetchError> {
    match body {
        serde_json::Value::Array(_) => {
            serde_json::from_value(body).map_err(|_| FetchError::UnexpectedPayload)
        }
        serde_json::Value::Object(_) => serde_json::from_value(body)
            .map(|single| vec![single])
            .map_err(|_| FetchError::UnexpectedPayload),
        _ => Err(FetchError::UnexpectedPayload),
    }
}

async fn run(config: FetcherConfig) -> Result<(), FetchError> {
    let http = reqwest::Client::builder()
        .timeout(config.fetch_timeout)
        .build()?;

    let resp = http.get(&config.fetch_url).send().await?;
    if !resp.status().is_success() {
        return Err(FetchError::BadStatus(resp.status()));
    }

    let body = resp
        .json::<serde_json::Value>()
        .await
        .map_err(|_| FetchError::UnexpectedPayload)?;
    let raw = parse_measurements(body)?;

    // One timestamp per run; every row of the batch carries it.
    let fetched_at = Utc::now();
    let observations: Vec<Observation> = raw
        .into_iter()
        .map(|m| Observation {
            group: m.group,
            id: m.id,
            date: m.date,
            value: m.value,
            fetched_at,
        })
        .collect();

    if observations.is_empty() {
        tracing::info!("measurement endpoint returned no rows, nothing to append");
        return Ok(());
    }

    let store = PgStore::connect_and_migrate(&config.db_url, config.store_timeout).await?;
    store.append_observations(&observations).await?;
    store.close().await;

    tracing::info!(count = observations.len(), "observations appended");
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = match FetcherConfig::load() {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("STARTUP_ERROR {}", err);
            std::process::exit(1);
        }
    };

    if let Err(err) = run(config).await {
        tracing::error!(error = %err, "fetch run failed");
        std::process::exit(1);
    }
}
