//! Application configuration.
//!
//! Everything is read from the environment (after `.env` is loaded by
//! `main`). Policy constants all have defaults; only the provider URL, the
//! signing secret and the probe player id are required.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use player_api::client::normalize_proxy;
use tracing::{debug, info};

use crate::monitor::DetectorConfig;
use crate::queue::{BackoffPolicy, QueueConfig};
use crate::scheduler::MonitorConfig;
use crate::{Error, Result};

pub const DEFAULT_DATABASE_URL: &str = "sqlite:alliance-watch.db?mode=rwc";
pub const DEFAULT_LOG_DIR: &str = "logs";
pub const DEFAULT_PROXY_FILE: &str = "proxy.txt";

/// Settings for reaching the player API.
#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub primary_url: String,
    pub fallback_url: Option<String>,
    pub secret: String,
    pub probe_player_id: i64,
    pub proxy_file: PathBuf,
    pub request_timeout: Duration,
}

/// Settings for the captcha pipeline.
#[derive(Debug, Clone)]
pub struct CaptchaSettings {
    /// Empty disables escalation to the remote service.
    pub two_captcha_api_key: String,
    /// Empty means no local solver.
    pub local_solver_command: String,
    pub local_attempts: u32,
    pub min_confidence: f64,
    pub remote_timeout: Duration,
    pub poll_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub log_dir: String,
    pub api: ApiSettings,
    pub captcha: CaptchaSettings,
    pub backoff: BackoffPolicy,
    pub queue: QueueConfig,
    pub detector: DetectorConfig,
    pub monitor: MonitorConfig,
}

impl AppConfig {
    /// Read the configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup`, which maps a variable name to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &str| {
            get(key).ok_or_else(|| Error::config(format!("{key} must be set")))
        };

        let api = ApiSettings {
            primary_url: required("PLAYER_API_PRIMARY_URL")?,
            fallback_url: get("PLAYER_API_FALLBACK_URL"),
            secret: required("PLAYER_API_SECRET")?,
            probe_player_id: parse_value("PROBE_PLAYER_ID", &required("PROBE_PLAYER_ID")?)?,
            proxy_file: PathBuf::from(
                get("PROXY_FILE").unwrap_or_else(|| DEFAULT_PROXY_FILE.to_string()),
            ),
            request_timeout: Duration::from_secs(parse_or(&get, "API_REQUEST_TIMEOUT_SECS", 30)?),
        };

        let captcha = CaptchaSettings {
            two_captcha_api_key: get("TWO_CAPTCHA_API_KEY").unwrap_or_default(),
            local_solver_command: get("LOCAL_SOLVER_COMMAND").unwrap_or_default(),
            local_attempts: parse_or(&get, "CAPTCHA_LOCAL_ATTEMPTS", 4)?,
            min_confidence: parse_or(&get, "CAPTCHA_MIN_CONFIDENCE", 0.6)?,
            remote_timeout: Duration::from_secs(parse_or(&get, "CAPTCHA_REMOTE_TIMEOUT_SECS", 300)?),
            poll_interval: nonzero_secs(&get, "CAPTCHA_POLL_INTERVAL_SECS", 5)?,
        };
        if !(0.0..=1.0).contains(&captcha.min_confidence) {
            return Err(Error::config("CAPTCHA_MIN_CONFIDENCE must be between 0 and 1"));
        }

        let backoff = BackoffPolicy::new(
            Duration::from_secs(parse_or(&get, "RATE_LIMIT_BASE_SECS", 60)?),
            parse_or(&get, "RATE_LIMIT_MULTIPLIER", 2.0)?,
            Duration::from_secs(parse_or(&get, "RATE_LIMIT_MAX_SECS", 600)?),
        )
        .map_err(|e| Error::config(format!("RATE_LIMIT_*: {e}")))?;

        let queue = QueueConfig {
            operation_delay: Duration::from_millis(parse_or(&get, "QUEUE_OPERATION_DELAY_MS", 1000)?),
        };

        let batch_size: usize = parse_or(&get, "MEMBER_BATCH_SIZE", 20)?;
        if batch_size == 0 {
            return Err(Error::config("MEMBER_BATCH_SIZE must be at least 1"));
        }
        let detector = DetectorConfig {
            batch_size,
            request_delay: Duration::from_millis(parse_or(&get, "MEMBER_REQUEST_DELAY_MS", 1000)?),
        };

        let monthly_refresh_day: u32 = parse_or(&get, "MONTHLY_REFRESH_DAY", 1)?;
        if monthly_refresh_day > 31 {
            return Err(Error::config("MONTHLY_REFRESH_DAY must be between 0 and 31"));
        }
        let monitor = MonitorConfig {
            reconcile_interval: nonzero_secs(&get, "RECONCILE_INTERVAL_SECS", 60)?,
            monthly_refresh_day,
            ..MonitorConfig::default()
        };

        Ok(Self {
            database_url: get("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            log_dir: get("LOG_DIR").unwrap_or_else(|| DEFAULT_LOG_DIR.to_string()),
            api,
            captcha,
            backoff,
            queue,
            detector,
            monitor,
        })
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| Error::config(format!("{key}: invalid value {raw:?}: {e}")))
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

/// A polling interval in seconds. Zero would turn the poll into a busy loop.
fn nonzero_secs<G>(get: &G, key: &str, default: u64) -> Result<Duration>
where
    G: Fn(&str) -> Option<String>,
{
    match parse_or(get, key, default)? {
        0 => Err(Error::config(format!("{key} must be at least 1"))),
        secs => Ok(Duration::from_secs(secs)),
    }
}

/// Load the proxy list, one entry per line. A missing file means no proxies.
///
/// Blank lines and `#` comments are skipped; entries without a scheme are
/// treated as SOCKS4 proxies.
pub async fn load_proxies(path: &Path) -> Result<Vec<String>> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "No proxy file");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };

    let proxies: Vec<String> = contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(normalize_proxy)
        .collect();

    info!(path = %path.display(), count = proxies.len(), "Loaded proxy list");
    Ok(proxies)
}
