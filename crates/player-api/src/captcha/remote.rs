//! Paid captcha solving through the 2Captcha HTTP API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::CaptchaError;

pub const TWO_CAPTCHA_BASE_URL: &str = "http://2captcha.com";

/// Sentinel returned while a job is still being worked on.
const NOT_READY: &str = "CAPCHA_NOT_READY";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

#[async_trait]
pub trait RemoteSolver: Send + Sync {
    /// Solve a base64-encoded image, blocking until an answer or the timeout.
    async fn solve(&self, image_base64: &str) -> Result<String, CaptchaError>;

    /// Remaining account credit.
    async fn balance(&self) -> Result<f64, CaptchaError>;

    fn is_configured(&self) -> bool;
}

#[derive(Debug, Deserialize)]
struct ServiceResponse {
    #[serde(default)]
    status: i64,
    #[serde(default)]
    request: Option<Value>,
    #[serde(default)]
    error_text: Option<String>,
}

impl ServiceResponse {
    fn request_text(&self) -> String {
        match &self.request {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }

    fn is_not_ready(&self) -> bool {
        self.request_text() == NOT_READY || self.error_text.as_deref() == Some(NOT_READY)
    }

    fn error(&self) -> String {
        self.error_text
            .clone()
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| self.request_text())
    }
}

/// Client for the 2Captcha `in.php` / `res.php` protocol.
#[derive(Debug, Clone)]
pub struct TwoCaptchaClient {
    client: Client,
    base_url: String,
    api_key: String,
    poll_interval: Duration,
    timeout: Duration,
}

impl TwoCaptchaClient {
    pub fn new(client: Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            base_url: TWO_CAPTCHA_BASE_URL.to_string(),
            api_key: api_key.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_polling(mut self, poll_interval: Duration, timeout: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.timeout = timeout;
        self
    }

    async fn submit(&self, image_base64: &str) -> Result<String, CaptchaError> {
        let response: ServiceResponse = self
            .client
            .post(format!("{}/in.php", self.base_url))
            .form(&[
                ("key", self.api_key.as_str()),
                ("method", "base64"),
                ("body", image_base64),
                ("json", "1"),
            ])
            .send()
            .await?
            .json()
            .await?;

        if response.status == 1 {
            Ok(response.request_text())
        } else {
            Err(CaptchaError::Service(response.error()))
        }
    }

    async fn poll_once(&self, job_id: &str) -> Result<ServiceResponse, CaptchaError> {
        Ok(self
            .client
            .get(format!("{}/res.php", self.base_url))
            .query(&[
                ("key", self.api_key.as_str()),
                ("action", "get"),
                ("id", job_id),
                ("json", "1"),
            ])
            .send()
            .await?
            .json()
            .await?)
    }
}

#[async_trait]
impl RemoteSolver for TwoCaptchaClient {
    async fn solve(&self, image_base64: &str) -> Result<String, CaptchaError> {
        let job_id = self.submit(image_base64).await?;
        info!(job_id = %job_id, "Captcha submitted to 2Captcha");

        let deadline = Instant::now() + self.timeout;
        loop {
            if Instant::now() >= deadline {
                warn!(job_id = %job_id, "2Captcha did not answer in time");
                return Err(CaptchaError::Timeout);
            }

            match self.poll_once(&job_id).await {
                Ok(response) if response.status == 1 => {
                    let text = response.request_text();
                    info!(job_id = %job_id, "2Captcha solved captcha");
                    return Ok(text);
                }
                Ok(response) if response.is_not_ready() => {
                    debug!(job_id = %job_id, "2Captcha result not ready");
                }
                Ok(response) => return Err(CaptchaError::Service(response.error())),
                Err(e) => {
                    // Transport hiccups while polling are retried until the deadline.
                    warn!(job_id = %job_id, error = %e, "Failed to poll 2Captcha");
                }
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn balance(&self) -> Result<f64, CaptchaError> {
        let response: ServiceResponse = self
            .client
            .get(format!("{}/res.php", self.base_url))
            .query(&[
                ("key", self.api_key.as_str()),
                ("action", "getbalance"),
                ("json", "1"),
            ])
            .send()
            .await?
            .json()
            .await?;

        if response.status != 1 {
            return Err(CaptchaError::Service(response.error()));
        }

        let text = response.request_text();
        text.trim()
            .parse::<f64>()
            .map_err(|_| CaptchaError::Service(format!("unparseable balance {text:?}")))
    }

    fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}
