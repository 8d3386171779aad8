//! Blocking JSON client shared by the Todoist and Notion adapters.

use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

const MAX_ATTEMPTS_CAP: u32 = 6;
const MIN_TIMEOUT_SECONDS: u64 = 5;
const MAX_RETRY_AFTER_SECONDS: u64 = 60;
const BACKOFF_MULTIPLIER: u32 = 2;

#[derive(Error, Debug)]
pub enum HttpError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("HTTP {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("invalid response body: {0}")]
    Decode(String),
}

impl HttpError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            HttpError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Whether a request may be sent again after a transient failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Retry {
    /// Reads and searches; sending twice changes nothing.
    Allowed,
    /// Writes the server may have applied before the failure was seen.
    Never,
}

#[derive(Clone, Debug)]
pub struct HttpSettings {
    pub timeout: Duration,
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl HttpSettings {
    pub fn new(timeout_seconds: u64, max_attempts: u32) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_seconds.max(MIN_TIMEOUT_SECONDS)),
            max_attempts: max_attempts.clamp(1, MAX_ATTEMPTS_CAP),
            retry_delay: Duration::from_secs(1),
        }
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self::new(30, 3)
    }
}

pub struct ApiClient {
    client: Client,
    base_url: String,
    token: String,
    settings: HttpSettings,
}

impl ApiClient {
    pub fn new(
        base_url: &str,
        token: &str,
        extra_headers: &[(&'static str, &str)],
        settings: HttpSettings,
    ) -> Result<Self, HttpError> {
        let mut headers = HeaderMap::new();
        for &(name, value) in extra_headers {
            let value = HeaderValue::from_str(value)
                .map_err(|e| HttpError::Transport(format!("invalid header {name}: {e}")))?;
            headers.insert(HeaderName::from_static(name), value);
        }
        let client = Client::builder()
            .timeout(settings.timeout)
            .default_headers(headers)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| HttpError::Transport(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            settings,
        })
    }

    pub fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, HttpError> {
        let url = self.url(path);
        self.send_json(&url, Retry::Allowed, || self.client.get(&url).query(query))
    }

    /// POST for query-style endpoints (search); callers pick the retry policy.
    pub fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        retry: Retry,
    ) -> Result<T, HttpError> {
        let url = self.url(path);
        self.send_json(&url, retry, || self.client.post(&url).json(body))
    }

    /// Sent exactly once: a timed-out append may still have been applied.
    pub fn patch_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, HttpError> {
        let url = self.url(path);
        self.send_json(&url, Retry::Never, || self.client.patch(&url).json(body))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn send_json<T, F>(&self, url: &str, retry: Retry, build: F) -> Result<T, HttpError>
    where
        T: DeserializeOwned,
        F: Fn() -> RequestBuilder,
    {
        let response = self.send_with_retry(url, retry, build)?;
        let text = response
            .text()
            .map_err(|e| HttpError::Decode(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| HttpError::Decode(format!("{e}")))
    }

    fn send_with_retry<F>(&self, url: &str, retry: Retry, build: F) -> Result<Response, HttpError>
    where
        F: Fn() -> RequestBuilder,
    {
        let attempts = match retry {
            Retry::Allowed => self.settings.max_attempts,
            Retry::Never => 1,
        };
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            debug!(url, attempt, attempts, "sending request");
            let outcome = build().bearer_auth(&self.token).send();
            let (error, retry_after) = match outcome {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    let retry_after = parse_retry_after(&response);
                    let body = truncate_error(&response.text().unwrap_or_default());
                    let error = HttpError::Status { status, body };
                    if !is_retryable_status(status) {
                        return Err(error);
                    }
                    (error, retry_after)
                }
                Err(err) => {
                    let retryable = err.is_timeout() || err.is_connect() || err.is_request();
                    let error = HttpError::Transport(err.to_string());
                    if !retryable {
                        return Err(error);
                    }
                    (error, None)
                }
            };

            if attempt >= attempts {
                return Err(error);
            }
            let delay = retry_after
                .unwrap_or_else(|| self.settings.retry_delay * BACKOFF_MULTIPLIER.pow(attempt - 1));
            warn!(url, attempt, error = %error, delay_ms = delay.as_millis() as u64, "retrying request");
            thread::sleep(delay);
        }
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn parse_retry_after(response: &Response) -> Option<Duration> {
    let seconds: u64 = response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()?;
    Some(Duration::from_secs(seconds.min(MAX_RETRY_AFTER_SECONDS)))
}

fn truncate_error(message: &str) -> String {
    let mut out = message.trim().replace(['\n', '\r'], " ");
    if out.len() > 240 {
        let mut cut = 240;
        while !out.is_char_boundary(cut) {
            cut -= 1;
        }
        out.truncate(cut);
        out.push_str("...");
    }
    out
}
