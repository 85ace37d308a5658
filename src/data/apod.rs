//! NASA Astronomy Picture of the Day API client
//!
//! Issues requests to the APOD endpoint with a bounded retry/timeout policy,
//! interprets upstream status codes and payload shapes, and returns
//! normalized records. This client does not cache anything; see
//! [`crate::cache::CacheManager`] for that.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use super::transport::{HttpTransport, Transport, TransportResponse};
use super::{sort_newest_first, FetchIntent, Fetched, Record};

/// Base URL for the APOD API
pub const APOD_API_BASE: &str = "https://api.nasa.gov/planetary/apod";

/// Errors surfaced by the gateway, the cache and the media proxy
///
/// `Clone` so one in-flight result can be handed to every waiting caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApodError {
    /// No usable API key is configured
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The request could not be built locally (bad month, bad media URL)
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Upstream answered with a non-success status
    #[error("APOD API error {status}: {body}")]
    UpstreamHttp { status: u16, body: String },

    /// Upstream answered 2xx with a payload that doesn't match the expected shape
    #[error("malformed APOD response: {message}")]
    UpstreamMalformed { message: String },

    /// Timeout, abort or transport failure
    #[error("network error: {0}")]
    Network(String),

    /// Media URL points outside the allowed hosts
    #[error("media host not allowed: {0}")]
    DisallowedHost(String),
}

impl ApodError {
    /// Whether another attempt may succeed
    ///
    /// Any non-success status is retried, same as a timeout.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApodError::UpstreamHttp { .. } | ApodError::Network(_))
    }

    /// Whether the failure came from talking to upstream, as opposed to a
    /// local problem that no amount of waiting will fix
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            ApodError::UpstreamHttp { .. }
                | ApodError::UpstreamMalformed { .. }
                | ApodError::Network(_)
        )
    }
}

/// Attempt budget for a single logical request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,
    /// Upper bound on a single attempt
    pub attempt_timeout: Duration,
    /// Pause between consecutive attempts
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            attempt_timeout: Duration::from_secs(60),
            retry_delay: Duration::from_secs(2),
        }
    }
}

/// Expected payload shape for a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Single,
    Collection,
}

/// Client for the APOD API
#[derive(Clone)]
pub struct ApodClient {
    transport: Arc<dyn Transport>,
    base_url: String,
    api_key: Option<String>,
    policy: RetryPolicy,
}

impl fmt::Debug for ApodClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApodClient")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("policy", &self.policy)
            .finish()
    }
}

impl ApodClient {
    /// Create a client talking to the public APOD endpoint over HTTP
    pub fn new(api_key: Option<String>) -> Self {
        Self::with_transport(Arc::new(HttpTransport::new()), api_key)
    }

    /// Create a client on top of a custom transport
    pub fn with_transport(transport: Arc<dyn Transport>, api_key: Option<String>) -> Self {
        Self {
            transport,
            base_url: APOD_API_BASE.to_string(),
            api_key,
            policy: RetryPolicy::default(),
        }
    }

    /// Point the client at a different endpoint
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Replace the retry/timeout policy
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Fetch today's record (`None` if upstream has nothing)
    pub async fn fetch_today(&self) -> Result<Option<Record>, ApodError> {
        single(self.fetch(&FetchIntent::Today).await?)
    }

    /// Fetch the record for a `YYYY-MM-DD` date (`None` if upstream has nothing)
    pub async fn fetch_by_date(&self, date: &str) -> Result<Option<Record>, ApodError> {
        single(self.fetch(&FetchIntent::Date(date.to_string())).await?)
    }

    /// Fetch all records between two dates, newest first
    pub async fn fetch_range(&self, start: &str, end: &str) -> Result<Vec<Record>, ApodError> {
        let intent = FetchIntent::Range {
            start: start.to_string(),
            end: end.to_string(),
        };
        collection(self.fetch(&intent).await?)
    }

    /// Fetch all records of a calendar month (1-12), newest first
    pub async fn fetch_month(&self, year: i32, month: u32) -> Result<Vec<Record>, ApodError> {
        collection(self.fetch(&FetchIntent::Month { year, month }).await?)
    }

    /// Fetch whatever the intent describes
    ///
    /// # Returns
    /// * `Ok(Fetched::Record)` / `Ok(Fetched::NotFound)` for today and date intents
    /// * `Ok(Fetched::Records)` for range and month intents, sorted newest first
    /// * `Err(ApodError)` once the attempt budget is exhausted, or immediately
    ///   for configuration and malformed-payload errors
    pub async fn fetch(&self, intent: &FetchIntent) -> Result<Fetched, ApodError> {
        let query = intent.query()?;
        let url = self.endpoint(&query)?;
        let shape = if intent.is_collection() {
            Shape::Collection
        } else {
            Shape::Single
        };

        let attempts = self.policy.attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            debug!(%intent, attempt, attempts, "requesting APOD");
            match self.attempt(&url, shape).await {
                Ok(fetched) => return Ok(fetched),
                Err(err) if err.is_retryable() => {
                    warn!(%intent, attempt, attempts, error = %err, "APOD attempt failed");
                    last_error = Some(err);
                    if attempt < attempts {
                        tokio::time::sleep(self.policy.retry_delay).await;
                    }
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_error.unwrap_or_else(|| ApodError::Network("no attempt was made".to_string())))
    }

    /// Builds the request URL; the key goes last
    fn endpoint(&self, query: &[(&'static str, String)]) -> Result<Url, ApodError> {
        let api_key = self
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| ApodError::Configuration("NASA API key is not set".to_string()))?;

        let mut url = Url::parse(&self.base_url).map_err(|e| {
            ApodError::Configuration(format!("invalid API base URL '{}': {}", self.base_url, e))
        })?;
        {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in query {
                pairs.append_pair(name, value);
            }
            pairs.append_pair("api_key", api_key);
        }
        Ok(url)
    }

    /// One bounded attempt
    async fn attempt(&self, url: &Url, shape: Shape) -> Result<Fetched, ApodError> {
        let timeout = self.policy.attempt_timeout;
        let response = match tokio::time::timeout(timeout, self.transport.get(url)).await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => return Err(ApodError::Network(err.to_string())),
            Err(_) => {
                return Err(ApodError::Network(format!(
                    "request timed out after {}s",
                    timeout.as_secs()
                )))
            }
        };

        interpret(response, shape)
    }
}

/// Maps a raw response onto a gateway result
fn interpret(response: TransportResponse, shape: Shape) -> Result<Fetched, ApodError> {
    if !response.is_success() {
        if shape == Shape::Single && matches!(response.status, 400 | 404) {
            return Ok(Fetched::NotFound);
        }
        return Err(ApodError::UpstreamHttp {
            status: response.status,
            body: response.text(),
        });
    }

    let payload: Value = serde_json::from_slice(&response.body).map_err(|e| {
        ApodError::UpstreamMalformed {
            message: format!("invalid JSON: {}", e),
        }
    })?;

    match shape {
        Shape::Single => parse_record(payload).map(Fetched::Record),
        Shape::Collection => parse_records(payload).map(Fetched::Records),
    }
}

fn parse_record(payload: Value) -> Result<Record, ApodError> {
    if payload.is_object() && payload.get("date").is_none() {
        return Err(ApodError::UpstreamMalformed {
            message: upstream_message(&payload),
        });
    }
    let record: Record = serde_json::from_value(payload).map_err(|e| ApodError::UpstreamMalformed {
        message: format!("unexpected record shape: {}", e),
    })?;
    Ok(record.normalize())
}

fn parse_records(payload: Value) -> Result<Vec<Record>, ApodError> {
    if !payload.is_array() {
        return Err(ApodError::UpstreamMalformed {
            message: upstream_message(&payload),
        });
    }
    let records: Vec<Record> =
        serde_json::from_value(payload).map_err(|e| ApodError::UpstreamMalformed {
            message: format!("unexpected record shape: {}", e),
        })?;

    let mut records: Vec<Record> = records.into_iter().map(Record::normalize).collect();
    sort_newest_first(&mut records);
    Ok(records)
}

/// Pulls a human-readable message out of an upstream error object
///
/// The APOD service answers with `{code, msg}`; the api.nasa.gov gateway in
/// front of it uses `{error: {code, message}}`.
fn upstream_message(payload: &Value) -> String {
    payload
        .get("msg")
        .and_then(Value::as_str)
        .or_else(|| {
            payload
                .get("error")
                .and_then(|error| error.get("message"))
                .and_then(Value::as_str)
        })
        .map(str::to_string)
        .unwrap_or_else(|| format!("NASA API error: {}", payload))
}

fn single(fetched: Fetched) -> Result<Option<Record>, ApodError> {
    match fetched {
        Fetched::Record(record) => Ok(Some(record)),
        Fetched::NotFound => Ok(None),
        Fetched::Records(_) => Err(ApodError::UpstreamMalformed {
            message: "expected a single record, got a list".to_string(),
        }),
    }
}

fn collection(fetched: Fetched) -> Result<Vec<Record>, ApodError> {
    match fetched {
        Fetched::Records(records) => Ok(records),
        _ => Err(ApodError::UpstreamMalformed {
            message: "expected a list of records".to_string(),
        }),
    }
}
