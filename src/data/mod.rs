//! Core data models for the picture-of-the-day feed
//!
//! This module contains the record type delivered by the APOD API, the fetch
//! intents used to request records (and to key the response cache), and the
//! normalized results the gateway hands back.

pub mod apod;
pub mod media;
pub mod transport;

pub use apod::{ApodClient, ApodError, RetryPolicy};
pub use media::{media_filename, MediaDownload, MediaDownloader};
pub use transport::{HttpTransport, Transport, TransportError, TransportResponse};

use std::fmt;
use std::time::Duration;

use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Freshness window for today's record (changes daily)
pub const TODAY_FRESHNESS: Duration = Duration::from_secs(60 * 60);

/// Freshness window for an explicit date (historical entries never change)
pub const DATE_FRESHNESS: Duration = Duration::from_secs(24 * 60 * 60);

/// Freshness window for range and month listings
pub const RANGE_FRESHNESS: Duration = Duration::from_secs(60 * 60);

/// Default trailing window used by the archive and timeline views
pub const DEFAULT_RECENT_DAYS: i64 = 90;

/// Longest trailing window the CLI accepts (about a century)
pub const MAX_RECENT_DAYS: i64 = 36_500;

/// Kind of media attached to a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
}

/// A single day's picture-of-the-day entry
///
/// Field names follow the upstream wire format on (de)serialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Calendar date (`YYYY-MM-DD`), unique within the feed
    pub date: String,
    /// Display title
    pub title: String,
    /// Free-text description
    pub explanation: String,
    /// Standard-resolution media locator
    #[serde(rename = "url")]
    pub media_url: String,
    /// Whether the media is an image or a video
    pub media_type: MediaType,
    /// Higher-resolution locator (images only)
    #[serde(rename = "hdurl", default, skip_serializing_if = "Option::is_none")]
    pub hd_url: Option<String>,
    /// Copyright / credit line
    #[serde(rename = "copyright", default, skip_serializing_if = "Option::is_none")]
    pub attribution: Option<String>,
}

impl Record {
    /// Cleans up upstream quirks before the record is handed out
    ///
    /// Credit lines frequently arrive wrapped in newlines, and video entries
    /// occasionally carry an `hdurl` that points nowhere useful.
    pub fn normalize(mut self) -> Self {
        self.attribution = self
            .attribution
            .map(|credit| credit.trim().to_string())
            .filter(|credit| !credit.is_empty());
        if self.media_type == MediaType::Video {
            self.hd_url = None;
        }
        self
    }

    /// Best URL to download: high-def when available, standard otherwise
    pub fn best_media_url(&self) -> &str {
        self.hd_url.as_deref().unwrap_or(&self.media_url)
    }
}

/// Sorts records newest first and drops duplicate dates
pub fn sort_newest_first(records: &mut Vec<Record>) {
    records.sort_by(|a, b| b.date.cmp(&a.date));
    records.dedup_by(|a, b| a.date == b.date);
}

/// A logical request descriptor, also used as the cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FetchIntent {
    /// Today's record
    Today,
    /// The record for a specific date, forwarded to upstream as-is
    Date(String),
    /// All records between two dates (inclusive)
    Range { start: String, end: String },
    /// All records of a calendar month (`month` is 1-12)
    Month { year: i32, month: u32 },
}

impl FetchIntent {
    /// Builds a range intent for the `days_back` days ending at `end`
    ///
    /// Fails with `InvalidRequest` when the start date is not representable.
    pub fn trailing(end: NaiveDate, days_back: i64) -> Result<Self, ApodError> {
        let start = chrono::Duration::try_days(days_back)
            .and_then(|span| end.checked_sub_signed(span))
            .ok_or_else(|| {
                ApodError::InvalidRequest(format!("cannot go back {} days from {}", days_back, end))
            })?;
        Ok(FetchIntent::Range {
            start: start.format("%Y-%m-%d").to_string(),
            end: end.format("%Y-%m-%d").to_string(),
        })
    }

    /// Builds a range intent for the `days_back` days ending today (UTC)
    pub fn recent(days_back: i64) -> Result<Self, ApodError> {
        Self::trailing(Utc::now().date_naive(), days_back)
    }

    /// Stable cache key for this intent
    pub fn cache_key(&self) -> String {
        match self {
            FetchIntent::Today => "today".to_string(),
            FetchIntent::Date(date) => format!("date:{}", date),
            FetchIntent::Range { start, end } => format!("range:{}..{}", start, end),
            FetchIntent::Month { year, month } => format!("month:{}-{:02}", year, month),
        }
    }

    /// How long a successful result stays fresh
    pub fn freshness(&self) -> Duration {
        match self {
            FetchIntent::Today => TODAY_FRESHNESS,
            FetchIntent::Date(_) => DATE_FRESHNESS,
            FetchIntent::Range { .. } | FetchIntent::Month { .. } => RANGE_FRESHNESS,
        }
    }

    /// True for intents that resolve to a list of records
    pub fn is_collection(&self) -> bool {
        matches!(self, FetchIntent::Range { .. } | FetchIntent::Month { .. })
    }

    /// Upstream query parameters for this intent (without the API key)
    pub fn query(&self) -> Result<Vec<(&'static str, String)>, ApodError> {
        match self {
            FetchIntent::Today => Ok(Vec::new()),
            FetchIntent::Date(date) => Ok(vec![("date", date.clone())]),
            FetchIntent::Range { start, end } => {
                Ok(vec![("start_date", start.clone()), ("end_date", end.clone())])
            }
            FetchIntent::Month { year, month } => {
                let (first, last) = month_bounds(*year, *month).ok_or_else(|| {
                    ApodError::InvalidRequest(format!("no such month: {}-{}", year, month))
                })?;
                Ok(vec![
                    ("start_date", first.format("%Y-%m-%d").to_string()),
                    ("end_date", last.format("%Y-%m-%d").to_string()),
                ])
            }
        }
    }
}

impl fmt::Display for FetchIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cache_key())
    }
}

/// First and last day of a calendar month, `None` for an invalid month
pub fn month_bounds(year: i32, month: u32) -> Option<(NaiveDate, NaiveDate)> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next_first = if first.month() == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    Some((first, next_first.pred_opt()?))
}

/// A successful gateway result
///
/// `NotFound` is a value, not an error: it is cached like any other result so
/// repeated lookups for an empty date stay off the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Fetched {
    Record(Record),
    NotFound,
    Records(Vec<Record>),
}

impl Fetched {
    /// The single record, if this is a single-record result
    pub fn record(&self) -> Option<&Record> {
        match self {
            Fetched::Record(record) => Some(record),
            _ => None,
        }
    }

    /// The records of a listing result (empty for single results)
    pub fn records(&self) -> &[Record] {
        match self {
            Fetched::Records(records) => records,
            _ => &[],
        }
    }
}
