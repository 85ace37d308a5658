//! Plain-text and JSON rendering of lookup results

use chrono::{DateTime, Utc};

use crate::cache::{Lookup, LookupState};
use crate::data::{Fetched, MediaType, Record};

/// Multi-line description of a single record
pub fn render_record(record: &Record) -> String {
    let mut out = format!("{}  {}\n", record.date, record.title);
    let kind = match record.media_type {
        MediaType::Image => "image",
        MediaType::Video => "video",
    };
    out.push_str(&format!("{}: {}\n", kind, record.media_url));
    if let Some(hd_url) = &record.hd_url {
        out.push_str(&format!("hd: {}\n", hd_url));
    }
    if let Some(credit) = &record.attribution {
        out.push_str(&format!("credit: {}\n", credit));
    }
    out.push('\n');
    out.push_str(&record.explanation);
    out.push('\n');
    out
}

/// One line per record, newest first as given
pub fn render_listing(records: &[Record]) -> String {
    if records.is_empty() {
        return "no entries\n".to_string();
    }
    records
        .iter()
        .map(|record| {
            let marker = match record.media_type {
                MediaType::Image => ' ',
                MediaType::Video => '▶',
            };
            format!("{} {} {}\n", record.date, marker, record.title)
        })
        .collect()
}

/// Text for any gateway result
pub fn render_fetched(fetched: &Fetched) -> String {
    match fetched {
        Fetched::Record(record) => render_record(record),
        Fetched::NotFound => "no entry for this date\n".to_string(),
        Fetched::Records(records) => render_listing(records),
    }
}

/// JSON for any gateway result (`null` for not found)
pub fn render_json(fetched: &Fetched) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(fetched)
}

/// Warning to show next to a displayable but not fresh lookup
pub fn staleness_note(lookup: &Lookup) -> Option<String> {
    let age = lookup.fetched_at.map(describe_age).unwrap_or_default();
    match (&lookup.state, &lookup.error) {
        (LookupState::Stale, Some(error)) => {
            Some(format!("showing cached data{} (refresh failed: {})", age, error))
        }
        (LookupState::Revalidating, _) => Some(format!("showing cached data{} while refreshing", age)),
        _ => None,
    }
}

fn describe_age(fetched_at: DateTime<Utc>) -> String {
    let minutes = (Utc::now() - fetched_at).num_minutes().max(0);
    if minutes < 60 {
        format!(" from {} min ago", minutes)
    } else {
        format!(" from {} h ago", minutes / 60)
    }
}
