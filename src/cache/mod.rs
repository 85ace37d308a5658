//! In-memory response cache for APOD lookups
//!
//! This module provides a cache manager that sits in front of the APOD client
//! and memoizes results per fetch intent with per-intent freshness windows. It
//! supports graceful degradation by returning the previous value alongside a
//! failed refresh, so callers can show stale data with a warning instead of an
//! error screen.

mod manager;

pub use manager::{CacheManager, Lookup, LookupState, DEDUP_WINDOW};
