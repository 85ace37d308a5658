//! Cache manager for APOD responses
//!
//! Provides a `CacheManager` that memoizes gateway results per fetch intent,
//! with per-intent freshness windows, stale-while-revalidate lookups,
//! in-flight deduplication and write-through population of per-date entries
//! from range results.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::data::{ApodClient, ApodError, FetchIntent, Fetched, DATE_FRESHNESS};

/// Window in which repeated lookups of one intent share a single fetch
pub const DEDUP_WINDOW: Duration = Duration::from_secs(60);

/// A fetch result paired with the time it came back from upstream
type Outcome = Result<(Fetched, DateTime<Utc>), ApodError>;

type InFlight = Shared<BoxFuture<'static, Outcome>>;

/// What a lookup is able to show
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupState {
    /// Nothing cached yet, a fetch is outstanding
    Loading,
    /// Value is within its freshness window
    Fresh,
    /// Previous value, a refresh is in flight
    Revalidating,
    /// Previous value, the latest refresh failed
    Stale,
    /// No value and the fetch failed
    Failed,
}

/// Result of reading through the cache
///
/// Failures are reported here, next to whatever value is still available,
/// rather than as an `Err`.
#[derive(Debug, Clone, PartialEq)]
pub struct Lookup {
    /// Cached or freshly fetched value
    pub value: Option<Fetched>,
    /// When `value` was fetched from upstream
    pub fetched_at: Option<DateTime<Utc>>,
    /// Error from the latest fetch, if it failed
    pub error: Option<ApodError>,
    /// Overall state
    pub state: LookupState,
}

impl Lookup {
    /// Whether there is something to show (possibly stale)
    pub fn is_displayable(&self) -> bool {
        self.value.is_some()
    }
}

/// A successfully fetched value
#[derive(Debug, Clone)]
struct StoredValue {
    value: Fetched,
    fetched_at: DateTime<Utc>,
    stored_at: Instant,
    freshness: Duration,
}

impl StoredValue {
    fn is_fresh(&self, now: Instant) -> bool {
        now.duration_since(self.stored_at) < self.freshness
    }
}

#[derive(Debug, Default)]
struct Entry {
    stored: Option<StoredValue>,
    /// Latest failure and when it happened; cleared on success
    failure: Option<(ApodError, Instant)>,
    /// Id of the fetch that last wrote this entry
    generation: u64,
}

struct Pending {
    id: u64,
    started_at: Instant,
    future: InFlight,
}

#[derive(Default)]
struct State {
    entries: HashMap<String, Entry>,
    in_flight: HashMap<String, Pending>,
    next_id: u64,
}

impl State {
    fn stored(&self, key: &str) -> Option<&StoredValue> {
        self.entries.get(key).and_then(|entry| entry.stored.as_ref())
    }

    fn fresh_lookup(&self, key: &str, now: Instant) -> Option<Lookup> {
        let stored = self.stored(key).filter(|stored| stored.is_fresh(now))?;
        Some(Lookup {
            value: Some(stored.value.clone()),
            fetched_at: Some(stored.fetched_at),
            error: None,
            state: LookupState::Fresh,
        })
    }

    /// A failure recent enough that re-fetching would defeat deduplication
    fn recent_failure(&self, key: &str, now: Instant) -> Option<Lookup> {
        let entry = self.entries.get(key)?;
        let (error, failed_at) = entry.failure.as_ref()?;
        if now.duration_since(*failed_at) >= DEDUP_WINDOW {
            return None;
        }
        Some(self.lookup_after_failure(key, error.clone()))
    }

    fn lookup_after_failure(&self, key: &str, error: ApodError) -> Lookup {
        match self.stored(key) {
            Some(stored) => Lookup {
                value: Some(stored.value.clone()),
                fetched_at: Some(stored.fetched_at),
                error: Some(error),
                state: LookupState::Stale,
            },
            None => Lookup {
                value: None,
                fetched_at: None,
                error: Some(error),
                state: LookupState::Failed,
            },
        }
    }

    /// In-flight fetch for `key` started within the dedup window
    fn joinable(&self, key: &str, now: Instant) -> Option<InFlight> {
        self.in_flight
            .get(key)
            .filter(|pending| now.duration_since(pending.started_at) < DEDUP_WINDOW)
            .map(|pending| pending.future.clone())
    }

    /// Entry for `key`, unless a fetch started after `id` already wrote it
    fn writable(&mut self, key: String, id: u64) -> Option<&mut Entry> {
        let entry = self.entries.entry(key).or_default();
        if entry.generation > id {
            return None;
        }
        entry.generation = id;
        Some(entry)
    }

    /// Stores the value of fetch `id`; returns `false` if it was superseded
    fn store(
        &mut self,
        key: String,
        id: u64,
        value: Fetched,
        freshness: Duration,
        fetched_at: DateTime<Utc>,
    ) -> bool {
        let Some(entry) = self.writable(key, id) else {
            return false;
        };
        entry.stored = Some(StoredValue {
            value,
            fetched_at,
            stored_at: Instant::now(),
            freshness,
        });
        entry.failure = None;
        true
    }

    /// Records the outcome of fetch `id` for `intent`
    fn complete(&mut self, intent: &FetchIntent, id: u64, outcome: &Outcome) {
        let key = intent.cache_key();
        match outcome {
            Ok((value, fetched_at)) => {
                if let Fetched::Records(records) = value {
                    let mut written = 0;
                    for record in records {
                        let date_key = FetchIntent::Date(record.date.clone()).cache_key();
                        let single = Fetched::Record(record.clone());
                        if self.store(date_key, id, single, DATE_FRESHNESS, *fetched_at) {
                            written += 1;
                        }
                    }
                    info!(%intent, records = records.len(), written, "populated per-date entries");
                }
                if !self.store(key.clone(), id, value.clone(), intent.freshness(), *fetched_at) {
                    debug!(%intent, id, "dropping result of a superseded fetch");
                }
            }
            // Local errors (missing key, bad request) are not remembered
            Err(err) if err.is_upstream() => {
                if let Some(entry) = self.writable(key.clone(), id) {
                    entry.failure = Some((err.clone(), Instant::now()));
                }
            }
            Err(_) => {}
        }

        if self.in_flight.get(&key).is_some_and(|pending| pending.id == id) {
            self.in_flight.remove(&key);
        }
    }
}

/// Memoizes gateway results per fetch intent
///
/// One `CacheManager` lives for the whole process (or test) and is shared by
/// cloning; clones see the same entries. Lookups that need the network run the
/// fetch as a spawned tokio task, so these methods must be called from within
/// a tokio runtime.
#[derive(Clone)]
pub struct CacheManager {
    client: ApodClient,
    state: Arc<Mutex<State>>,
}

impl CacheManager {
    /// Creates an empty cache in front of `client`
    pub fn new(client: ApodClient) -> Self {
        Self {
            client,
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    /// Reads through the cache
    ///
    /// # Behavior
    /// - Fresh entry: returned without a network call
    /// - Fetch for the same intent already in flight: waits for that one
    /// - Otherwise: fetches, stores the result, and returns it
    /// - On failure: returns the previous value (if any) with the error
    pub async fn get(&self, intent: &FetchIntent) -> Lookup {
        let key = intent.cache_key();
        let pending = {
            let mut state = lock(&self.state);
            let now = Instant::now();
            if let Some(lookup) = state.fresh_lookup(&key, now) {
                debug!(%intent, "cache hit");
                return lookup;
            }
            match state.joinable(&key, now) {
                Some(future) => {
                    debug!(%intent, "joining in-flight fetch");
                    future
                }
                None => {
                    if let Some(lookup) = state.recent_failure(&key, now) {
                        return lookup;
                    }
                    self.start(&mut state, intent, now)
                }
            }
        };

        let outcome = pending.await;
        self.resolve(&key, outcome)
    }

    /// Returns whatever is cached right now, starting a background refresh
    /// when it is stale or missing
    ///
    /// Never waits on the network: a stale value comes back as
    /// `Revalidating`, a missing one as `Loading`.
    pub fn snapshot(&self, intent: &FetchIntent) -> Lookup {
        let key = intent.cache_key();
        let mut state = lock(&self.state);
        let now = Instant::now();
        if let Some(lookup) = state.fresh_lookup(&key, now) {
            return lookup;
        }
        if state.joinable(&key, now).is_none() {
            if let Some(lookup) = state.recent_failure(&key, now) {
                return lookup;
            }
            self.start(&mut state, intent, now);
        }

        match state.stored(&key) {
            Some(stored) => Lookup {
                value: Some(stored.value.clone()),
                fetched_at: Some(stored.fetched_at),
                error: None,
                state: LookupState::Revalidating,
            },
            None => Lookup {
                value: None,
                fetched_at: None,
                error: None,
                state: LookupState::Loading,
            },
        }
    }

    /// Fetches in the background to populate the cache; nobody waits on the
    /// result and failures are dropped
    pub fn warm(&self, intent: &FetchIntent) {
        let mut state = lock(&self.state);
        let now = Instant::now();
        if state.joinable(&intent.cache_key(), now).is_some() {
            return;
        }
        debug!(%intent, "warming cache");
        self.start(&mut state, intent, now);
    }

    /// Re-fetches regardless of freshness and in-flight requests
    pub async fn refresh(&self, intent: &FetchIntent) -> Lookup {
        let pending = {
            let mut state = lock(&self.state);
            self.start(&mut state, intent, Instant::now())
        };
        let outcome = pending.await;
        self.resolve(&intent.cache_key(), outcome)
    }

    /// Cached value for `intent`, fresh or not, without touching the network
    pub fn peek(&self, intent: &FetchIntent) -> Option<Fetched> {
        lock(&self.state)
            .stored(&intent.cache_key())
            .map(|stored| stored.value.clone())
    }

    /// Spawns a fetch for `intent` and registers it as the in-flight one
    fn start(&self, state: &mut State, intent: &FetchIntent, now: Instant) -> InFlight {
        state.next_id += 1;
        let id = state.next_id;

        let client = self.client.clone();
        let shared_state = Arc::clone(&self.state);
        let task_intent = intent.clone();
        let handle = tokio::spawn(async move {
            let outcome = client
                .fetch(&task_intent)
                .await
                .map(|value| (value, Utc::now()));
            if let Err(err) = &outcome {
                debug!(intent = %task_intent, error = %err, "fetch failed");
            }
            lock(&shared_state).complete(&task_intent, id, &outcome);
            outcome
        });

        let future = handle
            .map(|joined| {
                joined.unwrap_or_else(|e| Err(ApodError::Network(format!("fetch task failed: {}", e))))
            })
            .boxed()
            .shared();

        state.in_flight.insert(
            intent.cache_key(),
            Pending {
                id,
                started_at: now,
                future: future.clone(),
            },
        );
        future
    }

    fn resolve(&self, key: &str, outcome: Outcome) -> Lookup {
        match outcome {
            Ok((value, fetched_at)) => Lookup {
                value: Some(value),
                fetched_at: Some(fetched_at),
                error: None,
                state: LookupState::Fresh,
            },
            Err(err) => lock(&self.state).lookup_after_failure(key, err),
        }
    }
}

/// Entries are only ever replaced whole, so a poisoned lock still holds
/// consistent data
fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::RetryPolicy;
    use crate::test_helpers::{range_json, record_json, ScriptedTransport, Step};

    fn cache(transport: &Arc<ScriptedTransport>) -> CacheManager {
        CacheManager::new(ApodClient::with_transport(
            transport.clone(),
            Some("TEST_KEY".to_string()),
        ))
    }

    fn date(d: &str) -> FetchIntent {
        FetchIntent::Date(d.to_string())
    }

    fn range(start: &str, end: &str) -> FetchIntent {
        FetchIntent::Range {
            start: start.to_string(),
            end: end.to_string(),
        }
    }

    #[tokio::test]
    async fn test_fresh_entry_is_served_without_network() {
        let transport = Arc::new(ScriptedTransport::ok(record_json("2026-02-10")));
        let cache = cache(&transport);

        let first = cache.get(&FetchIntent::Today).await;
        let second = cache.get(&FetchIntent::Today).await;

        assert_eq!(first.state, LookupState::Fresh);
        assert_eq!(second.state, LookupState::Fresh);
        assert_eq!(first.value, second.value);
        assert!(second.fetched_at.is_some());
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_range_populates_date_entries() {
        let transport = Arc::new(ScriptedTransport::ok(range_json(&[
            "2026-02-09",
            "2026-02-10",
            "2026-02-08",
        ])));
        let cache = cache(&transport);

        let listing = cache.get(&range("2026-02-08", "2026-02-10")).await;
        let dates: Vec<&str> = listing
            .value
            .as_ref()
            .unwrap()
            .records()
            .iter()
            .map(|r| r.date.as_str())
            .collect();
        assert_eq!(dates, vec!["2026-02-10", "2026-02-09", "2026-02-08"]);

        let single = cache.get(&date("2026-02-10")).await;

        assert_eq!(single.state, LookupState::Fresh);
        assert_eq!(single.value.unwrap().record().unwrap().date, "2026-02-10");
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_through_entries_expire_after_a_day() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Step::Respond(200, range_json(&["2026-02-10"])),
            Step::Respond(200, record_json("2026-02-10")),
        ]));
        let cache = cache(&transport);

        cache.get(&range("2026-02-10", "2026-02-10")).await;
        tokio::time::advance(Duration::from_secs(23 * 3600)).await;
        cache.get(&date("2026-02-10")).await;
        assert_eq!(transport.calls(), 1);

        tokio::time::advance(Duration::from_secs(2 * 3600)).await;
        let refetched = cache.get(&date("2026-02-10")).await;
        assert_eq!(refetched.state, LookupState::Fresh);
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_lookups_share_one_fetch() {
        let transport = Arc::new(ScriptedTransport::new(vec![Step::Delayed(
            Duration::from_millis(500),
            200,
            record_json("2026-02-10"),
        )]));
        let cache = cache(&transport);
        let intent = date("2026-02-10");

        let (a, b) = tokio::join!(cache.get(&intent), cache.get(&intent));

        assert_eq!(transport.calls(), 1);
        assert_eq!(a.value, b.value);
        assert!(a.value.is_some());
    }

    #[tokio::test]
    async fn test_not_found_is_cached() {
        let transport = Arc::new(ScriptedTransport::new(vec![Step::Respond(
            404,
            "{}".to_string(),
        )]));
        let cache = cache(&transport);

        let first = cache.get(&date("1990-01-01")).await;
        let second = cache.get(&date("1990-01-01")).await;

        assert_eq!(first.value, Some(Fetched::NotFound));
        assert_eq!(second.value, Some(Fetched::NotFound));
        assert_eq!(second.state, LookupState::Fresh);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_keeps_previous_value() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Step::Respond(200, record_json("2026-02-10")),
            Step::Respond(503, "unavailable".to_string()),
        ]));
        let cache = cache(&transport);

        let first = cache.get(&FetchIntent::Today).await;
        tokio::time::advance(Duration::from_secs(3601)).await;
        let second = cache.get(&FetchIntent::Today).await;

        assert_eq!(second.state, LookupState::Stale);
        assert_eq!(second.value, first.value);
        assert!(matches!(
            second.error,
            Some(ApodError::UpstreamHttp { status: 503, .. })
        ));
        assert_eq!(transport.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_without_previous_value() {
        let transport = Arc::new(ScriptedTransport::new(vec![Step::Fail(
            "connection refused".to_string(),
        )]));
        let cache = cache(&transport);

        let lookup = cache.get(&FetchIntent::Today).await;

        assert_eq!(lookup.state, LookupState::Failed);
        assert!(lookup.value.is_none());
        assert!(!lookup.is_displayable());
        assert!(matches!(lookup.error, Some(ApodError::Network(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recent_failure_is_not_refetched_within_window() {
        let transport = Arc::new(ScriptedTransport::new(vec![Step::Fail(
            "connection refused".to_string(),
        )]));
        let cache = cache(&transport);

        cache.get(&FetchIntent::Today).await;
        assert_eq!(transport.calls(), 3);

        let again = cache.get(&FetchIntent::Today).await;
        assert_eq!(again.state, LookupState::Failed);
        assert_eq!(transport.calls(), 3);

        tokio::time::advance(DEDUP_WINDOW).await;
        cache.get(&FetchIntent::Today).await;
        assert_eq!(transport.calls(), 6);
    }

    #[tokio::test]
    async fn test_configuration_error_is_not_cached() {
        let transport = Arc::new(ScriptedTransport::ok(record_json("2026-02-10")));
        let cache = CacheManager::new(ApodClient::with_transport(transport.clone(), None));

        let first = cache.get(&FetchIntent::Today).await;
        let second = cache.get(&FetchIntent::Today).await;

        assert!(matches!(first.error, Some(ApodError::Configuration(_))));
        assert!(matches!(second.error, Some(ApodError::Configuration(_))));
        assert!(cache.peek(&FetchIntent::Today).is_none());
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_serves_previous_value_while_revalidating() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Step::Respond(200, record_json("2026-02-09")),
            Step::Delayed(Duration::from_millis(200), 200, record_json("2026-02-10")),
        ]));
        let cache = cache(&transport);

        let loading = cache.snapshot(&FetchIntent::Today);
        assert_eq!(loading.state, LookupState::Loading);
        assert!(loading.value.is_none());

        let fresh = cache.get(&FetchIntent::Today).await;
        assert_eq!(fresh.value.unwrap().record().unwrap().date, "2026-02-09");

        tokio::time::advance(Duration::from_secs(3601)).await;
        let stale = cache.snapshot(&FetchIntent::Today);
        assert_eq!(stale.state, LookupState::Revalidating);
        assert_eq!(stale.value.unwrap().record().unwrap().date, "2026-02-09");

        let refreshed = cache.get(&FetchIntent::Today).await;
        assert_eq!(refreshed.state, LookupState::Fresh);
        assert_eq!(refreshed.value.unwrap().record().unwrap().date, "2026-02-10");
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_warm_populates_without_waiting() {
        let transport = Arc::new(ScriptedTransport::ok(range_json(&["2026-02-10", "2026-02-09"])));
        let cache = cache(&transport);
        let intent = range("2026-02-09", "2026-02-10");

        cache.warm(&intent);
        let lookup = cache.get(&intent).await;

        assert_eq!(lookup.state, LookupState::Fresh);
        assert_eq!(transport.calls(), 1);
        assert!(cache.peek(&date("2026-02-09")).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_warm_failure_is_dropped() {
        let transport = Arc::new(ScriptedTransport::new(vec![Step::Respond(
            500,
            "boom".to_string(),
        )]));
        let cache = cache(&transport);

        cache.warm(&FetchIntent::Today);
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert!(cache.peek(&FetchIntent::Today).is_none());
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn test_refresh_bypasses_freshness() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Step::Respond(200, record_json("2026-02-09")),
            Step::Respond(200, record_json("2026-02-10")),
        ]));
        let cache = cache(&transport);

        cache.get(&FetchIntent::Today).await;
        let refreshed = cache.refresh(&FetchIntent::Today).await;

        assert_eq!(transport.calls(), 2);
        assert_eq!(refreshed.value.unwrap().record().unwrap().date, "2026-02-10");
        assert_eq!(
            cache.peek(&FetchIntent::Today).unwrap().record().unwrap().date,
            "2026-02-10"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_older_fetch_does_not_overwrite_refresh() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Step::Delayed(Duration::from_millis(500), 200, record_json("2026-02-09")),
            Step::Respond(200, record_json("2026-02-10")),
        ]));
        let cache = cache(&transport);

        cache.warm(&FetchIntent::Today);
        tokio::time::sleep(Duration::from_millis(10)).await;
        let refreshed = cache.refresh(&FetchIntent::Today).await;
        assert_eq!(refreshed.value.unwrap().record().unwrap().date, "2026-02-10");

        // Let the slow warm-up finish
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(transport.calls(), 2);
        assert_eq!(
            cache.peek(&FetchIntent::Today).unwrap().record().unwrap().date,
            "2026-02-10"
        );
        let lookup = cache.get(&FetchIntent::Today).await;
        assert_eq!(lookup.fetched_at, refreshed.fetched_at);
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_older_range_does_not_overwrite_date_entry() {
        let old_listing = range_json(&["2026-02-10"]).replace("Sky on", "Old sky on");
        let transport = Arc::new(ScriptedTransport::new(vec![
            Step::Delayed(Duration::from_millis(500), 200, old_listing),
            Step::Respond(200, record_json("2026-02-10")),
        ]));
        let cache = cache(&transport);
        let listing = range("2026-02-10", "2026-02-10");

        cache.warm(&listing);
        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.refresh(&date("2026-02-10")).await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        let single = cache.peek(&date("2026-02-10")).unwrap();
        assert_eq!(single.record().unwrap().title, "Sky on 2026-02-10");
        // The listing itself is still stored
        assert_eq!(cache.peek(&listing).unwrap().records().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_fetch_is_only_joined_within_dedup_window() {
        let transport = Arc::new(ScriptedTransport::new(vec![Step::Hang]));
        let client = ApodClient::with_transport(transport.clone(), Some("TEST_KEY".to_string()))
            .with_policy(RetryPolicy {
                attempts: 1,
                attempt_timeout: Duration::from_secs(180),
                retry_delay: Duration::from_secs(2),
            });
        let cache = CacheManager::new(client);

        cache.warm(&FetchIntent::Today);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(cache.snapshot(&FetchIntent::Today).state, LookupState::Loading);
        assert_eq!(transport.calls(), 1);

        tokio::time::sleep(DEDUP_WINDOW).await;
        let lookup = cache.get(&FetchIntent::Today).await;

        assert_eq!(transport.calls(), 2);
        assert_eq!(lookup.state, LookupState::Failed);
        assert!(matches!(lookup.error, Some(ApodError::Network(_))));
    }

    #[tokio::test]
    async fn test_clones_share_entries() {
        let transport = Arc::new(ScriptedTransport::ok(record_json("2026-02-10")));
        let cache = cache(&transport);
        let other = cache.clone();

        cache.get(&FetchIntent::Today).await;
        let lookup = other.get(&FetchIntent::Today).await;

        assert_eq!(lookup.state, LookupState::Fresh);
        assert_eq!(transport.calls(), 1);
    }
}
