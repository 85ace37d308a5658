//! Background data refresh system
//!
//! Periodically re-validates a set of fetch intents through the cache and
//! reports the outcome over a tokio channel, so a long-running caller can
//! keep today's record (or a listing) current without polling.

use std::time::Duration;
use tokio::sync::mpsc;

use crate::cache::CacheManager;
use crate::data::{ApodError, FetchIntent, Fetched, TODAY_FRESHNESS};

/// Messages sent from background refresh to the caller
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshMessage {
    /// A fresh value was fetched for an intent
    Updated { intent: FetchIntent, value: Fetched },
    /// Refreshing an intent failed (the cache keeps the previous value)
    RefreshError { intent: FetchIntent, error: ApodError },
    /// Refresh started
    RefreshStarted,
    /// Refresh completed
    RefreshCompleted,
}

/// Configuration for the refresh loop
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Time between refresh cycles
    pub interval: Duration,
    /// Intents refreshed on every cycle
    pub intents: Vec<FetchIntent>,
    /// Whether auto-refresh is enabled
    pub enabled: bool,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval: TODAY_FRESHNESS,
            intents: vec![FetchIntent::Today],
            enabled: true,
        }
    }
}

/// Handle for controlling the background refresh system
pub struct RefreshHandle {
    /// Channel for receiving refresh messages
    pub receiver: mpsc::Receiver<RefreshMessage>,
    /// Flag to signal shutdown
    shutdown_tx: mpsc::Sender<()>,
}

impl RefreshHandle {
    /// Creates a new RefreshHandle and spawns the background refresh task
    ///
    /// The first cycle runs one `interval` after spawning; callers are
    /// expected to have loaded the initial data themselves.
    pub fn spawn(cache: CacheManager, config: RefreshConfig) -> Self {
        let (msg_tx, msg_rx) = mpsc::channel(32);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        if config.enabled {
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(config.interval);
                // Skip the first tick (immediate)
                interval.tick().await;

                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            if !run_cycle(&cache, &config.intents, &msg_tx).await {
                                break;
                            }
                        }
                        _ = shutdown_rx.recv() => {
                            break;
                        }
                    }
                }
            });
        }

        Self {
            receiver: msg_rx,
            shutdown_tx,
        }
    }

    /// Shuts down the background refresh task
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

/// Refreshes every intent once; returns `false` once nobody is listening
async fn run_cycle(
    cache: &CacheManager,
    intents: &[FetchIntent],
    tx: &mpsc::Sender<RefreshMessage>,
) -> bool {
    if tx.send(RefreshMessage::RefreshStarted).await.is_err() {
        return false;
    }

    for intent in intents {
        let lookup = cache.refresh(intent).await;
        let message = match (lookup.error, lookup.value) {
            (Some(error), _) => RefreshMessage::RefreshError {
                intent: intent.clone(),
                error,
            },
            (None, Some(value)) => RefreshMessage::Updated {
                intent: intent.clone(),
                value,
            },
            (None, None) => continue,
        };
        if tx.send(message).await.is_err() {
            return false;
        }
    }

    tx.send(RefreshMessage::RefreshCompleted).await.is_ok()
}
