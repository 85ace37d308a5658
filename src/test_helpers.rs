//! Shared test fixtures: a scripted transport and sample payloads.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::data::{Transport, TransportError, TransportResponse};

/// One scripted reaction to a request
#[derive(Debug, Clone)]
pub enum Step {
    /// Respond immediately with status and body
    Respond(u16, String),
    /// Respond after a delay
    Delayed(Duration, u16, String),
    /// Fail at the transport level
    Fail(String),
    /// Never respond
    Hang,
}

/// Transport that replays a fixed script and counts calls
///
/// Once the script runs out, the last step repeats.
#[derive(Debug)]
pub struct ScriptedTransport {
    steps: Mutex<VecDeque<Step>>,
    last: Mutex<Option<Step>>,
    calls: AtomicUsize,
    urls: Mutex<Vec<Url>>,
}

impl ScriptedTransport {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
            urls: Mutex::new(Vec::new()),
        }
    }

    pub fn ok(body: impl Into<String>) -> Self {
        Self::new(vec![Step::Respond(200, body.into())])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<Url> {
        self.urls.lock().unwrap().clone()
    }

    fn next_step(&self) -> Step {
        let mut last = self.last.lock().unwrap();
        match self.steps.lock().unwrap().pop_front() {
            Some(step) => {
                *last = Some(step.clone());
                step
            }
            None => last
                .clone()
                .unwrap_or_else(|| Step::Fail("script is empty".to_string())),
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get(&self, url: &Url) -> Result<TransportResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(url.clone());

        let (status, body) = match self.next_step() {
            Step::Respond(status, body) => (status, body),
            Step::Delayed(delay, status, body) => {
                tokio::time::sleep(delay).await;
                (status, body)
            }
            Step::Fail(message) => return Err(TransportError(message)),
            Step::Hang => std::future::pending().await,
        };

        Ok(TransportResponse {
            status,
            content_type: Some("application/json".to_string()),
            body: body.into_bytes(),
        })
    }
}

/// JSON for a single image record
pub fn record_json(date: &str) -> String {
    format!(
        r#"{{"date":"{date}","title":"Sky on {date}","explanation":"Stars.","url":"https://apod.nasa.gov/apod/image/{date}.jpg","hdurl":"https://apod.nasa.gov/apod/image/{date}_hd.jpg","media_type":"image","service_version":"v1"}}"#
    )
}

/// JSON array of records in the given order
pub fn range_json(dates: &[&str]) -> String {
    let items: Vec<String> = dates.iter().map(|date| record_json(date)).collect();
    format!("[{}]", items.join(","))
}
