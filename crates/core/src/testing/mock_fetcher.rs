//! Mock fetcher for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::fetcher::{FetchError, FetchResponse, HttpFetcher};

#[derive(Debug, Clone)]
enum Scripted {
    Response(FetchResponse),
    Status(u16),
}

/// Mock implementation of the HttpFetcher trait.
///
/// Answers every request for a URL with the response scripted for it.
/// Unscripted URLs fail with a network error, like an unreachable host.
#[derive(Debug, Default)]
pub struct MockFetcher {
    scripted: Mutex<HashMap<String, Scripted>>,
    requests: Mutex<Vec<String>>,
    delay: Mutex<Option<Duration>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `url` with `response`.
    pub fn respond(&self, url: &str, response: FetchResponse) {
        if let Ok(mut scripted) = self.scripted.lock() {
            scripted.insert(url.to_string(), Scripted::Response(response));
        }
    }

    /// Fail `url` with an HTTP status error.
    pub fn fail_with_status(&self, url: &str, status: u16) {
        if let Ok(mut scripted) = self.scripted.lock() {
            scripted.insert(url.to_string(), Scripted::Status(status));
        }
    }

    /// Sleep this long before answering any request.
    pub fn set_delay(&self, delay: Duration) {
        if let Ok(mut current) = self.delay.lock() {
            *current = Some(delay);
        }
    }

    /// Every URL requested so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl HttpFetcher for MockFetcher {
    async fn fetch(
        &self,
        url: &str,
        _headers: &[(String, String)],
    ) -> Result<FetchResponse, FetchError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(url.to_string());
        }
        let delay = self.delay.lock().ok().and_then(|d| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self
            .scripted
            .lock()
            .ok()
            .and_then(|scripted| scripted.get(url).cloned());
        match scripted {
            Some(Scripted::Response(response)) => Ok(response),
            Some(Scripted::Status(status)) => Err(FetchError::Http {
                url: url.to_string(),
                status,
            }),
            None => Err(FetchError::Network {
                url: url.to_string(),
                message: "connection refused".to_string(),
            }),
        }
    }
}
