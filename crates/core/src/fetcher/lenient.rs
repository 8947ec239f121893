//! reqwest-backed fetcher with bounded retries.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

use super::{FetchError, FetchResponse, HttpFetcher};
use crate::config::FetchConfig;

/// HTTP fetcher retrying network errors, 5xx and 429 with exponential backoff.
///
/// In lenient mode a non-2xx answer that is not retried (or still fails after
/// the last retry) is returned as a response so the caller can inspect the
/// body. Otherwise it becomes [`FetchError::Http`].
pub struct LenientHttpFetcher {
    client: Client,
    lenient: bool,
    max_retries: u32,
    backoff: Duration,
}

impl LenientHttpFetcher {
    pub fn new(config: &FetchConfig, lenient: bool) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;

        Ok(Self {
            client,
            lenient,
            max_retries: config.max_retries,
            backoff: Duration::from_millis(config.retry_backoff_ms),
        })
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(2u32.saturating_pow(attempt))
    }

    async fn attempt(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<FetchResponse, FetchError> {
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await.map_err(|e| FetchError::Network {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_lowercase(), v.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Network {
                url: url.to_string(),
                message: e.to_string(),
            })?
            .to_vec();

        Ok(FetchResponse {
            status,
            headers,
            body,
        })
    }

    fn settle(&self, url: &str, response: FetchResponse) -> Result<FetchResponse, FetchError> {
        if response.is_success() || self.lenient {
            Ok(response)
        } else {
            Err(FetchError::Http {
                url: url.to_string(),
                status: response.status,
            })
        }
    }
}

fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

#[async_trait]
impl HttpFetcher for LenientHttpFetcher {
    async fn fetch(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<FetchResponse, FetchError> {
        let mut attempt = 0;
        loop {
            match self.attempt(url, headers).await {
                Ok(response) if is_retryable_status(response.status) && attempt < self.max_retries => {
                    warn!(url, status = response.status, attempt, "Retryable HTTP status");
                }
                Ok(response) => return self.settle(url, response),
                Err(e) if attempt < self.max_retries => {
                    warn!(url, attempt, error = %e, "Fetch failed, retrying");
                }
                Err(e) => return Err(e),
            }

            let delay = self.delay_for(attempt);
            debug!(url, delay_ms = delay.as_millis() as u64, "Backing off");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn config(max_retries: u32) -> FetchConfig {
        FetchConfig {
            timeout_secs: 5,
            max_retries,
            retry_backoff_ms: 1,
            user_agent: "test".to_string(),
        }
    }

    /// Serve canned responses in order, repeating the last one.
    async fn serve(responses: Vec<(u16, &'static str)>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let (status, body) = responses[n.min(responses.len() - 1)];
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let reply = format!(
                    "HTTP/1.1 {} X\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(reply.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{}/oai", addr), hits)
    }

    #[test]
    fn test_backoff_doubles() {
        let fetcher = LenientHttpFetcher::new(&config(3), false).unwrap();
        assert_eq!(fetcher.delay_for(0), Duration::from_millis(1));
        assert_eq!(fetcher.delay_for(3), Duration::from_millis(8));
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable_status(503));
        assert!(is_retryable_status(429));
        assert!(!is_retryable_status(404));
        assert!(!is_retryable_status(200));
    }

    #[tokio::test]
    async fn test_retries_server_errors_then_succeeds() {
        let (url, hits) = serve(vec![(503, ""), (503, ""), (200, "<ok/>")]).await;
        let fetcher = LenientHttpFetcher::new(&config(3), false).unwrap();

        let response = fetcher.fetch(&url, &[]).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"<ok/>");
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_strict_mode_turns_client_error_into_http_error() {
        let (url, hits) = serve(vec![(404, "missing")]).await;
        let fetcher = LenientHttpFetcher::new(&config(3), false).unwrap();

        let err = fetcher.fetch(&url, &[]).await.unwrap_err();
        assert!(matches!(err, FetchError::Http { status: 404, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_lenient_mode_returns_error_status_as_data() {
        let (url, _) = serve(vec![(500, "<error/>")]).await;
        let fetcher = LenientHttpFetcher::new(&config(1), true).unwrap();

        let response = fetcher.fetch(&url, &[]).await.unwrap();
        assert_eq!(response.status, 500);
        assert_eq!(response.body, b"<error/>");
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let fetcher = LenientHttpFetcher::new(&config(1), true).unwrap();
        let err = fetcher
            .fetch(&format!("http://{}/oai", addr), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Network { .. }));
    }
}
