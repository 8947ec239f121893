//! Fault-tolerant HTTP GET client.

mod lenient;

pub use lenient::LenientHttpFetcher;

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error fetching {url}: {message}")]
    Network { url: String, message: String },

    #[error("HTTP {status} from {url}")]
    Http { url: String, status: u16 },

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

impl FetchError {
    pub fn url(&self) -> Option<&str> {
        match self {
            FetchError::Network { url, .. } | FetchError::Http { url, .. } => Some(url),
            FetchError::Client(_) => None,
        }
    }
}

/// A fetched HTTP response.
#[derive(Debug, Clone, Default)]
pub struct FetchResponse {
    pub status: u16,
    /// Header names are lowercased.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl FetchResponse {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP GET with retries.
#[async_trait]
pub trait HttpFetcher: Send + Sync {
    async fn fetch(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<FetchResponse, FetchError>;
}
