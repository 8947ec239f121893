//! Checks a repository's OAI-PMH settings against its endpoint.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use super::NewRepository;
use crate::fetcher::{FetchResponse, HttpFetcher};
use crate::oai::{self, OaiError};

// Bounds a ListSets walk of a misbehaving endpoint
const MAX_SET_PAGES: usize = 100;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("endpoint {url} is unreachable: {message}")]
    Unreachable { url: String, message: String },

    #[error("endpoint {url} did not answer as OAI-PMH: {message}")]
    NotOai { url: String, message: String },

    #[error("metadata prefix {prefix} is not offered (offered: {offered})")]
    UnknownMetadataPrefix { prefix: String, offered: String },

    #[error("set {0} does not exist")]
    UnknownSet(String),
}

/// Asks the endpoint whether it offers the configured metadata prefix and set.
pub struct RepositoryValidator {
    fetcher: Arc<dyn HttpFetcher>,
}

impl RepositoryValidator {
    pub fn new(fetcher: Arc<dyn HttpFetcher>) -> Self {
        Self { fetcher }
    }

    pub async fn validate(&self, repository: &NewRepository) -> Result<(), ValidationError> {
        self.check_metadata_prefix(repository).await?;
        if let Some(ref set) = repository.set {
            self.check_set(&repository.url, set).await?;
        }
        info!(repository_id = %repository.id, url = %repository.url, "Repository settings validated");
        Ok(())
    }

    async fn check_metadata_prefix(&self, repository: &NewRepository) -> Result<(), ValidationError> {
        let url = oai::list_metadata_formats_url(&repository.url);
        let response = self.get(&url).await?;
        let offered = oai::parse_metadata_formats(&response.body).map_err(|e| not_oai(&url, e))?;

        if offered.iter().any(|prefix| *prefix == repository.metadata_prefix) {
            Ok(())
        } else {
            Err(ValidationError::UnknownMetadataPrefix {
                prefix: repository.metadata_prefix.clone(),
                offered: offered.join(", "),
            })
        }
    }

    async fn check_set(&self, base_url: &str, set: &str) -> Result<(), ValidationError> {
        let mut token: Option<String> = None;
        for page_number in 1..=MAX_SET_PAGES {
            let url = oai::list_sets_url(base_url, token.as_deref());
            let response = self.get(&url).await?;
            let page = oai::parse_sets(&response.body).map_err(|e| not_oai(&url, e))?;

            if page.sets.iter().any(|spec| spec == set) {
                return Ok(());
            }
            debug!(url = %url, page = page_number, sets = page.sets.len(), "Set not on page");
            match page.resumption_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        Err(ValidationError::UnknownSet(set.to_string()))
    }

    async fn get(&self, url: &str) -> Result<FetchResponse, ValidationError> {
        self.fetcher
            .fetch(url, &[])
            .await
            .map_err(|e| ValidationError::Unreachable {
                url: url.to_string(),
                message: e.to_string(),
            })
    }
}

fn not_oai(url: &str, error: OaiError) -> ValidationError {
    ValidationError::NotOai {
        url: url.to_string(),
        message: error.to_string(),
    }
}
