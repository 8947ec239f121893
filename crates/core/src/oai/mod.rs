//! OAI-PMH request URLs and response parsing.

mod parser;

pub use parser::{
    check_response, parse_list_identifiers, parse_metadata_formats, parse_sets,
    ListIdentifiersPage, ListSetsPage,
};

use thiserror::Error;

use crate::repository::Repository;

/// OAI error code meaning an empty, successful listing.
pub const NO_RECORDS_MATCH: &str = "noRecordsMatch";

/// OAI error code of a repository that does not support sets.
pub const NO_SET_HIERARCHY: &str = "noSetHierarchy";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OaiError {
    #[error("malformed OAI-PMH response: {0}")]
    Malformed(String),

    #[error("OAI-PMH error {code}: {message}")]
    Protocol { code: String, message: String },
}

fn with_query(base: &str, query: &str) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{}{}{}", base, separator, query)
}

/// First ListIdentifiers request of a harvest.
pub fn list_identifiers_url(repository: &Repository) -> String {
    let mut query = format!(
        "verb=ListIdentifiers&metadataPrefix={}",
        urlencoding::encode(&repository.metadata_prefix)
    );
    if let Some(ref set) = repository.set {
        query.push_str(&format!("&set={}", urlencoding::encode(set)));
    }
    if let Some(ref from) = repository.datestamp {
        query.push_str(&format!("&from={}", urlencoding::encode(from)));
    }
    with_query(&repository.url, &query)
}

/// Follow-up ListIdentifiers request. Only the token is sent.
pub fn resume_url(base_url: &str, resumption_token: &str) -> String {
    with_query(
        base_url,
        &format!(
            "verb=ListIdentifiers&resumptionToken={}",
            urlencoding::encode(resumption_token)
        ),
    )
}

pub fn get_record_url(base_url: &str, identifier: &str, metadata_prefix: &str) -> String {
    with_query(
        base_url,
        &format!(
            "verb=GetRecord&identifier={}&metadataPrefix={}",
            urlencoding::encode(identifier),
            urlencoding::encode(metadata_prefix)
        ),
    )
}

pub fn list_metadata_formats_url(base_url: &str) -> String {
    with_query(base_url, "verb=ListMetadataFormats")
}

/// ListSets request, first page when `resumption_token` is absent.
pub fn list_sets_url(base_url: &str, resumption_token: Option<&str>) -> String {
    match resumption_token {
        Some(token) => with_query(
            base_url,
            &format!("verb=ListSets&resumptionToken={}", urlencoding::encode(token)),
        ),
        None => with_query(base_url, "verb=ListSets"),
    }
}
