//! Testing utilities and mock implementations.
//!
//! The mocks stand in for the network, the mail relay and the stylesheet
//! engine so that harvest flows can be exercised end to end in-process.
//!
//! # Example
//!
//! ```rust,ignore
//! use harvester_core::testing::{fixtures, MockFetcher};
//!
//! let fetcher = MockFetcher::new();
//! fetcher.respond(
//!     "http://example.org/oai?verb=ListIdentifiers&metadataPrefix=oai_dc",
//!     FetchResponse::ok(fixtures::list_identifiers(&[("oai:x:1", false)], None)),
//! );
//! ```

mod mock_fetcher;
mod mock_mailer;
mod mock_transformer;

pub use mock_fetcher::MockFetcher;
pub use mock_mailer::MockMailer;
pub use mock_transformer::MockTransformer;

/// Test fixtures and helper functions.
pub mod fixtures {
    use chrono::{NaiveTime, Utc};

    use crate::repository::{HarvestState, Repository, Schedule};

    /// An enabled, idle, daily repository that was never harvested.
    pub fn repository(id: &str, url: &str) -> Repository {
        let now = Utc::now();
        Repository {
            id: id.to_string(),
            name: id.to_string(),
            url: url.to_string(),
            metadata_prefix: "oai_dc".to_string(),
            set: None,
            stylesheet: None,
            enabled: true,
            schedule: Schedule::Daily,
            anchor_time: NaiveTime::MIN,
            state: HarvestState::Idle,
            harvest_requested: false,
            consecutive_failures: 0,
            last_harvest: None,
            datestamp: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// A ListIdentifiers page. Each entry is `(identifier, deleted)`, all
    /// dated 2024-01-01.
    pub fn list_identifiers(entries: &[(&str, bool)], resumption_token: Option<&str>) -> String {
        let headers: String = entries
            .iter()
            .map(|(identifier, deleted)| {
                let status = if *deleted { r#" status="deleted""# } else { "" };
                format!(
                    "    <header{}><identifier>{}</identifier><datestamp>2024-01-01</datestamp></header>\n",
                    status, identifier
                )
            })
            .collect();
        let token = match resumption_token {
            Some(token) => format!("    <resumptionToken>{}</resumptionToken>\n", token),
            None => "    <resumptionToken/>\n".to_string(),
        };
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<OAI-PMH xmlns="http://www.openarchives.org/OAI/2.0/">
  <responseDate>2024-01-02T00:00:00Z</responseDate>
  <request verb="ListIdentifiers">http://example.org/oai</request>
  <ListIdentifiers>
{}{}  </ListIdentifiers>
</OAI-PMH>"#,
            headers, token
        )
    }

    /// A ListMetadataFormats response offering `prefixes`.
    pub fn metadata_formats(prefixes: &[&str]) -> String {
        let formats: String = prefixes
            .iter()
            .map(|prefix| {
                format!(
                    "    <metadataFormat><metadataPrefix>{}</metadataPrefix></metadataFormat>\n",
                    prefix
                )
            })
            .collect();
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<OAI-PMH xmlns="http://www.openarchives.org/OAI/2.0/">
  <responseDate>2024-01-02T00:00:00Z</responseDate>
  <request verb="ListMetadataFormats">http://example.org/oai</request>
  <ListMetadataFormats>
{}  </ListMetadataFormats>
</OAI-PMH>"#,
            formats
        )
    }

    /// A ListSets page.
    pub fn list_sets(specs: &[&str], resumption_token: Option<&str>) -> String {
        let sets: String = specs
            .iter()
            .map(|spec| {
                format!(
                    "    <set><setSpec>{spec}</setSpec><setName>Set {spec}</setName></set>\n",
                    spec = spec
                )
            })
            .collect();
        let token = resumption_token
            .map(|token| format!("    <resumptionToken>{}</resumptionToken>\n", token))
            .unwrap_or_default();
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<OAI-PMH xmlns="http://www.openarchives.org/OAI/2.0/">
  <responseDate>2024-01-02T00:00:00Z</responseDate>
  <request verb="ListSets">http://example.org/oai</request>
  <ListSets>
{}{}  </ListSets>
</OAI-PMH>"#,
            sets, token
        )
    }

    /// An OAI-PMH error response.
    pub fn oai_error(code: &str, message: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<OAI-PMH xmlns="http://www.openarchives.org/OAI/2.0/">
  <responseDate>2024-01-02T00:00:00Z</responseDate>
  <request>http://example.org/oai</request>
  <error code="{}">{}</error>
</OAI-PMH>"#,
            code, message
        )
    }

    /// A GetRecord response for `identifier` with a small Dublin Core payload.
    pub fn get_record(identifier: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<OAI-PMH xmlns="http://www.openarchives.org/OAI/2.0/">
  <responseDate>2024-01-02T00:00:00Z</responseDate>
  <request verb="GetRecord">http://example.org/oai</request>
  <GetRecord>
    <record>
      <header><identifier>{id}</identifier><datestamp>2024-01-01</datestamp></header>
      <metadata>
        <oai_dc:dc xmlns:oai_dc="http://www.openarchives.org/OAI/2.0/oai_dc/" xmlns:dc="http://purl.org/dc/elements/1.1/">
          <dc:title>Record {id}</dc:title>
          <dc:identifier>{id}</dc:identifier>
        </oai_dc:dc>
      </metadata>
    </record>
  </GetRecord>
</OAI-PMH>"#,
            id = identifier
        )
    }
}
