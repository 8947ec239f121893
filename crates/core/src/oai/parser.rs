//! Streaming parser for OAI-PMH responses.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::{OaiError, NO_RECORDS_MATCH, NO_SET_HIERARCHY};
use crate::record::HarvestedEntry;

/// One parsed ListIdentifiers page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListIdentifiersPage {
    pub entries: Vec<HarvestedEntry>,
    /// Present when more pages follow.
    pub resumption_token: Option<String>,
}

/// One parsed ListSets page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListSetsPage {
    pub sets: Vec<String>,
    pub resumption_token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Identifier,
    Datestamp,
    ResumptionToken,
    MetadataPrefix,
    SetSpec,
    Error,
}

/// Everything a single pass over a response collects.
#[derive(Default)]
struct Scan {
    saw_root: bool,
    error: Option<(String, String)>,
    page: ListIdentifiersPage,
    metadata_prefixes: Vec<String>,
    set_specs: Vec<String>,
}

fn attribute(element: &BytesStart, key: &[u8]) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == key)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

fn scan(xml: &[u8]) -> Result<Scan, OaiError> {
    let text = std::str::from_utf8(xml).map_err(|e| OaiError::Malformed(e.to_string()))?;
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut scan = Scan::default();
    let mut header: Option<HarvestedEntry> = None;
    let mut field: Option<Field> = None;
    let mut depth = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                depth += 1;
                match e.local_name().as_ref() {
                    b"OAI-PMH" => scan.saw_root = true,
                    b"header" => {
                        let deleted = attribute(&e, b"status").as_deref() == Some("deleted");
                        header = Some(HarvestedEntry {
                            deleted,
                            ..Default::default()
                        });
                    }
                    b"identifier" if header.is_some() => field = Some(Field::Identifier),
                    b"datestamp" if header.is_some() => field = Some(Field::Datestamp),
                    b"resumptionToken" => field = Some(Field::ResumptionToken),
                    b"metadataPrefix" => field = Some(Field::MetadataPrefix),
                    // Headers list the sets of their record, not of the repository
                    b"setSpec" if header.is_none() => field = Some(Field::SetSpec),
                    b"error" => {
                        let code = attribute(&e, b"code").unwrap_or_default();
                        scan.error = Some((code, String::new()));
                        field = Some(Field::Error);
                    }
                    _ => {}
                }
            }
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"OAI-PMH" => scan.saw_root = true,
                b"error" => {
                    let code = attribute(&e, b"code").unwrap_or_default();
                    scan.error = Some((code, String::new()));
                }
                // An empty token marks the last page
                _ => {}
            },
            Ok(Event::Text(t)) => {
                let value = t
                    .unescape()
                    .map_err(|e| OaiError::Malformed(e.to_string()))?
                    .into_owned();
                match (field, header.as_mut()) {
                    (Some(Field::Identifier), Some(entry)) => entry.identifier = value,
                    (Some(Field::Datestamp), Some(entry)) => entry.datestamp = Some(value),
                    (Some(Field::ResumptionToken), _) if !value.is_empty() => {
                        scan.page.resumption_token = Some(value)
                    }
                    (Some(Field::MetadataPrefix), _) => scan.metadata_prefixes.push(value),
                    (Some(Field::SetSpec), _) => scan.set_specs.push(value),
                    (Some(Field::Error), _) => {
                        if let Some((_, ref mut message)) = scan.error {
                            message.push_str(&value);
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::End(e)) => {
                depth = depth.saturating_sub(1);
                match e.local_name().as_ref() {
                    b"header" => {
                        if let Some(entry) = header.take() {
                            if !entry.identifier.is_empty() {
                                scan.page.entries.push(entry);
                            }
                        }
                    }
                    b"identifier" | b"datestamp" | b"resumptionToken" | b"metadataPrefix"
                    | b"setSpec" | b"error" => field = None,
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(OaiError::Malformed(format!(
                    "XML error at position {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
    }

    if depth != 0 {
        return Err(OaiError::Malformed("unexpected end of document".to_string()));
    }
    if !scan.saw_root {
        return Err(OaiError::Malformed("missing OAI-PMH root element".to_string()));
    }
    Ok(scan)
}

/// Parse a ListIdentifiers response.
///
/// `noRecordsMatch` yields an empty final page. Any other OAI error is
/// returned as [`OaiError::Protocol`].
pub fn parse_list_identifiers(xml: &[u8]) -> Result<ListIdentifiersPage, OaiError> {
    let scan = scan(xml)?;
    match scan.error {
        Some((code, _)) if code == NO_RECORDS_MATCH => Ok(ListIdentifiersPage::default()),
        Some((code, message)) => Err(OaiError::Protocol { code, message }),
        None => Ok(scan.page),
    }
}

/// Parse a ListMetadataFormats response into the offered metadata prefixes.
pub fn parse_metadata_formats(xml: &[u8]) -> Result<Vec<String>, OaiError> {
    let scan = scan(xml)?;
    match scan.error {
        Some((code, message)) => Err(OaiError::Protocol { code, message }),
        None => Ok(scan.metadata_prefixes),
    }
}

/// Parse a ListSets response. A repository without sets answers
/// `noSetHierarchy`, which yields an empty final page.
pub fn parse_sets(xml: &[u8]) -> Result<ListSetsPage, OaiError> {
    let scan = scan(xml)?;
    match scan.error {
        Some((code, _)) if code == NO_SET_HIERARCHY => Ok(ListSetsPage::default()),
        Some((code, message)) => Err(OaiError::Protocol { code, message }),
        None => Ok(ListSetsPage {
            sets: scan.set_specs,
            resumption_token: scan.page.resumption_token,
        }),
    }
}

/// Check that a GetRecord (or any) response is OAI-PMH without an error element.
pub fn check_response(xml: &[u8]) -> Result<(), OaiError> {
    match scan(xml)?.error {
        Some((code, message)) => Err(OaiError::Protocol { code, message }),
        None => Ok(()),
    }
}
