//! Stylesheet-resolving transformer.

use std::path::{Path, PathBuf};

use quick_xml::events::Event;
use quick_xml::Reader;

use super::{TransformError, Transformer};

/// Resolves repository stylesheets in a directory and gates objects on XML
/// well-formedness. The bytes pass through unchanged.
pub struct StylesheetTransformer {
    directory: PathBuf,
}

impl StylesheetTransformer {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    fn resolve(&self, name: &str) -> Result<PathBuf, TransformError> {
        let path = self.directory.join(name);
        let inside = Path::new(name)
            .components()
            .all(|c| matches!(c, std::path::Component::Normal(_)));
        if inside && path.is_file() {
            Ok(path)
        } else {
            Err(TransformError::MissingStylesheet(name.to_string()))
        }
    }
}

/// Require exactly one root element and no syntax errors.
pub(crate) fn check_well_formed(raw: &[u8]) -> Result<(), TransformError> {
    let text =
        std::str::from_utf8(raw).map_err(|e| TransformError::MalformedInput(e.to_string()))?;
    let mut reader = Reader::from_str(text);
    let mut depth = 0usize;
    let mut roots = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Start(_)) => {
                if depth == 0 {
                    roots += 1;
                }
                depth += 1;
            }
            Ok(Event::Empty(_)) if depth == 0 => roots += 1,
            Ok(Event::End(_)) => depth = depth.saturating_sub(1),
            Ok(Event::Text(t)) if depth == 0 && !t.iter().all(u8::is_ascii_whitespace) => {
                return Err(TransformError::MalformedInput(
                    "text outside the root element".to_string(),
                ));
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(TransformError::MalformedInput(e.to_string())),
            _ => {}
        }
    }

    match (roots, depth) {
        (1, 0) => Ok(()),
        (0, _) => Err(TransformError::MalformedInput("no root element".to_string())),
        (_, 0) => Err(TransformError::MalformedInput(
            "more than one root element".to_string(),
        )),
        _ => Err(TransformError::MalformedInput(
            "unexpected end of document".to_string(),
        )),
    }
}

impl Transformer for StylesheetTransformer {
    fn transform(&self, raw: &[u8], stylesheet: Option<&str>) -> Result<Vec<u8>, TransformError> {
        if let Some(name) = stylesheet {
            self.resolve(name)?;
        }
        check_well_formed(raw)?;
        Ok(raw.to_vec())
    }
}
