//! Object transformation and manifest finalization.

mod manifest;
mod stylesheet;

pub use manifest::{Finalized, Manifest, ManifestFile, ManifestFinalizer, ManifestMetadata};
pub use stylesheet::StylesheetTransformer;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransformError {
    #[error("stylesheet not found: {0}")]
    MissingStylesheet(String),

    #[error("malformed input: {0}")]
    MalformedInput(String),
}

/// Turns a raw object response into the archived representation.
pub trait Transformer: Send + Sync {
    /// `stylesheet` names the repository's stylesheet, if it has one.
    fn transform(&self, raw: &[u8], stylesheet: Option<&str>) -> Result<Vec<u8>, TransformError>;
}
