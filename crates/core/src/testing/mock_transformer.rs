//! Mock transformer for testing.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::transform::{TransformError, Transformer};

/// Mock implementation of the Transformer trait.
///
/// Passes input through unchanged unless told to fail the next call.
#[derive(Debug, Default)]
pub struct MockTransformer {
    fail_next: AtomicBool,
    calls: AtomicUsize,
}

impl MockTransformer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Transformer for MockTransformer {
    fn transform(&self, raw: &[u8], _stylesheet: Option<&str>) -> Result<Vec<u8>, TransformError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(TransformError::MalformedInput("mock transform failure".to_string()));
        }
        Ok(raw.to_vec())
    }
}
