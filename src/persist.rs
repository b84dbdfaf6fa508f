//! Persistence interface (§6 "Persistence").
//!
//! Out of scope per §1 ("file I/O... treated only as external
//! collaborators via interfaces"): this module defines the `ReconSink`
//! trait C6 writes through, plus an in-memory sink used by tests. A real
//! deployment backs this with a hierarchical container file.

use std::collections::HashMap;

use crate::error::PersistError;
use crate::tensor::Field4;

/// One persisted Gauss-Newton result: the rescaled physical maps plus the
/// final objective value, keyed per §6
/// (`tgv_result_iter_<k>`/`tv_result_<k>` with attribute
/// `res_{tgv,tv}_iter_<k>`).
#[derive(Debug, Clone)]
pub struct ReconResult {
    pub key: String,
    pub attribute_key: String,
    pub x_rescaled: Field4,
    pub objective: f32,
}

/// Output sink for per-GN reconstruction results (§6 "Persistence").
pub trait ReconSink: Send {
    fn persist(&mut self, result: ReconResult) -> Result<(), PersistError>;
}

/// In-memory sink used by tests and by callers that post-process results
/// without touching a filesystem.
#[derive(Debug, Default)]
pub struct InMemorySink {
    results: HashMap<String, ReconResult>,
    closed: bool,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn get(&self, key: &str) -> Option<&ReconResult> {
        self.results.get(key)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

impl ReconSink for InMemorySink {
    fn persist(&mut self, result: ReconResult) -> Result<(), PersistError> {
        if self.closed {
            return Err(PersistError::Closed(result.key));
        }
        if self.results.contains_key(&result.key) {
            return Err(PersistError::KeyCollision(result.key));
        }
        self.results.insert(result.key.clone(), result);
        Ok(())
    }
}

/// Builds the §6 key/attribute pair for GN iteration `k` under the given
/// regularizer.
pub fn result_key(regularizer: crate::config::Regularizer, gn_iter: usize) -> (String, String) {
    use crate::config::Regularizer;
    match regularizer {
        Regularizer::Tgv => (format!("tgv_result_iter_{gn_iter}"), format!("res_tgv_iter_{gn_iter}")),
        Regularizer::Tv => (format!("tv_result_{gn_iter}"), format!("res_tv_iter_{gn_iter}")),
    }
}
