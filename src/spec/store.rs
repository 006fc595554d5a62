use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpecError {
    #[error("Failed to read OpenAPI document at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse OpenAPI document at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Schema '{0}' not found in the OpenAPI document")]
    SchemaNotFound(String),
}

/// Single authoritative in-memory copy of the API contract.
///
/// The document is read and parsed on first access, then shared read-only.
/// `clear_cache` exists for test isolation; production code never calls it.
pub struct SpecStore {
    path: PathBuf,
    cache: RwLock<Option<Arc<Value>>>,
}

impl SpecStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: RwLock::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the cached contract document, reading it from disk on the
    /// first call. Repeat calls hand out the same `Arc` until the cache is
    /// cleared.
    pub fn load(&self) -> Result<Arc<Value>, SpecError> {
        if let Some(doc) = self.cache.read().expect("spec cache poisoned").as_ref() {
            return Ok(Arc::clone(doc));
        }

        let raw = std::fs::read_to_string(&self.path).map_err(|source| SpecError::Read {
            path: self.path.clone(),
            source,
        })?;
        let doc: Value = serde_json::from_str(&raw).map_err(|source| SpecError::Parse {
            path: self.path.clone(),
            source,
        })?;

        let doc = Arc::new(doc);
        let mut cache = self.cache.write().expect("spec cache poisoned");
        // A concurrent load may have won the race; keep whichever is cached
        // so callers keep seeing an identity-equal document.
        if let Some(existing) = cache.as_ref() {
            return Ok(Arc::clone(existing));
        }
        *cache = Some(Arc::clone(&doc));
        Ok(doc)
    }

    /// Looks up `components.schemas[name]`, loading the document first if
    /// needed. Absence at any level is `Ok(None)`, not an error.
    pub fn schema(&self, name: &str) -> Result<Option<Value>, SpecError> {
        let doc = self.load()?;
        let schema = doc
            .get("components")
            .and_then(|c| c.get("schemas"))
            .and_then(|s| s.get(name))
            .cloned();
        Ok(schema)
    }

    /// Drops the cached document so the next `load` re-reads from disk.
    pub fn clear_cache(&self) {
        self.cache.write().expect("spec cache poisoned").take();
    }
}
