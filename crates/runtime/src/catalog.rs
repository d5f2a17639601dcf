//! Model catalog
//!
//! Lookup of known models and their asset locations. Records come from
//! configuration; the catalog itself is immutable at runtime.

use inflight_common::config::{ModelRecord, RuntimeConfig};
use inflight_common::error::{InflightError, Result};

/// Catalog of known models
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    records: Vec<ModelRecord>,
}

impl ModelCatalog {
    /// Create a catalog from a list of records
    pub fn new(records: Vec<ModelRecord>) -> Self {
        Self { records }
    }

    /// Create a catalog from the runtime configuration
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(config.models.clone())
    }

    /// Look up a model record by id
    pub fn get(&self, model_id: &str) -> Result<&ModelRecord> {
        self.records
            .iter()
            .find(|r| r.model_id == model_id)
            .ok_or_else(|| InflightError::model_not_found(model_id))
    }

    /// All known model records
    pub fn list(&self) -> &[ModelRecord] {
        &self.records
    }

    /// Number of known models
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check whether the catalog is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> ModelRecord {
        ModelRecord {
            model_id: id.to_string(),
            model_url: format!("https://hub.test/{}", id),
            model_lib: format!("{}-q4f16_1", id),
            estimated_vram_bytes: None,
        }
    }

    #[test]
    fn test_catalog_lookup() {
        let catalog = ModelCatalog::new(vec![record("phi-3"), record("gemma-2b")]);

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get("phi-3").unwrap().model_lib, "phi-3-q4f16_1");

        let missing = catalog.get("mistral-7b");
        assert!(matches!(missing, Err(InflightError::ModelNotFound(_))));
    }

    #[test]
    fn test_catalog_from_config() {
        let config = RuntimeConfig {
            models: vec![record("phi-3")],
            ..RuntimeConfig::default()
        };

        let catalog = ModelCatalog::from_config(&config);
        assert_eq!(catalog.list(), &[record("phi-3")]);
    }
}
