//! Lift Configuration
//!
//! Collection registration and write-path settings.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LiftError, LiftResult};

/// Per-collection options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionConfig {
    /// Store collection name
    pub collection: String,

    /// Prefix generated ids with `<collection>-` (default: true)
    #[serde(default = "default_true")]
    pub prefix_id_with_collection_name: bool,

    /// Refuse to generate ids for this collection (default: false)
    #[serde(default)]
    pub disable_id_generation: bool,

    /// Root properties that update/updateShallow/setPath may not touch
    /// without an explicit override
    #[serde(default)]
    pub root_properties_to_disallow_updates_on: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl CollectionConfig {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            prefix_id_with_collection_name: true,
            disable_id_generation: false,
            root_properties_to_disallow_updates_on: Vec::new(),
        }
    }

    pub fn without_id_prefix(mut self) -> Self {
        self.prefix_id_with_collection_name = false;
        self
    }

    pub fn with_id_generation_disabled(mut self) -> Self {
        self.disable_id_generation = true;
        self
    }

    pub fn with_protected_roots<I, S>(mut self, roots: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.root_properties_to_disallow_updates_on = roots.into_iter().map(Into::into).collect();
        self
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiftConfig {
    /// Collections keyed by handle name
    #[serde(default)]
    pub collections: BTreeMap<String, CollectionConfig>,

    /// Upper bound on how long a commit waits for the write observer
    /// (default: 500)
    #[serde(default = "default_observer_timeout_ms")]
    pub write_observer_timeout_ms: u64,

    /// Field stamped with the batch write time on every non-delete write.
    /// Empty disables stamping. (default: "__lastWriteMS")
    #[serde(default = "default_last_write_field")]
    pub last_write_field: String,
}

fn default_observer_timeout_ms() -> u64 {
    500
}

fn default_last_write_field() -> String {
    "__lastWriteMS".to_string()
}

impl Default for LiftConfig {
    fn default() -> Self {
        Self {
            collections: BTreeMap::new(),
            write_observer_timeout_ms: default_observer_timeout_ms(),
            last_write_field: default_last_write_field(),
        }
    }
}

impl LiftConfig {
    /// Parses and validates a JSON config document
    pub fn from_json_str(s: &str) -> LiftResult<Self> {
        let config: LiftConfig =
            serde_json::from_str(s).map_err(|e| LiftError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_collection(mut self, name: impl Into<String>, collection: CollectionConfig) -> Self {
        self.collections.insert(name.into(), collection);
        self
    }

    pub fn with_write_observer_timeout(mut self, timeout: Duration) -> Self {
        self.write_observer_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_last_write_field(mut self, field: impl Into<String>) -> Self {
        self.last_write_field = field.into();
        self
    }

    pub fn write_observer_timeout(&self) -> Duration {
        Duration::from_millis(self.write_observer_timeout_ms)
    }

    /// Stamp field, if stamping is enabled
    pub fn stamp_field(&self) -> Option<&str> {
        if self.last_write_field.is_empty() {
            None
        } else {
            Some(&self.last_write_field)
        }
    }

    pub fn validate(&self) -> LiftResult<()> {
        for (name, c) in &self.collections {
            if c.collection.is_empty() {
                return Err(LiftError::Config(format!(
                    "collection {} has an empty store name",
                    name
                )));
            }
        }
        if self.last_write_field.contains('.') {
            return Err(LiftError::Config(
                "lastWriteField must be a root property".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LiftConfig::default();
        assert_eq!(config.write_observer_timeout(), Duration::from_millis(500));
        assert_eq!(config.stamp_field(), Some("__lastWriteMS"));
        assert!(config.collections.is_empty());
    }

    #[test]
    fn test_from_json_defaults() {
        let config = LiftConfig::from_json_str(
            r#"{"collections": {"Person": {"collection": "person"}, "Book": {"collection": "book", "prefixIdWithCollectionName": false}}}"#,
        )
        .unwrap();

        let person = &config.collections["Person"];
        assert!(person.prefix_id_with_collection_name);
        assert!(!person.disable_id_generation);
        assert!(!config.collections["Book"].prefix_id_with_collection_name);
        assert_eq!(config.write_observer_timeout_ms, 500);
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            LiftConfig::from_json_str(r#"{"collections": {"Person": {"collection": ""}}}"#),
            Err(LiftError::Config(_))
        ));
        assert!(LiftConfig::from_json_str("not json").is_err());
    }

    #[test]
    fn test_stamping_disabled() {
        let config = LiftConfig::default().with_last_write_field("");
        assert_eq!(config.stamp_field(), None);
    }
}
