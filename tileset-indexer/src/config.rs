//! Indexer configuration and default values.
//!
//! Configuration is an explicit, immutable value handed to
//! [`TilesetIndexer::new`](crate::indexer::TilesetIndexer::new). Loading it
//! from disk or from a CMS is the caller's concern; the types derive
//! `Deserialize` so any serde format works, and every field has a default.

use crate::index::IndexKind;
use crate::retry::RetryPolicy;
use serde::Deserialize;
use std::collections::BTreeMap;

// =============================================================================
// Traversal defaults
// =============================================================================

/// Default size of the shared tile worker pool.
pub const DEFAULT_MAX_CONCURRENT_TILES: usize = 2;

/// Default total attempts per tile visit (first try included).
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;

/// Default backoff before the second attempt.
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 200;

/// Default upper bound on a single backoff delay.
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 5_000;

// =============================================================================
// Index defaults
// =============================================================================

/// Batch-table property holding the feature id.
pub const DEFAULT_ID_PROPERTY: &str = "gml_id";

/// Root document of every dataset.
pub const ROOT_TILESET: &str = "tileset.json";

/// Building attributes indexed by default.
pub const DEFAULT_ENUM_ATTRIBUTES: [&str; 10] = [
    "名称",
    "用途",
    "建物利用現況_大分類",
    "建物利用現況_中分類",
    "構造種別",
    "構造種別（独自）",
    "耐火構造種別",
    "地上階数",
    "地下階数",
    "建築年",
];

/// Settings for a single indexed attribute.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IndexSpec {
    pub kind: IndexKind,
}

impl IndexSpec {
    pub fn enumeration() -> Self {
        Self {
            kind: IndexKind::Enum,
        }
    }
}

/// Traversal settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TraversalConfig {
    /// Size of the worker pool shared by every level of the tile tree
    pub max_concurrent_tiles: usize,
    /// Retry applied to each tile visit and tileset load
    pub retry: RetryPolicy,
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tiles: DEFAULT_MAX_CONCURRENT_TILES,
            retry: RetryPolicy::default(),
        }
    }
}

impl TraversalConfig {
    /// Set the worker pool size (clamped to at least 1).
    pub fn with_max_concurrent_tiles(mut self, workers: usize) -> Self {
        self.max_concurrent_tiles = workers.max(1);
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Full indexer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IndexerConfig {
    /// Batch-table property identifying a feature
    pub id_property: String,
    /// Attribute name → index settings
    pub indexes: BTreeMap<String, IndexSpec>,
    /// Tree walk settings
    pub traversal: TraversalConfig,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            id_property: DEFAULT_ID_PROPERTY.to_string(),
            indexes: DEFAULT_ENUM_ATTRIBUTES
                .iter()
                .map(|name| (name.to_string(), IndexSpec::enumeration()))
                .collect(),
            traversal: TraversalConfig::default(),
        }
    }
}

impl IndexerConfig {
    /// Configuration with the given id property and no indexes.
    pub fn new(id_property: impl Into<String>) -> Self {
        Self {
            id_property: id_property.into(),
            indexes: BTreeMap::new(),
            traversal: TraversalConfig::default(),
        }
    }

    /// Add an attribute index.
    pub fn with_index(mut self, attribute: impl Into<String>, kind: IndexKind) -> Self {
        self.indexes.insert(attribute.into(), IndexSpec { kind });
        self
    }

    /// Replace the traversal settings.
    pub fn with_traversal(mut self, traversal: TraversalConfig) -> Self {
        self.traversal = traversal;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = IndexerConfig::default();
        assert_eq!(config.id_property, "gml_id");
        assert_eq!(config.indexes.len(), 10);
        assert!(config.indexes.contains_key("構造種別"));
        assert!(config
            .indexes
            .values()
            .all(|index| index.kind == IndexKind::Enum));
    }

    #[test]
    fn test_default_worker_pool_is_two() {
        let traversal = TraversalConfig::default();
        assert_eq!(traversal.max_concurrent_tiles, 2);
        assert_eq!(traversal.retry, RetryPolicy::default());
    }

    #[test]
    fn test_builder_setters() {
        let config = IndexerConfig::new("id")
            .with_index("usage", IndexKind::Enum)
            .with_traversal(TraversalConfig::default().with_max_concurrent_tiles(0));

        assert_eq!(config.id_property, "id");
        assert_eq!(config.indexes.len(), 1);
        assert_eq!(config.traversal.max_concurrent_tiles, 1);
    }

    #[test]
    fn test_deserialize_partial_json() {
        let json = r#"{
            "idProperty": "bldg_id",
            "indexes": { "usage": { "kind": "enum" } },
            "traversal": { "maxConcurrentTiles": 4, "retry": { "maxAttempts": 5 } }
        }"#;
        let config: IndexerConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.id_property, "bldg_id");
        assert_eq!(config.indexes["usage"].kind, IndexKind::Enum);
        assert_eq!(config.traversal.max_concurrent_tiles, 4);
        assert_eq!(config.traversal.retry, RetryPolicy::default().with_max_attempts(5));
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let json = r#"{ "indexes": { "usage": { "kind": "range" } } }"#;
        assert!(serde_json::from_str::<IndexerConfig>(json).is_err());
    }
}
