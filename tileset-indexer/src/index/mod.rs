//! Attribute indexes.
//!
//! An [`IndexBuilder`] collects `(row id, value)` pairs for one attribute
//! while rows are assigned, then lays the index out as a manifest entry
//! for `indexRoot.json` plus the row-id files it references. Builders are
//! created from an [`IndexKind`] through [`builder_for`]; adding a kind
//! means adding a variant and a registry entry.

mod enumeration;
mod registry;

pub use enumeration::EnumIndexBuilder;
pub use registry::builder_for;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Index variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    /// One bucket of row ids per distinct value
    Enum,
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexKind::Enum => write!(f, "enum"),
        }
    }
}

/// Accumulates one attribute's values and lays out its index.
pub trait IndexBuilder: fmt::Debug + Send + Sync {
    fn kind(&self) -> IndexKind;

    /// Records that row `row_id` has `value` for this attribute.
    fn add_index_value(&mut self, row_id: usize, value: &str);

    /// Row ids per value, values sorted, row ids ascending.
    fn value_ids(&self) -> &BTreeMap<String, Vec<usize>>;

    /// Lays out the index of the attribute at `attribute_position` in the
    /// sorted attribute list.
    fn build(&self, attribute_position: usize) -> BuiltIndex;
}

/// A row-id file referenced from a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexFile {
    pub path: String,
    pub row_ids: Vec<usize>,
}

/// Output of [`IndexBuilder::build`].
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltIndex {
    pub manifest: IndexManifest,
    pub files: Vec<IndexFile>,
}

/// Per-attribute entry of `indexRoot.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum IndexManifest {
    Enum(EnumIndex),
}

/// Distinct values of an enum-indexed attribute.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnumIndex {
    pub values: BTreeMap<String, EnumValue>,
}

/// One distinct value: how many rows carry it and where their ids are.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumValue {
    pub count: usize,
    pub url: String,
}

/// Contents of `indexRoot.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexRoot {
    pub result_data_url: String,
    pub id_property: String,
    pub indexes: BTreeMap<String, IndexManifest>,
}

/// File name of value `value_position` of attribute `attribute_position`.
pub fn value_index_path(attribute_position: usize, value_position: usize) -> String {
    format!("{}-{}.csv", attribute_position, value_position)
}
