//! Enum index: exact-value buckets.

use super::{
    value_index_path, BuiltIndex, EnumIndex, EnumValue, IndexBuilder, IndexFile, IndexKind,
    IndexManifest,
};
use std::collections::BTreeMap;

/// Buckets row ids by the exact string value of an attribute.
///
/// Rows without the attribute never reach the builder, so they appear in
/// no bucket.
#[derive(Debug, Clone, Default)]
pub struct EnumIndexBuilder {
    values: BTreeMap<String, Vec<usize>>,
}

impl EnumIndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IndexBuilder for EnumIndexBuilder {
    fn kind(&self) -> IndexKind {
        IndexKind::Enum
    }

    fn add_index_value(&mut self, row_id: usize, value: &str) {
        let ids = self.values.entry(value.to_string()).or_default();
        // Rows are normally added in order; keep the list sorted otherwise
        match ids.last() {
            Some(&last) if last > row_id => {
                if let Err(pos) = ids.binary_search(&row_id) {
                    ids.insert(pos, row_id);
                }
            }
            Some(&last) if last == row_id => {}
            _ => ids.push(row_id),
        }
    }

    fn value_ids(&self) -> &BTreeMap<String, Vec<usize>> {
        &self.values
    }

    fn build(&self, attribute_position: usize) -> BuiltIndex {
        let mut index = EnumIndex::default();
        let mut files = Vec::with_capacity(self.values.len());

        for (value_position, (value, row_ids)) in self.values.iter().enumerate() {
            let path = value_index_path(attribute_position, value_position);
            index.values.insert(
                value.clone(),
                EnumValue {
                    count: row_ids.len(),
                    url: path.clone(),
                },
            );
            files.push(IndexFile {
                path,
                row_ids: row_ids.clone(),
            });
        }

        BuiltIndex {
            manifest: IndexManifest::Enum(index),
            files,
        }
    }
}
