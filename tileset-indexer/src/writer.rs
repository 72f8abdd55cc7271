//! Index artifact writer.
//!
//! Artifacts, all at the root of the output store:
//! - `resultsData.csv`: one row per feature
//! - `{n}-{m}.csv`: row ids of value `m` of attribute `n`
//! - `indexRoot.json`: manifest tying the two together

use crate::error::{IndexerError, Result};
use crate::index::{IndexBuilder, IndexManifest, IndexRoot};
use crate::indexer::{IndexResult, Row};
use crate::storage::{write_file, OutputStore};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, instrument};

/// Row table file name.
pub const RESULT_DATA_FILE: &str = "resultsData.csv";

/// Manifest file name.
pub const INDEX_ROOT_FILE: &str = "indexRoot.json";

/// Single column of every value index file.
pub const ROW_ID_COLUMN: &str = "dataRowId";

/// Writes an [`IndexResult`] through an [`OutputStore`].
pub struct Writer<'a, O: OutputStore> {
    output: &'a O,
}

impl<'a, O: OutputStore> Writer<'a, O> {
    pub fn new(output: &'a O) -> Self {
        Self { output }
    }

    /// Writes every artifact and returns the manifest.
    #[instrument(skip_all, fields(rows = result.data.len(), indexes = result.indexes.len()))]
    pub async fn write(&self, result: &IndexResult) -> Result<IndexRoot> {
        self.write_results_data(&result.data).await?;
        let indexes = self.write_indexes(&result.indexes).await?;

        let root = IndexRoot {
            result_data_url: RESULT_DATA_FILE.to_string(),
            id_property: result.id_property.clone(),
            indexes,
        };
        self.write_index_root(&root).await?;

        info!(rows = result.data.len(), indexes = root.indexes.len(), "Index written");
        Ok(root)
    }

    /// Writes the row table.
    ///
    /// The header is every key found in `rows`, sorted in reverse
    /// lexicographic order; rows lacking a column get an empty cell.
    pub async fn write_results_data(&self, rows: &[Row]) -> Result<()> {
        let header = results_header(rows);

        let mut csv = csv::Writer::from_writer(Vec::new());
        csv.write_record(&header)
            .map_err(|e| IndexerError::io(RESULT_DATA_FILE, e.into()))?;
        for row in rows {
            let record = header
                .iter()
                .map(|column| row.get(*column).map(String::as_str).unwrap_or(""));
            csv.write_record(record)
                .map_err(|e| IndexerError::io(RESULT_DATA_FILE, e.into()))?;
        }
        let data = csv
            .into_inner()
            .map_err(|e| IndexerError::io(RESULT_DATA_FILE, e.into_error()))?;

        write_file(self.output, RESULT_DATA_FILE, &data).await?;
        debug!(rows = rows.len(), columns = header.len(), bytes = data.len(), "Wrote row table");
        Ok(())
    }

    /// Writes the value files of every index and returns their manifests.
    ///
    /// Attributes are numbered by their position in sorted order, so file
    /// names are stable for a given configuration. Attributes that no
    /// feature carries are left out of the manifest.
    pub async fn write_indexes(
        &self,
        indexes: &BTreeMap<String, Box<dyn IndexBuilder>>,
    ) -> Result<BTreeMap<String, IndexManifest>> {
        let mut manifests = BTreeMap::new();

        for (position, (attribute, builder)) in indexes.iter().enumerate() {
            if builder.value_ids().is_empty() {
                debug!(attribute = %attribute, "No feature carries attribute, skipping index");
                continue;
            }

            let built = builder.build(position);
            for file in &built.files {
                self.write_value_index(&file.path, &file.row_ids).await?;
            }
            debug!(
                attribute = %attribute,
                kind = %builder.kind(),
                values = built.files.len(),
                "Wrote index"
            );
            manifests.insert(attribute.clone(), built.manifest);
        }
        Ok(manifests)
    }

    /// Writes one value file: a `dataRowId` column of ascending row ids.
    pub async fn write_value_index(&self, path: &str, row_ids: &[usize]) -> Result<()> {
        let mut sorted = row_ids.to_vec();
        sorted.sort_unstable();

        let mut csv = csv::Writer::from_writer(Vec::new());
        csv.write_record([ROW_ID_COLUMN])
            .map_err(|e| IndexerError::io(path, e.into()))?;
        for id in sorted {
            csv.write_record([id.to_string()])
                .map_err(|e| IndexerError::io(path, e.into()))?;
        }
        let data = csv
            .into_inner()
            .map_err(|e| IndexerError::io(path, e.into_error()))?;

        write_file(self.output, path, &data).await
    }

    /// Writes `indexRoot.json`.
    pub async fn write_index_root(&self, root: &IndexRoot) -> Result<()> {
        let data = serde_json::to_vec(root)
            .map_err(|e| IndexerError::Internal(format!("failed to encode index root: {}", e)))?;
        write_file(self.output, INDEX_ROOT_FILE, &data).await
    }
}

/// Union of row keys, reverse-lexicographic.
fn results_header(rows: &[Row]) -> Vec<&str> {
    let columns: BTreeSet<&str> = rows
        .iter()
        .flat_map(|row| row.keys().map(String::as_str))
        .collect();
    columns.into_iter().rev().collect()
}
