//! Local directory provider.

use super::{clean_path, OutputStore, OutputWriter, SourceReader, TileSource};
use crate::error::{IndexerError, Result};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::BufReader;
use tracing::trace;

/// Reads from and writes to a directory on local disk.
#[derive(Debug, Clone)]
pub struct LocalDir {
    root: PathBuf,
}

impl LocalDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let cleaned = clean_path(path).ok_or_else(|| {
            IndexerError::io(
                path,
                io::Error::new(io::ErrorKind::InvalidInput, "path escapes root directory"),
            )
        })?;
        Ok(self.root.join(cleaned))
    }
}

impl TileSource for LocalDir {
    async fn open(&self, path: &str) -> Result<SourceReader> {
        let full = self.resolve(path)?;
        trace!(path = %full.display(), "Opening local file");

        let file = fs::File::open(&full)
            .await
            .map_err(|e| IndexerError::io(path, e))?;
        Ok(Box::new(BufReader::new(file)))
    }
}

impl OutputStore for LocalDir {
    async fn create(&self, path: &str) -> Result<OutputWriter> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| IndexerError::io(path, e))?;
        }
        trace!(path = %full.display(), "Creating local file");

        let file = fs::File::create(&full)
            .await
            .map_err(|e| IndexerError::io(path, e))?;
        Ok(Box::new(file))
    }
}
