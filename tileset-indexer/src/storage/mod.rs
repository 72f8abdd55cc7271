//! Byte-level read and write capabilities.
//!
//! The indexer never touches a filesystem or network directly. It reads
//! tileset documents and tile payloads through a [`TileSource`] and writes
//! artifacts through an [`OutputStore`]. Concrete providers:
//!
//! | Provider            | Reads | Writes | Backing                              |
//! |---------------------|-------|--------|--------------------------------------|
//! | [`LocalDir`]        | yes   | yes    | a directory on local disk            |
//! | [`ZipSource`]       | yes   |        | an in-memory zip archive             |
//! | [`ZipOutput`]       |       | yes    | entries of an in-memory zip archive  |
//! | [`ZipStreamOutput`] |       | yes    | a zip archive streamed to a writer   |
//! | [`HttpSource`]      | yes   |        | HTTP GET relative to a base URL      |
//! | [`UploadOutput`]    |       | yes    | a pipe into an injected [`Uploader`] |

mod archive;
mod http;
mod local;
mod upload;

pub use self::archive::{ZipOutput, ZipSource, ZipStreamOutput};
pub use self::http::HttpSource;
pub use self::local::LocalDir;
pub use self::upload::{upload_stream, UploadBody, UploadOutput, UploadedAsset, Uploader};
pub(crate) use self::upload::{join_upload, spawn_upload};

use crate::error::{IndexerError, Result};
use std::future::Future;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Reader returned by [`TileSource::open`].
pub type SourceReader = Box<dyn AsyncRead + Send + Unpin>;

/// Writer returned by [`OutputStore::create`].
///
/// Callers must `shutdown()` the writer; providers surface deferred write
/// errors from the shutdown.
pub type OutputWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Read capability over tileset documents and tile payloads.
///
/// Paths are `/`-separated and relative to the dataset root.
pub trait TileSource: Send + Sync + 'static {
    /// Opens `path` for reading.
    fn open(&self, path: &str) -> impl Future<Output = Result<SourceReader>> + Send;

    /// Reads `path` to the end.
    fn read_all(&self, path: &str) -> impl Future<Output = Result<Vec<u8>>> + Send {
        async move {
            let mut reader = self.open(path).await?;
            let mut buf = Vec::new();
            reader
                .read_to_end(&mut buf)
                .await
                .map_err(|e| IndexerError::io(path, e))?;
            Ok(buf)
        }
    }
}

/// Write capability for index artifacts.
pub trait OutputStore: Send + Sync {
    /// Creates (or truncates) `path` for writing.
    fn create(&self, path: &str) -> impl Future<Output = Result<OutputWriter>> + Send;
}

/// Writes `data` to `path` and closes the writer.
pub async fn write_file<O: OutputStore>(store: &O, path: &str, data: &[u8]) -> Result<()> {
    let mut writer = store.create(path).await?;
    writer
        .write_all(data)
        .await
        .map_err(|e| IndexerError::io(path, e))?;
    writer
        .shutdown()
        .await
        .map_err(|e| IndexerError::io(path, e))
}

/// Normalizes a relative `/`-separated path.
///
/// Drops empty and `.` segments, resolves `..` and strips leading slashes.
/// Returns `None` if the path climbs above its root.
pub fn clean_path(path: &str) -> Option<String> {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            s => segments.push(s),
        }
    }
    Some(segments.join("/"))
}
