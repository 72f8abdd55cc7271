//! Streaming uploads through an in-process pipe.
//!
//! The asset store client lives outside this crate; it is injected as an
//! [`Uploader`]. Data is handed over through a `tokio::io::duplex` pipe so
//! that producing bytes and sending them overlap. Both ends are closed on
//! every path: the writer half is shut down on success and dropped on
//! failure, and the uploader's result is always joined. A body whose
//! writer was dropped without a shutdown ends in an `UnexpectedEof` error
//! rather than a clean end of stream.

use super::{OutputStore, OutputWriter};
use crate::error::{IndexerError, Result};
use parking_lot::Mutex;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Pipe buffer between producer and uploader.
pub(crate) const PIPE_CAPACITY: usize = 64 * 1024;

/// Body handed to an [`Uploader`].
pub type UploadBody = Box<dyn AsyncRead + Send + Unpin>;

/// Sink that stores a file under a project and returns its asset id.
pub trait Uploader: Send + Sync + 'static {
    fn upload(
        &self,
        project_id: &str,
        filename: &str,
        body: UploadBody,
    ) -> impl Future<Output = Result<String>> + Send;
}

/// An artifact stored by [`UploadOutput`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedAsset {
    pub filename: String,
    pub asset_id: String,
}

/// Producer half of an upload pipe.
///
/// Shutting it down marks the body complete.
pub(crate) struct PipeWriter {
    inner: DuplexStream,
    complete: Arc<AtomicBool>,
}

impl AsyncWrite for PipeWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.complete.store(true, Ordering::Release);
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// Uploader half of an upload pipe.
struct PipeBody {
    inner: DuplexStream,
    complete: Arc<AtomicBool>,
}

impl AsyncRead for PipeBody {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        ready!(Pin::new(&mut self.inner).poll_read(cx, buf))?;

        let at_eof = buf.filled().len() == before && buf.remaining() > 0;
        if at_eof && !self.complete.load(Ordering::Acquire) {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "producer closed the upload pipe before finishing",
            )));
        }
        Poll::Ready(Ok(()))
    }
}

/// Starts `uploader` on a fresh pipe and returns the producer half.
pub(crate) fn spawn_upload<U: Uploader>(
    uploader: &Arc<U>,
    project_id: &str,
    filename: &str,
) -> (PipeWriter, JoinHandle<Result<String>>) {
    let (writer, reader) = tokio::io::duplex(PIPE_CAPACITY);
    let complete = Arc::new(AtomicBool::new(false));
    let body = PipeBody {
        inner: reader,
        complete: Arc::clone(&complete),
    };
    let uploader = Arc::clone(uploader);
    let project_id = project_id.to_string();
    let filename = filename.to_string();

    let handle = tokio::spawn(async move {
        uploader
            .upload(&project_id, &filename, Box::new(body))
            .await
    });

    (
        PipeWriter {
            inner: writer,
            complete,
        },
        handle,
    )
}

pub(crate) async fn join_upload(
    filename: &str,
    handle: JoinHandle<Result<String>>,
) -> Result<String> {
    handle
        .await
        .map_err(|e| IndexerError::Internal(format!("upload of {} panicked: {}", filename, e)))?
}

/// Streams `data` to `uploader` through a pipe and returns the asset id.
///
/// # Errors
///
/// The uploader's error takes precedence over the pipe write error it
/// usually causes (a closed reader surfaces as a broken pipe).
pub async fn upload_stream<U: Uploader>(
    uploader: &Arc<U>,
    project_id: &str,
    filename: &str,
    data: &[u8],
) -> Result<String> {
    let (mut writer, handle) = spawn_upload(uploader, project_id, filename);

    let write_result = async {
        writer.write_all(data).await?;
        writer.shutdown().await
    }
    .await;
    drop(writer);

    let upload_result = join_upload(filename, handle).await;

    match (write_result, upload_result) {
        (_, Err(e)) => {
            warn!(filename, error = %e, "Upload failed");
            Err(e)
        }
        (Err(e), Ok(_)) => Err(IndexerError::io(filename, e)),
        (Ok(()), Ok(asset_id)) => {
            debug!(filename, asset_id = %asset_id, bytes = data.len(), "Upload complete");
            Ok(asset_id)
        }
    }
}

/// Output store that uploads every created file as its own asset.
///
/// Each [`OutputStore::create`] starts an upload immediately; bytes flow
/// to the uploader while the caller writes. [`UploadOutput::finish`] waits
/// for every upload and returns the stored assets.
pub struct UploadOutput<U: Uploader> {
    uploader: Arc<U>,
    project_id: String,
    pending: Mutex<Vec<(String, JoinHandle<Result<String>>)>>,
}

impl<U: Uploader> UploadOutput<U> {
    pub fn new(uploader: Arc<U>, project_id: impl Into<String>) -> Self {
        Self {
            uploader,
            project_id: project_id.into(),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Waits for all uploads started so far.
    ///
    /// All uploads are joined even if one fails; the first failure is
    /// returned.
    pub async fn finish(self) -> Result<Vec<UploadedAsset>> {
        let pending = self.pending.into_inner();
        let mut assets = Vec::with_capacity(pending.len());
        let mut first_error = None;

        for (filename, handle) in pending {
            match join_upload(&filename, handle).await {
                Ok(asset_id) => assets.push(UploadedAsset { filename, asset_id }),
                Err(e) => {
                    warn!(filename = %filename, error = %e, "Upload failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(assets),
        }
    }
}

impl<U: Uploader> OutputStore for UploadOutput<U> {
    async fn create(&self, path: &str) -> Result<OutputWriter> {
        let (writer, handle) = spawn_upload(&self.uploader, &self.project_id, path);
        self.pending.lock().push((path.to_string(), handle));
        Ok(Box::new(writer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::write_file;
    use std::collections::BTreeMap;
    use tokio::io::AsyncReadExt;

    /// Uploader keeping bodies in memory.
    #[derive(Default)]
    struct MemoryUploader {
        files: Mutex<BTreeMap<String, (String, Vec<u8>)>>,
    }

    impl Uploader for MemoryUploader {
        async fn upload(
            &self,
            project_id: &str,
            filename: &str,
            mut body: UploadBody,
        ) -> Result<String> {
            let mut data = Vec::new();
            body.read_to_end(&mut data)
                .await
                .map_err(|e| IndexerError::io(filename, e))?;
            let asset_id = format!("asset-{}", filename);
            self.files
                .lock()
                .insert(filename.to_string(), (project_id.to_string(), data));
            Ok(asset_id)
        }
    }

    /// Uploader that rejects without reading the body.
    struct RejectingUploader;

    impl Uploader for RejectingUploader {
        async fn upload(&self, _project_id: &str, _filename: &str, _body: UploadBody) -> Result<String> {
            Err(IndexerError::Http("HTTP 413 from asset store".to_string()))
        }
    }

    #[tokio::test]
    async fn test_upload_stream_large_body() {
        let uploader = Arc::new(MemoryUploader::default());
        let data = vec![7u8; PIPE_CAPACITY * 3 + 17];

        let asset_id = upload_stream(&uploader, "proj", "index.zip", &data)
            .await
            .unwrap();

        assert_eq!(asset_id, "asset-index.zip");
        let files = uploader.files.lock();
        let (project, body) = &files["index.zip"];
        assert_eq!(project, "proj");
        assert_eq!(body.len(), data.len());
    }

    #[tokio::test]
    async fn test_upload_stream_reports_uploader_error() {
        let uploader = Arc::new(RejectingUploader);
        let data = vec![0u8; PIPE_CAPACITY * 2];

        let result = upload_stream(&uploader, "proj", "index.zip", &data).await;
        assert!(matches!(result, Err(IndexerError::Http(_))));
    }

    #[tokio::test]
    async fn test_upload_output_uploads_each_file() {
        let uploader = Arc::new(MemoryUploader::default());
        let output = UploadOutput::new(Arc::clone(&uploader), "proj");

        write_file(&output, "resultsData.csv", b"gml_id\nbldg_1\n")
            .await
            .unwrap();
        write_file(&output, "indexRoot.json", b"{}").await.unwrap();

        let assets = output.finish().await.unwrap();
        assert_eq!(assets.len(), 2);
        assert_eq!(assets[0].filename, "resultsData.csv");
        assert_eq!(uploader.files.lock()["indexRoot.json"].1, b"{}");
    }

    #[tokio::test]
    async fn test_upload_output_surfaces_failure() {
        let output = UploadOutput::new(Arc::new(RejectingUploader), "proj");
        // The write itself may or may not observe the closed pipe
        let _ = write_file(&output, "indexRoot.json", b"{}").await;
        assert!(output.finish().await.is_err());
    }

    #[tokio::test]
    async fn test_dropped_writer_fails_body() {
        let uploader = Arc::new(MemoryUploader::default());
        let (mut writer, handle) = spawn_upload(&uploader, "proj", "partial.zip");
        writer.write_all(b"PK\x03\x04").await.unwrap();
        drop(writer);

        let err = join_upload("partial.zip", handle).await.unwrap_err();
        assert!(matches!(err, IndexerError::Io { .. }));
        assert!(uploader.files.lock().is_empty());
    }
}
