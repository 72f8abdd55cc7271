//! Zip archive providers.
//!
//! Datasets are commonly delivered as a single zip; [`ZipSource`] serves
//! tiles straight from the archive bytes. [`ZipOutput`] collects index
//! artifacts into one in-memory archive; [`ZipStreamOutput`] packs them
//! into an archive streamed to a writer, typically an upload pipe.

use super::{clean_path, OutputStore, OutputWriter, SourceReader, TileSource};
use crate::config::ROOT_TILESET;
use crate::error::{IndexerError, Result};
use parking_lot::Mutex;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::io::SyncIoBridge;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Reads entries from an in-memory zip archive.
///
/// If the archive wraps the dataset in a top-level directory, the directory
/// holding the shallowest `tileset.json` becomes the root.
pub struct ZipSource {
    archive: Mutex<ZipArchive<Cursor<Vec<u8>>>>,
    prefix: String,
}

impl ZipSource {
    /// Opens an archive from its raw bytes.
    pub fn new(bytes: Vec<u8>) -> Result<Self> {
        let archive = ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| IndexerError::format("zip archive", e.to_string()))?;

        let prefix = archive
            .file_names()
            .filter(|name| *name == ROOT_TILESET || name.ends_with(&format!("/{}", ROOT_TILESET)))
            .min_by_key(|name| name.matches('/').count())
            .map(|name| name[..name.len() - ROOT_TILESET.len()].to_string())
            .unwrap_or_default();

        debug!(entries = archive.len(), prefix = %prefix, "Opened zip dataset");

        Ok(Self {
            archive: Mutex::new(archive),
            prefix,
        })
    }

    /// Directory inside the archive treated as the dataset root.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn read_entry(&self, path: &str) -> Result<Vec<u8>> {
        let cleaned = clean_path(path).ok_or_else(|| {
            IndexerError::io(
                path,
                io::Error::new(io::ErrorKind::InvalidInput, "path escapes archive root"),
            )
        })?;
        let name = format!("{}{}", self.prefix, cleaned);

        let mut archive = self.archive.lock();
        let mut entry = archive
            .by_name(&name)
            .map_err(|e| IndexerError::io(path, io::Error::from(e)))?;

        let mut data = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut data)
            .map_err(|e| IndexerError::io(path, e))?;
        Ok(data)
    }
}

impl TileSource for ZipSource {
    async fn open(&self, path: &str) -> Result<SourceReader> {
        let data = self.read_entry(path)?;
        Ok(Box::new(Cursor::new(data)))
    }
}

type SharedZipWriter = Arc<Mutex<Option<ZipWriter<Cursor<Vec<u8>>>>>>;

/// Writes artifacts as entries of an in-memory zip archive.
///
/// Each entry is buffered until its writer is shut down, then deflated into
/// the archive. Call [`ZipOutput::finish`] once every writer is closed.
pub struct ZipOutput {
    writer: SharedZipWriter,
}

impl Default for ZipOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl ZipOutput {
    pub fn new() -> Self {
        Self {
            writer: Arc::new(Mutex::new(Some(ZipWriter::new(Cursor::new(Vec::new()))))),
        }
    }

    /// Finalizes the archive and returns its bytes.
    pub fn finish(self) -> Result<Vec<u8>> {
        let writer = self
            .writer
            .lock()
            .take()
            .ok_or_else(|| IndexerError::Internal("zip archive already finished".to_string()))?;
        let cursor = writer
            .finish()
            .map_err(|e| IndexerError::format("zip archive", e.to_string()))?;
        Ok(cursor.into_inner())
    }
}

impl OutputStore for ZipOutput {
    async fn create(&self, path: &str) -> Result<OutputWriter> {
        entry_writer(path, EntrySink::Memory(Arc::clone(&self.writer)))
    }
}

/// Message to the packing thread of a [`ZipStreamOutput`].
enum Packet {
    Entry { name: String, data: Vec<u8> },
    Finish,
}

/// Writes artifacts into a zip archive that is streamed out while it is
/// being built.
///
/// Entries are deflated on a blocking thread and handed to the target
/// writer as soon as the next entry starts, so a consumer on the other end
/// of a pipe receives the first entries while later ones are still being
/// produced. Call [`finish`](Self::finish) once every entry writer is shut
/// down, or [`abort`](Self::abort) to drop the target without completing
/// the archive.
pub struct ZipStreamOutput {
    packets: mpsc::UnboundedSender<Packet>,
    packer: JoinHandle<io::Result<u64>>,
}

impl ZipStreamOutput {
    /// Starts packing into `writer`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (packets, mut received) = mpsc::unbounded_channel();
        let bridge = SyncIoBridge::new(writer);

        let packer = tokio::task::spawn_blocking(move || {
            let mut zip = ZipWriter::new(ForwardSink::new(bridge));
            zip.set_flush_on_finish_file(true);

            while let Some(packet) = received.blocking_recv() {
                match packet {
                    Packet::Entry { name, data } => write_entry(&mut zip, &name, &data)?,
                    Packet::Finish => {
                        let mut sink = zip.finish().map_err(io::Error::from)?;
                        sink.flush()?;
                        let written = sink.flushed;
                        sink.inner.shutdown()?;
                        return Ok(written);
                    }
                }
            }
            Err(io::Error::other("zip stream aborted"))
        });

        Self { packets, packer }
    }

    /// Completes the archive and waits until its last byte is written.
    ///
    /// Returns the archive size.
    pub async fn finish(self) -> Result<u64> {
        let Self { packets, packer } = self;
        // A closed channel means the packer already failed; its error is
        // returned below
        let _ = packets.send(Packet::Finish);
        drop(packets);

        let written = packer
            .await
            .map_err(|e| IndexerError::Internal(format!("zip packer panicked: {}", e)))?
            .map_err(|e| IndexerError::io("zip archive", e))?;
        debug!(bytes = written, "Streamed zip archive");
        Ok(written)
    }

    /// Stops packing; the target writer is dropped without a shutdown.
    pub async fn abort(self) {
        let Self { packets, packer } = self;
        drop(packets);
        let _ = packer.await;
    }
}

impl OutputStore for ZipStreamOutput {
    async fn create(&self, path: &str) -> Result<OutputWriter> {
        entry_writer(path, EntrySink::Stream(self.packets.clone()))
    }
}

fn entry_writer(path: &str, sink: EntrySink) -> Result<OutputWriter> {
    let name = clean_path(path).ok_or_else(|| {
        IndexerError::io(
            path,
            io::Error::new(io::ErrorKind::InvalidInput, "path escapes archive root"),
        )
    })?;
    Ok(Box::new(ZipEntryWriter {
        name,
        buffer: Vec::new(),
        sink,
        committed: false,
    }))
}

fn write_entry<W: Write + Seek>(zip: &mut ZipWriter<W>, name: &str, data: &[u8]) -> io::Result<()> {
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    zip.start_file(name, options).map_err(io::Error::from)?;
    zip.write_all(data)
}

/// Where a finished entry goes.
enum EntrySink {
    Memory(SharedZipWriter),
    Stream(mpsc::UnboundedSender<Packet>),
}

impl EntrySink {
    fn commit(&self, name: &str, data: Vec<u8>) -> io::Result<()> {
        match self {
            EntrySink::Memory(archive) => {
                let mut guard = archive.lock();
                let zip = guard
                    .as_mut()
                    .ok_or_else(|| io::Error::other("zip archive already finished"))?;
                write_entry(zip, name, &data)
            }
            EntrySink::Stream(packets) => packets
                .send(Packet::Entry {
                    name: name.to_string(),
                    data,
                })
                .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "zip stream is closed")),
        }
    }
}

/// Buffers one archive entry; the entry is written on shutdown.
struct ZipEntryWriter {
    name: String,
    buffer: Vec<u8>,
    sink: EntrySink,
    committed: bool,
}

impl ZipEntryWriter {
    fn commit(&mut self) -> io::Result<()> {
        if self.committed {
            return Ok(());
        }
        let data = std::mem::take(&mut self.buffer);
        self.sink.commit(&self.name, data)?;
        self.committed = true;
        Ok(())
    }
}

impl AsyncWrite for ZipEntryWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.committed {
            return Poll::Ready(Err(io::Error::other("write after shutdown")));
        }
        this.buffer.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(self.get_mut().commit())
    }
}

/// `Write + Seek` over a forward-only writer.
///
/// Bytes stay buffered until `flush`, so the zip writer can seek back and
/// patch the header of the entry in progress. Seeking into bytes that were
/// already flushed fails.
struct ForwardSink<W: Write> {
    inner: W,
    buffer: Vec<u8>,
    /// Bytes handed to `inner` so far
    flushed: u64,
    position: u64,
}

impl<W: Write> ForwardSink<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
            flushed: 0,
            position: 0,
        }
    }

    fn end(&self) -> u64 {
        self.flushed + self.buffer.len() as u64
    }
}

impl<W: Write> Write for ForwardSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // position is kept within [flushed, end] by seek
        let start = (self.position - self.flushed) as usize;
        let overlap = buf.len().min(self.buffer.len() - start);
        self.buffer[start..start + overlap].copy_from_slice(&buf[..overlap]);
        self.buffer.extend_from_slice(&buf[overlap..]);
        self.position += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.position != self.end() {
            return Err(io::Error::other("flush before the end of the stream"));
        }
        self.inner.write_all(&self.buffer)?;
        self.flushed = self.end();
        self.buffer.clear();
        self.inner.flush()
    }
}

/// Required by `ZipWriter::set_flush_on_finish_file`; the archive is
/// write-only, so reading back is never supported.
impl<W: Write> Read for ForwardSink<W> {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::other("forward-only sink cannot be read"))
    }
}

impl<W: Write> Seek for ForwardSink<W> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let end = self.end();
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => end.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };
        match target {
            Some(target) if target >= self.flushed && target <= end => {
                self.position = target;
                Ok(target)
            }
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "seek outside the unflushed part of the stream",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::write_file;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    fn build_archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[tokio::test]
    async fn test_reads_entries_at_root() {
        let bytes = build_archive(&[("tileset.json", b"{}"), ("data/0.b3dm", b"b3dm")]);
        let source = ZipSource::new(bytes).unwrap();

        assert_eq!(source.prefix(), "");
        assert_eq!(source.read_all("data/0.b3dm").await.unwrap(), b"b3dm");
        assert_eq!(source.read_all("./tileset.json").await.unwrap(), b"{}");
    }

    #[tokio::test]
    async fn test_detects_wrapping_directory() {
        let bytes = build_archive(&[
            ("bldg_lod1/tileset.json", b"{}"),
            ("bldg_lod1/sub/tileset.json", b"{\"sub\":1}"),
            ("bldg_lod1/data/1.b3dm", b"x"),
        ]);
        let source = ZipSource::new(bytes).unwrap();

        assert_eq!(source.prefix(), "bldg_lod1/");
        assert_eq!(source.read_all("tileset.json").await.unwrap(), b"{}");
        assert_eq!(source.read_all("data/1.b3dm").await.unwrap(), b"x");
    }

    #[tokio::test]
    async fn test_missing_entry() {
        let bytes = build_archive(&[("tileset.json", b"{}")]);
        let source = ZipSource::new(bytes).unwrap();
        assert!(matches!(
            source.read_all("nope.b3dm").await,
            Err(IndexerError::Io { .. })
        ));
    }

    #[test]
    fn test_rejects_non_zip() {
        assert!(ZipSource::new(b"not a zip".to_vec()).is_err());
    }

    #[tokio::test]
    async fn test_output_roundtrip() {
        let output = ZipOutput::new();
        write_file(&output, "indexRoot.json", b"{}").await.unwrap();
        write_file(&output, "0-0.csv", b"dataRowId\n0\n").await.unwrap();

        let bytes = output.finish().unwrap();
        let source = ZipSource::new(bytes).unwrap();
        assert_eq!(source.read_all("0-0.csv").await.unwrap(), b"dataRowId\n0\n");
        assert_eq!(source.read_all("indexRoot.json").await.unwrap(), b"{}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stream_output_hands_over_entries_before_finish() {
        let (writer, mut reader) = tokio::io::duplex(1024);
        let output = ZipStreamOutput::spawn(writer);
        write_file(&output, "resultsData.csv", &[b'a'; 4096]).await.unwrap();
        write_file(&output, "0-0.csv", b"dataRowId\n0\n").await.unwrap();

        // The first entry is released as soon as the second one starts
        let mut head = [0u8; 4];
        tokio::time::timeout(Duration::from_secs(5), reader.read_exact(&mut head))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&head, b"PK\x03\x04");

        let mut rest = Vec::new();
        let (finished, read) = tokio::join!(output.finish(), reader.read_to_end(&mut rest));
        read.unwrap();
        assert_eq!(finished.unwrap() as usize, head.len() + rest.len());

        let mut bytes = head.to_vec();
        bytes.extend(rest);
        let source = ZipSource::new(bytes).unwrap();
        assert_eq!(source.read_all("resultsData.csv").await.unwrap(), [b'a'; 4096]);
        assert_eq!(source.read_all("0-0.csv").await.unwrap(), b"dataRowId\n0\n");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stream_output_abort_leaves_no_valid_archive() {
        let (writer, mut reader) = tokio::io::duplex(64 * 1024);
        let output = ZipStreamOutput::spawn(writer);
        write_file(&output, "resultsData.csv", b"gml_id\n").await.unwrap();
        output.abort().await;

        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes).await.unwrap();
        assert!(ZipSource::new(bytes).is_err());
    }

    #[test]
    fn test_forward_sink_rejects_seek_into_flushed_bytes() {
        let mut sink = ForwardSink::new(Vec::new());
        sink.write_all(b"header").unwrap();
        sink.seek(SeekFrom::Start(0)).unwrap();
        sink.write_all(b"HEAD").unwrap();
        sink.seek(SeekFrom::End(0)).unwrap();
        sink.flush().unwrap();

        assert_eq!(sink.inner, b"HEADer");
        assert!(sink.seek(SeekFrom::Start(2)).is_err());
        assert_eq!(sink.seek(SeekFrom::Current(0)).unwrap(), 6);
    }
}
