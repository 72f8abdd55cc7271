//! Concurrent tile tree traversal.
//!
//! # Concurrency
//!
//! Children of a tile are walked concurrently on a `JoinSet`. Actual work
//! (loading a tileset document, visiting a tile's content) is bounded by a
//! single semaphore shared by the whole traversal, so total concurrency
//! stays at `max_concurrent_tiles` however deep the tree is. A permit is
//! held for one attempt of one unit of work, never while a tile waits for
//! its children or sleeps between retries.
//!
//! # Failures
//!
//! A failing tile does not stop its siblings or its own children. Every
//! failure is collected, and the traversal returns one
//! `IndexerError::Traversal` listing them all.

use super::types::{is_tileset_uri, Tile, Tileset};
use super::{parent_dir, resolve_uri};
use crate::config::TraversalConfig;
use crate::error::{IndexerError, Result};
use crate::geodesy::Matrix4;
use crate::retry::{retry, RetryPolicy};
use crate::storage::{clean_path, TileSource};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// A tile content handed to a [`TileVisitor`].
#[derive(Debug, Clone)]
pub struct VisitedTile {
    /// Content path relative to the dataset root (or an absolute URL)
    pub uri: String,
    /// Cumulative transform from tile space to ECEF
    pub transform: Matrix4,
    /// Depth of the tile within its tileset (root = 0)
    pub depth: usize,
}

/// Callback invoked for every non-tileset tile content.
///
/// Visits run concurrently and may be retried, so implementations must be
/// safe to call more than once for the same tile.
pub trait TileVisitor: Send + Sync + 'static {
    fn visit(&self, tile: &VisitedTile) -> impl Future<Output = Result<()>> + Send;
}

/// Counters reported by a successful traversal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraversalStats {
    /// Tileset documents loaded (root included)
    pub tilesets: usize,
    /// Tile nodes walked
    pub tiles: usize,
    /// Contents successfully visited
    pub contents: usize,
}

/// Walks tileset trees read from a [`TileSource`].
pub struct TileTraverser<S: TileSource> {
    source: Arc<S>,
    config: TraversalConfig,
}

struct PendingTileset {
    path: String,
    transform: Matrix4,
}

/// State shared by every task of one traversal.
struct Walk<S, V> {
    source: Arc<S>,
    visitor: Arc<V>,
    retry: RetryPolicy,
    token: CancellationToken,
    pool: Semaphore,
    pending: Mutex<Vec<PendingTileset>>,
    tiles: AtomicUsize,
    contents: AtomicUsize,
}

impl<S: TileSource> TileTraverser<S> {
    pub fn new(source: Arc<S>, config: TraversalConfig) -> Self {
        Self { source, config }
    }

    /// Visits every tile content reachable from the tileset at `root`.
    ///
    /// # Arguments
    ///
    /// * `root` - Path of the root tileset document
    /// * `visitor` - Callback for each non-tileset content
    /// * `token` - Cancels the traversal, including pending retry sleeps
    ///
    /// # Errors
    ///
    /// `IndexerError::Cancelled` if the token fired, otherwise
    /// `IndexerError::Traversal` carrying every tile failure.
    #[instrument(skip(self, visitor, token))]
    pub async fn for_each_tile<V: TileVisitor>(
        &self,
        root: &str,
        visitor: Arc<V>,
        token: &CancellationToken,
    ) -> Result<TraversalStats> {
        let walk = Arc::new(Walk {
            source: Arc::clone(&self.source),
            visitor,
            retry: self.config.retry.clone(),
            token: token.clone(),
            pool: Semaphore::new(self.config.max_concurrent_tiles.max(1)),
            pending: Mutex::new(Vec::new()),
            tiles: AtomicUsize::new(0),
            contents: AtomicUsize::new(0),
        });

        let root_path = clean_path(root).ok_or_else(|| {
            IndexerError::format(root, "root tileset path escapes the dataset root")
        })?;

        let mut forest = vec![PendingTileset {
            path: root_path,
            transform: Matrix4::IDENTITY,
        }];
        let mut seen = HashSet::new();
        let mut failures = Vec::new();
        let mut tilesets = 0;

        while !forest.is_empty() {
            let mut pass = JoinSet::new();
            for pending in forest.drain(..) {
                if !seen.insert(pending.path.clone()) {
                    warn!(path = %pending.path, "Tileset referenced more than once, skipping");
                    continue;
                }
                tilesets += 1;
                pass.spawn(walk_tileset(Arc::clone(&walk), pending));
            }

            debug!(tilesets = pass.len(), "Starting tileset pass");
            collect(&mut pass, &mut failures).await;
            forest = std::mem::take(&mut *walk.pending.lock());
        }

        if token.is_cancelled() {
            return Err(IndexerError::Cancelled);
        }

        let stats = TraversalStats {
            tilesets,
            tiles: walk.tiles.load(Ordering::Relaxed),
            contents: walk.contents.load(Ordering::Relaxed),
        };

        if !failures.is_empty() {
            warn!(failed = failures.len(), visited = stats.contents, "Traversal finished with failures");
            return Err(IndexerError::Traversal { failures });
        }

        info!(
            tilesets = stats.tilesets,
            tiles = stats.tiles,
            contents = stats.contents,
            "Traversal complete"
        );
        Ok(stats)
    }
}

/// Drains a `JoinSet` of failure lists into `failures`.
async fn collect(set: &mut JoinSet<Vec<IndexerError>>, failures: &mut Vec<IndexerError>) {
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(errors) => failures.extend(errors),
            Err(join_err) => {
                warn!(error = %join_err, "Traversal task panicked");
                failures.push(IndexerError::Internal(format!(
                    "traversal task failed: {}",
                    join_err
                )));
            }
        }
    }
}

impl<S: TileSource, V: TileVisitor> Walk<S, V> {
    async fn load_tileset(&self, path: &str) -> Result<Tileset> {
        retry(&self.retry, &self.token, move || async move {
            let bytes = {
                let _permit = self.acquire().await?;
                self.source.read_all(path).await?
            };
            Tileset::from_slice(&bytes, path)
        })
        .await
    }

    async fn visit_content(&self, tile: VisitedTile) -> Result<()> {
        let tile = &tile;
        retry(&self.retry, &self.token, move || async move {
            let _permit = self.acquire().await?;
            self.visitor.visit(tile).await
        })
        .await?;

        self.contents.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Waits for a worker; fails if the traversal was cancelled meanwhile.
    async fn acquire(&self) -> Result<tokio::sync::SemaphorePermit<'_>> {
        let permit = self
            .pool
            .acquire()
            .await
            .map_err(|_| IndexerError::Internal("tile worker pool closed".to_string()))?;
        if self.token.is_cancelled() {
            return Err(IndexerError::Cancelled);
        }
        Ok(permit)
    }
}

fn walk_tileset<S: TileSource, V: TileVisitor>(
    walk: Arc<Walk<S, V>>,
    pending: PendingTileset,
) -> BoxFuture<'static, Vec<IndexerError>> {
    Box::pin(async move {
        let tileset = match walk.load_tileset(&pending.path).await {
            Ok(tileset) => tileset,
            Err(e) => {
                warn!(path = %pending.path, error = %e, "Failed to load tileset");
                return vec![e];
            }
        };
        debug!(path = %pending.path, version = %tileset.asset.version, "Loaded tileset");

        let base_dir: Arc<str> = Arc::from(parent_dir(&pending.path));
        walk_tile(walk, tileset.root, base_dir, pending.transform, 0).await
    })
}

fn walk_tile<S: TileSource, V: TileVisitor>(
    walk: Arc<Walk<S, V>>,
    tile: Tile,
    base_dir: Arc<str>,
    parent_transform: Matrix4,
    depth: usize,
) -> BoxFuture<'static, Vec<IndexerError>> {
    Box::pin(async move {
        if walk.token.is_cancelled() {
            return vec![IndexerError::Cancelled];
        }
        walk.tiles.fetch_add(1, Ordering::Relaxed);

        let transform = parent_transform * tile.local_transform();
        let mut failures = Vec::new();

        for uri in tile.content_uris() {
            let Some(path) = resolve_uri(&base_dir, uri) else {
                failures.push(IndexerError::format(
                    uri,
                    "content URI escapes the dataset root",
                ));
                continue;
            };

            if is_tileset_uri(&path) {
                debug!(path = %path, "Queueing external tileset");
                walk.pending.lock().push(PendingTileset { path, transform });
                continue;
            }

            let visited = VisitedTile {
                uri: path,
                transform,
                depth,
            };
            if let Err(e) = walk.visit_content(visited).await {
                warn!(uri = %uri, error = %e, "Tile failed");
                failures.push(e);
            }
        }

        let mut children = JoinSet::new();
        for child in tile.children {
            children.spawn(walk_tile(
                Arc::clone(&walk),
                child,
                Arc::clone(&base_dir),
                transform,
                depth + 1,
            ));
        }
        collect(&mut children, &mut failures).await;

        failures
    })
}
