//! tileset-indexer - Attribute search indexes for 3D Tiles datasets
//!
//! This library walks a 3D Tiles tileset, extracts every building feature
//! from its b3dm tiles (position and batch table attributes), and writes a
//! compact set of CSV/JSON artifacts that let a client filter features by
//! attribute value without touching the geometry.
//!
//! # High-Level API
//!
//! ```ignore
//! use tileset_indexer::config::IndexerConfig;
//! use tileset_indexer::indexer::TilesetIndexer;
//! use tileset_indexer::storage::{HttpSource, LocalDir};
//! use tokio_util::sync::CancellationToken;
//!
//! let source = Arc::new(HttpSource::new("https://example.com/13100_tokyo/bldg")?);
//! let indexer = TilesetIndexer::new(source, IndexerConfig::default());
//!
//! let root = indexer
//!     .build_and_write(&CancellationToken::new(), &LocalDir::new("out"))
//!     .await?;
//! ```

pub mod b3dm;
pub mod config;
pub mod draco;
pub mod error;
pub mod features;
pub mod geodesy;
pub mod index;
pub mod indexer;
pub mod logging;
pub mod retry;
pub mod storage;
pub mod tileset;
pub mod writer;

pub use error::{IndexerError, Result};
pub use indexer::{IndexResult, TilesetIndexer};

/// Version of the tileset-indexer library.
///
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
