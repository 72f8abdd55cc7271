//! 3D Tiles tileset model and tree traversal.
//!
//! [`TileTraverser`] walks a tileset tree depth-first, composing tile
//! transforms, and hands every non-tileset content to a [`TileVisitor`].
//! External tilesets referenced from content are walked in later passes.

mod traverse;
mod types;

pub use traverse::{TileTraverser, TileVisitor, TraversalStats, VisitedTile};
pub use types::{is_tileset_uri, Asset, Tile, TileContent, Tileset};

use crate::storage::clean_path;

/// Directory part of a `/`-separated path (empty for top-level files).
pub fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

/// Resolves a content URI against the directory of the referencing tileset.
///
/// Absolute URLs are returned unchanged. Query strings and fragments are
/// dropped from relative URIs. Returns `None` if the URI climbs above the
/// dataset root.
pub fn resolve_uri(base_dir: &str, uri: &str) -> Option<String> {
    if uri.contains("://") {
        return Some(uri.to_string());
    }
    let path = uri.split(['?', '#']).next().unwrap_or(uri);
    if path.starts_with('/') {
        return clean_path(path);
    }
    clean_path(&format!("{}/{}", base_dir, path))
}
