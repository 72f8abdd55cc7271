//! `tileset.json` document model.
//!
//! Only the parts the indexer reads are modelled; everything else in the
//! document is ignored.

use crate::error::{IndexerError, Result};
use crate::geodesy::{matrix_from_column_major, Matrix4};
use serde::Deserialize;

/// Root document of a 3D Tiles dataset.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tileset {
    #[serde(default)]
    pub asset: Asset,
    #[serde(default)]
    pub geometric_error: f64,
    pub root: Tile,
}

impl Tileset {
    /// Parses a tileset document; `context` names it in errors.
    pub fn from_slice(bytes: &[u8], context: &str) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| IndexerError::format(context, format!("invalid tileset JSON: {}", e)))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    #[serde(default)]
    pub version: String,
    pub tileset_version: Option<String>,
}

/// Node of the tile tree.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tile {
    /// Column-major 4×4 transform from this tile to its parent
    pub transform: Option<[f64; 16]>,
    pub geometric_error: Option<f64>,
    pub refine: Option<String>,
    pub content: Option<TileContent>,
    /// 3D Tiles 1.1 multiple contents
    #[serde(default)]
    pub contents: Vec<TileContent>,
    #[serde(default)]
    pub children: Vec<Tile>,
}

impl Tile {
    /// This tile's own transform, identity when absent.
    pub fn local_transform(&self) -> Matrix4 {
        self.transform
            .as_ref()
            .map(matrix_from_column_major)
            .unwrap_or(Matrix4::IDENTITY)
    }

    /// Content URIs of this tile, in document order.
    pub fn content_uris(&self) -> impl Iterator<Item = &str> {
        self.content
            .iter()
            .chain(self.contents.iter())
            .filter_map(TileContent::uri)
    }
}

/// Reference to a tile payload or an external tileset.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TileContent {
    pub uri: Option<String>,
    /// Pre-1.0 datasets use `url`
    pub url: Option<String>,
}

impl TileContent {
    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref().or(self.url.as_deref())
    }
}

/// Whether a content URI points at another tileset document.
pub fn is_tileset_uri(uri: &str) -> bool {
    let path = uri.split(['?', '#']).next().unwrap_or(uri);
    path.to_ascii_lowercase().ends_with(".json")
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"{
        "asset": { "version": "1.0" },
        "geometricError": 500,
        "root": {
            "transform": [1,0,0,0, 0,1,0,0, 0,0,1,0, 10,20,30,1],
            "geometricError": 100,
            "refine": "ADD",
            "boundingVolume": { "region": [0,0,1,1,0,10] },
            "children": [
                { "content": { "uri": "data/0.b3dm" } },
                { "content": { "url": "sub/tileset.json" } },
                { "contents": [{ "uri": "a.b3dm" }, { "uri": "b.b3dm" }] }
            ]
        }
    }"#;

    #[test]
    fn test_parse_tileset() {
        let tileset = Tileset::from_slice(DOC.as_bytes(), "tileset.json").unwrap();
        assert_eq!(tileset.asset.version, "1.0");
        assert_eq!(tileset.root.children.len(), 3);

        let t = tileset.root.local_transform();
        assert_eq!(t.w_axis.x, 10.0);
        assert_eq!(t.w_axis.z, 30.0);
    }

    #[test]
    fn test_content_uris() {
        let tileset = Tileset::from_slice(DOC.as_bytes(), "tileset.json").unwrap();
        let children = &tileset.root.children;

        assert_eq!(children[0].content_uris().collect::<Vec<_>>(), ["data/0.b3dm"]);
        assert_eq!(children[1].content_uris().collect::<Vec<_>>(), ["sub/tileset.json"]);
        assert_eq!(children[2].content_uris().collect::<Vec<_>>(), ["a.b3dm", "b.b3dm"]);
        assert_eq!(tileset.root.content_uris().count(), 0);
    }

    #[test]
    fn test_missing_transform_is_identity() {
        assert_eq!(Tile::default().local_transform(), Matrix4::IDENTITY);
    }

    #[test]
    fn test_is_tileset_uri() {
        assert!(is_tileset_uri("sub/tileset.json"));
        assert!(is_tileset_uri("sub/Tileset.JSON?v=2"));
        assert!(!is_tileset_uri("data/0.b3dm"));
    }

    #[test]
    fn test_invalid_json() {
        let err = Tileset::from_slice(b"{", "broken.json").unwrap_err();
        assert!(matches!(err, IndexerError::Format { .. }));
        assert!(err.to_string().contains("broken.json"));
    }
}
