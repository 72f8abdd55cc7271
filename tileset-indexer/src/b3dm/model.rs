//! The glTF embedded in a b3dm, read through the `gltf` crate.
//!
//! Documents are loaded without the crate's validator, which would reject
//! tiles for problems irrelevant here. The `gltf` wrappers unwrap object
//! indices and checked enums, so [`check_indices`] and
//! [`Model::accessor_layout`] bound everything before a wrapper touches it.

use super::component::ComponentType;
use super::draco::{DracoDecoder, DracoPrimitive};
use crate::error::{IndexerError, Result};
use crate::geodesy::{Cartesian3, Matrix4};
use byteorder::{ByteOrder, LittleEndian as LE};
use gltf::accessor::{DataType, Dimensions, Item, Iter};
use gltf::buffer::Source;
use gltf::json::validation::Checked;
use gltf::mesh::Semantic;
use gltf::{Accessor, Buffer, Gltf, Mesh, Node, Primitive};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

pub const GLB_MAGIC: &[u8; 4] = b"glTF";
pub const GLB_HEADER_LEN: usize = 12;
pub const CHUNK_HEADER_LEN: usize = 8;
const CHUNK_JSON: u32 = 0x4E4F_534A;
const CHUNK_BIN: u32 = 0x004E_4942;

/// Application attribute holding the batch id (`_BATCHID` in the document).
const BATCH_ID: &str = "BATCHID";

/// Draco attribute names for the batch id, newest first.
const DRACO_BATCH_ID_ATTRIBUTES: [&str; 2] = ["_BATCHID", "BATCHID"];

const DRACO_EXTENSION: &str = "KHR_draco_mesh_compression";
const CESIUM_RTC: &str = "CESIUM_RTC";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DracoExtension {
    buffer_view: usize,
    #[serde(default)]
    attributes: BTreeMap<String, u32>,
}

#[derive(Debug, Deserialize)]
struct CesiumRtc {
    center: [f64; 3],
}

/// Vertices of one primitive instance.
#[derive(Debug, Clone, Default)]
pub struct PrimitiveVertices {
    /// Global matrix of the node instancing the mesh
    pub node_transform: Matrix4,
    /// Positions in mesh space
    pub positions: Vec<Cartesian3>,
    /// One batch id per position, or empty when the primitive has none
    pub batch_ids: Vec<u32>,
}

/// Accessor shape, checked against the BIN chunk.
#[derive(Debug, Clone, Copy)]
struct AccessorLayout {
    data_type: DataType,
    dimensions: Dimensions,
    normalized: bool,
    count: usize,
}

/// A parsed GLB.
#[derive(Debug, Clone)]
pub struct Model {
    gltf: Gltf,
}

impl Model {
    /// Parses the GLB at the start of `bytes`; trailing bytes are ignored.
    pub fn parse(bytes: &[u8], context: &str) -> Result<Self> {
        let glb = glb_extent(bytes, context)?;
        let gltf = Gltf::from_slice_without_validation(glb)
            .map_err(|e| IndexerError::format(context, format!("invalid GLB: {}", e)))?;
        check_indices(gltf.as_json(), context)?;
        Ok(Self { gltf })
    }

    /// Center from the `CESIUM_RTC` extension.
    pub fn rtc_center(&self) -> Option<Cartesian3> {
        let value = self.gltf.extension_value(CESIUM_RTC)?;
        match serde_json::from_value::<CesiumRtc>(value.clone()) {
            Ok(rtc) => Some(Cartesian3::from_array(rtc.center)),
            Err(e) => {
                warn!(error = %e, "Ignoring malformed CESIUM_RTC extension");
                None
            }
        }
    }

    /// Meshes placed in the scene, with their node's global matrix.
    ///
    /// Uses the default scene (or the first one). Documents without scenes
    /// fall back to every node that is nobody's child.
    pub fn mesh_instances(&self) -> Vec<(Mesh<'_>, Matrix4)> {
        let node_count = self.gltf.as_json().nodes.len();
        let roots: Vec<Node<'_>> = match self.gltf.default_scene().or_else(|| self.gltf.scenes().next())
        {
            Some(scene) => scene.nodes().collect(),
            None => {
                let mut is_child = vec![false; node_count];
                for child in self.gltf.nodes().flat_map(|n| n.children()) {
                    is_child[child.index()] = true;
                }
                self.gltf.nodes().filter(|n| !is_child[n.index()]).collect()
            }
        };

        let mut instances = Vec::new();
        let mut stack: Vec<(Node<'_>, Matrix4, usize)> =
            roots.into_iter().map(|n| (n, Matrix4::IDENTITY, 0)).collect();

        while let Some((node, parent, depth)) = stack.pop() {
            // A valid hierarchy is never deeper than the node count
            if depth > node_count {
                continue;
            }
            let global = parent * node_matrix(&node);
            if let Some(mesh) = node.mesh() {
                instances.push((mesh, global));
            }
            stack.extend(node.children().map(|c| (c, global, depth + 1)));
        }
        instances
    }

    /// Vertices of every primitive instanced in the scene.
    ///
    /// Draco-compressed primitives go through `decoder`. Primitives without
    /// positions are skipped.
    pub fn primitive_vertices(
        &self,
        decoder: &dyn DracoDecoder,
        context: &str,
    ) -> Result<Vec<PrimitiveVertices>> {
        let mut out = Vec::new();

        for (mesh, node_transform) in self.mesh_instances() {
            for primitive in mesh.primitives() {
                let (positions, batch_ids) = match primitive.extension_value(DRACO_EXTENSION) {
                    Some(extension) => self.decode_draco(extension, decoder, context)?,
                    None => {
                        let Some(position) = primitive.get(&Semantic::Positions) else {
                            debug!(context, mesh = mesh.index(), "Primitive without POSITION");
                            continue;
                        };
                        let positions = self.read_positions(&primitive, position, context)?;
                        let batch_ids = match primitive.get(&Semantic::Extras(BATCH_ID.to_string())) {
                            Some(accessor) => self.read_batch_ids(accessor, context)?,
                            None => Vec::new(),
                        };
                        (positions, batch_ids)
                    }
                };

                if !batch_ids.is_empty() && batch_ids.len() != positions.len() {
                    return Err(IndexerError::format(
                        context,
                        "batch id count does not match vertex count",
                    ));
                }

                out.push(PrimitiveVertices {
                    node_transform,
                    positions,
                    batch_ids,
                });
            }
        }
        Ok(out)
    }

    fn decode_draco(
        &self,
        extension: &Value,
        decoder: &dyn DracoDecoder,
        context: &str,
    ) -> Result<(Vec<Cartesian3>, Vec<u32>)> {
        let extension: DracoExtension = serde_json::from_value(extension.clone()).map_err(|e| {
            IndexerError::format(context, format!("invalid {}: {}", DRACO_EXTENSION, e))
        })?;
        let position_attribute = extension
            .attributes
            .get("POSITION")
            .copied()
            .ok_or_else(|| IndexerError::format(context, "Draco primitive has no POSITION"))?;
        let batch_id_attribute = DRACO_BATCH_ID_ATTRIBUTES
            .iter()
            .find_map(|name| extension.attributes.get(*name).copied());

        let decoded = decoder.decode(
            &DracoPrimitive {
                data: self.view_bytes(extension.buffer_view, context)?,
                position_attribute,
                batch_id_attribute,
            },
            context,
        )?;
        Ok((decoded.positions, decoded.batch_ids))
    }

    /// BIN chunk bytes behind `buffer`; external buffers have none.
    fn buffer_data(&self, buffer: Buffer<'_>) -> Option<&[u8]> {
        match buffer.source() {
            Source::Bin => self.gltf.blob.as_deref(),
            Source::Uri(_) => None,
        }
    }

    fn bin_for(&self, buffer: Buffer<'_>, context: &str) -> Result<&[u8]> {
        match buffer.source() {
            Source::Bin => self
                .gltf
                .blob
                .as_deref()
                .ok_or_else(|| IndexerError::format(context, "GLB has no BIN chunk")),
            Source::Uri(_) => Err(IndexerError::format(
                context,
                format!("buffer {} is external, only the GLB BIN chunk is read", buffer.index()),
            )),
        }
    }

    /// Bytes of a bufferView stored in the BIN chunk.
    fn view_bytes(&self, index: usize, context: &str) -> Result<&[u8]> {
        let view = self.gltf.views().nth(index).ok_or_else(|| {
            IndexerError::format(context, format!("bufferView {} does not exist", index))
        })?;
        let bin = self.bin_for(view.buffer(), context)?;
        view.offset()
            .checked_add(view.length())
            .and_then(|end| bin.get(view.offset()..end))
            .ok_or_else(|| {
                IndexerError::format(context, format!("bufferView {} exceeds the BIN chunk", index))
            })
    }

    /// Checks that `accessor` can be iterated without leaving its bufferView.
    fn accessor_layout(&self, accessor: &Accessor<'_>, context: &str) -> Result<AccessorLayout> {
        let index = accessor.index();
        let fail = |reason: &str| IndexerError::format(context, format!("accessor {} {}", index, reason));
        let json = &self.gltf.as_json().accessors[index];

        let data_type = match &json.component_type {
            Checked::Valid(generic) => generic.0,
            Checked::Invalid => return Err(fail("has an unknown componentType")),
        };
        let dimensions = match &json.type_ {
            Checked::Valid(dimensions) => *dimensions,
            Checked::Invalid => return Err(fail("has an unknown type")),
        };
        let layout = AccessorLayout {
            data_type,
            dimensions,
            normalized: accessor.normalized(),
            count: accessor.count(),
        };

        if accessor.sparse().is_some() {
            return Err(fail("is sparse, which is not supported"));
        }
        let view = accessor.view().ok_or_else(|| fail("has no bufferView"))?;
        if layout.count == 0 {
            return Ok(layout);
        }

        let view_bytes = self.view_bytes(view.index(), context)?;
        let element = data_type.size() * dimensions.multiplicity();
        let stride = view.stride().unwrap_or(element);
        if stride < element {
            return Err(fail("has a byteStride smaller than its elements"));
        }
        let end = stride
            .checked_mul(layout.count - 1)
            .and_then(|n| n.checked_add(accessor.offset()))
            .and_then(|n| n.checked_add(element));
        match end {
            Some(end) if end <= view_bytes.len() => Ok(layout),
            _ => Err(fail("exceeds its bufferView")),
        }
    }

    fn read_positions(
        &self,
        primitive: &Primitive<'_>,
        accessor: Accessor<'_>,
        context: &str,
    ) -> Result<Vec<Cartesian3>> {
        let layout = self.accessor_layout(&accessor, context)?;
        if layout.dimensions != Dimensions::Vec3 {
            return Err(IndexerError::format(context, "POSITION accessor is not VEC3"));
        }
        if layout.count == 0 {
            return Ok(Vec::new());
        }

        let unreadable = || IndexerError::format(context, "POSITION accessor cannot be read");
        if layout.data_type == DataType::F32 {
            let reader = primitive.reader(|buffer| self.buffer_data(buffer));
            let positions = reader.read_positions().ok_or_else(unreadable)?;
            return Ok(positions
                .map(|[x, y, z]| Cartesian3::new(x as f64, y as f64, z as f64))
                .collect());
        }

        // Quantized positions (KHR_mesh_quantization)
        let values = match layout.data_type {
            DataType::I8 => self.read_vec3::<i8>(accessor),
            DataType::U8 => self.read_vec3::<u8>(accessor),
            DataType::I16 => self.read_vec3::<i16>(accessor),
            DataType::U16 => self.read_vec3::<u16>(accessor),
            DataType::U32 => self.read_vec3::<u32>(accessor),
            DataType::F32 => self.read_vec3::<f32>(accessor),
        }
        .ok_or_else(unreadable)?;
        Ok(values
            .into_iter()
            .map(|v| Cartesian3::from_array(v.map(|c| normalize(&layout, c))))
            .collect())
    }

    fn read_batch_ids(&self, accessor: Accessor<'_>, context: &str) -> Result<Vec<u32>> {
        let layout = self.accessor_layout(&accessor, context)?;
        if layout.dimensions != Dimensions::Scalar {
            return Err(IndexerError::format(context, "batch id accessor is not SCALAR"));
        }
        if layout.count == 0 {
            return Ok(Vec::new());
        }

        let values = match layout.data_type {
            DataType::I8 => self.read_scalar::<i8>(accessor),
            DataType::U8 => self.read_scalar::<u8>(accessor),
            DataType::I16 => self.read_scalar::<i16>(accessor),
            DataType::U16 => self.read_scalar::<u16>(accessor),
            DataType::U32 => self.read_scalar::<u32>(accessor),
            DataType::F32 => self.read_scalar::<f32>(accessor),
        }
        .ok_or_else(|| IndexerError::format(context, "batch id accessor cannot be read"))?;
        Ok(values.into_iter().map(|v| v as u32).collect())
    }

    fn read_scalar<T: Item + Into<f64>>(&self, accessor: Accessor<'_>) -> Option<Vec<f64>> {
        let iter = Iter::<T>::new(accessor, |buffer| self.buffer_data(buffer))?;
        Some(iter.map(Into::into).collect())
    }

    fn read_vec3<T: Item + Copy + Into<f64>>(&self, accessor: Accessor<'_>) -> Option<Vec<[f64; 3]>> {
        let iter = Iter::<[T; 3]>::new(accessor, |buffer| self.buffer_data(buffer))?;
        Some(iter.map(|v| v.map(Into::into)).collect())
    }
}

fn normalize(layout: &AccessorLayout, value: f64) -> f64 {
    match ComponentType::from_gl(layout.data_type.as_gl_enum()) {
        Some(component) if layout.normalized => component.normalize(value),
        _ => value,
    }
}

/// Column-major node matrix, widened to `f64`.
fn node_matrix(node: &Node<'_>) -> Matrix4 {
    let columns = node.transform().matrix();
    Matrix4::from_cols_array_2d(&columns.map(|column| column.map(f64::from)))
}

/// The GLB's own bytes: header checked, trailing padding cut off.
fn glb_extent<'a>(bytes: &'a [u8], context: &str) -> Result<&'a [u8]> {
    if bytes.len() < GLB_HEADER_LEN || !bytes.starts_with(GLB_MAGIC) {
        return Err(IndexerError::format(context, "embedded glTF is not a GLB"));
    }
    let version = LE::read_u32(&bytes[4..8]);
    if version != 2 {
        return Err(IndexerError::format(
            context,
            format!("unsupported GLB version {}", version),
        ));
    }
    let length = LE::read_u32(&bytes[8..12]) as usize;
    if length < GLB_HEADER_LEN + CHUNK_HEADER_LEN || length > bytes.len() {
        return Err(IndexerError::format(
            context,
            format!("GLB declares {} bytes but {} are present", length, bytes.len()),
        ));
    }
    Ok(&bytes[..length])
}

/// Bounds-checks every object index the `gltf` wrappers will dereference.
fn check_indices(root: &gltf::json::Root, context: &str) -> Result<()> {
    let ensure = |kind: &str, index: usize, len: usize| {
        if index < len {
            Ok(())
        } else {
            Err(IndexerError::format(context, format!("{} {} does not exist", kind, index)))
        }
    };

    if let Some(scene) = &root.scene {
        ensure("scene", scene.value(), root.scenes.len())?;
    }
    for node in root.scenes.iter().flat_map(|s| s.nodes.iter()) {
        ensure("node", node.value(), root.nodes.len())?;
    }
    for node in &root.nodes {
        for child in node.children.iter().flatten() {
            ensure("node", child.value(), root.nodes.len())?;
        }
        if let Some(mesh) = &node.mesh {
            ensure("mesh", mesh.value(), root.meshes.len())?;
        }
    }
    for primitive in root.meshes.iter().flat_map(|m| m.primitives.iter()) {
        for accessor in primitive.attributes.values() {
            ensure("accessor", accessor.value(), root.accessors.len())?;
        }
    }
    for accessor in &root.accessors {
        if let Some(view) = &accessor.buffer_view {
            ensure("bufferView", view.value(), root.buffer_views.len())?;
        }
    }
    for view in &root.buffer_views {
        ensure("buffer", view.buffer.value(), root.buffers.len())?;
    }
    Ok(())
}

/// Assembles a GLB from a JSON document and binary buffer, padding both
/// chunks to 4 bytes.
pub fn encode_glb(json: &[u8], bin: &[u8]) -> Vec<u8> {
    let json_len = json.len().next_multiple_of(4);
    let bin_len = bin.len().next_multiple_of(4);
    let mut total = GLB_HEADER_LEN + CHUNK_HEADER_LEN + json_len;
    if !bin.is_empty() {
        total += CHUNK_HEADER_LEN + bin_len;
    }

    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(GLB_MAGIC);
    out.extend_from_slice(&2u32.to_le_bytes());
    out.extend_from_slice(&(total as u32).to_le_bytes());

    out.extend_from_slice(&(json_len as u32).to_le_bytes());
    out.extend_from_slice(&CHUNK_JSON.to_le_bytes());
    out.extend_from_slice(json);
    out.resize(out.len() + json_len - json.len(), b' ');

    if !bin.is_empty() {
        out.extend_from_slice(&(bin_len as u32).to_le_bytes());
        out.extend_from_slice(&CHUNK_BIN.to_le_bytes());
        out.extend_from_slice(bin);
        out.resize(out.len() + bin_len - bin.len(), 0);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::b3dm::draco::{DecodedMesh, NativeDraco};
    use crate::draco::encode::encode_quantized_mesh;

    fn f32_bytes(values: &[f32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    fn model(json: &str, bin: &[u8]) -> Model {
        Model::parse(&encode_glb(json.as_bytes(), bin), "t.b3dm").unwrap()
    }

    #[test]
    fn test_node_hierarchy_is_composed() {
        let model = model(
            r#"{
                "asset": { "version": "2.0" },
                "scenes": [{ "nodes": [0] }],
                "nodes": [
                    { "translation": [10, 0, 0], "children": [1] },
                    { "matrix": [1,0,0,0, 0,1,0,0, 0,0,1,0, 0,5,0,1], "mesh": 0 }
                ],
                "meshes": [{ "primitives": [] }]
            }"#,
            &[],
        );

        let instances = model.mesh_instances();
        assert_eq!(instances.len(), 1);
        let (mesh, m) = &instances[0];
        assert_eq!(mesh.index(), 0);
        assert_eq!(m.transform_point3(Cartesian3::ZERO), Cartesian3::new(10.0, 5.0, 0.0));
    }

    #[test]
    fn test_trs_node_is_scale_then_rotation_then_translation() {
        // 90° about Z
        let half = std::f32::consts::FRAC_PI_4;
        let json = format!(
            r#"{{
                "asset": {{ "version": "2.0" }},
                "nodes": [{{
                    "translation": [5, 0, 0],
                    "rotation": [0, 0, {}, {}],
                    "scale": [2, 2, 2],
                    "mesh": 0
                }}],
                "meshes": [{{ "primitives": [] }}]
            }}"#,
            half.sin(),
            half.cos()
        );
        let model = model(&json, &[]);

        let (_, m) = &model.mesh_instances()[0];
        let p = m.transform_point3(Cartesian3::X);
        assert!((p - Cartesian3::new(5.0, 2.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn test_roots_without_scene() {
        let model = model(
            r#"{
                "asset": { "version": "2.0" },
                "nodes": [ { "mesh": 0 }, { "children": [0] } ],
                "meshes": [{ "primitives": [] }]
            }"#,
            &[],
        );
        // Node 0 is reached only through node 1
        assert_eq!(model.mesh_instances().len(), 1);
    }

    #[test]
    fn test_cyclic_nodes_terminate() {
        let model = model(
            r#"{
                "asset": { "version": "2.0" },
                "scenes": [{ "nodes": [0] }],
                "nodes": [ { "mesh": 0, "children": [0] } ],
                "meshes": [{ "primitives": [] }]
            }"#,
            &[],
        );
        assert!(model.mesh_instances().len() <= 2);
    }

    #[test]
    fn test_dangling_indices_are_format_errors() {
        for json in [
            r#"{ "asset": { "version": "2.0" }, "scenes": [{ "nodes": [3] }] }"#,
            r#"{ "asset": { "version": "2.0" }, "nodes": [{ "mesh": 1 }] }"#,
            r#"{ "asset": { "version": "2.0" },
                 "meshes": [{ "primitives": [{ "attributes": { "POSITION": 0 } }] }] }"#,
        ] {
            let err = Model::parse(&encode_glb(json.as_bytes(), &[]), "t.b3dm").unwrap_err();
            assert!(matches!(err, IndexerError::Format { .. }), "{}", json);
        }
    }

    #[test]
    fn test_strided_positions() {
        // Two VEC3 floats interleaved with 4 bytes of padding
        let mut bin = f32_bytes(&[1.0, 2.0, 3.0, 0.0]);
        bin.extend(f32_bytes(&[4.0, 5.0, 6.0, 0.0]));
        let model = model(
            r#"{
                "asset": { "version": "2.0" },
                "nodes": [{ "mesh": 0 }],
                "meshes": [{ "primitives": [{ "attributes": { "POSITION": 0 } }] }],
                "buffers": [{ "byteLength": 32 }],
                "bufferViews": [{ "buffer": 0, "byteLength": 32, "byteStride": 16 }],
                "accessors": [{ "bufferView": 0, "componentType": 5126, "count": 2, "type": "VEC3" }]
            }"#,
            &bin,
        );

        let prims = model.primitive_vertices(&NativeDraco, "t").unwrap();
        assert_eq!(prims[0].positions, [Cartesian3::new(1.0, 2.0, 3.0), Cartesian3::new(4.0, 5.0, 6.0)]);
        assert!(prims[0].batch_ids.is_empty());
    }

    #[test]
    fn test_normalized_quantized_positions() {
        let bin = [0u8, 255, 0, 255, 255, 255, 0, 0];
        let model = model(
            r#"{
                "asset": { "version": "2.0" },
                "nodes": [{ "mesh": 0 }],
                "meshes": [{ "primitives": [{ "attributes": { "POSITION": 0 } }] }],
                "buffers": [{ "byteLength": 8 }],
                "bufferViews": [{ "buffer": 0, "byteLength": 8, "byteStride": 4 }],
                "accessors": [{ "bufferView": 0, "componentType": 5121, "normalized": true,
                                "count": 2, "type": "VEC3" }]
            }"#,
            &bin,
        );

        let prims = model.primitive_vertices(&NativeDraco, "t").unwrap();
        assert_eq!(prims[0].positions, [Cartesian3::new(0.0, 1.0, 0.0), Cartesian3::ONE]);
    }

    #[test]
    fn test_accessor_out_of_range() {
        let model = model(
            r#"{
                "asset": { "version": "2.0" },
                "nodes": [{ "mesh": 0 }],
                "meshes": [{ "primitives": [{ "attributes": { "POSITION": 0 } }] }],
                "buffers": [{ "byteLength": 8 }],
                "bufferViews": [{ "buffer": 0, "byteLength": 8 }],
                "accessors": [{ "bufferView": 0, "componentType": 5126, "count": 1, "type": "VEC3" }]
            }"#,
            &[0u8; 8],
        );
        let err = model.primitive_vertices(&NativeDraco, "t").unwrap_err();
        assert!(err.to_string().contains("exceeds its bufferView"));
    }

    #[test]
    fn test_huge_count_without_buffer_view_is_format_error() {
        let model = model(
            r#"{
                "asset": { "version": "2.0" },
                "nodes": [{ "mesh": 0 }],
                "meshes": [{ "primitives": [{ "attributes": { "POSITION": 0 } }] }],
                "accessors": [{ "componentType": 5126, "count": 9223372036854775807, "type": "VEC3" }]
            }"#,
            &[],
        );
        let err = model.primitive_vertices(&NativeDraco, "t.b3dm").unwrap_err();
        assert!(matches!(err, IndexerError::Format { .. }));
        assert!(err.to_string().contains("no bufferView"));
    }

    #[test]
    fn test_huge_count_with_buffer_view_is_format_error() {
        let model = model(
            r#"{
                "asset": { "version": "2.0" },
                "nodes": [{ "mesh": 0 }],
                "meshes": [{ "primitives": [{ "attributes": { "POSITION": 0 } }] }],
                "buffers": [{ "byteLength": 12 }],
                "bufferViews": [{ "buffer": 0, "byteLength": 12, "byteStride": 12 }],
                "accessors": [{ "bufferView": 0, "byteOffset": 18446744073709551615,
                                "componentType": 5126, "count": 9223372036854775807, "type": "VEC3" }]
            }"#,
            &[0u8; 12],
        );
        let err = model.primitive_vertices(&NativeDraco, "t.b3dm").unwrap_err();
        assert!(matches!(err, IndexerError::Format { .. }));
    }

    #[test]
    fn test_sparse_accessor_is_rejected() {
        let model = model(
            r#"{
                "asset": { "version": "2.0" },
                "nodes": [{ "mesh": 0 }],
                "meshes": [{ "primitives": [{ "attributes": { "POSITION": 0 } }] }],
                "buffers": [{ "byteLength": 16 }],
                "bufferViews": [{ "buffer": 0, "byteLength": 16 }],
                "accessors": [{ "componentType": 5126, "count": 1, "type": "VEC3",
                    "sparse": { "count": 1,
                        "indices": { "bufferView": 0, "componentType": 5125 },
                        "values": { "bufferView": 0, "byteOffset": 4 } } }]
            }"#,
            &[0u8; 16],
        );
        let err = model.primitive_vertices(&NativeDraco, "t").unwrap_err();
        assert!(err.to_string().contains("sparse"));
    }

    #[test]
    fn test_primitive_vertices_with_batch_ids() {
        let mut bin = f32_bytes(&[0.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
        bin.extend_from_slice(&[0, 0, 1, 0]);
        let model = model(
            r#"{
                "asset": { "version": "2.0" },
                "scenes": [{ "nodes": [0] }],
                "nodes": [{ "mesh": 0 }],
                "meshes": [{ "primitives": [{ "attributes": { "POSITION": 0, "_BATCHID": 1 } }] }],
                "buffers": [{ "byteLength": 28 }],
                "bufferViews": [
                    { "buffer": 0, "byteLength": 24 },
                    { "buffer": 0, "byteOffset": 24, "byteLength": 4 }
                ],
                "accessors": [
                    { "bufferView": 0, "componentType": 5126, "count": 2, "type": "VEC3" },
                    { "bufferView": 1, "componentType": 5123, "count": 2, "type": "SCALAR" }
                ]
            }"#,
            &bin,
        );

        let prims = model.primitive_vertices(&NativeDraco, "t").unwrap();
        assert_eq!(prims.len(), 1);
        assert_eq!(prims[0].positions[1], Cartesian3::ONE);
        assert_eq!(prims[0].batch_ids, [0, 1]);
    }

    #[test]
    fn test_external_buffer_is_rejected() {
        let model = model(
            r#"{
                "asset": { "version": "2.0" },
                "nodes": [{ "mesh": 0 }],
                "meshes": [{ "primitives": [{ "attributes": { "POSITION": 0 } }] }],
                "buffers": [{ "byteLength": 12, "uri": "mesh.bin" }],
                "bufferViews": [{ "buffer": 0, "byteLength": 12 }],
                "accessors": [{ "bufferView": 0, "componentType": 5126, "count": 1, "type": "VEC3" }]
            }"#,
            &[],
        );
        let err = model.primitive_vertices(&NativeDraco, "t").unwrap_err();
        assert!(err.to_string().contains("external"));
    }

    struct FixedDraco;

    impl DracoDecoder for FixedDraco {
        fn decode(&self, primitive: &DracoPrimitive<'_>, _context: &str) -> Result<DecodedMesh> {
            assert_eq!(primitive.data, &[9, 9]);
            assert_eq!(primitive.position_attribute, 0);
            assert_eq!(primitive.batch_id_attribute, Some(3));
            Ok(DecodedMesh {
                positions: vec![Cartesian3::X],
                batch_ids: vec![0],
            })
        }
    }

    #[test]
    fn test_draco_primitive_uses_decoder() {
        let model = model(
            r#"{
                "asset": { "version": "2.0" },
                "nodes": [{ "mesh": 0 }],
                "meshes": [{ "primitives": [{
                    "attributes": { "POSITION": 0 },
                    "extensions": { "KHR_draco_mesh_compression": {
                        "bufferView": 0, "attributes": { "POSITION": 0, "_BATCHID": 3 }
                    } }
                }] }],
                "buffers": [{ "byteLength": 2 }],
                "bufferViews": [{ "buffer": 0, "byteLength": 2 }],
                "accessors": [{ "componentType": 5126, "count": 1, "type": "VEC3" }]
            }"#,
            &[9, 9],
        );

        let prims = model.primitive_vertices(&FixedDraco, "t").unwrap();
        assert_eq!(prims[0].positions, [Cartesian3::X]);

        let err = model.primitive_vertices(&NativeDraco, "t.b3dm").unwrap_err();
        assert!(err.to_string().contains("t.b3dm"));
    }

    #[test]
    fn test_draco_primitive_with_native_decoder() {
        let data = encode_quantized_mesh(
            &[[0.0, 0.0, 0.0], [2.0, 0.0, 0.0], [0.0, 2.0, 0.0]],
            &[0, 1, 1],
            &[[0, 1, 2]],
            12,
        );
        let json = format!(
            r#"{{
                "asset": {{ "version": "2.0" }},
                "nodes": [{{ "mesh": 0, "translation": [0, 0, 10] }}],
                "meshes": [{{ "primitives": [{{
                    "attributes": {{ "POSITION": 0, "_BATCHID": 1 }},
                    "extensions": {{ "KHR_draco_mesh_compression": {{
                        "bufferView": 0, "attributes": {{ "POSITION": 0, "_BATCHID": 1 }}
                    }} }}
                }}] }}],
                "buffers": [{{ "byteLength": {len} }}],
                "bufferViews": [{{ "buffer": 0, "byteLength": {len} }}],
                "accessors": [
                    {{ "componentType": 5126, "count": 3, "type": "VEC3" }},
                    {{ "componentType": 5123, "count": 3, "type": "SCALAR" }}
                ]
            }}"#,
            len = data.len()
        );
        let model = model(&json, &data);

        let prims = model.primitive_vertices(&NativeDraco, "t").unwrap();
        assert_eq!(prims.len(), 1);
        assert_eq!(prims[0].batch_ids, [0, 1, 1]);
        assert!((prims[0].positions[1] - Cartesian3::new(2.0, 0.0, 0.0)).length() < 1e-3);
        let world = prims[0].node_transform.transform_point3(prims[0].positions[2]);
        assert!((world - Cartesian3::new(0.0, 2.0, 10.0)).length() < 1e-3);
    }

    #[test]
    fn test_cesium_rtc() {
        let model = model(
            r#"{
                "asset": { "version": "2.0" },
                "extensions": { "CESIUM_RTC": { "center": [1, 2, 3] } }
            }"#,
            &[],
        );
        assert_eq!(model.rtc_center(), Some(Cartesian3::new(1.0, 2.0, 3.0)));
    }

    #[test]
    fn test_glb_header_checks() {
        let glb = encode_glb(br#"{"asset":{"version":"2.0"}}"#, &[]);
        assert!(Model::parse(&glb[..10], "t").is_err());

        let mut wrong_version = glb.clone();
        wrong_version[4] = 1;
        assert!(Model::parse(&wrong_version, "t").unwrap_err().to_string().contains("version"));

        let mut short_length = glb.clone();
        short_length[8..12].copy_from_slice(&4u32.to_le_bytes());
        assert!(Model::parse(&short_length, "t").is_err());

        // Trailing b3dm padding after the GLB is ignored
        let mut padded = glb;
        padded.extend_from_slice(&[0; 8]);
        assert!(Model::parse(&padded, "t").is_ok());
    }
}
