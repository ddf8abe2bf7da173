//! GLB（glTF 2.0 二进制）导出
//!
//! 文件结构：
//!
//! ```text
//! ┌────────────────────────────┐
//! │ magic "glTF" | 2 | 总长度   │ 12 字节
//! ├────────────────────────────┤
//! │ 长度 | "JSON" | 布局 JSON   │ 空格补齐到 4 字节
//! ├────────────────────────────┤
//! │ 长度 | "BIN\0" | 二进制块   │ 零补齐到 4 字节
//! └────────────────────────────┘
//! ```
//!
//! 二进制块分两遍生成：先为每个网格独立生成缓冲区（视图偏移相对网格自身），
//! 再拼接为一个块并统一改写所有视图偏移，最后逐个视图回读校验。

use crate::artifact::{Encoded, Encoder, FeatureReport, OutputArtifact};
use crate::error::ExportError;
use crate::manifest::ExportFormat;
use crate::site::SiteDocument;
use serde::{Deserialize, Serialize};
use sitecad_core::layer::SiteLayer;
use sitecad_core::mesh::{extrude_footprint, Mesh};
use sitecad_core::properties::Color;
use tracing::debug;

pub const GLB_MAGIC: u32 = 0x4654_6C67;
pub const GLB_VERSION: u32 = 2;
pub const CHUNK_JSON: u32 = 0x4E4F_534A;
pub const CHUNK_BIN: u32 = 0x004E_4942;

const COMPONENT_FLOAT: u32 = 5126;
const COMPONENT_UNSIGNED_INT: u32 = 5125;
const TARGET_ARRAY_BUFFER: u32 = 34962;
const TARGET_ELEMENT_ARRAY_BUFFER: u32 = 34963;
const MODE_TRIANGLES: u32 = 4;

const FORMAT: &str = "GLB";

// ---------------------------------------------------------------------------
// 布局 JSON
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Gltf {
    pub asset: Asset,
    pub scene: usize,
    pub scenes: Vec<Scene>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<Node>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub meshes: Vec<GltfMesh>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub materials: Vec<Material>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub accessors: Vec<Accessor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buffer_views: Vec<BufferView>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buffers: Vec<Buffer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub version: String,
    pub generator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copyright: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scene {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub mesh: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GltfMesh {
    pub name: String,
    pub primitives: Vec<Primitive>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Primitive {
    pub attributes: Attributes,
    pub indices: usize,
    pub material: usize,
    pub mode: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attributes {
    #[serde(rename = "POSITION")]
    pub position: usize,
    #[serde(rename = "COLOR_0", default, skip_serializing_if = "Option::is_none")]
    pub color_0: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Material {
    pub name: String,
    pub pbr_metallic_roughness: PbrMetallicRoughness,
    pub double_sided: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PbrMetallicRoughness {
    pub base_color_factor: [f32; 4],
    pub metallic_factor: f32,
    pub roughness_factor: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Accessor {
    pub buffer_view: usize,
    pub component_type: u32,
    pub count: usize,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferView {
    pub buffer: usize,
    pub byte_offset: usize,
    pub byte_length: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Buffer {
    pub byte_length: usize,
}

// ---------------------------------------------------------------------------
// 第一遍：逐网格缓冲区
// ---------------------------------------------------------------------------

/// 单个网格的独立缓冲区，视图偏移相对于 `data` 起点
struct MeshBlock {
    name: String,
    color: Color,
    has_colors: bool,
    data: Vec<u8>,
    /// (局部偏移, 长度, target)
    views: Vec<(usize, usize, u32)>,
    vertex_count: usize,
    index_count: usize,
    min: [f32; 3],
    max: [f32; 3],
}

fn pad_to_4(buf: &mut Vec<u8>, fill: u8) {
    while buf.len() % 4 != 0 {
        buf.push(fill);
    }
}

/// Z 向上 → glTF 的 Y 向上：(x, y, z) → (x, z, -y)
fn to_y_up(p: &[f32]) -> [f32; 3] {
    [p[0], p[2], -p[1]]
}

impl MeshBlock {
    fn build(mesh: &Mesh, color: Color) -> Result<Self, ExportError> {
        mesh.validate()?;

        let positions: Vec<[f32; 3]> = mesh.positions.chunks_exact(3).map(to_y_up).collect();
        let mut min = [f32::MAX; 3];
        let mut max = [f32::MIN; 3];
        for p in &positions {
            for k in 0..3 {
                min[k] = min[k].min(p[k]);
                max[k] = max[k].max(p[k]);
            }
        }

        let mut data = Vec::new();
        let mut views = Vec::with_capacity(3);

        let start = data.len();
        for p in &positions {
            for v in p {
                data.extend_from_slice(&v.to_le_bytes());
            }
        }
        views.push((start, data.len() - start, TARGET_ARRAY_BUFFER));
        pad_to_4(&mut data, 0);

        let start = data.len();
        for i in &mesh.indices {
            data.extend_from_slice(&i.to_le_bytes());
        }
        views.push((start, data.len() - start, TARGET_ELEMENT_ARRAY_BUFFER));
        pad_to_4(&mut data, 0);

        let has_colors = mesh.colors.is_some();
        if let Some(colors) = &mesh.colors {
            let start = data.len();
            for c in colors {
                data.extend_from_slice(&c.to_le_bytes());
            }
            views.push((start, data.len() - start, TARGET_ARRAY_BUFFER));
            pad_to_4(&mut data, 0);
        }

        Ok(Self {
            name: mesh.name.clone(),
            color,
            has_colors,
            data,
            views,
            vertex_count: positions.len(),
            index_count: mesh.indices.len(),
            min,
            max,
        })
    }
}

// ---------------------------------------------------------------------------
// 第二遍：拼接、改写偏移、校验
// ---------------------------------------------------------------------------

/// 已拼接的场景：布局 JSON 与二进制块
pub struct SceneLayout {
    pub gltf: Gltf,
    pub blob: Vec<u8>,
}

fn flatten(blocks: &[MeshBlock], generator: &str, scene_name: &str) -> Result<SceneLayout, ExportError> {
    let mut gltf = Gltf {
        asset: Asset {
            version: "2.0".to_string(),
            generator: generator.to_string(),
            copyright: None,
        },
        scene: 0,
        scenes: vec![Scene {
            name: scene_name.to_string(),
            nodes: Vec::new(),
        }],
        nodes: Vec::new(),
        meshes: Vec::new(),
        materials: Vec::new(),
        accessors: Vec::new(),
        buffer_views: Vec::new(),
        buffers: Vec::new(),
    };
    let mut blob: Vec<u8> = Vec::new();

    for block in blocks {
        pad_to_4(&mut blob, 0);
        let base = blob.len();
        blob.extend_from_slice(&block.data);

        let first_view = gltf.buffer_views.len();
        for &(offset, length, target) in &block.views {
            gltf.buffer_views.push(BufferView {
                buffer: 0,
                byte_offset: base + offset,
                byte_length: length,
                target: Some(target),
            });
        }

        let first_accessor = gltf.accessors.len();
        gltf.accessors.push(Accessor {
            buffer_view: first_view,
            component_type: COMPONENT_FLOAT,
            count: block.vertex_count,
            kind: "VEC3".to_string(),
            min: Some(block.min.to_vec()),
            max: Some(block.max.to_vec()),
        });
        gltf.accessors.push(Accessor {
            buffer_view: first_view + 1,
            component_type: COMPONENT_UNSIGNED_INT,
            count: block.index_count,
            kind: "SCALAR".to_string(),
            min: None,
            max: None,
        });
        let color_0 = block.has_colors.then(|| {
            gltf.accessors.push(Accessor {
                buffer_view: first_view + 2,
                component_type: COMPONENT_FLOAT,
                count: block.vertex_count,
                kind: "VEC4".to_string(),
                min: None,
                max: None,
            });
            first_accessor + 2
        });

        let material = gltf.materials.len();
        let base_color = if block.has_colors {
            [1.0, 1.0, 1.0, 1.0]
        } else {
            block.color.to_f32_array()
        };
        gltf.materials.push(Material {
            name: format!("{}-material", block.name),
            pbr_metallic_roughness: PbrMetallicRoughness {
                base_color_factor: base_color,
                metallic_factor: 0.0,
                roughness_factor: 0.9,
            },
            double_sided: block.has_colors,
        });

        let mesh_index = gltf.meshes.len();
        gltf.meshes.push(GltfMesh {
            name: block.name.clone(),
            primitives: vec![Primitive {
                attributes: Attributes {
                    position: first_accessor,
                    color_0,
                },
                indices: first_accessor + 1,
                material,
                mode: MODE_TRIANGLES,
            }],
        });
        gltf.scenes[0].nodes.push(gltf.nodes.len());
        gltf.nodes.push(Node {
            name: block.name.clone(),
            mesh: mesh_index,
        });
    }
    pad_to_4(&mut blob, 0);

    if !blob.is_empty() {
        gltf.buffers.push(Buffer {
            byte_length: blob.len(),
        });
    }

    verify_views(&gltf, &blob, blocks)?;
    Ok(SceneLayout { gltf, blob })
}

/// 每个视图必须 4 字节对齐、落在块内，且回读内容与第一遍的网格数据一致
fn verify_views(gltf: &Gltf, blob: &[u8], blocks: &[MeshBlock]) -> Result<(), ExportError> {
    let expected = blocks.iter().flat_map(|b| {
        b.views
            .iter()
            .map(move |&(offset, length, _)| &b.data[offset..offset + length])
    });

    let mut count = 0;
    for (i, (view, original)) in gltf.buffer_views.iter().zip(expected).enumerate() {
        if view.byte_offset % 4 != 0 {
            return Err(ExportError::invariant(
                FORMAT,
                format!("bufferView {} offset {} is not 4-byte aligned", i, view.byte_offset),
            ));
        }
        let end = view.byte_offset + view.byte_length;
        if end > blob.len() {
            return Err(ExportError::invariant(
                FORMAT,
                format!("bufferView {} ends at {} past blob of {} bytes", i, end, blob.len()),
            ));
        }
        if &blob[view.byte_offset..end] != original {
            return Err(ExportError::invariant(
                FORMAT,
                format!("bufferView {} does not address its mesh data", i),
            ));
        }
        count += 1;
    }
    if count != gltf.buffer_views.len() {
        return Err(ExportError::invariant(
            FORMAT,
            format!("{} bufferViews for {} mesh views", gltf.buffer_views.len(), count),
        ));
    }
    for (i, accessor) in gltf.accessors.iter().enumerate() {
        if accessor.buffer_view >= gltf.buffer_views.len() {
            return Err(ExportError::invariant(
                FORMAT,
                format!("accessor {} references missing bufferView {}", i, accessor.buffer_view),
            ));
        }
    }
    Ok(())
}

/// 组装 GLB 容器
pub fn write_glb(layout: &SceneLayout) -> Result<Vec<u8>, ExportError> {
    let mut json = serde_json::to_vec(&layout.gltf)?;
    pad_to_4(&mut json, b' ');

    let has_bin = !layout.blob.is_empty();
    let total = 12 + 8 + json.len() + if has_bin { 8 + layout.blob.len() } else { 0 };
    let total_u32 = u32::try_from(total)
        .map_err(|_| ExportError::invariant(FORMAT, format!("file length {} exceeds u32", total)))?;

    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&GLB_MAGIC.to_le_bytes());
    out.extend_from_slice(&GLB_VERSION.to_le_bytes());
    out.extend_from_slice(&total_u32.to_le_bytes());

    out.extend_from_slice(&(json.len() as u32).to_le_bytes());
    out.extend_from_slice(&CHUNK_JSON.to_le_bytes());
    out.extend_from_slice(&json);

    if has_bin {
        out.extend_from_slice(&(layout.blob.len() as u32).to_le_bytes());
        out.extend_from_slice(&CHUNK_BIN.to_le_bytes());
        out.extend_from_slice(&layout.blob);
    }

    if out.len() != total {
        return Err(ExportError::invariant(
            FORMAT,
            format!("declared length {} but wrote {} bytes", total, out.len()),
        ));
    }
    Ok(out)
}

/// 已解析的 GLB 容器
#[derive(Debug)]
pub struct ParsedGlb {
    pub version: u32,
    pub declared_length: u32,
    pub gltf: Gltf,
    pub blob: Vec<u8>,
}

/// 解析 GLB 容器（用于自检和测试）
pub fn read_glb(bytes: &[u8]) -> Result<ParsedGlb, ExportError> {
    let word = |at: usize| -> Result<u32, ExportError> {
        bytes
            .get(at..at + 4)
            .and_then(|b| b.try_into().ok())
            .map(u32::from_le_bytes)
            .ok_or_else(|| ExportError::invariant(FORMAT, format!("truncated at byte {}", at)))
    };

    if word(0)? != GLB_MAGIC {
        return Err(ExportError::invariant(FORMAT, "bad magic"));
    }
    let version = word(4)?;
    let declared_length = word(8)?;

    let json_len = word(12)? as usize;
    if word(16)? != CHUNK_JSON {
        return Err(ExportError::invariant(FORMAT, "first chunk is not JSON"));
    }
    let json = bytes
        .get(20..20 + json_len)
        .ok_or_else(|| ExportError::invariant(FORMAT, "JSON chunk truncated"))?;
    let gltf: Gltf = serde_json::from_slice(json)?;

    let bin_at = 20 + json_len;
    let blob = if bin_at < bytes.len() {
        let bin_len = word(bin_at)? as usize;
        if word(bin_at + 4)? != CHUNK_BIN {
            return Err(ExportError::invariant(FORMAT, "second chunk is not BIN"));
        }
        bytes
            .get(bin_at + 8..bin_at + 8 + bin_len)
            .ok_or_else(|| ExportError::invariant(FORMAT, "BIN chunk truncated"))?
            .to_vec()
    } else {
        Vec::new()
    };

    Ok(ParsedGlb {
        version,
        declared_length,
        gltf,
        blob,
    })
}

/// GLB 导出器
#[derive(Debug, Default, Clone, Copy)]
pub struct GlbExporter;

impl Encoder for GlbExporter {
    fn format(&self) -> ExportFormat {
        ExportFormat::Scene
    }

    fn encode(&self, site: &SiteDocument) -> Result<Encoded, ExportError> {
        self.export(site)
    }
}

impl GlbExporter {
    pub fn export(&self, site: &SiteDocument) -> Result<Encoded, ExportError> {
        let (meshes, features) = scene_meshes(site, ExportFormat::Scene);

        let blocks = meshes
            .iter()
            .map(|(mesh, color)| MeshBlock::build(mesh, *color))
            .collect::<Result<Vec<_>, _>>()?;
        let layout = flatten(&blocks, &site.metadata.producer, &site.manifest.site_name)?;
        let bytes = write_glb(&layout)?;

        debug!(
            meshes = blocks.len(),
            blob = layout.blob.len(),
            bytes = bytes.len(),
            "GLB written"
        );
        Ok(Encoded::single(
            OutputArtifact::new(ExportFormat::Scene.path(), bytes),
            features,
        ))
    }
}

/// 三维输出共用的网格集合：地形（可选）加每个建筑一个网格
///
/// 建筑按轮廓中心的地面高程抬升，z=0 对应栅格最低点。
pub(crate) fn scene_meshes(
    site: &SiteDocument,
    format: ExportFormat,
) -> (Vec<(Mesh, Color)>, Vec<sitecad_core::feature::FeatureOutcome>) {
    let mut report = FeatureReport::new(format);
    let mut meshes = Vec::new();

    match site.terrain() {
        Some(Ok(terrain)) if !terrain.is_empty() => meshes.push((terrain, Color::TERRAIN_LOW)),
        Some(Err(e)) => tracing::warn!(format = %format, error = %e, "terrain mesh skipped"),
        _ => {}
    }

    for feature in &site.features.buildings {
        let mesh = site.building(feature).and_then(|b| {
            let mut mesh = extrude_footprint(&b.footprint, b.height)?;
            mesh.name = b.label().to_string();
            mesh.translate(0.0, 0.0, b.ground - site.base_elevation);
            Ok(mesh)
        });
        match mesh {
            Ok(mesh) => {
                meshes.push((mesh, Color::BUILDING));
                report.ok(&feature.id);
            }
            Err(e) => report.skip(SiteLayer::Buildings, &feature.id, e),
        }
    }

    (meshes, report.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site::tests::{sample_features, sample_manifest, sample_site};
    use sitecad_core::feature::Footprint;
    use sitecad_core::math::Point2;

    fn square_mesh(size: f64, height: f64) -> Mesh {
        let ring = [
            Point2::new(0.0, 0.0),
            Point2::new(size, 0.0),
            Point2::new(size, size),
            Point2::new(0.0, size),
        ];
        extrude_footprint(&Footprint::from_ring(&ring).unwrap(), height).unwrap()
    }

    fn read_f32s(blob: &[u8], view: &BufferView) -> Vec<f32> {
        blob[view.byte_offset..view.byte_offset + view.byte_length]
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }

    #[test]
    fn test_header_and_round_trip() {
        let encoded = GlbExporter.export(&sample_site()).unwrap();
        let bytes = &encoded.artifacts[0].bytes;
        assert_eq!(&bytes[0..4], b"glTF");

        let parsed = read_glb(bytes).unwrap();
        assert_eq!(parsed.version, 2);
        assert_eq!(parsed.declared_length as usize, bytes.len());
        assert_eq!(bytes.len() % 4, 0);
        // 地形 + 一个有效建筑
        assert_eq!(parsed.gltf.meshes.len(), 2);
        assert_eq!(parsed.gltf.buffers[0].byte_length, parsed.blob.len());
        assert_eq!(encoded.features.iter().filter(|f| f.is_skipped()).count(), 1);
    }

    #[test]
    fn test_offsets_rewritten_against_blob() {
        // 第一块 3 个顶点的奇数长度迫使第二块从非零偏移开始
        let mut tri = Mesh::new("tri");
        tri.push_vertex(0.0, 0.0, 0.0);
        tri.push_vertex(1.0, 0.0, 0.0);
        tri.push_vertex(0.0, 1.0, 0.0);
        tri.push_triangle(0, 1, 2);
        let square = square_mesh(4.0, 2.0);

        let blocks = vec![
            MeshBlock::build(&tri, Color::RED).unwrap(),
            MeshBlock::build(&square, Color::BUILDING).unwrap(),
        ];
        let layout = flatten(&blocks, "test", "scene").unwrap();
        let bytes = write_glb(&layout).unwrap();
        let parsed = read_glb(&bytes).unwrap();

        let second = &parsed.gltf.meshes[1].primitives[0];
        let pos_accessor = &parsed.gltf.accessors[second.attributes.position];
        let view = &parsed.gltf.buffer_views[pos_accessor.buffer_view];
        assert!(view.byte_offset >= blocks[0].data.len());
        assert_eq!(view.byte_offset % 4, 0);

        let expected: Vec<f32> = square.positions.chunks_exact(3).flat_map(to_y_up).collect();
        assert_eq!(read_f32s(&parsed.blob, view), expected);

        let idx_view = &parsed.gltf.buffer_views[parsed.gltf.accessors[second.indices].buffer_view];
        let indices: Vec<u32> = parsed.blob[idx_view.byte_offset..idx_view.byte_offset + idx_view.byte_length]
            .chunks_exact(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        assert_eq!(indices, square.indices);
    }

    #[test]
    fn test_position_min_max() {
        let blocks = vec![MeshBlock::build(&square_mesh(10.0, 8.0), Color::BUILDING).unwrap()];
        let layout = flatten(&blocks, "test", "scene").unwrap();
        let accessor = &layout.gltf.accessors[0];
        // Y 向上：高度进入 y，北向进入 -z
        assert_eq!(accessor.min, Some(vec![0.0, 0.0, -10.0]));
        assert_eq!(accessor.max, Some(vec![10.0, 8.0, 0.0]));
    }

    #[test]
    fn test_corrupted_view_detected() {
        let blocks = vec![
            MeshBlock::build(&square_mesh(1.0, 1.0), Color::BUILDING).unwrap(),
            MeshBlock::build(&square_mesh(2.0, 1.0), Color::BUILDING).unwrap(),
        ];
        let mut layout = flatten(&blocks, "test", "scene").unwrap();
        layout.gltf.buffer_views[3].byte_offset = 0;
        let err = verify_views(&layout.gltf, &layout.blob, &blocks).unwrap_err();
        assert!(matches!(err, ExportError::FormatInvariant { format: "GLB", .. }));
    }

    #[test]
    fn test_empty_scene_has_no_bin_chunk() {
        let (site, _) = SiteDocument::prepare(sample_manifest(), Default::default(), None);
        let encoded = GlbExporter.export(&site).unwrap();
        let parsed = read_glb(&encoded.artifacts[0].bytes).unwrap();
        assert!(parsed.blob.is_empty());
        assert!(parsed.gltf.buffers.is_empty());
        assert!(parsed.gltf.nodes.is_empty());
        assert_eq!(parsed.declared_length as usize, encoded.artifacts[0].bytes.len());

        // glTF 不允许空的 nodes 数组，没有网格时整个键省略
        let bytes = &encoded.artifacts[0].bytes;
        let json_len = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]) as usize;
        let json = std::str::from_utf8(&bytes[20..20 + json_len]).unwrap();
        assert!(!json.contains("\"nodes\""));
        assert!(json.contains("\"scenes\""));
    }

    #[test]
    fn test_idempotent() {
        let a = GlbExporter
            .export(&SiteDocument::prepare(sample_manifest(), sample_features(), None).0)
            .unwrap();
        let b = GlbExporter
            .export(&SiteDocument::prepare(sample_manifest(), sample_features(), None).0)
            .unwrap();
        assert_eq!(a.artifacts, b.artifacts);
    }
}
