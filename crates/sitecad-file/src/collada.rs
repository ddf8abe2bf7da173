//! COLLADA 1.4.1 导出
//!
//! 库段落顺序固定：asset → library_materials → library_effects →
//! library_geometries → library_visual_scenes → scene。
//! 每个网格一个 geometry 和一个实例化它的场景节点。

use crate::artifact::{Encoded, Encoder, OutputArtifact};
use crate::error::ExportError;
use crate::glb::scene_meshes;
use crate::manifest::ExportFormat;
use crate::site::SiteDocument;
use sitecad_core::mesh::Mesh;
use sitecad_core::properties::Color;
use sitecad_core::units::{format_fixed, Unit};
use std::fmt::Write;
use tracing::debug;

const NAMESPACE: &str = "http://www.collada.org/2005/11/COLLADASchema";

/// 转义 XML 保留字符
pub fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// 材质：同色网格共用一个
struct MaterialEntry {
    id: String,
    name: &'static str,
    color: Color,
}

fn material_for(color: Color) -> MaterialEntry {
    let name = if color == Color::TERRAIN_LOW {
        "Terrain"
    } else if color == Color::BUILDING {
        "Building"
    } else {
        "Default"
    };
    MaterialEntry {
        id: format!("mat-{}", name.to_lowercase()),
        name,
        color,
    }
}

/// COLLADA 文档写入器
pub struct ColladaWriter {
    unit: Unit,
    precision: u8,
    out: String,
}

impl ColladaWriter {
    pub fn new(unit: Unit, precision: u8) -> Self {
        Self {
            unit,
            precision,
            out: String::new(),
        }
    }

    fn num(&self, meters: f64) -> String {
        format_fixed(self.unit.from_meters(meters), self.precision)
    }

    /// 写出完整文档
    pub fn write(
        mut self,
        title: &str,
        created: &str,
        producer: &str,
        meshes: &[(Mesh, Color)],
    ) -> Result<String, ExportError> {
        let mut materials: Vec<MaterialEntry> = Vec::new();
        let mut mesh_material = Vec::with_capacity(meshes.len());
        for (_, color) in meshes {
            let entry = material_for(*color);
            let index = match materials.iter().position(|m| m.id == entry.id) {
                Some(i) => i,
                None => {
                    materials.push(entry);
                    materials.len() - 1
                }
            };
            mesh_material.push(index);
        }

        self.write_header(title, created, producer)?;
        // 库段落至少要有一个子元素，空场景时省略
        if !meshes.is_empty() {
            self.write_materials(&materials)?;
            self.write_effects(&materials)?;
            self.write_geometries(meshes, &materials, &mesh_material)?;
        }
        self.write_visual_scene(title, meshes, &materials, &mesh_material)?;
        writeln!(self.out, "  <scene>")?;
        writeln!(self.out, "    <instance_visual_scene url=\"#scene\"/>")?;
        writeln!(self.out, "  </scene>")?;
        writeln!(self.out, "</COLLADA>")?;
        Ok(self.out)
    }

    fn write_header(&mut self, title: &str, created: &str, producer: &str) -> std::fmt::Result {
        let unit_name = match self.unit {
            Unit::Meters => "meter",
            Unit::Feet => "foot",
            Unit::Millimeters => "millimeter",
        };
        writeln!(self.out, "<?xml version=\"1.0\" encoding=\"utf-8\"?>")?;
        writeln!(self.out, "<COLLADA xmlns=\"{}\" version=\"1.4.1\">", NAMESPACE)?;
        writeln!(self.out, "  <asset>")?;
        writeln!(self.out, "    <contributor>")?;
        writeln!(self.out, "      <authoring_tool>{}</authoring_tool>", xml_escape(producer))?;
        writeln!(self.out, "    </contributor>")?;
        writeln!(self.out, "    <created>{}</created>", created)?;
        writeln!(self.out, "    <modified>{}</modified>", created)?;
        writeln!(self.out, "    <title>{}</title>", xml_escape(title))?;
        writeln!(
            self.out,
            "    <unit name=\"{}\" meter=\"{}\"/>",
            unit_name,
            self.unit.meters_per_unit()
        )?;
        writeln!(self.out, "    <up_axis>Z_UP</up_axis>")?;
        writeln!(self.out, "  </asset>")
    }

    fn write_materials(&mut self, materials: &[MaterialEntry]) -> std::fmt::Result {
        writeln!(self.out, "  <library_materials>")?;
        for m in materials {
            writeln!(self.out, "    <material id=\"{}\" name=\"{}\">", m.id, m.name)?;
            writeln!(self.out, "      <instance_effect url=\"#{}-effect\"/>", m.id)?;
            writeln!(self.out, "    </material>")?;
        }
        writeln!(self.out, "  </library_materials>")
    }

    fn write_effects(&mut self, materials: &[MaterialEntry]) -> std::fmt::Result {
        writeln!(self.out, "  <library_effects>")?;
        for m in materials {
            let [r, g, b] = m.color.to_unit_rgb();
            writeln!(self.out, "    <effect id=\"{}-effect\">", m.id)?;
            writeln!(self.out, "      <profile_COMMON>")?;
            writeln!(self.out, "        <technique sid=\"common\">")?;
            writeln!(self.out, "          <lambert>")?;
            writeln!(
                self.out,
                "            <diffuse><color sid=\"diffuse\">{:.4} {:.4} {:.4} 1</color></diffuse>",
                r, g, b
            )?;
            writeln!(self.out, "          </lambert>")?;
            writeln!(self.out, "        </technique>")?;
            writeln!(self.out, "      </profile_COMMON>")?;
            writeln!(self.out, "    </effect>")?;
        }
        writeln!(self.out, "  </library_effects>")
    }

    fn write_geometries(
        &mut self,
        meshes: &[(Mesh, Color)],
        materials: &[MaterialEntry],
        mesh_material: &[usize],
    ) -> std::fmt::Result {
        writeln!(self.out, "  <library_geometries>")?;
        for (i, (mesh, _)) in meshes.iter().enumerate() {
            let id = format!("geom-{}", i);
            let vertex_count = mesh.vertex_count();

            let positions = mesh
                .positions
                .iter()
                .map(|v| self.num(*v as f64))
                .collect::<Vec<_>>()
                .join(" ");
            writeln!(self.out, "    <geometry id=\"{}\" name=\"{}\">", id, xml_escape(&mesh.name))?;
            writeln!(self.out, "      <mesh>")?;
            self.write_source(&format!("{}-positions", id), &positions, vertex_count, &["X", "Y", "Z"])?;

            if let Some(colors) = &mesh.colors {
                let values = colors
                    .iter()
                    .map(|c| format!("{:.4}", c))
                    .collect::<Vec<_>>()
                    .join(" ");
                self.write_source(&format!("{}-colors", id), &values, vertex_count, &["R", "G", "B", "A"])?;
            }

            writeln!(self.out, "        <vertices id=\"{}-vertices\">", id)?;
            writeln!(
                self.out,
                "          <input semantic=\"POSITION\" source=\"#{}-positions\"/>",
                id
            )?;
            writeln!(self.out, "        </vertices>")?;

            writeln!(
                self.out,
                "        <triangles material=\"{}\" count=\"{}\">",
                materials[mesh_material[i]].id,
                mesh.triangle_count()
            )?;
            writeln!(
                self.out,
                "          <input semantic=\"VERTEX\" source=\"#{}-vertices\" offset=\"0\"/>",
                id
            )?;
            if mesh.colors.is_some() {
                writeln!(
                    self.out,
                    "          <input semantic=\"COLOR\" source=\"#{}-colors\" offset=\"0\"/>",
                    id
                )?;
            }
            let indices = mesh
                .indices
                .iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join(" ");
            writeln!(self.out, "          <p>{}</p>", indices)?;
            writeln!(self.out, "        </triangles>")?;
            writeln!(self.out, "      </mesh>")?;
            writeln!(self.out, "    </geometry>")?;
        }
        writeln!(self.out, "  </library_geometries>")
    }

    fn write_source(&mut self, id: &str, values: &str, count: usize, params: &[&str]) -> std::fmt::Result {
        let stride = params.len();
        writeln!(self.out, "        <source id=\"{}\">", id)?;
        writeln!(
            self.out,
            "          <float_array id=\"{}-array\" count=\"{}\">{}</float_array>",
            id,
            count * stride,
            values
        )?;
        writeln!(self.out, "          <technique_common>")?;
        writeln!(
            self.out,
            "            <accessor source=\"#{}-array\" count=\"{}\" stride=\"{}\">",
            id, count, stride
        )?;
        for p in params {
            writeln!(self.out, "              <param name=\"{}\" type=\"float\"/>", p)?;
        }
        writeln!(self.out, "            </accessor>")?;
        writeln!(self.out, "          </technique_common>")?;
        writeln!(self.out, "        </source>")
    }

    fn write_visual_scene(
        &mut self,
        title: &str,
        meshes: &[(Mesh, Color)],
        materials: &[MaterialEntry],
        mesh_material: &[usize],
    ) -> std::fmt::Result {
        writeln!(self.out, "  <library_visual_scenes>")?;
        writeln!(self.out, "    <visual_scene id=\"scene\" name=\"{}\">", xml_escape(title))?;
        if meshes.is_empty() {
            writeln!(self.out, "      <node id=\"node-site\" name=\"{}\"/>", xml_escape(title))?;
        }
        for (i, (mesh, _)) in meshes.iter().enumerate() {
            let material = &materials[mesh_material[i]];
            writeln!(self.out, "      <node id=\"node-{}\" name=\"{}\">", i, xml_escape(&mesh.name))?;
            writeln!(self.out, "        <instance_geometry url=\"#geom-{}\">", i)?;
            writeln!(self.out, "          <bind_material>")?;
            writeln!(self.out, "            <technique_common>")?;
            writeln!(
                self.out,
                "              <instance_material symbol=\"{}\" target=\"#{}\"/>",
                material.id, material.id
            )?;
            writeln!(self.out, "            </technique_common>")?;
            writeln!(self.out, "          </bind_material>")?;
            writeln!(self.out, "        </instance_geometry>")?;
            writeln!(self.out, "      </node>")?;
        }
        writeln!(self.out, "    </visual_scene>")?;
        writeln!(self.out, "  </library_visual_scenes>")
    }
}

/// COLLADA 导出器
#[derive(Debug, Default, Clone, Copy)]
pub struct ColladaExporter;

impl Encoder for ColladaExporter {
    fn format(&self) -> ExportFormat {
        ExportFormat::Exchange
    }

    fn encode(&self, site: &SiteDocument) -> Result<Encoded, ExportError> {
        self.export(site)
    }
}

impl ColladaExporter {
    pub fn export(&self, site: &SiteDocument) -> Result<Encoded, ExportError> {
        let (meshes, features) = scene_meshes(site, ExportFormat::Exchange);
        for (mesh, _) in &meshes {
            mesh.validate()?;
        }

        let created = site.metadata.generated_at.format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let xml = ColladaWriter::new(site.units(), site.precision()).write(
            &site.manifest.site_name,
            &created,
            &site.metadata.producer,
            &meshes,
        )?;

        debug!(geometries = meshes.len(), bytes = xml.len(), "COLLADA written");
        Ok(Encoded::single(
            OutputArtifact::new(ExportFormat::Exchange.path(), xml.into_bytes()),
            features,
        ))
    }
}
