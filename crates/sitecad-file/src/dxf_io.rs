//! DXF 导出
//!
//! 输出 R2000 版本的分图层线框图：
//! - BOUNDARY：场地范围圆
//! - BUILDINGS：底面环、顶面环，每个顶点一条竖线
//! - ROADS / LANDUSE：多段线
//! - CONTOURS / CONTOURS_INDEX：带高程的等高线，计曲线附标注
//! - LABELS：场地名称、建筑名称
//!
//! 坐标从米换算到清单单位后按精度取整，高程写在顶点 z 上。

use crate::artifact::{Encoded, Encoder, FeatureReport, OutputArtifact};
use crate::error::ExportError;
use crate::manifest::ExportFormat;
use crate::site::SiteDocument;
use sitecad_core::error::GeometryError;
use sitecad_core::feature::{FeatureGeometry, Footprint, VectorFeature};
use sitecad_core::layer::SiteLayer;
use sitecad_core::math::Point2;
use chrono::Local;
use sitecad_core::units::{round_to, Unit};
use tracing::debug;
use uuid::Uuid;

/// DXF 导出器
#[derive(Debug, Default, Clone, Copy)]
pub struct DxfExporter;

impl Encoder for DxfExporter {
    fn format(&self) -> ExportFormat {
        ExportFormat::Cad
    }

    fn encode(&self, site: &SiteDocument) -> Result<Encoded, ExportError> {
        self.export(site)
    }
}

impl DxfExporter {
    pub fn export(&self, site: &SiteDocument) -> Result<Encoded, ExportError> {
        let mut writer = CadWriter::new(site);
        writer.write_layers();
        writer.write_boundary();
        for feature in &site.features.buildings {
            writer.write_building(feature);
        }
        for feature in &site.features.roads {
            writer.write_road(feature);
        }
        for feature in &site.features.landuse {
            writer.write_landuse(feature);
        }
        writer.write_contours();

        let entity_count = writer.entity_count;
        let skipped = writer.report.skipped_count();
        let (bytes, features) = writer.finish()?;
        debug!(entity_count, skipped, bytes = bytes.len(), "DXF written");

        Ok(Encoded::single(
            OutputArtifact::new(ExportFormat::Cad.path(), bytes),
            features,
        ))
    }
}

struct CadWriter<'a> {
    site: &'a SiteDocument,
    drawing: dxf::Drawing,
    report: FeatureReport,
    unit: Unit,
    precision: u8,
    entity_count: usize,
}

impl<'a> CadWriter<'a> {
    fn new(site: &'a SiteDocument) -> Self {
        let mut drawing = dxf::Drawing::new();
        // LWPOLYLINE 需要 R2000 及以上
        drawing.header.version = dxf::enums::AcadVersion::R2000;
        drawing.header.default_drawing_units = units_to_dxf(site.units());
        stamp_header(&mut drawing.header, site);

        Self {
            site,
            drawing,
            report: FeatureReport::new(ExportFormat::Cad),
            unit: site.units(),
            precision: site.precision(),
            entity_count: 0,
        }
    }

    /// 米 → 输出单位，按精度取整
    fn scalar(&self, meters: f64) -> f64 {
        round_to(self.unit.from_meters(meters), self.precision)
    }

    fn point(&self, p: &Point2, z: f64) -> dxf::Point {
        dxf::Point::new(self.scalar(p.x), self.scalar(p.y), self.scalar(z))
    }

    fn add(&mut self, layer: SiteLayer, specific: dxf::entities::EntityType) {
        self.add_entity(layer, dxf::entities::Entity::new(specific));
    }

    fn add_entity(&mut self, layer: SiteLayer, mut entity: dxf::entities::Entity) {
        entity.common.layer = layer.name().to_string();
        self.drawing.add_entity(entity);
        self.entity_count += 1;
    }

    fn write_layers(&mut self) {
        for site_layer in SiteLayer::ALL {
            let style = site_layer.layer();
            let mut layer = dxf::tables::Layer::default();
            layer.name = style.name.clone();
            layer.color = dxf::Color::from_index(style.color.to_aci());
            layer.is_layer_plotted = style.plottable;
            self.drawing.add_layer(layer);
        }
    }

    fn polyline(&mut self, layer: SiteLayer, points: &[Point2], z: f64, closed: bool) {
        let mut lwpoly = dxf::entities::LwPolyline::default();
        lwpoly.set_is_closed(closed);
        lwpoly.vertices = points
            .iter()
            .map(|p| {
                let mut vertex = dxf::LwPolylineVertex::default();
                vertex.x = self.scalar(p.x);
                vertex.y = self.scalar(p.y);
                vertex
            })
            .collect();
        // LWPOLYLINE 的高程（组码 38）在公共字段上
        let mut entity = dxf::entities::Entity::new(dxf::entities::EntityType::LwPolyline(lwpoly));
        entity.common.elevation = self.scalar(z);
        self.add_entity(layer, entity);
    }

    fn text(&mut self, layer: SiteLayer, at: &Point2, z: f64, height_m: f64, value: &str) {
        let mut text = dxf::entities::Text::default();
        text.location = self.point(at, z);
        text.text_height = self.scalar(height_m);
        text.value = value.to_string();
        self.add(layer, dxf::entities::EntityType::Text(text));
    }

    fn label_height(&self) -> f64 {
        (self.site.manifest.radius_m / 60.0).max(0.5)
    }

    fn write_boundary(&mut self) {
        let radius = self.site.manifest.radius_m;
        let mut circle = dxf::entities::Circle::default();
        circle.center = self.point(&Point2::origin(), 0.0);
        circle.radius = self.scalar(radius);
        self.add(SiteLayer::Boundary, dxf::entities::EntityType::Circle(circle));

        let title = self.site.manifest.site_name.clone();
        let height = self.label_height() * 2.0;
        let at = Point2::new(-radius, radius + height);
        self.text(SiteLayer::Labels, &at, 0.0, height, &title);
    }

    fn write_building(&mut self, feature: &VectorFeature) {
        let building = match self.site.building(feature) {
            Ok(b) => b,
            Err(e) => {
                self.report.skip(SiteLayer::Buildings, &feature.id, e);
                return;
            }
        };

        let vertices = building.footprint.vertices();
        let floor = building.ground;
        let roof = building.ground + building.height;

        self.polyline(SiteLayer::Buildings, vertices, floor, true);
        self.polyline(SiteLayer::Buildings, vertices, roof, true);
        for p in vertices {
            let mut line = dxf::entities::Line::default();
            line.p1 = self.point(p, floor);
            line.p2 = self.point(p, roof);
            self.add(SiteLayer::Buildings, dxf::entities::EntityType::Line(line));
        }

        if let Some(name) = feature.name() {
            let center = building.footprint.bounding_box().center();
            let height = self.label_height() * 0.5;
            self.text(SiteLayer::Labels, &center, roof, height, name);
        }
        self.report.ok(&feature.id);
    }

    fn write_road(&mut self, feature: &VectorFeature) {
        let points = self.site.local_points(feature);
        match &feature.geometry {
            FeatureGeometry::LineString(_) => {
                self.polyline(SiteLayer::Roads, &points, 0.0, false);
            }
            FeatureGeometry::Polygon(_) => match Footprint::from_ring(&points) {
                Ok(ring) => self.polyline(SiteLayer::Roads, ring.vertices(), 0.0, true),
                Err(e) => {
                    self.report.skip(SiteLayer::Roads, &feature.id, e);
                    return;
                }
            },
            FeatureGeometry::Point(_) => {
                let e = GeometryError::UnsupportedGeometry {
                    expected: "LineString",
                    found: "Point",
                };
                self.report.skip(SiteLayer::Roads, &feature.id, e);
                return;
            }
        }
        self.report.ok(&feature.id);
    }

    fn write_landuse(&mut self, feature: &VectorFeature) {
        let ring = match &feature.geometry {
            FeatureGeometry::Polygon(_) => Footprint::from_ring(&self.site.local_points(feature)),
            other => Err(GeometryError::UnsupportedGeometry {
                expected: "Polygon",
                found: other.type_name(),
            }),
        };
        match ring {
            Ok(ring) => {
                self.polyline(SiteLayer::Landuse, ring.vertices(), 0.0, true);
                self.report.ok(&feature.id);
            }
            Err(e) => self.report.skip(SiteLayer::Landuse, &feature.id, e),
        }
    }

    fn write_contours(&mut self) {
        let site = self.site;
        let label_height = self.label_height() * 0.4;
        for line in &site.contours {
            let index = site.is_index_contour(line);
            let layer = if index {
                SiteLayer::ContoursIndex
            } else {
                SiteLayer::Contours
            };
            for polyline in site.contour_local(line) {
                if polyline.len() < 2 {
                    continue;
                }
                let closed = polyline.len() > 3 && polyline.first() == polyline.last();
                let points = if closed {
                    &polyline[..polyline.len() - 1]
                } else {
                    &polyline[..]
                };
                self.polyline(layer, points, line.elevation, closed);

                if index {
                    let at = points[points.len() / 2];
                    let value = elevation_label(self.unit.from_meters(line.elevation));
                    self.text(SiteLayer::ContoursIndex, &at, line.elevation, label_height, &value);
                }
            }
        }
    }

    fn finish(self) -> Result<(Vec<u8>, Vec<sitecad_core::feature::FeatureOutcome>), ExportError> {
        let mut bytes = Vec::new();
        self.drawing
            .save(&mut bytes)
            .map_err(|e| ExportError::Dxf(e.to_string()))?;
        Ok((bytes, self.report.finish()))
    }
}

/// 文件头的日期和 GUID 取自任务本身，同一任务两次导出字节相同
fn stamp_header(header: &mut dxf::Header, site: &SiteDocument) {
    let generated_at = site.metadata.generated_at;
    header.creation_date = generated_at.with_timezone(&Local);
    header.update_date = header.creation_date;
    header.creation_date_universal = generated_at;
    header.update_date_universal = generated_at;
    header.fingerprint_guid = site.metadata.id;
    header.version_guid = Uuid::new_v5(&site.metadata.id, generated_at.to_rfc3339().as_bytes());
}

fn units_to_dxf(unit: Unit) -> dxf::enums::Units {
    match unit {
        Unit::Meters => dxf::enums::Units::Meters,
        Unit::Feet => dxf::enums::Units::Feet,
        Unit::Millimeters => dxf::enums::Units::Millimeters,
    }
}

/// 整数高程不带小数
fn elevation_label(value: f64) -> String {
    if (value - value.round()).abs() < 1e-9 {
        format!("{:.0}", value)
    } else {
        format!("{:.1}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site::tests::{sample_features, sample_manifest, sample_site, ramp_grid};
    use sitecad_core::feature::Outcome;
    use sitecad_core::properties::Color;

    fn reload(encoded: &Encoded) -> dxf::Drawing {
        assert_eq!(encoded.artifacts.len(), 1);
        assert_eq!(encoded.artifacts[0].path, "exports/layers.dxf");
        let mut bytes = encoded.artifacts[0].bytes.as_slice();
        dxf::Drawing::load(&mut bytes).unwrap()
    }

    fn on_layer<'d>(drawing: &'d dxf::Drawing, layer: &str) -> Vec<&'d dxf::entities::Entity> {
        drawing
            .entities()
            .filter(|e| e.common.layer == layer)
            .collect()
    }

    #[test]
    fn test_layers_declared() {
        let encoded = DxfExporter.export(&sample_site()).unwrap();
        let drawing = reload(&encoded);
        let names: Vec<String> = drawing.layers().map(|l| l.name.clone()).collect();
        for layer in SiteLayer::ALL {
            assert!(names.iter().any(|n| n == layer.name()), "missing {}", layer.name());
        }
    }

    #[test]
    fn test_building_wireframe_and_degenerate_skip() {
        let encoded = DxfExporter.export(&sample_site()).unwrap();
        let drawing = reload(&encoded);

        // 一个有效建筑：底面 + 顶面 + 4 条竖线
        let buildings = on_layer(&drawing, "BUILDINGS");
        assert_eq!(buildings.len(), 6);
        let rings: Vec<f64> = buildings
            .iter()
            .filter_map(|e| match &e.specific {
                dxf::entities::EntityType::LwPolyline(_) => Some(e.common.elevation),
                _ => None,
            })
            .collect();
        assert_eq!(rings.len(), 2);
        assert!((rings[1] - rings[0] - 12.0).abs() < 1e-6);

        let skipped: Vec<_> = encoded.features.iter().filter(|f| f.is_skipped()).collect();
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].feature_id, "way/2");
        assert!(matches!(&skipped[0].outcome, Outcome::Skipped(r) if r.contains("Degenerate")));
    }

    #[test]
    fn test_contours_carry_elevation() {
        let encoded = DxfExporter.export(&sample_site()).unwrap();
        let drawing = reload(&encoded);

        let mut elevations: Vec<f64> = on_layer(&drawing, "CONTOURS")
            .iter()
            .filter_map(|e| match &e.specific {
                dxf::entities::EntityType::LwPolyline(_) => Some(e.common.elevation),
                _ => None,
            })
            .collect();
        elevations.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(elevations, vec![5.0, 10.0, 15.0]);
        assert_eq!(on_layer(&drawing, "ROADS").len(), 1);
        assert_eq!(on_layer(&drawing, "LANDUSE").len(), 1);
    }

    #[test]
    fn test_index_contours_labelled() {
        let mut manifest = sample_manifest();
        manifest.options.index_contour_every = 2;
        let (site, _) = SiteDocument::prepare(manifest, sample_features(), Some(ramp_grid()));
        let drawing = reload(&DxfExporter.export(&site).unwrap());

        let index = on_layer(&drawing, "CONTOURS_INDEX");
        let labels: Vec<String> = index
            .iter()
            .filter_map(|e| match &e.specific {
                dxf::entities::EntityType::Text(t) => Some(t.value.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(labels, vec!["10".to_string()]);
        assert_eq!(on_layer(&drawing, "CONTOURS").len(), 2);
    }

    #[test]
    fn test_units_and_precision() {
        let manifest = sample_manifest().with_units(Unit::Feet, 2);
        let (site, _) = SiteDocument::prepare(manifest, sample_features(), None);
        let drawing = reload(&DxfExporter.export(&site).unwrap());

        assert_eq!(drawing.header.default_drawing_units, dxf::enums::Units::Feet);
        let circle = drawing
            .entities()
            .find_map(|e| match &e.specific {
                dxf::entities::EntityType::Circle(c) => Some(c.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(circle.radius, 492.13);
    }

    #[test]
    fn test_precision_in_written_text() {
        let manifest = sample_manifest().with_units(Unit::Feet, 2);
        let (site, _) = SiteDocument::prepare(manifest, sample_features(), None);
        let encoded = DxfExporter.export(&site).unwrap();
        let text = String::from_utf8(encoded.artifacts[0].bytes.clone()).unwrap();
        // 取整后按最短形式写出，不补零
        assert!(text.contains(" 40\r\n492.13\r\n"));
        assert!(!text.contains("492.1299"));
    }

    #[test]
    fn test_output_is_reproducible() {
        let first = DxfExporter.export(&sample_site()).unwrap();
        let second = DxfExporter.export(&sample_site()).unwrap();
        assert_eq!(first.artifacts[0].bytes, second.artifacts[0].bytes);

        let drawing = reload(&first);
        assert_eq!(drawing.header.fingerprint_guid, sample_site().metadata.id);
    }

    #[test]
    fn test_layer_plot_flags() {
        let drawing = reload(&DxfExporter.export(&sample_site()).unwrap());
        assert!(drawing.layers().filter(|l| l.name != "0").all(|l| l.is_layer_plotted));
        let boundary = drawing.layers().find(|l| l.name == "BOUNDARY").unwrap();
        assert_eq!(boundary.color, dxf::Color::from_index(Color::BOUNDARY.to_aci()));
    }

    #[test]
    fn test_elevation_label() {
        assert_eq!(elevation_label(15.0), "15");
        assert_eq!(elevation_label(12.5), "12.5");
    }
}
