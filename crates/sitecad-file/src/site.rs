//! 场地文档
//!
//! 一次导出任务的共享只读数据：清单、投影、校验过的要素、高程栅格和等高线。
//! 由任务准备一次，之后所有编码器并行读取。

use crate::manifest::{ExportManifest, ExportOptions};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sitecad_core::contour::{extract_contours, ContourLine};
use sitecad_core::elevation::ElevationGrid;
use sitecad_core::error::GeometryError;
use sitecad_core::feature::{FeatureGeometry, FeatureOutcome, FeatureSet, Footprint, VectorFeature};
use sitecad_core::math::Point2;
use sitecad_core::mesh::{terrain_mesh, Mesh};
use sitecad_core::projection::LocalProjection;
use sitecad_core::units::Unit;
use tracing::{debug, warn};
use uuid::Uuid;

/// 文档元数据
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteMetadata {
    pub id: Uuid,
    pub title: String,
    pub generated_at: DateTime<Utc>,
    pub units: Unit,
    pub precision: u8,
    pub producer: String,
}

impl SiteMetadata {
    fn from_manifest(manifest: &ExportManifest) -> Self {
        Self {
            id: manifest.job_id,
            title: manifest.site_name.clone(),
            generated_at: manifest.generated_at,
            units: manifest.units,
            precision: manifest.precision,
            producer: format!("sitecad {}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// 拉伸前的建筑：局部米制轮廓 + 高度 + 地面高程
#[derive(Debug, Clone)]
pub struct Building<'a> {
    pub feature: &'a VectorFeature,
    pub footprint: Footprint,
    pub height: f64,
    /// 轮廓中心处的绝对地面高程（无栅格时为 0）
    pub ground: f64,
}

impl Building<'_> {
    pub fn label(&self) -> &str {
        self.feature.name().unwrap_or(&self.feature.id)
    }
}

/// 场地文档
#[derive(Debug)]
pub struct SiteDocument {
    pub metadata: SiteMetadata,
    pub manifest: ExportManifest,
    pub projection: LocalProjection,
    pub features: FeatureSet,
    pub elevation: Option<ElevationGrid>,
    pub contours: Vec<ContourLine>,
    /// 三维输出中 z=0 对应的高程
    pub base_elevation: f64,
}

impl SiteDocument {
    /// 校验要素、提取等高线
    ///
    /// 返回文档和入库时被拒绝的要素记录。
    pub fn prepare(
        manifest: ExportManifest,
        features: FeatureSet,
        elevation: Option<ElevationGrid>,
    ) -> (Self, Vec<FeatureOutcome>) {
        let (features, rejected) = features.ingest();

        let elevation = elevation.filter(|grid| match grid.validate() {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "ignoring invalid elevation grid");
                false
            }
        });

        let contours = elevation
            .as_ref()
            .map(|grid| extract_contours(grid, &manifest.options.contour_params()))
            .unwrap_or_default();

        let base_elevation = elevation
            .as_ref()
            .and_then(ElevationGrid::min_max)
            .map(|(lo, _)| lo)
            .unwrap_or(0.0);

        debug!(
            features = features.len(),
            rejected = rejected.len(),
            contour_levels = contours.len(),
            "site prepared"
        );

        let doc = Self {
            metadata: SiteMetadata::from_manifest(&manifest),
            projection: LocalProjection::new(manifest.center_lng, manifest.center_lat),
            manifest,
            features,
            elevation,
            contours,
            base_elevation,
        };
        (doc, rejected)
    }

    pub fn options(&self) -> &ExportOptions {
        &self.manifest.options
    }

    pub fn units(&self) -> Unit {
        self.manifest.units
    }

    pub fn precision(&self) -> u8 {
        self.manifest.precision
    }

    /// 要素坐标投影到局部米
    pub fn local_points(&self, feature: &VectorFeature) -> Vec<Point2> {
        self.projection.project_coords(feature.geometry.coords())
    }

    /// 局部坐标处的绝对地面高程
    pub fn ground_at(&self, local: &Point2) -> f64 {
        let Some(grid) = &self.elevation else {
            return 0.0;
        };
        let geo = self.projection.to_geo(local);
        grid.sample(geo.x, geo.y).unwrap_or(self.base_elevation)
    }

    /// 建筑要素 → 可拉伸的轮廓
    pub fn building<'a>(&self, feature: &'a VectorFeature) -> Result<Building<'a>, GeometryError> {
        if !matches!(feature.geometry, FeatureGeometry::Polygon(_)) {
            return Err(GeometryError::UnsupportedGeometry {
                expected: "Polygon",
                found: feature.geometry.type_name(),
            });
        }
        let footprint = Footprint::from_ring(&self.local_points(feature))?;
        let opts = self.options();
        let height = feature.building_height(opts.meters_per_level, opts.default_building_height_m);
        let ground = self.ground_at(&footprint.bounding_box().center());
        Ok(Building {
            feature,
            footprint,
            height,
            ground,
        })
    }

    /// 地形网格；未请求地形或无有效栅格时返回 None
    pub fn terrain(&self) -> Option<Result<Mesh, GeometryError>> {
        if !self.options().include_terrain {
            return None;
        }
        let grid = self.elevation.as_ref()?;
        Some(terrain_mesh(grid, &self.projection, self.base_elevation))
    }

    /// 等高线投影到局部米
    pub fn contour_local(&self, line: &ContourLine) -> Vec<Vec<Point2>> {
        line.polylines
            .iter()
            .map(|pl| self.projection.project_all(pl))
            .collect()
    }

    pub fn is_index_contour(&self, line: &ContourLine) -> bool {
        let opts = self.options();
        line.is_index(opts.contour_interval_m, opts.index_contour_every)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use sitecad_core::feature::{FeatureClass, PropertyValue};
    use sitecad_core::math::GeoBounds;

    pub const LAT: f64 = 47.3769;
    pub const LNG: f64 = 8.5417;

    /// 约 10 米见方的经纬度环
    pub fn square_ring(lng: f64, lat: f64, size_deg: f64) -> Vec<[f64; 2]> {
        vec![
            [lng, lat],
            [lng + size_deg, lat],
            [lng + size_deg, lat + size_deg],
            [lng, lat + size_deg],
            [lng, lat],
        ]
    }

    pub fn sample_features() -> FeatureSet {
        FeatureSet {
            buildings: vec![
                VectorFeature::new(
                    "way/1",
                    FeatureClass::Building,
                    FeatureGeometry::Polygon(square_ring(LNG, LAT, 0.0001)),
                )
                .with_property("name", PropertyValue::Text("Town Hall".into()))
                .with_property("height", PropertyValue::Number(12.0)),
                VectorFeature::new(
                    "way/2",
                    FeatureClass::Building,
                    FeatureGeometry::Polygon(vec![
                        [LNG, LAT],
                        [LNG + 0.0001, LAT],
                        [LNG + 0.0001, LAT],
                        [LNG, LAT],
                    ]),
                ),
            ],
            roads: vec![VectorFeature::new(
                "way/3",
                FeatureClass::Road,
                FeatureGeometry::LineString(vec![
                    [LNG - 0.001, LAT - 0.0005],
                    [LNG + 0.001, LAT - 0.0005],
                ]),
            )],
            landuse: vec![VectorFeature::new(
                "way/4",
                FeatureClass::Landuse,
                FeatureGeometry::Polygon(square_ring(LNG - 0.0008, LAT + 0.0003, 0.0003)),
            )
            .with_property("landuse", PropertyValue::Text("grass".into()))],
        }
    }

    /// 南低北高的斜坡：0 → 20 米
    pub fn ramp_grid() -> ElevationGrid {
        let bounds = GeoBounds::new(LNG - 0.002, LNG + 0.002, LAT - 0.0015, LAT + 0.0015);
        ElevationGrid::from_fn(21, 21, bounds, |_, row| (20 - row) as f64).unwrap()
    }

    pub fn sample_manifest() -> ExportManifest {
        let mut manifest = ExportManifest::new("Test Site", LAT, LNG, 150.0);
        manifest.generated_at = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        manifest
    }

    pub fn sample_site() -> SiteDocument {
        SiteDocument::prepare(sample_manifest(), sample_features(), Some(ramp_grid())).0
    }

    #[test]
    fn test_prepare_extracts_contours() {
        let site = sample_site();
        let levels: Vec<f64> = site.contours.iter().map(|c| c.elevation).collect();
        assert_eq!(levels, vec![5.0, 10.0, 15.0]);
        assert_eq!(site.base_elevation, 0.0);
        // 第二个建筑只有两个不同顶点，但环闭合后有 4 个坐标，能通过入库校验
        assert_eq!(site.features.buildings.len(), 2);
    }

    #[test]
    fn test_building_seated_on_terrain() {
        let site = sample_site();
        let b = site.building(&site.features.buildings[0]).unwrap();
        assert_eq!(b.height, 12.0);
        assert_eq!(b.footprint.len(), 4);
        assert_eq!(b.label(), "Town Hall");
        assert!(b.ground > 9.0 && b.ground < 11.5, "ground = {}", b.ground);
    }

    #[test]
    fn test_degenerate_building_rejected() {
        let site = sample_site();
        let err = site.building(&site.features.buildings[1]).unwrap_err();
        assert_eq!(err, GeometryError::DegenerateRing { distinct: 2 });
    }

    #[test]
    fn test_invalid_grid_is_dropped() {
        let bad = ElevationGrid {
            nx: 1,
            ny: 1,
            values: vec![0.0],
            bounds: GeoBounds::new(0.0, 1.0, 0.0, 1.0),
        };
        let (site, _) = SiteDocument::prepare(sample_manifest(), FeatureSet::default(), Some(bad));
        assert!(site.elevation.is_none());
        assert!(site.contours.is_empty());
        assert!(site.terrain().is_none());
    }
}
