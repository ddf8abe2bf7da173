//! 矢量要素
//!
//! 上游传入的建筑、道路、用地要素在这里一次性校验，
//! 之后各编码器只处理结构合法的几何。

use crate::error::GeometryError;
use crate::geometry::ensure_ccw;
use crate::math::{BoundingBox2, Point2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 要素分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureClass {
    Building,
    Road,
    Landuse,
}

impl FeatureClass {
    pub fn label(&self) -> &'static str {
        match self {
            FeatureClass::Building => "Buildings",
            FeatureClass::Road => "Roads",
            FeatureClass::Landuse => "Land use",
        }
    }
}

/// 几何类型，坐标为 `[经度, 纬度]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum FeatureGeometry {
    /// 闭合环（首点 == 末点）
    Polygon(Vec<[f64; 2]>),
    LineString(Vec<[f64; 2]>),
    Point([f64; 2]),
}

impl FeatureGeometry {
    pub fn type_name(&self) -> &'static str {
        match self {
            FeatureGeometry::Polygon(_) => "Polygon",
            FeatureGeometry::LineString(_) => "LineString",
            FeatureGeometry::Point(_) => "Point",
        }
    }

    /// 坐标序列（点要素返回单元素）
    pub fn coords(&self) -> &[[f64; 2]] {
        match self {
            FeatureGeometry::Polygon(c) | FeatureGeometry::LineString(c) => c,
            FeatureGeometry::Point(p) => std::slice::from_ref(p),
        }
    }

    pub fn points(&self) -> Vec<Point2> {
        self.coords().iter().map(|c| Point2::new(c[0], c[1])).collect()
    }
}

/// 属性值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl PropertyValue {
    /// 数值；数字字符串（如 OSM 的 "12.5"）也会被解析
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Number(n) => Some(*n),
            PropertyValue::Text(s) => s.trim().trim_end_matches(" m").parse().ok(),
            PropertyValue::Bool(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// 矢量要素
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorFeature {
    pub id: String,
    pub class: FeatureClass,
    pub geometry: FeatureGeometry,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
}

impl VectorFeature {
    pub fn new(id: impl Into<String>, class: FeatureClass, geometry: FeatureGeometry) -> Self {
        Self {
            id: id.into(),
            class,
            geometry,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: PropertyValue) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        self.properties
            .get(key)
            .and_then(PropertyValue::as_f64)
            .filter(|v| v.is_finite())
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(PropertyValue::as_str)
    }

    pub fn name(&self) -> Option<&str> {
        self.text("name")
    }

    /// 建筑高度：`height` → `building:levels` × 层高 → 默认值
    pub fn building_height(&self, meters_per_level: f64, default_height: f64) -> f64 {
        self.number("height")
            .filter(|h| *h > 0.0)
            .or_else(|| {
                self.number("building:levels")
                    .filter(|l| *l > 0.0)
                    .map(|l| l * meters_per_level)
            })
            .unwrap_or(default_height)
    }

    /// 入库校验
    ///
    /// - 所有坐标必须有限
    /// - 多边形环自动闭合，闭合后至少 4 个坐标
    /// - 折线至少 2 个坐标
    ///
    /// 这里不判断环的退化（重复顶点），那是 [`Footprint::from_ring`] 的职责。
    pub fn validated(mut self) -> Result<Self, GeometryError> {
        for (index, c) in self.geometry.coords().iter().enumerate() {
            if !c[0].is_finite() || !c[1].is_finite() {
                return Err(GeometryError::NonFiniteCoordinate { index });
            }
        }

        match &mut self.geometry {
            FeatureGeometry::Polygon(ring) => {
                if let (Some(first), Some(last)) = (ring.first().copied(), ring.last().copied()) {
                    if first != last {
                        ring.push(first);
                    }
                }
                if ring.len() < 4 {
                    return Err(GeometryError::TooFewPoints {
                        kind: "polygon",
                        count: ring.len(),
                    });
                }
            }
            FeatureGeometry::LineString(line) => {
                if line.len() < 2 {
                    return Err(GeometryError::TooFewPoints {
                        kind: "line",
                        count: line.len(),
                    });
                }
            }
            FeatureGeometry::Point(_) => {}
        }

        Ok(self)
    }
}

/// 单个要素的处理结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureOutcome {
    pub feature_id: String,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum Outcome {
    Ok,
    Skipped(String),
}

impl FeatureOutcome {
    pub fn ok(feature_id: impl Into<String>) -> Self {
        Self {
            feature_id: feature_id.into(),
            outcome: Outcome::Ok,
        }
    }

    pub fn skipped(feature_id: impl Into<String>, reason: impl ToString) -> Self {
        Self {
            feature_id: feature_id.into(),
            outcome: Outcome::Skipped(reason.to_string()),
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.outcome, Outcome::Skipped(_))
    }
}

/// 已分类的要素集合
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureSet {
    #[serde(default)]
    pub buildings: Vec<VectorFeature>,
    #[serde(default)]
    pub roads: Vec<VectorFeature>,
    #[serde(default)]
    pub landuse: Vec<VectorFeature>,
}

impl FeatureSet {
    /// 校验所有要素，返回合法集合和被拒绝要素的记录
    pub fn ingest(self) -> (FeatureSet, Vec<FeatureOutcome>) {
        let mut rejected = Vec::new();
        let mut keep = |features: Vec<VectorFeature>| -> Vec<VectorFeature> {
            features
                .into_iter()
                .filter_map(|f| {
                    let id = f.id.clone();
                    match f.validated() {
                        Ok(f) => Some(f),
                        Err(e) => {
                            tracing::warn!(feature = %id, error = %e, "rejecting feature at ingestion");
                            rejected.push(FeatureOutcome::skipped(id, e));
                            None
                        }
                    }
                })
                .collect()
        };

        let set = FeatureSet {
            buildings: keep(self.buildings),
            roads: keep(self.roads),
            landuse: keep(self.landuse),
        };
        (set, rejected)
    }

    pub fn len(&self) -> usize {
        self.buildings.len() + self.roads.len() + self.landuse.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &VectorFeature> {
        self.buildings
            .iter()
            .chain(self.roads.iter())
            .chain(self.landuse.iter())
    }
}

/// 建筑轮廓：去掉闭合重复点和连续重复点后的逆时针顶点环
#[derive(Debug, Clone, PartialEq)]
pub struct Footprint {
    vertices: Vec<Point2>,
}

/// 判定两个顶点重复的距离
const DUPLICATE_TOLERANCE: f64 = 1e-9;

impl Footprint {
    /// 从（可闭合的）环构造；少于 3 个不同顶点时返回错误
    pub fn from_ring(ring: &[Point2]) -> Result<Self, GeometryError> {
        let mut vertices: Vec<Point2> = Vec::with_capacity(ring.len());
        for p in ring {
            if !p.x.is_finite() || !p.y.is_finite() {
                return Err(GeometryError::NonFiniteCoordinate {
                    index: vertices.len(),
                });
            }
            let duplicate = vertices
                .last()
                .is_some_and(|last| (last - p).norm() <= DUPLICATE_TOLERANCE);
            if !duplicate {
                vertices.push(*p);
            }
        }
        while vertices.len() > 1
            && (vertices[vertices.len() - 1] - vertices[0]).norm() <= DUPLICATE_TOLERANCE
        {
            vertices.pop();
        }

        if vertices.len() < 3 {
            return Err(GeometryError::DegenerateRing {
                distinct: vertices.len(),
            });
        }

        ensure_ccw(&mut vertices);
        Ok(Self { vertices })
    }

    pub fn vertices(&self) -> &[Point2] {
        &self.vertices
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// 闭合环（末点重复首点）
    pub fn closed_ring(&self) -> Vec<Point2> {
        let mut ring = self.vertices.clone();
        ring.push(self.vertices[0]);
        ring
    }

    pub fn bounding_box(&self) -> BoundingBox2 {
        BoundingBox2::from_points(&self.vertices)
    }
}
