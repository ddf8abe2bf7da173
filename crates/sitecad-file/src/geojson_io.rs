//! 等高线 GeoJSON 导出
//!
//! 每个高程一个 `MultiLineString` 要素，坐标保持经纬度。

use crate::artifact::OutputArtifact;
use geojson::{Feature, FeatureCollection, Geometry, JsonObject, Value};
use sitecad_core::contour::ContourLine;
use sitecad_core::units::round_to;

pub const CONTOURS_PATH: &str = "geojson/contours.geojson";

/// 经纬度保留 7 位小数（约 1 厘米）
const COORD_PRECISION: u8 = 7;

pub fn contours_to_geojson(contours: &[ContourLine], interval: f64, index_every: u32) -> FeatureCollection {
    let features = contours
        .iter()
        .map(|line| {
            let lines = line
                .polylines
                .iter()
                .map(|pl| {
                    pl.iter()
                        .map(|p| vec![round_to(p.x, COORD_PRECISION), round_to(p.y, COORD_PRECISION)])
                        .collect()
                })
                .collect();

            let mut properties = JsonObject::new();
            properties.insert("elevation".to_string(), line.elevation.into());
            properties.insert("unit".to_string(), "m".into());
            properties.insert("index".to_string(), line.is_index(interval, index_every).into());

            Feature {
                bbox: None,
                geometry: Some(Geometry::new(Value::MultiLineString(lines))),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            }
        })
        .collect();

    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

pub fn contours_artifact(contours: &[ContourLine], interval: f64, index_every: u32) -> OutputArtifact {
    let collection = contours_to_geojson(contours, interval, index_every);
    OutputArtifact::new(CONTOURS_PATH, collection.to_string().into_bytes())
}
