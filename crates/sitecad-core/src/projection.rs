//! 平面投影
//!
//! 经纬度 → 以场地中心为原点的局部米制平面（等距圆柱近似）：
//!
//! ```text
//! x = (lon - lon0) · 111320 · cos(lat0)
//! y = (lat - lat0) · 111320
//! ```
//!
//! 只适用于半径几公里以内的场地，不做大地基准转换。

use crate::math::Point2;
use serde::{Deserialize, Serialize};

/// 每度纬度对应的米数
pub const METERS_PER_DEGREE: f64 = 111_320.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocalProjection {
    pub center_lon: f64,
    pub center_lat: f64,
    cos_lat: f64,
}

impl LocalProjection {
    pub fn new(center_lon: f64, center_lat: f64) -> Self {
        Self {
            center_lon,
            center_lat,
            cos_lat: center_lat.to_radians().cos(),
        }
    }

    /// 经纬度 → 局部米
    #[inline]
    pub fn to_local(&self, lon: f64, lat: f64) -> Point2 {
        Point2::new(
            (lon - self.center_lon) * METERS_PER_DEGREE * self.cos_lat,
            (lat - self.center_lat) * METERS_PER_DEGREE,
        )
    }

    #[inline]
    pub fn project(&self, geo: &Point2) -> Point2 {
        self.to_local(geo.x, geo.y)
    }

    pub fn project_all(&self, geo: &[Point2]) -> Vec<Point2> {
        geo.iter().map(|p| self.project(p)).collect()
    }

    pub fn project_coords(&self, coords: &[[f64; 2]]) -> Vec<Point2> {
        coords.iter().map(|c| self.to_local(c[0], c[1])).collect()
    }

    /// 局部米 → 经纬度（极点附近 cos(lat0) 趋零时东西向无法反算，返回中心经度）
    pub fn to_geo(&self, local: &Point2) -> Point2 {
        let lon = if self.cos_lat.abs() > 1e-12 {
            self.center_lon + local.x / (METERS_PER_DEGREE * self.cos_lat)
        } else {
            self.center_lon
        };
        Point2::new(lon, self.center_lat + local.y / METERS_PER_DEGREE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_center_maps_to_origin() {
        let proj = LocalProjection::new(13.4, 52.5);
        let p = proj.to_local(13.4, 52.5);
        assert_eq!(p, Point2::new(0.0, 0.0));
    }

    #[test]
    fn test_equator_degree() {
        let proj = LocalProjection::new(0.0, 0.0);
        let p = proj.to_local(1.0, 1.0);
        assert!((p.x - 111_320.0).abs() < 1e-6);
        assert!((p.y - 111_320.0).abs() < 1e-6);
    }

    #[test]
    fn test_longitude_shrinks_with_latitude() {
        let proj = LocalProjection::new(0.0, 60.0);
        let p = proj.to_local(0.001, 60.0);
        assert!((p.x - 111.32 * 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_round_trip() {
        let proj = LocalProjection::new(-122.42, 37.77);
        let geo = Point2::new(-122.415, 37.775);
        let back = proj.to_geo(&proj.project(&geo));
        assert!((back - geo).norm() < 1e-12);
    }
}
