//! 数学基础类型
//!
//! 基于 nalgebra 的点类型，以及平面与地理两种包围盒。

use nalgebra as na;
use serde::{Deserialize, Serialize};

/// 2D点类型（局部坐标为米，地理坐标为 x=经度、y=纬度）
pub type Point2 = na::Point2<f64>;

/// 数值容差，用于几何比较
pub const EPSILON: f64 = 1e-10;

/// 判断两个浮点数是否近似相等
#[inline]
pub fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() < EPSILON
}

/// 判断两个2D点是否在给定容差内重合
#[inline]
pub fn points_within(a: &Point2, b: &Point2, tolerance: f64) -> bool {
    (a.x - b.x).abs() <= tolerance && (a.y - b.y).abs() <= tolerance
}

/// 2D包围盒
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox2 {
    pub min: Point2,
    pub max: Point2,
}

impl BoundingBox2 {
    pub fn new(min: Point2, max: Point2) -> Self {
        Self { min, max }
    }

    /// 空包围盒（无效状态，用于累积）
    pub fn empty() -> Self {
        Self {
            min: Point2::new(f64::MAX, f64::MAX),
            max: Point2::new(f64::MIN, f64::MIN),
        }
    }

    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Point2>) -> Self {
        let mut bbox = Self::empty();
        for p in points {
            bbox.expand_to_include(p);
        }
        bbox
    }

    pub fn expand_to_include(&mut self, point: &Point2) {
        self.min.x = self.min.x.min(point.x);
        self.min.y = self.min.y.min(point.y);
        self.max.x = self.max.x.max(point.x);
        self.max.y = self.max.y.max(point.y);
    }

    /// 是否包含至少一个点
    pub fn is_valid(&self) -> bool {
        self.min.x <= self.max.x && self.min.y <= self.max.y
    }

    pub fn center(&self) -> Point2 {
        Point2::new(
            (self.min.x + self.max.x) / 2.0,
            (self.min.y + self.max.y) / 2.0,
        )
    }

    pub fn width(&self) -> f64 {
        self.max.x - self.min.x
    }

    pub fn height(&self) -> f64 {
        self.max.y - self.min.y
    }
}

/// 地理包围盒（经纬度，单位：度）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoBounds {
    pub west: f64,
    pub east: f64,
    pub south: f64,
    pub north: f64,
}

impl GeoBounds {
    pub fn new(west: f64, east: f64, south: f64, north: f64) -> Self {
        Self {
            west,
            east,
            south,
            north,
        }
    }

    /// 四个边界都有限且构成面积非零的矩形
    pub fn is_valid(&self) -> bool {
        [self.west, self.east, self.south, self.north]
            .iter()
            .all(|v| v.is_finite())
            && self.east > self.west
            && self.north > self.south
    }

    pub fn center(&self) -> Point2 {
        Point2::new(
            (self.west + self.east) / 2.0,
            (self.south + self.north) / 2.0,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounding_box() {
        let points = [
            Point2::new(0.0, 0.0),
            Point2::new(10.0, 5.0),
            Point2::new(-5.0, 8.0),
        ];
        let bbox = BoundingBox2::from_points(&points);

        assert!(approx_eq(bbox.min.x, -5.0));
        assert!(approx_eq(bbox.max.y, 8.0));
        assert!(approx_eq(bbox.width(), 15.0));
        assert!(!BoundingBox2::empty().is_valid());
    }

    #[test]
    fn test_geo_bounds_validity() {
        assert!(GeoBounds::new(10.0, 10.1, 50.0, 50.1).is_valid());
        assert!(!GeoBounds::new(10.0, 10.0, 50.0, 50.1).is_valid());
        assert!(!GeoBounds::new(10.0, f64::NAN, 50.0, 50.1).is_valid());
    }
}
