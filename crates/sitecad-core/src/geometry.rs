//! 平面几何算法
//!
//! - 线段与点距离
//! - 多边形有向面积与绕向
//! - Douglas-Peucker 折线简化

use crate::math::Point2;

/// 线段
#[derive(Debug, Clone, Copy)]
pub struct Line {
    pub start: Point2,
    pub end: Point2,
}

impl Line {
    pub fn new(start: Point2, end: Point2) -> Self {
        Self { start, end }
    }

    /// 计算点到线段的距离
    ///
    /// 起点与终点重合时退化为点距。
    pub fn distance_to_point(&self, point: &Point2) -> f64 {
        let v = self.end - self.start;
        let w = point - self.start;

        let c1 = w.dot(&v);
        if c1 <= 0.0 {
            return (point - self.start).norm();
        }

        let c2 = v.dot(&v);
        if c2 <= c1 {
            return (point - self.end).norm();
        }

        let b = c1 / c2;
        let pb = self.start + v * b;
        (point - pb).norm()
    }
}

/// 多边形有向面积（逆时针为正），环不需要首尾重复
pub fn signed_area(ring: &[Point2]) -> f64 {
    if ring.len() < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    for i in 0..ring.len() {
        let a = ring[i];
        let b = ring[(i + 1) % ring.len()];
        sum += a.x * b.y - b.x * a.y;
    }
    sum / 2.0
}

/// 保证环为逆时针
pub fn ensure_ccw(ring: &mut [Point2]) {
    if signed_area(ring) < 0.0 {
        ring.reverse();
    }
}

/// Douglas-Peucker 折线简化
///
/// 始终保留首尾点；`tolerance <= 0` 时原样返回。
pub fn simplify(points: &[Point2], tolerance: f64) -> Vec<Point2> {
    if points.len() < 3 || !(tolerance > 0.0) {
        return points.to_vec();
    }

    let mut keep = vec![false; points.len()];
    keep[0] = true;
    keep[points.len() - 1] = true;
    mark_kept(points, 0, points.len() - 1, tolerance, &mut keep);

    points
        .iter()
        .zip(keep)
        .filter_map(|(p, k)| k.then_some(*p))
        .collect()
}

fn mark_kept(points: &[Point2], first: usize, last: usize, tolerance: f64, keep: &mut [bool]) {
    if last <= first + 1 {
        return;
    }

    let chord = Line::new(points[first], points[last]);
    let (index, distance) = points[first + 1..last]
        .iter()
        .enumerate()
        .map(|(i, p)| (first + 1 + i, chord.distance_to_point(p)))
        .fold((first, 0.0), |best, cur| if cur.1 > best.1 { cur } else { best });

    if distance > tolerance {
        keep[index] = true;
        mark_kept(points, first, index, tolerance, keep);
        mark_kept(points, index, last, tolerance, keep);
    }
}
