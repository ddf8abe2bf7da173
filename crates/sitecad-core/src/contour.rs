//! 等高线提取
//!
//! 流程：
//! 1. Marching Squares：逐个 2×2 单元分类（16 种配置），在穿越边上线性插值
//! 2. 线段拼接：按端点（容差内）首尾相连成折线
//! 3. Douglas-Peucker 简化
//! 4. 栅格坐标转经纬度
//!
//! 追踪在栅格坐标系中进行（x = 列，y = 行），容差也以栅格单元为单位。
//! 各高程层互不依赖，使用 rayon 并行追踪。

use crate::elevation::ElevationGrid;
use crate::geometry::simplify;
use crate::math::{points_within, Point2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, warn};

/// 单次提取允许的最大高程层数
const MAX_LEVELS: usize = 10_000;

/// 插值时视为"两角点等值"的阈值
const FLAT_EPSILON: f64 = 1e-12;

/// 某一高程上的全部等高线
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContourLine {
    pub elevation: f64,
    /// 折线坐标为 `(经度, 纬度)`
    pub polylines: Vec<Vec<Point2>>,
}

impl ContourLine {
    pub fn point_count(&self) -> usize {
        self.polylines.iter().map(Vec::len).sum()
    }

    /// 是否为计曲线（高程是 `interval × every` 的整数倍）
    pub fn is_index(&self, interval: f64, every: u32) -> bool {
        let step = interval * every as f64;
        if !(step > 0.0) {
            return false;
        }
        let k = self.elevation / step;
        (k - k.round()).abs() < 1e-6
    }
}

/// 提取参数
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContourParams {
    /// 等高距
    pub interval: f64,
    /// 显式最低高程，缺省取栅格最小值
    pub min: Option<f64>,
    /// 显式最高高程，缺省取栅格最大值
    pub max: Option<f64>,
    /// 端点拼接容差（栅格单元）
    pub merge_tolerance: f64,
    /// 简化容差（栅格单元），0 表示不简化
    pub simplify_tolerance: f64,
}

impl Default for ContourParams {
    fn default() -> Self {
        Self {
            interval: 5.0,
            min: None,
            max: None,
            merge_tolerance: 1e-3,
            simplify_tolerance: 0.25,
        }
    }
}

impl ContourParams {
    pub fn with_interval(interval: f64) -> Self {
        Self {
            interval,
            ..Default::default()
        }
    }
}

/// 提取等高线
///
/// 栅格退化或全部缺测时返回空集，从不报错；是否视为错误由调用方决定。
pub fn extract_contours(grid: &ElevationGrid, params: &ContourParams) -> Vec<ContourLine> {
    if let Err(e) = grid.validate() {
        debug!(error = %e, "skipping contour extraction on invalid grid");
        return Vec::new();
    }
    let Some((data_min, data_max)) = grid.min_max() else {
        return Vec::new();
    };

    let min = params.min.unwrap_or(data_min);
    let max = params.max.unwrap_or(data_max);
    let levels = contour_levels(min, max, params.interval);

    let contours: Vec<ContourLine> = levels
        .par_iter()
        .filter_map(|&level| {
            let segments = trace_level(grid, level);
            if segments.is_empty() {
                return None;
            }
            let polylines = merge_segments(&segments, params.merge_tolerance)
                .into_iter()
                .map(|line| simplify(&line, params.simplify_tolerance))
                .map(|line| line.iter().map(|p| grid.grid_to_geo(p.x, p.y)).collect())
                .collect();
            Some(ContourLine {
                elevation: level,
                polylines,
            })
        })
        .collect();

    debug!(
        levels = levels.len(),
        contours = contours.len(),
        points = contours.iter().map(ContourLine::point_count).sum::<usize>(),
        "contours extracted"
    );
    contours
}

/// 高程层：`ceil(min/interval)·interval` 起，严格小于 `max` 的等距倍数
pub fn contour_levels(min: f64, max: f64, interval: f64) -> Vec<f64> {
    if !(interval > 0.0) || !interval.is_finite() || !min.is_finite() || !max.is_finite() || max < min {
        return Vec::new();
    }

    let first = (min / interval).ceil();
    let end = (max / interval).ceil();
    let count = (end - first).max(0.0);
    if count > MAX_LEVELS as f64 {
        warn!(count, interval, "too many contour levels requested; none extracted");
        return Vec::new();
    }

    (0..count as usize)
        .map(|k| (first + k as f64) * interval)
        .collect()
}

/// 对单一高程运行 Marching Squares，返回栅格坐标下的短线段
///
/// 角点位掩码：左上 8、右上 4、右下 2、左下 1（值 >= 阈值置位）。
/// 任一角点缺测的单元整体跳过。
pub fn trace_level(grid: &ElevationGrid, level: f64) -> Vec<[Point2; 2]> {
    let mut segments = Vec::new();
    if grid.nx < 2 || grid.ny < 2 {
        return segments;
    }

    for row in 0..grid.ny - 1 {
        for col in 0..grid.nx - 1 {
            let tl = grid.get(col, row);
            let tr = grid.get(col + 1, row);
            let br = grid.get(col + 1, row + 1);
            let bl = grid.get(col, row + 1);
            if !(tl.is_finite() && tr.is_finite() && br.is_finite() && bl.is_finite()) {
                continue;
            }

            let mask = ((tl >= level) as u8) << 3
                | ((tr >= level) as u8) << 2
                | ((br >= level) as u8) << 1
                | (bl >= level) as u8;
            if mask == 0 || mask == 15 {
                continue;
            }

            let x = col as f64;
            let y = row as f64;
            let top = Point2::new(x + crossing(tl, tr, level), y);
            let right = Point2::new(x + 1.0, y + crossing(tr, br, level));
            let bottom = Point2::new(x + crossing(bl, br, level), y + 1.0);
            let left = Point2::new(x, y + crossing(tl, bl, level));

            // 鞍点：用双线性中心值判断高角点是否连通
            let center_high = (tl + tr + br + bl) / 4.0 >= level;

            let mut push = |a: Point2, b: Point2| {
                if (a - b).norm() > FLAT_EPSILON {
                    segments.push([a, b]);
                }
            };

            match mask {
                1 | 14 => push(left, bottom),
                2 | 13 => push(bottom, right),
                3 | 12 => push(left, right),
                4 | 11 => push(top, right),
                6 | 9 => push(top, bottom),
                7 | 8 => push(top, left),
                5 => {
                    if center_high {
                        push(top, left);
                        push(bottom, right);
                    } else {
                        push(top, right);
                        push(left, bottom);
                    }
                }
                10 => {
                    if center_high {
                        push(top, right);
                        push(left, bottom);
                    } else {
                        push(top, left);
                        push(bottom, right);
                    }
                }
                _ => {}
            }
        }
    }

    segments
}

/// 穿越点在边上的参数位置 [0, 1]；两端等值时取中点，避免除零
#[inline]
fn crossing(a: f64, b: f64, level: f64) -> f64 {
    let d = b - a;
    if d.abs() < FLAT_EPSILON {
        return 0.5;
    }
    ((level - a) / d).clamp(0.0, 1.0)
}

/// 端点空间哈希：按容差大小分桶，查询时检查 3×3 邻桶
struct EndpointIndex {
    cell: f64,
    /// 桶 → `线段序号 * 2 + 端点序号`
    buckets: HashMap<(i64, i64), Vec<usize>>,
}

impl EndpointIndex {
    fn build(segments: &[[Point2; 2]], tolerance: f64) -> Self {
        let cell = if tolerance > 0.0 { tolerance } else { FLAT_EPSILON };
        let mut index = Self {
            cell,
            buckets: HashMap::new(),
        };
        for (i, seg) in segments.iter().enumerate() {
            for (end, p) in seg.iter().enumerate() {
                let key = index.key(p);
                index.buckets.entry(key).or_default().push(i * 2 + end);
            }
        }
        index
    }

    fn key(&self, p: &Point2) -> (i64, i64) {
        (
            (p.x / self.cell).floor() as i64,
            (p.y / self.cell).floor() as i64,
        )
    }

    /// 找一个未使用、且有端点落在 `p` 容差内的线段
    fn find(
        &self,
        p: &Point2,
        segments: &[[Point2; 2]],
        consumed: &[bool],
        tolerance: f64,
    ) -> Option<(usize, usize)> {
        let (kx, ky) = self.key(p);
        for dx in -1..=1 {
            for dy in -1..=1 {
                let Some(bucket) = self.buckets.get(&(kx + dx, ky + dy)) else {
                    continue;
                };
                for &entry in bucket {
                    let (seg, end) = (entry / 2, entry % 2);
                    if !consumed[seg] && points_within(&segments[seg][end], p, tolerance) {
                        return Some((seg, end));
                    }
                }
            }
        }
        None
    }
}

/// 把短线段拼接为连续折线
///
/// 每段先作为两点链，再从两端反复延伸，直到找不到可连接的未用线段。
/// 闭合环的末点与首点完全相同。
pub fn merge_segments(segments: &[[Point2; 2]], tolerance: f64) -> Vec<Vec<Point2>> {
    let index = EndpointIndex::build(segments, tolerance);
    let mut consumed = vec![false; segments.len()];
    let mut chains = Vec::new();

    for start in 0..segments.len() {
        if consumed[start] {
            continue;
        }
        consumed[start] = true;

        let mut chain = VecDeque::from([segments[start][0], segments[start][1]]);
        let mut closed = false;

        while let Some(tail) = chain.back().copied() {
            let Some((seg, end)) = index.find(&tail, segments, &consumed, tolerance) else {
                break;
            };
            consumed[seg] = true;
            chain.push_back(segments[seg][1 - end]);
            if is_closed(&chain, tolerance) {
                closed = true;
                break;
            }
        }

        if closed {
            if let Some(first) = chain.front().copied() {
                if let Some(last) = chain.back_mut() {
                    *last = first;
                }
            }
        } else {
            while let Some(head) = chain.front().copied() {
                let Some((seg, end)) = index.find(&head, segments, &consumed, tolerance) else {
                    break;
                };
                consumed[seg] = true;
                chain.push_front(segments[seg][1 - end]);
            }
        }

        chains.push(chain.into_iter().collect());
    }

    chains
}

fn is_closed(chain: &VecDeque<Point2>, tolerance: f64) -> bool {
    match (chain.front(), chain.back()) {
        (Some(first), Some(last)) if chain.len() > 3 => points_within(first, last, tolerance),
        _ => false,
    }
}
