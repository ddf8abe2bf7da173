//! 三角网格
//!
//! 扁平缓冲区布局（与 GPU / 交换格式一致）：
//! - `positions`: `[x, y, z, x, y, z, ...]`，单位米，Z 向上
//! - `indices`: 每三个一组构成三角形
//! - `colors`: 可选，每顶点 RGBA 四个分量

use crate::elevation::ElevationGrid;
use crate::error::GeometryError;
use crate::feature::Footprint;
use crate::projection::LocalProjection;
use crate::properties::Color;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    pub name: String,
    pub positions: Vec<f32>,
    pub indices: Vec<u32>,
    pub colors: Option<Vec<f32>>,
}

impl Mesh {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len() / 3
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn push_vertex(&mut self, x: f64, y: f64, z: f64) -> u32 {
        let index = self.vertex_count() as u32;
        self.positions.extend_from_slice(&[x as f32, y as f32, z as f32]);
        index
    }

    pub fn push_triangle(&mut self, a: u32, b: u32, c: u32) {
        self.indices.extend_from_slice(&[a, b, c]);
    }

    pub fn position(&self, index: usize) -> [f32; 3] {
        let i = index * 3;
        [self.positions[i], self.positions[i + 1], self.positions[i + 2]]
    }

    pub fn translate(&mut self, dx: f64, dy: f64, dz: f64) {
        for chunk in self.positions.chunks_exact_mut(3) {
            chunk[0] += dx as f32;
            chunk[1] += dy as f32;
            chunk[2] += dz as f32;
        }
    }

    /// 轴对齐包围盒（min, max），无顶点时返回 None
    pub fn bounds(&self) -> Option<([f32; 3], [f32; 3])> {
        let mut chunks = self.positions.chunks_exact(3);
        let first = chunks.next()?;
        let mut min = [first[0], first[1], first[2]];
        let mut max = min;
        for c in chunks {
            for k in 0..3 {
                min[k] = min[k].min(c[k]);
                max[k] = max[k].max(c[k]);
            }
        }
        Some((min, max))
    }

    /// 检查缓冲区不变量
    pub fn validate(&self) -> Result<(), GeometryError> {
        if self.positions.len() % 3 != 0 {
            return Err(GeometryError::MismatchedLengths(format!(
                "position buffer length {} is not a multiple of 3",
                self.positions.len()
            )));
        }
        if let Some(index) = self.positions.iter().position(|v| !v.is_finite()) {
            return Err(GeometryError::NonFiniteCoordinate { index: index / 3 });
        }
        if self.indices.len() % 3 != 0 {
            return Err(GeometryError::MeshIndexCount(self.indices.len()));
        }
        let vertex_count = self.vertex_count();
        if let Some(&index) = self.indices.iter().find(|&&i| i as usize >= vertex_count) {
            return Err(GeometryError::MeshIndexOutOfRange {
                index,
                vertex_count,
            });
        }
        if let Some(colors) = &self.colors {
            if colors.len() != vertex_count * 4 {
                return Err(GeometryError::MismatchedLengths(format!(
                    "color buffer has {} components for {} vertices",
                    colors.len(),
                    vertex_count
                )));
            }
        }
        Ok(())
    }
}

/// 把建筑轮廓拉伸为封闭棱柱
///
/// 顶点：`0..n` 为底面（z=0），`n..2n` 为顶面（z=height）。
/// 底面扇形三角化朝下，顶面朝上，每条边两个侧面三角形。
pub fn extrude_footprint(footprint: &Footprint, height: f64) -> Result<Mesh, GeometryError> {
    if !height.is_finite() || height <= 0.0 {
        return Err(GeometryError::InvalidHeight(height));
    }
    let vertices = footprint.vertices();
    let n = vertices.len();
    if n < 3 {
        return Err(GeometryError::DegenerateRing { distinct: n });
    }

    let mut mesh = Mesh::new("building");
    mesh.positions.reserve(n * 6);
    mesh.indices.reserve(((n - 2) * 2 + n * 2) * 3);

    for p in vertices {
        mesh.push_vertex(p.x, p.y, 0.0);
    }
    for p in vertices {
        mesh.push_vertex(p.x, p.y, height);
    }

    let n = n as u32;
    for i in 1..n - 1 {
        mesh.push_triangle(0, i + 1, i);
    }
    for i in 1..n - 1 {
        mesh.push_triangle(n, n + i, n + i + 1);
    }
    for i in 0..n {
        let j = (i + 1) % n;
        mesh.push_triangle(i, j, n + j);
        mesh.push_triangle(i, n + j, n + i);
    }

    Ok(mesh)
}

/// 地形网格：每个栅格点一个顶点，每个完整单元两个三角形
///
/// `base_elevation` 对应 z=0；缺测顶点 z 取 0 且不被任何三角形引用。
/// 顶点颜色按高程在 `TERRAIN_LOW`..`TERRAIN_HIGH` 之间插值。
pub fn terrain_mesh(
    grid: &ElevationGrid,
    projection: &LocalProjection,
    base_elevation: f64,
) -> Result<Mesh, GeometryError> {
    grid.validate()?;
    let (lo, hi) = grid
        .min_max()
        .ok_or_else(|| GeometryError::InvalidGrid("grid has no valid samples".to_string()))?;
    let span = (hi - lo).max(f64::EPSILON);

    let mut mesh = Mesh::new("terrain");
    let mut colors = Vec::with_capacity(grid.nx * grid.ny * 4);
    for row in 0..grid.ny {
        for col in 0..grid.nx {
            let geo = grid.grid_to_geo(col as f64, row as f64);
            let local = projection.project(&geo);
            let z = grid.get(col, row);
            let (z, t) = if z.is_finite() {
                (z - base_elevation, (z - lo) / span)
            } else {
                (0.0, 0.0)
            };
            mesh.push_vertex(local.x, local.y, z);
            colors.extend_from_slice(&Color::TERRAIN_LOW.lerp(&Color::TERRAIN_HIGH, t).to_f32_array());
        }
    }

    let nx = grid.nx as u32;
    for row in 0..grid.ny - 1 {
        for col in 0..grid.nx - 1 {
            let corners = [
                grid.get(col, row),
                grid.get(col + 1, row),
                grid.get(col, row + 1),
                grid.get(col + 1, row + 1),
            ];
            if corners.iter().any(|v| !v.is_finite()) {
                continue;
            }
            let (r, c) = (row as u32, col as u32);
            let tl = r * nx + c;
            let tr = tl + 1;
            let bl = tl + nx;
            let br = bl + 1;
            mesh.push_triangle(tl, bl, br);
            mesh.push_triangle(tl, br, tr);
        }
    }

    mesh.colors = Some(colors);
    Ok(mesh)
}
