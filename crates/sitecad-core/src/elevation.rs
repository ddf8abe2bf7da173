//! 高程栅格
//!
//! 行优先存储，第 0 行为北边界，第 0 列为西边界。缺测值用 NaN 表示。

use crate::error::GeometryError;
use crate::math::{GeoBounds, Point2};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElevationGrid {
    /// 列数
    pub nx: usize,
    /// 行数
    pub ny: usize,
    /// `ny × nx` 个采样值，行优先；JSON 中 `null` 读作 NaN
    #[serde(with = "nan_as_null")]
    pub values: Vec<f64>,
    /// 栅格覆盖的地理范围
    pub bounds: GeoBounds,
}

impl ElevationGrid {
    pub fn new(nx: usize, ny: usize, values: Vec<f64>, bounds: GeoBounds) -> Result<Self, GeometryError> {
        let grid = Self {
            nx,
            ny,
            values,
            bounds,
        };
        grid.validate()?;
        Ok(grid)
    }

    /// 由函数 `f(列, 行)` 采样构造
    pub fn from_fn(
        nx: usize,
        ny: usize,
        bounds: GeoBounds,
        f: impl Fn(usize, usize) -> f64,
    ) -> Result<Self, GeometryError> {
        let values = (0..ny)
            .flat_map(|row| (0..nx).map(move |col| (col, row)))
            .map(|(col, row)| f(col, row))
            .collect();
        Self::new(nx, ny, values, bounds)
    }

    pub fn validate(&self) -> Result<(), GeometryError> {
        if self.nx < 2 || self.ny < 2 {
            return Err(GeometryError::InvalidGrid(format!(
                "grid must be at least 2x2, got {}x{}",
                self.nx, self.ny
            )));
        }
        if self.values.len() != self.nx * self.ny {
            return Err(GeometryError::MismatchedLengths(format!(
                "expected {} samples for {}x{} grid, got {}",
                self.nx * self.ny,
                self.nx,
                self.ny,
                self.values.len()
            )));
        }
        if !self.bounds.is_valid() {
            return Err(GeometryError::InvalidGrid(
                "bounds do not form a non-degenerate rectangle".to_string(),
            ));
        }
        Ok(())
    }

    /// 取采样值，越界返回 NaN
    #[inline]
    pub fn get(&self, col: usize, row: usize) -> f64 {
        if col >= self.nx || row >= self.ny {
            return f64::NAN;
        }
        self.values.get(row * self.nx + col).copied().unwrap_or(f64::NAN)
    }

    /// 有效采样的最小/最大值，全部缺测时返回 None
    pub fn min_max(&self) -> Option<(f64, f64)> {
        self.values
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }

    /// 栅格坐标（可为小数）转经纬度
    pub fn grid_to_geo(&self, x: f64, y: f64) -> Point2 {
        let b = &self.bounds;
        let lon = b.west + x / (self.nx - 1) as f64 * (b.east - b.west);
        let lat = b.north - y / (self.ny - 1) as f64 * (b.north - b.south);
        Point2::new(lon, lat)
    }

    /// 经纬度处的双线性插值高程；超出范围或邻近采样缺测时返回 None
    pub fn sample(&self, lon: f64, lat: f64) -> Option<f64> {
        let b = &self.bounds;
        if self.validate().is_err() || lon < b.west || lon > b.east || lat < b.south || lat > b.north {
            return None;
        }
        let x = (lon - b.west) / (b.east - b.west) * (self.nx - 1) as f64;
        let y = (b.north - lat) / (b.north - b.south) * (self.ny - 1) as f64;
        let col = (x.floor() as usize).min(self.nx - 2);
        let row = (y.floor() as usize).min(self.ny - 2);
        let (fx, fy) = (x - col as f64, y - row as f64);

        let tl = self.get(col, row);
        let tr = self.get(col + 1, row);
        let bl = self.get(col, row + 1);
        let br = self.get(col + 1, row + 1);
        let top = tl + (tr - tl) * fx;
        let bottom = bl + (br - bl) * fx;
        let z = top + (bottom - top) * fy;
        z.is_finite().then_some(z)
    }

    /// 有效采样数
    pub fn valid_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_finite()).count()
    }
}

mod nan_as_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(values.iter().map(|v| v.is_finite().then_some(*v)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
        let raw: Vec<Option<f64>> = Vec::deserialize(deserializer)?;
        Ok(raw.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    }
}
