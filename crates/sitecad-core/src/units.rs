//! 单位系统
//!
//! 内部几何统一以米存储，只在编码输出时换算到交付单位并按精度取整。

use serde::{Deserialize, Serialize};

/// 交付文件的线性单位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    /// 米（默认）
    #[default]
    #[serde(alias = "m", alias = "meter")]
    Meters,
    /// 英尺
    #[serde(alias = "ft", alias = "foot")]
    Feet,
    /// 毫米
    #[serde(alias = "mm", alias = "millimeter")]
    Millimeters,
}

impl Unit {
    /// 一个单位等于多少米
    pub fn meters_per_unit(&self) -> f64 {
        match self {
            Unit::Meters => 1.0,
            Unit::Feet => 0.3048,
            Unit::Millimeters => 0.001,
        }
    }

    /// 把米换算为本单位
    #[inline]
    pub fn from_meters(&self, meters: f64) -> f64 {
        meters / self.meters_per_unit()
    }

    /// 把本单位换算为米
    #[inline]
    pub fn to_meters(&self, value: f64) -> f64 {
        value * self.meters_per_unit()
    }

    /// 获取单位符号
    pub fn symbol(&self) -> &'static str {
        match self {
            Unit::Meters => "m",
            Unit::Feet => "ft",
            Unit::Millimeters => "mm",
        }
    }

    /// 获取单位名称
    pub fn name(&self) -> &'static str {
        match self {
            Unit::Meters => "Meters",
            Unit::Feet => "Feet",
            Unit::Millimeters => "Millimeters",
        }
    }
}

impl std::fmt::Display for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// 按小数位数取整
///
/// 结果为 -0.0 时归一为 0.0，避免输出中出现 "-0.000"。
pub fn round_to(value: f64, precision: u8) -> f64 {
    let factor = 10f64.powi(precision as i32);
    let rounded = (value * factor).round() / factor;
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

/// 按固定小数位格式化
pub fn format_fixed(value: f64, precision: u8) -> String {
    format!("{:.*}", precision as usize, round_to(value, precision))
}
