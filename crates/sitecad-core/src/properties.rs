//! 视觉属性定义
//!
//! 颜色与线宽。各编码器共用同一套调色板，保证 CAD、三维场景和图纸的配色一致。

use serde::{Deserialize, Serialize};

/// RGBA颜色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// 从十六进制值创建（如 0xFF0000 表示红色）
    pub const fn from_hex(hex: u32) -> Self {
        Self {
            r: ((hex >> 16) & 0xFF) as u8,
            g: ((hex >> 8) & 0xFF) as u8,
            b: (hex & 0xFF) as u8,
            a: 255,
        }
    }

    /// 转换为 [0.0, 1.0] 范围的浮点数组
    pub fn to_f32_array(&self) -> [f32; 4] {
        [
            self.r as f32 / 255.0,
            self.g as f32 / 255.0,
            self.b as f32 / 255.0,
            self.a as f32 / 255.0,
        ]
    }

    /// 转换为 [0.0, 1.0] 范围的 RGB 分量（PDF 颜色算子使用）
    pub fn to_unit_rgb(&self) -> [f64; 3] {
        [
            self.r as f64 / 255.0,
            self.g as f64 / 255.0,
            self.b as f64 / 255.0,
        ]
    }

    /// 两色之间线性插值，t 被限制在 [0, 1]
    pub fn lerp(&self, other: &Color, t: f64) -> Color {
        let t = t.clamp(0.0, 1.0);
        let mix = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * t).round() as u8;
        Color {
            r: mix(self.r, other.r),
            g: mix(self.g, other.g),
            b: mix(self.b, other.b),
            a: mix(self.a, other.a),
        }
    }

    /// 最接近的 AutoCAD 颜色索引（ACI 1-9）
    pub fn to_aci(&self) -> u8 {
        const TABLE: [(u8, Color); 9] = [
            (1, Color::RED),
            (2, Color::YELLOW),
            (3, Color::GREEN),
            (4, Color::CYAN),
            (5, Color::BLUE),
            (6, Color::MAGENTA),
            (7, Color::WHITE),
            (8, Color::GRAY),
            (9, Color::LIGHT_GRAY),
        ];

        let distance = |c: &Color| {
            let dr = self.r as i32 - c.r as i32;
            let dg = self.g as i32 - c.g as i32;
            let db = self.b as i32 - c.b as i32;
            dr * dr + dg * dg + db * db
        };

        TABLE
            .iter()
            .min_by_key(|(_, c)| distance(c))
            .map(|(aci, _)| *aci)
            .unwrap_or(7)
    }

    // 预定义颜色（AutoCAD ACI颜色兼容）
    pub const RED: Color = Color::new(255, 0, 0);
    pub const YELLOW: Color = Color::new(255, 255, 0);
    pub const GREEN: Color = Color::new(0, 255, 0);
    pub const CYAN: Color = Color::new(0, 255, 255);
    pub const BLUE: Color = Color::new(0, 0, 255);
    pub const MAGENTA: Color = Color::new(255, 0, 255);
    pub const WHITE: Color = Color::new(255, 255, 255);
    pub const BLACK: Color = Color::new(0, 0, 0);
    pub const GRAY: Color = Color::new(128, 128, 128);
    pub const LIGHT_GRAY: Color = Color::new(192, 192, 192);

    // 场地图调色板
    pub const BUILDING: Color = Color::from_hex(0xB0A89C);
    pub const ROAD: Color = Color::from_hex(0x5A5A5A);
    pub const LANDUSE: Color = Color::from_hex(0xCFE3B4);
    pub const CONTOUR: Color = Color::from_hex(0xA0703C);
    pub const BOUNDARY: Color = Color::from_hex(0xD0342C);
    pub const TERRAIN_LOW: Color = Color::from_hex(0x6E8B3D);
    pub const TERRAIN_HIGH: Color = Color::from_hex(0xE8DCC0);
}

impl Default for Color {
    fn default() -> Self {
        Self::WHITE
    }
}

/// 线宽（毫米）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LineWeight(pub f64);

impl LineWeight {
    pub const THIN: LineWeight = LineWeight(0.13);
    pub const NORMAL: LineWeight = LineWeight(0.25);
    pub const BOLD: LineWeight = LineWeight(0.5);

    /// 转换为 PDF 点（1pt = 1/72 英寸）
    pub fn to_points(&self) -> f64 {
        self.0 * 72.0 / 25.4
    }
}

impl Default for LineWeight {
    fn default() -> Self {
        LineWeight::NORMAL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aci_matching() {
        assert_eq!(Color::RED.to_aci(), 1);
        assert_eq!(Color::new(250, 10, 10).to_aci(), 1);
        assert_eq!(Color::GRAY.to_aci(), 8);
        assert_eq!(Color::BUILDING.to_aci(), 9);
    }

    #[test]
    fn test_lerp_clamps() {
        let c = Color::BLACK.lerp(&Color::WHITE, 2.0);
        assert_eq!(c, Color::WHITE);
        let mid = Color::BLACK.lerp(&Color::WHITE, 0.5);
        assert_eq!(mid.r, 128);
    }
}
