//! 图层定义
//!
//! 场地交付物中的要素按固定图层组织。CAD 文件直接使用这些图层名，
//! 图纸的图例也按同样的分类生成。

use crate::properties::{Color, LineWeight};
use serde::{Deserialize, Serialize};

/// 场地图层
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SiteLayer {
    Boundary,
    Buildings,
    Roads,
    Landuse,
    Contours,
    /// 计曲线（每五条首曲线一条，带高程标注）
    ContoursIndex,
    Labels,
}

impl SiteLayer {
    pub const ALL: [SiteLayer; 7] = [
        SiteLayer::Boundary,
        SiteLayer::Buildings,
        SiteLayer::Roads,
        SiteLayer::Landuse,
        SiteLayer::Contours,
        SiteLayer::ContoursIndex,
        SiteLayer::Labels,
    ];

    /// CAD 图层名
    pub fn name(&self) -> &'static str {
        match self {
            SiteLayer::Boundary => "BOUNDARY",
            SiteLayer::Buildings => "BUILDINGS",
            SiteLayer::Roads => "ROADS",
            SiteLayer::Landuse => "LANDUSE",
            SiteLayer::Contours => "CONTOURS",
            SiteLayer::ContoursIndex => "CONTOURS_INDEX",
            SiteLayer::Labels => "LABELS",
        }
    }

    pub fn layer(&self) -> Layer {
        match self {
            SiteLayer::Boundary => Layer::new(self.name(), Color::BOUNDARY)
                .with_line_weight(LineWeight::BOLD),
            SiteLayer::Buildings => Layer::new(self.name(), Color::BUILDING),
            SiteLayer::Roads => Layer::new(self.name(), Color::ROAD)
                .with_line_weight(LineWeight::BOLD),
            SiteLayer::Landuse => Layer::new(self.name(), Color::LANDUSE)
                .with_line_weight(LineWeight::THIN),
            SiteLayer::Contours => Layer::new(self.name(), Color::CONTOUR)
                .with_line_weight(LineWeight::THIN),
            SiteLayer::ContoursIndex => Layer::new(self.name(), Color::CONTOUR),
            SiteLayer::Labels => Layer::new(self.name(), Color::WHITE),
        }
    }
}

/// 图层样式
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layer {
    /// 图层名称
    pub name: String,

    /// 图层颜色
    pub color: Color,

    /// 图层线宽
    pub line_weight: LineWeight,

    /// 是否可打印
    pub plottable: bool,
}

impl Layer {
    pub fn new(name: impl Into<String>, color: Color) -> Self {
        Self {
            name: name.into(),
            color,
            line_weight: LineWeight::default(),
            plottable: true,
        }
    }

    pub fn with_line_weight(mut self, line_weight: LineWeight) -> Self {
        self.line_weight = line_weight;
        self
    }
}
