//! 导出清单
//!
//! 任务的唯一配置来源：场地信息、所请求的格式、单位和精度，以及各编码器的可选参数。

use crate::error::ExportError;
use crate::export::PageSetup;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sitecad_core::contour::ContourParams;
use sitecad_core::units::Unit;
use std::collections::BTreeSet;
use uuid::Uuid;

/// 最大小数位数
pub const MAX_PRECISION: u8 = 12;

/// 输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// 分图层 CAD 线框（DXF）
    Cad,
    /// 二进制三维场景（GLB）
    Scene,
    /// 多边形建模交换文档（COLLADA）
    Exchange,
    /// 可打印总图（PDF）
    Plan,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 4] = [
        ExportFormat::Cad,
        ExportFormat::Scene,
        ExportFormat::Exchange,
        ExportFormat::Plan,
    ];

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Cad => "dxf",
            ExportFormat::Scene => "glb",
            ExportFormat::Exchange => "dae",
            ExportFormat::Plan => "pdf",
        }
    }

    /// 交付包内的固定路径
    pub fn path(&self) -> &'static str {
        match self {
            ExportFormat::Cad => "exports/layers.dxf",
            ExportFormat::Scene => "exports/scene.glb",
            ExportFormat::Exchange => "exports/site_model.dae",
            ExportFormat::Plan => "exports/plan.pdf",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ExportFormat::Cad => "cad",
            ExportFormat::Scene => "scene",
            ExportFormat::Exchange => "exchange",
            ExportFormat::Plan => "plan",
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// 编码器参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    /// 等高距（米）
    pub contour_interval_m: f64,
    /// 等高线简化容差（栅格单元）
    pub contour_simplify_tolerance: f64,
    /// 线段拼接容差（栅格单元）
    pub merge_tolerance: f64,
    /// 计曲线间隔（每 N 条首曲线）
    pub index_contour_every: u32,
    /// 无高度属性时的建筑高度
    pub default_building_height_m: f64,
    /// 层高
    pub meters_per_level: f64,
    /// 图纸页面设置
    pub page: PageSetup,
    pub show_north_arrow: bool,
    pub show_scale_bar: bool,
    pub show_legend: bool,
    /// PDF 内容流是否 Flate 压缩
    pub compress_pdf_streams: bool,
    /// 三维输出是否包含地形
    pub include_terrain: bool,
    /// 交付包大小上限
    pub max_archive_bytes: u64,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            contour_interval_m: 5.0,
            contour_simplify_tolerance: 0.25,
            merge_tolerance: 1e-3,
            index_contour_every: 5,
            default_building_height_m: 10.0,
            meters_per_level: 3.0,
            page: PageSetup::default(),
            show_north_arrow: true,
            show_scale_bar: true,
            show_legend: true,
            compress_pdf_streams: true,
            include_terrain: true,
            max_archive_bytes: 512 * 1024 * 1024,
        }
    }
}

impl ExportOptions {
    pub fn contour_params(&self) -> ContourParams {
        ContourParams {
            interval: self.contour_interval_m,
            min: None,
            max: None,
            merge_tolerance: self.merge_tolerance,
            simplify_tolerance: self.contour_simplify_tolerance,
        }
    }
}

fn default_precision() -> u8 {
    3
}

/// 导出清单
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportManifest {
    pub site_name: String,
    pub center_lat: f64,
    pub center_lng: f64,
    /// 场地半径（米）
    pub radius_m: f64,
    pub requested_formats: BTreeSet<ExportFormat>,
    #[serde(default)]
    pub units: Unit,
    /// 数值输出的小数位数
    #[serde(default = "default_precision")]
    pub precision: u8,
    /// 任务标识，缺省为 nil UUID
    #[serde(default)]
    pub job_id: Uuid,
    /// 输出中唯一嵌入的时间戳
    #[serde(default = "Utc::now")]
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub options: ExportOptions,
}

impl ExportManifest {
    pub fn new(site_name: impl Into<String>, center_lat: f64, center_lng: f64, radius_m: f64) -> Self {
        Self {
            site_name: site_name.into(),
            center_lat,
            center_lng,
            radius_m,
            requested_formats: ExportFormat::ALL.into_iter().collect(),
            units: Unit::default(),
            precision: default_precision(),
            job_id: Uuid::nil(),
            generated_at: Utc::now(),
            options: ExportOptions::default(),
        }
    }

    pub fn with_formats(mut self, formats: impl IntoIterator<Item = ExportFormat>) -> Self {
        self.requested_formats = formats.into_iter().collect();
        self
    }

    pub fn with_units(mut self, units: Unit, precision: u8) -> Self {
        self.units = units;
        self.precision = precision;
        self
    }

    pub fn validate(&self) -> Result<(), ExportError> {
        let invalid = |msg: String| Err(ExportError::InvalidManifest(msg));

        if !self.center_lat.is_finite() || self.center_lat.abs() > 90.0 {
            return invalid(format!("center_lat out of range: {}", self.center_lat));
        }
        if !self.center_lng.is_finite() || self.center_lng.abs() > 180.0 {
            return invalid(format!("center_lng out of range: {}", self.center_lng));
        }
        if !self.radius_m.is_finite() || self.radius_m <= 0.0 {
            return invalid(format!("radius_m must be positive, got {}", self.radius_m));
        }
        if self.requested_formats.is_empty() {
            return invalid("no output formats requested".to_string());
        }
        if self.precision > MAX_PRECISION {
            return invalid(format!(
                "precision {} exceeds maximum of {}",
                self.precision, MAX_PRECISION
            ));
        }
        let opts = &self.options;
        if !opts.contour_interval_m.is_finite() || opts.contour_interval_m <= 0.0 {
            return invalid(format!(
                "contour interval must be positive, got {}",
                opts.contour_interval_m
            ));
        }
        if !opts.default_building_height_m.is_finite() || opts.default_building_height_m <= 0.0 {
            return invalid(format!(
                "default building height must be positive, got {}",
                opts.default_building_height_m
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_from_minimal_json() {
        let json = r#"{
            "site_name": "Riverside",
            "center_lat": 47.37,
            "center_lng": 8.54,
            "radius_m": 250,
            "requested_formats": ["plan", "cad"],
            "units": "ft",
            "generated_at": "2024-05-01T12:00:00Z"
        }"#;
        let manifest: ExportManifest = serde_json::from_str(json).unwrap();

        assert_eq!(manifest.units, Unit::Feet);
        assert_eq!(manifest.precision, 3);
        assert!(manifest.job_id.is_nil());
        assert_eq!(
            manifest.requested_formats.iter().copied().collect::<Vec<_>>(),
            vec![ExportFormat::Cad, ExportFormat::Plan]
        );
        assert_eq!(manifest.options, ExportOptions::default());
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let base = ExportManifest::new("x", 47.0, 8.0, 100.0);
        assert!(base.validate().is_ok());

        let mut m = base.clone();
        m.radius_m = 0.0;
        assert!(m.validate().is_err());

        let m = base.clone().with_formats([]);
        assert!(m.validate().is_err());

        let m = base.clone().with_units(Unit::Meters, 13);
        assert!(m.validate().is_err());

        let mut m = base;
        m.center_lat = f64::NAN;
        assert!(m.validate().is_err());
    }

    #[test]
    fn test_format_paths_unique() {
        let paths: BTreeSet<_> = ExportFormat::ALL.iter().map(|f| f.path()).collect();
        assert_eq!(paths.len(), 4);
        assert!(ExportFormat::ALL
            .iter()
            .all(|f| f.path().ends_with(f.extension())));
    }
}
