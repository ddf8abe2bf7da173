//! SiteCAD 几何核心
//!
//! 把测绘原始数据（建筑轮廓、道路中心线、用地多边形、高程栅格）
//! 转换为各导出格式共用的几何数据。
//!
//! # 数据流
//!
//! ```text
//! 高程栅格 ──► contour（等高线） ──┐
//!                                 ├──► 各格式编码器（sitecad-file）
//! 矢量要素 ──► projection ──► mesh ┘
//! ```
//!
//! # 示例
//!
//! ```rust
//! use sitecad_core::prelude::*;
//!
//! let ring = [
//!     Point2::new(0.0, 0.0),
//!     Point2::new(10.0, 0.0),
//!     Point2::new(10.0, 10.0),
//!     Point2::new(0.0, 10.0),
//!     Point2::new(0.0, 0.0),
//! ];
//! let footprint = Footprint::from_ring(&ring).unwrap();
//! let mesh = extrude_footprint(&footprint, 8.0).unwrap();
//! assert_eq!(mesh.vertex_count(), 8);
//! ```

pub mod contour;
pub mod elevation;
pub mod error;
pub mod feature;
pub mod geometry;
pub mod layer;
pub mod math;
pub mod mesh;
pub mod projection;
pub mod properties;
pub mod units;

pub use error::GeometryError;

pub mod prelude {
    //! 常用类型的便捷导入
    pub use crate::contour::{extract_contours, ContourLine, ContourParams};
    pub use crate::elevation::ElevationGrid;
    pub use crate::error::GeometryError;
    pub use crate::feature::{
        FeatureClass, FeatureGeometry, FeatureOutcome, FeatureSet, Footprint, Outcome,
        PropertyValue, VectorFeature,
    };
    pub use crate::geometry::{simplify, Line};
    pub use crate::layer::{Layer, SiteLayer};
    pub use crate::math::{BoundingBox2, GeoBounds, Point2};
    pub use crate::mesh::{extrude_footprint, terrain_mesh, Mesh};
    pub use crate::projection::LocalProjection;
    pub use crate::properties::Color;
    pub use crate::units::Unit;
}
