//! 几何输入错误定义
//!
//! 这些错误都属于"输入无效"一类：调用方应跳过出错的要素并继续。

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("Degenerate ring: {distinct} distinct vertices, at least 3 required")]
    DegenerateRing { distinct: usize },

    #[error("Too few points for {kind}: {count}")]
    TooFewPoints { kind: &'static str, count: usize },

    #[error("Unsupported geometry: expected {expected}, found {found}")]
    UnsupportedGeometry {
        expected: &'static str,
        found: &'static str,
    },

    #[error("Non-finite coordinate at vertex {index}")]
    NonFiniteCoordinate { index: usize },

    #[error("Invalid extrusion height: {0}")]
    InvalidHeight(f64),

    #[error("Invalid elevation grid: {0}")]
    InvalidGrid(String),

    #[error("Mismatched lengths: {0}")]
    MismatchedLengths(String),

    #[error("Mesh index count {0} is not a multiple of 3")]
    MeshIndexCount(usize),

    #[error("Mesh index {index} out of range ({vertex_count} vertices)")]
    MeshIndexOutOfRange { index: u32, vertex_count: usize },
}
