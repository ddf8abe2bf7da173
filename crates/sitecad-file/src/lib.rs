//! SiteCAD 文件格式处理
//!
//! 支持：
//! - `.dxf` 分图层 CAD 线框图
//! - `.glb` 二进制三维场景
//! - `.dae` COLLADA 交换文档
//! - `.pdf` 可打印总图
//! - `.geojson` 等高线
//! - `.zip` 交付包（含 SHA-256 摘要）
//!
//! 入口为 [`job::run_export`]：准备共享数据后并行运行所请求的编码器，最后打包。

pub mod artifact;
pub mod collada;
pub mod dxf_io;
pub mod error;
pub mod export;
pub mod geojson_io;
pub mod glb;
pub mod job;
pub mod manifest;
pub mod package;
pub mod pdf;
pub mod readme;
pub mod site;

pub use artifact::{Encoded, Encoder, OutputArtifact};
pub use error::ExportError;
pub use job::{run_export, ExportJob, ExportResult, FormatRecord, FormatStatus};
pub use manifest::{ExportFormat, ExportManifest, ExportOptions};
pub use package::{Package, PackageAssembler};
pub use site::SiteDocument;
