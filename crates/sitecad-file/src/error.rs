//! 导出错误定义
//!
//! 三类错误对应不同的影响范围：
//! - 输入无效：只跳过出错的要素
//! - 格式不变量被破坏：该格式的输出作废
//! - 打包自检失败：整个任务失败

use sitecad_core::GeometryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid input: {0}")]
    InputInvalid(#[from] GeometryError),

    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("DXF error: {0}")]
    Dxf(String),

    #[error("{format} invariant violated: {detail}")]
    FormatInvariant { format: &'static str, detail: String },

    #[error("Archive integrity failure: {0}")]
    AssemblyIntegrity(String),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Formatting error: {0}")]
    Fmt(#[from] std::fmt::Error),

    #[error("Encoder panicked: {0}")]
    EncoderPanic(String),
}

/// 错误影响范围
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Feature,
    Format,
    Job,
}

impl ExportError {
    pub fn invariant(format: &'static str, detail: impl Into<String>) -> Self {
        ExportError::FormatInvariant {
            format,
            detail: detail.into(),
        }
    }

    pub fn scope(&self) -> Scope {
        match self {
            ExportError::InputInvalid(_) => Scope::Feature,
            ExportError::InvalidManifest(_) | ExportError::AssemblyIntegrity(_) => Scope::Job,
            _ => Scope::Format,
        }
    }

    pub fn is_fatal_for_job(&self) -> bool {
        self.scope() == Scope::Job
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scopes() {
        let input = ExportError::from(GeometryError::DegenerateRing { distinct: 2 });
        assert_eq!(input.scope(), Scope::Feature);
        assert_eq!(ExportError::invariant("GLB", "offset").scope(), Scope::Format);
        assert!(ExportError::AssemblyIntegrity("magic".into()).is_fatal_for_job());
    }
}
