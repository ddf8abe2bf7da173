//! 编码器输出

use crate::error::ExportError;
use crate::manifest::ExportFormat;
use crate::site::SiteDocument;
use sitecad_core::feature::FeatureOutcome;
use sitecad_core::layer::SiteLayer;
use tracing::warn;

/// 交付包中的一个文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputArtifact {
    /// 包内相对路径
    pub path: String,
    pub bytes: Vec<u8>,
}

impl OutputArtifact {
    pub fn new(path: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// 一次编码的结果：产物加逐要素记录
#[derive(Debug, Default)]
pub struct Encoded {
    pub artifacts: Vec<OutputArtifact>,
    pub features: Vec<FeatureOutcome>,
}

impl Encoded {
    pub fn single(artifact: OutputArtifact, features: Vec<FeatureOutcome>) -> Self {
        Self {
            artifacts: vec![artifact],
            features,
        }
    }
}

/// 格式编码器
///
/// 编码器是共享只读数据的纯函数，可以在不同线程上并行运行。
pub trait Encoder: Send + Sync {
    fn format(&self) -> ExportFormat;

    fn encode(&self, site: &SiteDocument) -> Result<Encoded, ExportError>;
}

/// 逐要素结果收集器
#[derive(Debug)]
pub(crate) struct FeatureReport {
    format: ExportFormat,
    outcomes: Vec<FeatureOutcome>,
}

impl FeatureReport {
    pub fn new(format: ExportFormat) -> Self {
        Self {
            format,
            outcomes: Vec::new(),
        }
    }

    pub fn ok(&mut self, feature_id: &str) {
        self.outcomes.push(FeatureOutcome::ok(feature_id));
    }

    pub fn skip(&mut self, layer: SiteLayer, feature_id: &str, reason: impl ToString) {
        let reason = reason.to_string();
        warn!(
            format = %self.format,
            layer = layer.name(),
            feature = feature_id,
            reason = %reason,
            "skipping feature"
        );
        self.outcomes.push(FeatureOutcome::skipped(feature_id, reason));
    }

    pub fn skipped_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_skipped()).count()
    }

    pub fn finish(self) -> Vec<FeatureOutcome> {
        self.outcomes
    }
}
