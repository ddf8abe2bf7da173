//! 导出任务
//!
//! 流程：
//! 1. 校验清单
//! 2. 准备共享的 [`SiteDocument`]
//! 3. 在 rayon 线程池中并行运行所请求的编码器，全部返回后才进入下一步
//! 4. 追加等高线 GeoJSON、README 和 metadata
//! 5. 打包
//!
//! 单个编码器失败（包括 panic）只影响自己的记录，其余格式照常打包。

use crate::artifact::{Encoder, OutputArtifact};
use crate::collada::ColladaExporter;
use crate::dxf_io::DxfExporter;
use crate::error::ExportError;
use crate::export::PdfExporter;
use crate::geojson_io::contours_artifact;
use crate::glb::GlbExporter;
use crate::manifest::{ExportFormat, ExportManifest};
use crate::package::{Package, PackageAssembler};
use crate::readme::readme_artifacts;
use crate::site::SiteDocument;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sitecad_core::elevation::ElevationGrid;
use sitecad_core::feature::{FeatureOutcome, FeatureSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;
use tracing::{error, info};

/// 一次导出任务的全部输入
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportJob {
    pub manifest: ExportManifest,
    #[serde(default)]
    pub features: FeatureSet,
    #[serde(default)]
    pub elevation: Option<ElevationGrid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum FormatStatus {
    Succeeded { paths: Vec<String> },
    Failed { error: String },
}

/// 单个格式的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatRecord {
    pub format: ExportFormat,
    pub status: FormatStatus,
    /// 该格式逐要素的处理结果
    pub features: Vec<FeatureOutcome>,
}

impl FormatRecord {
    pub fn succeeded(&self) -> bool {
        matches!(self.status, FormatStatus::Succeeded { .. })
    }
}

#[derive(Debug)]
pub struct ExportResult {
    /// 打包前的全部产物，按包内顺序
    pub artifacts: Vec<OutputArtifact>,
    pub records: Vec<FormatRecord>,
    /// 入库时被拒绝的要素
    pub ingestion: Vec<FeatureOutcome>,
    pub package: Result<Package, ExportError>,
}

impl ExportResult {
    pub fn failed_formats(&self) -> impl Iterator<Item = ExportFormat> + '_ {
        self.records.iter().filter(|r| !r.succeeded()).map(|r| r.format)
    }
}

pub fn encoder_for(format: ExportFormat) -> Box<dyn Encoder> {
    match format {
        ExportFormat::Cad => Box::new(DxfExporter),
        ExportFormat::Scene => Box::new(GlbExporter),
        ExportFormat::Exchange => Box::new(ColladaExporter),
        ExportFormat::Plan => Box::new(PdfExporter),
    }
}

/// 运行一个编码器；panic 也转换为失败记录
pub fn run_encoder(encoder: &dyn Encoder, site: &SiteDocument) -> (FormatRecord, Vec<OutputArtifact>) {
    let format = encoder.format();
    let started = Instant::now();

    let result = catch_unwind(AssertUnwindSafe(|| encoder.encode(site))).unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Err(ExportError::EncoderPanic(message))
    });

    match result {
        Ok(encoded) => {
            let paths = encoded.artifacts.iter().map(|a| a.path.clone()).collect();
            info!(
                format = %format,
                bytes = encoded.artifacts.iter().map(OutputArtifact::len).sum::<usize>(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "encoder finished"
            );
            let record = FormatRecord {
                format,
                status: FormatStatus::Succeeded { paths },
                features: encoded.features,
            };
            (record, encoded.artifacts)
        }
        Err(e) => {
            error!(format = %format, error = %e, "encoder failed");
            let record = FormatRecord {
                format,
                status: FormatStatus::Failed { error: e.to_string() },
                features: Vec::new(),
            };
            (record, Vec::new())
        }
    }
}

/// 执行导出任务
///
/// 只有清单无效时返回 `Err`；编码器和打包的失败记录在结果中。
pub fn run_export(job: ExportJob) -> Result<ExportResult, ExportError> {
    job.manifest.validate()?;
    let started = Instant::now();
    info!(
        site = %job.manifest.site_name,
        formats = job.manifest.requested_formats.len(),
        "export started"
    );

    let formats: Vec<ExportFormat> = job.manifest.requested_formats.iter().copied().collect();
    let (site, ingestion) = SiteDocument::prepare(job.manifest, job.features, job.elevation);

    let outputs: Vec<(FormatRecord, Vec<OutputArtifact>)> = formats
        .par_iter()
        .map(|&format| run_encoder(encoder_for(format).as_ref(), &site))
        .collect();

    let mut records = Vec::with_capacity(outputs.len());
    let mut artifacts = Vec::new();
    for (record, produced) in outputs {
        records.push(record);
        artifacts.extend(produced);
    }

    if site.elevation.is_some() {
        let opts = site.options();
        artifacts.push(contours_artifact(
            &site.contours,
            opts.contour_interval_m,
            opts.index_contour_every,
        ));
    }

    let package = readme_artifacts(&site, &records, &ingestion, &artifacts).and_then(|extra| {
        artifacts.extend(extra);
        PackageAssembler::new(site.options().max_archive_bytes).assemble(&artifacts)
    });

    match &package {
        Ok(p) => info!(
            entries = p.entry_count,
            bytes = p.total_bytes,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "export finished"
        ),
        Err(e) => error!(error = %e, "packaging failed"),
    }

    Ok(ExportResult {
        artifacts,
        records,
        ingestion,
        package,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::Encoded;
    use crate::site::tests::{ramp_grid, sample_features, sample_manifest, sample_site};
    use std::collections::BTreeSet;

    fn sample_job() -> ExportJob {
        ExportJob {
            manifest: sample_manifest(),
            features: sample_features(),
            elevation: Some(ramp_grid()),
        }
    }

    struct PanickingEncoder;

    impl Encoder for PanickingEncoder {
        fn format(&self) -> ExportFormat {
            ExportFormat::Plan
        }

        fn encode(&self, _site: &SiteDocument) -> Result<Encoded, ExportError> {
            panic!("page overflow")
        }
    }

    struct BrokenEncoder;

    impl Encoder for BrokenEncoder {
        fn format(&self) -> ExportFormat {
            ExportFormat::Scene
        }

        fn encode(&self, _site: &SiteDocument) -> Result<Encoded, ExportError> {
            Err(ExportError::invariant("GLB", "misaligned view"))
        }
    }

    #[test]
    fn test_full_job() {
        let result = run_export(sample_job()).unwrap();
        assert_eq!(result.records.len(), 4);
        assert!(result.records.iter().all(FormatRecord::succeeded));
        assert_eq!(result.failed_formats().count(), 0);

        let paths: Vec<&str> = result.artifacts.iter().map(|a| a.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "exports/layers.dxf",
                "exports/scene.glb",
                "exports/site_model.dae",
                "exports/plan.pdf",
                "geojson/contours.geojson",
                "README.txt",
                "metadata.json",
            ]
        );

        let package = result.package.unwrap();
        assert_eq!(package.entry_count, 7);
        assert_eq!(package.sha256_hex.len(), 64);
    }

    #[test]
    fn test_degenerate_building_skipped_per_format() {
        let result = run_export(sample_job()).unwrap();
        for record in &result.records {
            let skipped: Vec<_> = record.features.iter().filter(|f| f.is_skipped()).collect();
            assert_eq!(skipped.len(), 1, "{}", record.format);
            assert_eq!(skipped[0].feature_id, "way/2");
        }
    }

    #[test]
    fn test_without_elevation() {
        let mut job = sample_job();
        job.elevation = None;
        job.manifest.requested_formats = BTreeSet::from([ExportFormat::Cad, ExportFormat::Plan]);
        let result = run_export(job).unwrap();
        assert!(result.artifacts.iter().all(|a| !a.path.starts_with("geojson/")));
        assert_eq!(result.package.unwrap().entry_count, 4);
    }

    #[test]
    fn test_invalid_manifest_rejected() {
        let mut job = sample_job();
        job.manifest.radius_m = 0.0;
        assert!(matches!(run_export(job), Err(ExportError::InvalidManifest(_))));
    }

    #[test]
    fn test_panicking_encoder_is_contained() {
        let site = sample_site();
        let (record, artifacts) = run_encoder(&PanickingEncoder, &site);
        assert!(artifacts.is_empty());
        match record.status {
            FormatStatus::Failed { error } => assert!(error.contains("page overflow")),
            other => panic!("unexpected status {:?}", other),
        }
    }

    #[test]
    fn test_failed_encoder_record() {
        let site = sample_site();
        let (record, artifacts) = run_encoder(&BrokenEncoder, &site);
        assert!(artifacts.is_empty());
        assert_eq!(record.format, ExportFormat::Scene);
        assert!(!record.succeeded());
    }

    #[test]
    fn test_reproducible_package() {
        let a = run_export(sample_job()).unwrap().package.unwrap();
        let b = run_export(sample_job()).unwrap().package.unwrap();
        assert_eq!(a.entry_count, 7);
        assert_eq!(a.sha256_hex, b.sha256_hex);
        assert_eq!(a.archive_bytes, b.archive_bytes);
    }

    #[test]
    fn test_job_from_json() {
        let json = r#"{
            "manifest": {
                "site_name": "Json Site",
                "center_lat": 47.3769,
                "center_lng": 8.5417,
                "radius_m": 100,
                "requested_formats": ["cad"]
            }
        }"#;
        let job: ExportJob = serde_json::from_str(json).unwrap();
        assert!(job.features.is_empty());
        assert!(job.elevation.is_none());
        let result = run_export(job).unwrap();
        assert_eq!(result.records.len(), 1);
        assert!(result.package.is_ok());
    }
}
