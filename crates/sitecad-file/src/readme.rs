//! 包内说明文件
//!
//! `README.txt` 给人看，`metadata.json` 给程序读。两者只汇总已有结果，不重新计算几何。

use crate::artifact::OutputArtifact;
use crate::error::ExportError;
use crate::job::{FormatRecord, FormatStatus};
use crate::manifest::ExportManifest;
use crate::site::SiteDocument;
use serde::Serialize;
use sitecad_core::contour::ContourLine;
use sitecad_core::feature::FeatureOutcome;
use std::fmt::Write;

pub const README_PATH: &str = "README.txt";
pub const METADATA_PATH: &str = "metadata.json";

/// 等高线摘要
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContourSummary {
    pub interval_m: f64,
    pub levels: usize,
    pub min_elevation: Option<f64>,
    pub max_elevation: Option<f64>,
    pub polylines: usize,
    pub points: usize,
}

impl ContourSummary {
    pub fn new(contours: &[ContourLine], interval_m: f64) -> Self {
        let elevations = contours.iter().map(|c| c.elevation);
        Self {
            interval_m,
            levels: contours.len(),
            min_elevation: elevations.clone().reduce(f64::min),
            max_elevation: elevations.reduce(f64::max),
            polylines: contours.iter().map(|c| c.polylines.len()).sum(),
            points: contours.iter().map(ContourLine::point_count).sum(),
        }
    }
}

#[derive(Debug, Serialize)]
struct Metadata<'a> {
    producer: &'a str,
    manifest: &'a ExportManifest,
    base_elevation_m: f64,
    formats: &'a [FormatRecord],
    ingestion_skips: Vec<&'a FeatureOutcome>,
    contours: Option<ContourSummary>,
    files: &'a [String],
}

/// 生成 `README.txt`
///
/// `files` 是包内除本文件以外的全部路径。
pub fn readme_text(site: &SiteDocument, records: &[FormatRecord], files: &[String]) -> Result<String, ExportError> {
    let meta = &site.metadata;
    let manifest = &site.manifest;
    let mut out = String::new();

    writeln!(out, "{}", meta.title)?;
    writeln!(out, "{}", "=".repeat(meta.title.chars().count().max(1)))?;
    writeln!(out)?;
    writeln!(out, "Generated:  {}", meta.generated_at.format("%Y-%m-%d %H:%M:%S UTC"))?;
    writeln!(out, "Producer:   {}", meta.producer)?;
    writeln!(out, "Job:        {}", meta.id)?;
    writeln!(
        out,
        "Centre:     {:.6}, {:.6} (lat, lng)",
        manifest.center_lat, manifest.center_lng
    )?;
    writeln!(out, "Radius:     {} m", manifest.radius_m)?;
    writeln!(
        out,
        "Units:      {} ({} decimal places in CAD and exchange files)",
        meta.units, meta.precision
    )?;
    if site.elevation.is_some() {
        writeln!(
            out,
            "Contours:   every {} m, {} levels",
            site.options().contour_interval_m,
            site.contours.len()
        )?;
        writeln!(out, "3D origin:  z = 0 at {} m above datum", site.base_elevation)?;
    } else {
        writeln!(out, "Contours:   none (no elevation data)")?;
    }
    writeln!(out)?;

    writeln!(out, "Formats")?;
    writeln!(out, "-------")?;
    for record in records {
        match &record.status {
            FormatStatus::Succeeded { paths } => {
                let skipped = record.features.iter().filter(|f| f.is_skipped()).count();
                write!(out, "{:<10} ok      {}", record.format.name(), paths.join(", "))?;
                if skipped > 0 {
                    write!(out, " ({} features skipped)", skipped)?;
                }
                writeln!(out)?;
            }
            FormatStatus::Failed { error } => {
                writeln!(out, "{:<10} FAILED  {}", record.format.name(), error)?;
            }
        }
    }
    writeln!(out)?;

    writeln!(out, "Files")?;
    writeln!(out, "-----")?;
    for file in files {
        writeln!(out, "{}", file)?;
    }
    writeln!(out, "{}", README_PATH)?;

    Ok(out)
}

/// 生成 `metadata.json`
pub fn metadata_json(
    site: &SiteDocument,
    records: &[FormatRecord],
    ingestion: &[FeatureOutcome],
    files: &[String],
) -> Result<Vec<u8>, ExportError> {
    let metadata = Metadata {
        producer: &site.metadata.producer,
        manifest: &site.manifest,
        base_elevation_m: site.base_elevation,
        formats: records,
        ingestion_skips: ingestion.iter().filter(|f| f.is_skipped()).collect(),
        contours: site
            .elevation
            .as_ref()
            .map(|_| ContourSummary::new(&site.contours, site.options().contour_interval_m)),
        files,
    };
    Ok(serde_json::to_vec_pretty(&metadata)?)
}

/// 两个说明文件；`existing` 为已生成产物
pub fn readme_artifacts(
    site: &SiteDocument,
    records: &[FormatRecord],
    ingestion: &[FeatureOutcome],
    existing: &[OutputArtifact],
) -> Result<Vec<OutputArtifact>, ExportError> {
    let mut files: Vec<String> = existing.iter().map(|a| a.path.clone()).collect();
    files.push(METADATA_PATH.to_string());

    let metadata = metadata_json(site, records, ingestion, &files)?;
    let readme = readme_text(site, records, &files)?;
    Ok(vec![
        OutputArtifact::new(README_PATH, readme.into_bytes()),
        OutputArtifact::new(METADATA_PATH, metadata),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ExportFormat;
    use crate::site::tests::{ramp_grid, sample_features, sample_manifest, sample_site};

    fn records() -> Vec<FormatRecord> {
        vec![
            FormatRecord {
                format: ExportFormat::Cad,
                status: FormatStatus::Succeeded {
                    paths: vec!["exports/layers.dxf".to_string()],
                },
                features: vec![FeatureOutcome::ok("way/1"), FeatureOutcome::skipped("way/2", "Degenerate ring")],
            },
            FormatRecord {
                format: ExportFormat::Plan,
                status: FormatStatus::Failed {
                    error: "PDF invariant violated: broken".to_string(),
                },
                features: Vec::new(),
            },
        ]
    }

    #[test]
    fn test_readme_lists_outcomes() {
        let site = sample_site();
        let files = vec!["exports/layers.dxf".to_string(), METADATA_PATH.to_string()];
        let text = readme_text(&site, &records(), &files).unwrap();
        assert!(text.starts_with("Test Site\n=========\n"));
        assert!(text.contains("Generated:  2024-05-01 12:00:00 UTC"));
        assert!(text.contains("cad        ok      exports/layers.dxf (1 features skipped)"));
        assert!(text.contains("plan       FAILED  PDF invariant violated: broken"));
        assert!(text.contains("Contours:   every 5 m, 3 levels"));
        assert!(text.trim_end().ends_with(README_PATH));
    }

    #[test]
    fn test_metadata_json() {
        let (site, ingestion) = SiteDocument::prepare(sample_manifest(), sample_features(), Some(ramp_grid()));
        let bytes = metadata_json(&site, &records(), &ingestion, &[]).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(value["manifest"]["site_name"], "Test Site");
        assert_eq!(value["formats"][0]["format"], "cad");
        assert_eq!(value["formats"][0]["status"]["state"], "succeeded");
        assert_eq!(value["formats"][1]["status"]["state"], "failed");
        assert_eq!(value["contours"]["levels"], 3);
        assert_eq!(value["contours"]["min_elevation"], 5.0);
        assert_eq!(value["contours"]["max_elevation"], 15.0);
        assert_eq!(value["ingestion_skips"].as_array().map(Vec::len), Some(ingestion.len()));
    }

    #[test]
    fn test_artifact_paths() {
        let site = sample_site();
        let existing = vec![OutputArtifact::new("exports/plan.pdf", b"%PDF".to_vec())];
        let artifacts = readme_artifacts(&site, &records(), &[], &existing).unwrap();
        let paths: Vec<_> = artifacts.iter().map(|a| a.path.as_str()).collect();
        assert_eq!(paths, vec![README_PATH, METADATA_PATH]);

        let readme = String::from_utf8(artifacts[0].bytes.clone()).unwrap();
        assert!(readme.contains("exports/plan.pdf\nmetadata.json\nREADME.txt"));
    }
}
