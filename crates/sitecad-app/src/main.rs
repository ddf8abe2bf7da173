//! SiteCAD 命令行入口
//!
//! 读取一个或多个 JSON 任务文件，并发执行导出，每个任务写出
//! `<名称>.zip` 和 `<名称>.sha256`。

use anyhow::{bail, Context, Result};
use clap::Parser;
use sitecad_file::{run_export, ExportJob, Package};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "sitecad", version, about = "Export site geometry to DXF, GLB, COLLADA and PDF")]
struct Args {
    /// 任务文件（JSON）
    #[arg(required = true)]
    jobs: Vec<PathBuf>,

    /// 输出目录
    #[arg(short, long, default_value = ".")]
    output: PathBuf,

    /// 输出调试日志
    #[arg(short, long)]
    verbose: bool,
}

/// 任务文件 `site.json` → `site.zip` / `site.sha256`
fn output_paths(job_path: &Path, output_dir: &Path) -> (PathBuf, PathBuf) {
    let stem = job_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "export".to_string());
    (
        output_dir.join(format!("{}.zip", stem)),
        output_dir.join(format!("{}.sha256", stem)),
    )
}

/// `sha256sum` 兼容的校验行
fn checksum_line(package: &Package, archive_path: &Path) -> String {
    let name = archive_path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{}  {}\n", package.sha256_hex, name)
}

fn process_job(job_path: &Path, output_dir: &Path) -> Result<()> {
    let text = std::fs::read_to_string(job_path)
        .with_context(|| format!("reading job file {}", job_path.display()))?;
    let job: ExportJob =
        serde_json::from_str(&text).with_context(|| format!("parsing job file {}", job_path.display()))?;

    let result = run_export(job).with_context(|| format!("job {} rejected", job_path.display()))?;
    for format in result.failed_formats() {
        warn!(job = %job_path.display(), format = %format, "format missing from package");
    }
    let package = result
        .package
        .with_context(|| format!("packaging {}", job_path.display()))?;

    let (archive_path, checksum_path) = output_paths(job_path, output_dir);
    std::fs::write(&archive_path, &package.archive_bytes)
        .with_context(|| format!("writing {}", archive_path.display()))?;
    std::fs::write(&checksum_path, checksum_line(&package, &archive_path))
        .with_context(|| format!("writing {}", checksum_path.display()))?;

    info!(
        archive = %archive_path.display(),
        entries = package.entry_count,
        bytes = package.total_bytes,
        sha256 = %package.sha256_hex,
        "package written"
    );
    Ok(())
}

/// 并发执行全部任务，返回失败的任务数
async fn run_jobs(jobs: &[PathBuf], output_dir: &Path) -> Result<usize> {
    let handles: Vec<_> = jobs
        .iter()
        .cloned()
        .map(|job_path| {
            let output = output_dir.to_path_buf();
            let path = job_path.clone();
            let handle = tokio::task::spawn_blocking(move || process_job(&path, &output));
            (handle, job_path)
        })
        .collect();

    let mut failed = 0usize;
    for (handle, job_path) in handles {
        let outcome = handle
            .await
            .with_context(|| format!("export task for {} aborted", job_path.display()))?;
        if let Err(e) = outcome {
            error!(job = %job_path.display(), "{:#}", e);
            failed += 1;
        }
    }
    Ok(failed)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 初始化日志
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    tracing::subscriber::set_global_default(FmtSubscriber::builder().with_max_level(level).finish())?;

    info!("Starting SiteCAD...");

    std::fs::create_dir_all(&args.output)
        .with_context(|| format!("creating output directory {}", args.output.display()))?;

    let failed = run_jobs(&args.jobs, &args.output).await?;
    if failed > 0 {
        bail!("{} of {} jobs failed", failed, args.jobs.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_paths() {
        let (zip, sum) = output_paths(Path::new("jobs/ridge_park.json"), Path::new("out"));
        assert_eq!(zip, PathBuf::from("out/ridge_park.zip"));
        assert_eq!(sum, PathBuf::from("out/ridge_park.sha256"));
    }

    #[test]
    fn test_checksum_line() {
        let package = Package {
            archive_bytes: Vec::new(),
            sha256_hex: "ab".repeat(32),
            entry_count: 0,
            total_bytes: 0,
        };
        let line = checksum_line(&package, Path::new("out/site.zip"));
        assert_eq!(line, format!("{}  site.zip\n", "ab".repeat(32)));
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from(["sitecad", "-v", "--output", "dist", "a.json", "b.json"]).unwrap();
        assert!(args.verbose);
        assert_eq!(args.output, PathBuf::from("dist"));
        assert_eq!(args.jobs.len(), 2);
        assert!(Args::try_parse_from(["sitecad"]).is_err());
    }

    #[tokio::test]
    async fn test_run_jobs_writes_package_and_checksum() {
        let dir = std::env::temp_dir().join(format!("sitecad-run-jobs-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let job_path = dir.join("plaza.json");
        let job = r#"{
            "manifest": {
                "site_name": "Plaza",
                "center_lat": 47.3769,
                "center_lng": 8.5417,
                "radius_m": 100,
                "requested_formats": ["cad", "plan"],
                "generated_at": "2024-06-01T08:30:00Z"
            }
        }"#;
        std::fs::write(&job_path, job).unwrap();
        let missing = dir.join("missing.json");

        let failed = run_jobs(&[job_path.clone(), missing], &dir).await.unwrap();
        assert_eq!(failed, 1);

        let (zip, sum) = output_paths(&job_path, &dir);
        let archive = std::fs::read(&zip).unwrap();
        assert!(archive.starts_with(b"PK\x03\x04"));
        let line = std::fs::read_to_string(&sum).unwrap();
        assert!(line.ends_with("  plaza.zip\n"));
        assert_eq!(line.split_whitespace().next().map(str::len), Some(64));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
