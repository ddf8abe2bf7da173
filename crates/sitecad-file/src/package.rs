//! 交付包
//!
//! 把所有产物写入一个 zip 包，随后自检：
//! - 文件头必须是 `PK`
//! - 重新打开中央目录，条目数必须与产物数一致
//!
//! 自检失败视为整个任务失败。通过后计算 SHA-256。

use crate::artifact::OutputArtifact;
use crate::error::ExportError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::io::{Cursor, Write};
use tracing::{debug, info};
use zip::write::FileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

/// zip 本地文件头魔数
pub const ZIP_MAGIC: &[u8; 2] = b"PK";

/// 打包结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    #[serde(skip)]
    pub archive_bytes: Vec<u8>,
    /// 64 位小写十六进制
    pub sha256_hex: String,
    pub entry_count: usize,
    /// 包的总字节数
    pub total_bytes: usize,
}

/// 打包器
#[derive(Debug, Clone, Copy)]
pub struct PackageAssembler {
    max_bytes: u64,
}

impl Default for PackageAssembler {
    fn default() -> Self {
        Self {
            max_bytes: 512 * 1024 * 1024,
        }
    }
}

impl PackageAssembler {
    pub fn new(max_bytes: u64) -> Self {
        Self { max_bytes }
    }

    pub fn assemble(&self, artifacts: &[OutputArtifact]) -> Result<Package, ExportError> {
        let mut seen = HashSet::with_capacity(artifacts.len());
        for artifact in artifacts {
            if artifact.path.is_empty() || artifact.path.starts_with('/') || artifact.path.contains("..") {
                return Err(ExportError::AssemblyIntegrity(format!(
                    "invalid entry path '{}'",
                    artifact.path
                )));
            }
            if !seen.insert(artifact.path.as_str()) {
                return Err(ExportError::AssemblyIntegrity(format!(
                    "duplicate entry path '{}'",
                    artifact.path
                )));
            }
        }

        let payload: u64 = artifacts.iter().map(|a| a.len() as u64).sum();
        if payload > self.max_bytes {
            return Err(ExportError::AssemblyIntegrity(format!(
                "artifacts total {} bytes, limit is {}",
                payload, self.max_bytes
            )));
        }

        let options = FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(DateTime::default())
            .unix_permissions(0o644);

        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for artifact in artifacts {
            writer.start_file(artifact.path.as_str(), options)?;
            writer.write_all(&artifact.bytes)?;
        }
        let archive_bytes = writer.finish()?.into_inner();

        if archive_bytes.len() as u64 > self.max_bytes {
            return Err(ExportError::AssemblyIntegrity(format!(
                "archive is {} bytes, limit is {}",
                archive_bytes.len(),
                self.max_bytes
            )));
        }
        if !archive_bytes.starts_with(ZIP_MAGIC) {
            return Err(ExportError::AssemblyIntegrity(
                "archive does not start with the PK signature".to_string(),
            ));
        }

        let entry_count = ZipArchive::new(Cursor::new(archive_bytes.as_slice()))
            .map_err(|e| ExportError::AssemblyIntegrity(format!("archive does not re-open: {}", e)))?
            .len();
        if entry_count != artifacts.len() {
            return Err(ExportError::AssemblyIntegrity(format!(
                "central directory lists {} entries, wrote {}",
                entry_count,
                artifacts.len()
            )));
        }

        let sha256_hex = sha256_hex(&archive_bytes);
        debug!(entries = entry_count, payload, "archive verified");
        info!(
            entries = entry_count,
            bytes = archive_bytes.len(),
            sha256 = %sha256_hex,
            "package assembled"
        );

        Ok(Package {
            total_bytes: archive_bytes.len(),
            archive_bytes,
            sha256_hex,
            entry_count,
        })
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn artifacts(n: usize) -> Vec<OutputArtifact> {
        (0..n)
            .map(|i| OutputArtifact::new(format!("exports/file{}.txt", i), format!("content {}", i).repeat(10).into_bytes()))
            .collect()
    }

    #[test]
    fn test_five_artifacts() {
        let package = PackageAssembler::default().assemble(&artifacts(5)).unwrap();
        assert_eq!(package.entry_count, 5);
        assert_eq!(package.sha256_hex.len(), 64);
        assert!(package
            .sha256_hex
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
        assert_eq!(package.total_bytes, package.archive_bytes.len());
        assert_eq!(&package.archive_bytes[..2], b"PK");
    }

    #[test]
    fn test_entries_round_trip() {
        let input = artifacts(3);
        let package = PackageAssembler::default().assemble(&input).unwrap();
        let mut archive = ZipArchive::new(Cursor::new(package.archive_bytes.as_slice())).unwrap();
        for artifact in &input {
            let mut entry = archive.by_name(&artifact.path).unwrap();
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes).unwrap();
            assert_eq!(bytes, artifact.bytes);
        }
    }

    #[test]
    fn test_reproducible_digest() {
        let a = PackageAssembler::default().assemble(&artifacts(4)).unwrap();
        let b = PackageAssembler::default().assemble(&artifacts(4)).unwrap();
        assert_eq!(a.sha256_hex, b.sha256_hex);
        assert_eq!(a.sha256_hex, sha256_hex(&a.archive_bytes));
    }

    #[test]
    fn test_duplicate_path_rejected() {
        let mut input = artifacts(2);
        input[1].path = input[0].path.clone();
        let err = PackageAssembler::default().assemble(&input).unwrap_err();
        assert!(err.is_fatal_for_job());
    }

    #[test]
    fn test_size_limit() {
        let err = PackageAssembler::new(16).assemble(&artifacts(2)).unwrap_err();
        assert!(matches!(err, ExportError::AssemblyIntegrity(_)));
    }

    #[test]
    fn test_known_digest() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
