// rust/patch-loader/src/snapshot/writer.rs

use std::fs;
use std::hash::Hasher;
use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tracing::info;
use twox_hash::XxHash64;

use super::format::{SnapshotHeader, SnapshotKind};
use crate::config::SnapshotConfig;
use crate::error::{LoaderError, Result};

/// Writes snapshot files: length-prefixed bincode header, then the
/// compressed bincode payload.
pub struct SnapshotWriter {
    config: SnapshotConfig,
}

impl SnapshotWriter {
    pub fn new(config: SnapshotConfig) -> Self {
        Self { config }
    }

    /// Serializes `payload` and writes it to `path`.
    ///
    /// With `atomic_writes` the file is written next to `path` under a
    /// hidden temporary name and renamed into place, so readers never see a
    /// partial snapshot. Parent directories are created as needed.
    pub fn write<T: Serialize>(&self, path: &Path, kind: SnapshotKind, payload: &T) -> Result<()> {
        let data = bincode::serialize(payload).map_err(|e| {
            LoaderError::snapshot_with_source(path, "failed to serialize payload", e)
        })?;

        let checksum = calculate_checksum(&data);
        let compressed = self.compress(path, &data)?;
        let header = SnapshotHeader::new(
            kind,
            self.config.compression.clone(),
            data.len() as u64,
            checksum,
        );
        let header_bytes = bincode::serialize(&header)
            .map_err(|e| LoaderError::snapshot_with_source(path, "failed to serialize header", e))?;

        let mut file_data = Vec::with_capacity(4 + header_bytes.len() + compressed.len());
        file_data.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
        file_data.extend_from_slice(&header_bytes);
        file_data.extend_from_slice(&compressed);

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                LoaderError::snapshot_with_source(path, "failed to create snapshot directory", e)
            })?;
        }

        if self.config.atomic_writes {
            let file_name = path
                .file_name()
                .ok_or_else(|| LoaderError::snapshot(path, "snapshot path has no file name"))?;
            let temp_path = path.with_file_name(format!(".{}.tmp", file_name.to_string_lossy()));
            write_file(&temp_path, &file_data)?;
            fs::rename(&temp_path, path).map_err(|e| {
                LoaderError::snapshot_with_source(path, "failed to move snapshot into place", e)
            })?;
        } else {
            write_file(path, &file_data)?;
        }

        info!(
            path = %path.display(),
            kind = kind.as_str(),
            bytes = file_data.len(),
            compression = %self.config.compression,
            "wrote snapshot"
        );
        Ok(())
    }

    fn compress(&self, path: &Path, data: &[u8]) -> Result<Vec<u8>> {
        match self.config.compression.as_str() {
            "none" => Ok(data.to_vec()),
            "lz4" => Ok(lz4_flex::compress_prepend_size(data)),
            "zstd" => zstd::encode_all(data, self.config.compression_level)
                .map_err(|e| LoaderError::snapshot_with_source(path, "zstd compression failed", e)),
            other => Err(LoaderError::snapshot(
                path,
                format!("unknown compression algorithm: {other}"),
            )),
        }
    }
}

fn write_file(path: &Path, data: &[u8]) -> Result<()> {
    let mut file = fs::File::create(path)
        .map_err(|e| LoaderError::snapshot_with_source(path, "failed to create snapshot file", e))?;
    file.write_all(data)
        .and_then(|()| file.sync_all())
        .map_err(|e| LoaderError::snapshot_with_source(path, "failed to write snapshot data", e))
}

pub(super) fn calculate_checksum(data: &[u8]) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(data);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(compression: &str, atomic_writes: bool) -> SnapshotConfig {
        SnapshotConfig {
            compression: compression.to_string(),
            atomic_writes,
            ..Default::default()
        }
    }

    #[test]
    fn test_write_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/deeper/rows.snap");
        SnapshotWriter::new(config("lz4", true))
            .write(&path, SnapshotKind::Catalog, &vec![1u32, 2, 3])
            .unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_atomic_write_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("splits.snap");
        SnapshotWriter::new(config("none", true))
            .write(&path, SnapshotKind::Splits, &"payload")
            .unwrap();
        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["splits.snap".to_string()]);
    }

    #[test]
    fn test_unknown_compression_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x.snap");
        let err = SnapshotWriter::new(config("brotli", false))
            .write(&path, SnapshotKind::Splits, &0u8)
            .unwrap_err();
        assert!(matches!(err, LoaderError::Snapshot { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn test_checksum_is_stable() {
        assert_eq!(calculate_checksum(b"abc"), calculate_checksum(b"abc"));
        assert_ne!(calculate_checksum(b"abc"), calculate_checksum(b"abd"));
    }
}
