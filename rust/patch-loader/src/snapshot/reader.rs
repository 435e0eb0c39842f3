// rust/patch-loader/src/snapshot/reader.rs

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use tracing::info;

use super::format::{SnapshotHeader, SnapshotKind};
use super::writer::calculate_checksum;
use crate::error::{LoaderError, Result};

/// Reads and verifies snapshot files.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotReader;

impl SnapshotReader {
    pub fn new() -> Self {
        Self
    }

    /// Reads the payload of `path`, which must be a snapshot of `kind`.
    ///
    /// # Errors
    ///
    /// Returns a snapshot error if:
    /// - The file cannot be read or is truncated
    /// - The magic bytes or version are invalid
    /// - The file holds a different kind of snapshot
    /// - Decompression fails or the checksum or size doesn't match
    pub fn read<T: DeserializeOwned>(&self, path: &Path, kind: SnapshotKind) -> Result<T> {
        let file_data = fs::read(path)
            .map_err(|e| LoaderError::snapshot_with_source(path, "failed to read snapshot file", e))?;
        let (header, body) = split_header(path, &file_data)?;

        if header.kind != kind {
            return Err(LoaderError::snapshot(
                path,
                format!(
                    "expected a {} snapshot, found {}",
                    kind.as_str(),
                    header.kind.as_str()
                ),
            ));
        }

        let data = decompress(path, body, &header.compression)?;
        let checksum = calculate_checksum(&data);
        if checksum != header.checksum {
            return Err(LoaderError::snapshot(
                path,
                format!("checksum mismatch: expected {}, got {checksum}", header.checksum),
            ));
        }
        if data.len() as u64 != header.uncompressed_size {
            return Err(LoaderError::snapshot(
                path,
                format!(
                    "size mismatch: expected {}, got {}",
                    header.uncompressed_size,
                    data.len()
                ),
            ));
        }

        let payload = bincode::deserialize(&data)
            .map_err(|e| LoaderError::snapshot_with_source(path, "failed to deserialize payload", e))?;
        info!(
            path = %path.display(),
            kind = kind.as_str(),
            created_at_ms = header.created_at_ms,
            "read snapshot"
        );
        Ok(payload)
    }

    /// Reads and validates only the header of `path`.
    pub fn read_header(&self, path: &Path) -> Result<SnapshotHeader> {
        let file_data = fs::read(path)
            .map_err(|e| LoaderError::snapshot_with_source(path, "failed to read snapshot file", e))?;
        split_header(path, &file_data).map(|(header, _)| header)
    }
}

fn split_header<'a>(path: &Path, file_data: &'a [u8]) -> Result<(SnapshotHeader, &'a [u8])> {
    let Some((len_bytes, rest)) = file_data.split_first_chunk::<4>() else {
        return Err(LoaderError::snapshot(path, "snapshot file too small"));
    };
    let header_len = u32::from_le_bytes(*len_bytes) as usize;
    if rest.len() < header_len {
        return Err(LoaderError::snapshot(
            path,
            "snapshot file truncated: header incomplete",
        ));
    }
    let (header_bytes, body) = rest.split_at(header_len);

    let header: SnapshotHeader = bincode::deserialize(header_bytes)
        .map_err(|e| LoaderError::snapshot_with_source(path, "failed to deserialize header", e))?;
    if !header.validate_magic() {
        return Err(LoaderError::snapshot(
            path,
            format!(
                "invalid magic bytes: expected {:?}, got {:?}",
                SnapshotHeader::MAGIC,
                header.magic
            ),
        ));
    }
    if !header.validate_version() {
        return Err(LoaderError::snapshot(
            path,
            format!(
                "unsupported version: expected {}, got {}",
                SnapshotHeader::VERSION,
                header.version
            ),
        ));
    }
    Ok((header, body))
}

fn decompress(path: &Path, data: &[u8], compression: &str) -> Result<Vec<u8>> {
    match compression {
        "none" => Ok(data.to_vec()),
        "lz4" => lz4_flex::decompress_size_prepended(data)
            .map_err(|e| LoaderError::snapshot_with_source(path, "lz4 decompression failed", e)),
        "zstd" => zstd::decode_all(data)
            .map_err(|e| LoaderError::snapshot_with_source(path, "zstd decompression failed", e)),
        other => Err(LoaderError::snapshot(
            path,
            format!("unknown compression algorithm: {other}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SnapshotConfig;
    use crate::snapshot::SnapshotWriter;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn write(dir: &TempDir, compression: &str, payload: &Vec<String>) -> PathBuf {
        let path = dir.path().join(format!("{compression}.snap"));
        let config = SnapshotConfig {
            compression: compression.to_string(),
            compression_level: 3,
            ..Default::default()
        };
        SnapshotWriter::new(config)
            .write(&path, SnapshotKind::Catalog, payload)
            .unwrap();
        path
    }

    fn payload() -> Vec<String> {
        (0..200).map(|i| format!("row-{i}")).collect()
    }

    #[test]
    fn test_read_back_every_compression() {
        let dir = TempDir::new().unwrap();
        for compression in ["none", "lz4", "zstd"] {
            let path = write(&dir, compression, &payload());
            let read: Vec<String> = SnapshotReader::new()
                .read(&path, SnapshotKind::Catalog)
                .unwrap();
            assert_eq!(read, payload());

            let header = SnapshotReader::new().read_header(&path).unwrap();
            assert_eq!(header.compression, compression);
            assert_eq!(header.kind, SnapshotKind::Catalog);
        }
    }

    #[test]
    fn test_wrong_kind_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "lz4", &payload());
        let err = SnapshotReader::new()
            .read::<Vec<String>>(&path, SnapshotKind::Splits)
            .unwrap_err();
        assert!(err.to_string().contains("expected a splits snapshot"));
    }

    #[test]
    fn test_corruption_detected() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "none", &payload());
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        let err = SnapshotReader::new()
            .read::<Vec<String>>(&path, SnapshotKind::Catalog)
            .unwrap_err();
        assert!(err.to_string().contains("checksum mismatch"));
    }

    #[test]
    fn test_truncated_and_foreign_files() {
        let dir = TempDir::new().unwrap();
        let tiny = dir.path().join("tiny.snap");
        fs::write(&tiny, [1u8, 0]).unwrap();
        assert!(SnapshotReader::new().read_header(&tiny).is_err());

        let truncated = dir.path().join("truncated.snap");
        fs::write(&truncated, [200u8, 0, 0, 0, 1, 2]).unwrap();
        let err = SnapshotReader::new().read_header(&truncated).unwrap_err();
        assert!(err.to_string().contains("header incomplete"));

        let missing = dir.path().join("missing.snap");
        assert!(SnapshotReader::new()
            .read::<Vec<String>>(&missing, SnapshotKind::Catalog)
            .is_err());
    }
}
