// rust/patch-loader/src/snapshot/format.rs

//! Snapshot file header.

use serde::{Deserialize, Serialize};

/// What a snapshot file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotKind {
    /// A full row catalog.
    Catalog,
    /// A computed split assignment.
    Splits,
}

impl SnapshotKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Catalog => "catalog",
            Self::Splits => "splits",
        }
    }
}

/// Header written in front of every snapshot payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotHeader {
    /// Magic bytes identifying this as a snapshot file ("PLDS")
    pub magic: [u8; 4],
    /// Format version number
    pub version: u32,
    pub kind: SnapshotKind,
    /// Compression algorithm used ("none", "lz4", or "zstd")
    pub compression: String,
    /// Size of the payload before compression
    pub uncompressed_size: u64,
    /// XXHash64 checksum of the uncompressed payload
    pub checksum: u64,
    /// Creation time, milliseconds since the Unix epoch
    pub created_at_ms: i64,
}

impl SnapshotHeader {
    pub const MAGIC: [u8; 4] = *b"PLDS";

    pub const VERSION: u32 = 1;

    pub fn new(kind: SnapshotKind, compression: String, uncompressed_size: u64, checksum: u64) -> Self {
        Self {
            magic: Self::MAGIC,
            version: Self::VERSION,
            kind,
            compression,
            uncompressed_size,
            checksum,
            created_at_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn validate_magic(&self) -> bool {
        self.magic == Self::MAGIC
    }

    pub fn validate_version(&self) -> bool {
        self.version == Self::VERSION
    }
}
