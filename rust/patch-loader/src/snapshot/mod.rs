// rust/patch-loader/src/snapshot/mod.rs

//! Persisted catalogs and split assignments.
//!
//! A catalog snapshot saves the store queries of catalog construction; a
//! split snapshot saves planning and balancing, making a partition
//! reproducible across runs.
//!
//! ```text
//! +------------------------+
//! | Header Length (4 bytes)|  <- u32 little-endian
//! +------------------------+
//! | Header (bincode)       |  <- SnapshotHeader
//! +------------------------+
//! | Compressed Payload     |  <- bincode, compressed per header
//! +------------------------+
//! ```

mod format;
mod reader;
mod writer;

pub use format::{SnapshotHeader, SnapshotKind};
pub use reader::SnapshotReader;
pub use writer::SnapshotWriter;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::balancer::SplitAssignment;
use crate::catalog::RowCatalog;
use crate::config::SnapshotConfig;
use crate::error::{LoaderError, Result};

/// Payload of a split snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitSnapshot {
    pub num_classes: usize,
    /// Normalized split ratios the assignment was built with.
    pub split_ratios: Vec<f64>,
    pub assignment: SplitAssignment,
}

pub fn write_catalog(config: &SnapshotConfig, path: &Path, catalog: &RowCatalog) -> Result<()> {
    SnapshotWriter::new(config.clone()).write(path, SnapshotKind::Catalog, catalog)
}

/// Loads a catalog snapshot, checking it against `num_classes`.
pub fn read_catalog(path: &Path, num_classes: usize) -> Result<RowCatalog> {
    let catalog: RowCatalog = SnapshotReader::new().read(path, SnapshotKind::Catalog)?;
    if catalog.num_classes() != num_classes {
        return Err(LoaderError::snapshot(
            path,
            format!(
                "catalog has {} classes, dataset is configured for {num_classes}",
                catalog.num_classes()
            ),
        ));
    }
    let (num_classes, samples) = catalog.into_parts();
    RowCatalog::from_samples(num_classes, samples)
        .map_err(|e| LoaderError::snapshot_with_source(path, "inconsistent catalog snapshot", e))
}

pub fn write_splits(config: &SnapshotConfig, path: &Path, snapshot: &SplitSnapshot) -> Result<()> {
    SnapshotWriter::new(config.clone()).write(path, SnapshotKind::Splits, snapshot)
}

/// Loads a split snapshot, checking it against `num_classes`.
pub fn read_splits(path: &Path, num_classes: usize) -> Result<SplitSnapshot> {
    let snapshot: SplitSnapshot = SnapshotReader::new().read(path, SnapshotKind::Splits)?;
    if snapshot.num_classes != num_classes {
        return Err(LoaderError::snapshot(
            path,
            format!(
                "splits were built for {} classes, dataset is configured for {num_classes}",
                snapshot.num_classes
            ),
        ));
    }
    if snapshot.split_ratios.len() != snapshot.assignment.num_splits() {
        return Err(LoaderError::snapshot(
            path,
            format!(
                "{} split ratios for {} splits",
                snapshot.split_ratios.len(),
                snapshot.assignment.num_splits()
            ),
        ));
    }
    let SplitSnapshot {
        num_classes,
        split_ratios,
        assignment,
    } = snapshot;
    let (row_keys, boundaries) = assignment.into_parts();
    let assignment = SplitAssignment::from_parts(row_keys, boundaries)
        .map_err(|e| LoaderError::snapshot_with_source(path, "inconsistent split snapshot", e))?;
    Ok(SplitSnapshot {
        num_classes,
        split_ratios,
        assignment,
    })
}
