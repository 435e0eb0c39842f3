// rust/patch-loader/src/lib.rs

//! Patch Loader - Core Library
//!
//! This crate partitions image patches held in a column store into
//! sample-disjoint training/validation/test splits, balances each split by
//! class, and serves batches with one batch of asynchronous lookahead per
//! split.

pub mod config;
pub mod error;
pub mod logging;
pub mod ratios;
pub mod store;
pub mod types;

// Re-export commonly used types for convenience
pub use config::LoaderConfig;
pub use error::{LoaderError, Result};
pub use ratios::Ratios;
pub use store::{MemoryStore, RowStore};
pub use types::{ClassLabel, RawRecord, RowKey, SampleId};

pub mod balancer;
pub mod catalog;
pub mod cursor;
pub mod planner;
pub use balancer::SplitAssignment;
pub use catalog::{RowCatalog, StatsMatrix, WorkingCatalog};
pub use cursor::{BatchCursor, BatchCursorSet};
pub use planner::{Bag, SplitPlan};

pub mod materialize;
pub mod prefetch;
pub use materialize::{Augmentation, Batch, Image, Materializer, RawPixelDecoder, RecordDecoder};
pub use prefetch::{PrefetchPipeline, SlotState};

pub mod snapshot;
pub use snapshot::{SnapshotHeader, SnapshotKind, SplitSnapshot};

pub mod dataset;
pub use dataset::{Augmentations, PatchDataset, SplitOverrides};
