// rust/patch-loader/src/types.rs

//! Core value types shared by the catalog, the planner and the prefetch
//! pipeline.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Identifier of one logical case (a patient, a slide).
///
/// All rows of a sample always land in the same split.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SampleId(String);

impl SampleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SampleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SampleId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Class index in `0..num_classes`.
///
/// The store keeps labels bit-packed: class `c` is stored as `1 << c`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClassLabel(u8);

impl ClassLabel {
    /// Largest number of classes that fits in the packed `i32` label.
    pub const MAX_CLASSES: usize = 31;

    pub fn new(index: usize) -> Self {
        debug_assert!(index < Self::MAX_CLASSES);
        Self(index as u8)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// The bit-packed value the store uses for this class.
    pub fn store_value(self) -> i32 {
        1i32 << self.0
    }

    /// Recovers the class from a packed value with exactly one bit set.
    pub fn from_store_value(value: i32) -> Option<Self> {
        if value > 0 && value.count_ones() == 1 {
            let index = value.trailing_zeros() as usize;
            (index < Self::MAX_CLASSES).then(|| Self::new(index))
        } else {
            None
        }
    }

    /// Iterates over every class of a dataset with `num_classes` classes.
    pub fn all(num_classes: usize) -> impl Iterator<Item = ClassLabel> {
        (0..num_classes).map(ClassLabel::new)
    }
}

impl fmt::Display for ClassLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class-{}", self.0)
    }
}

/// Address of one patch record in the backing store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowKey {
    pub sample: SampleId,
    pub label: ClassLabel,
    /// Replicate (slide section) index within the sample.
    pub replicate: u32,
    pub x: i32,
    pub y: i32,
}

impl RowKey {
    pub fn new(sample: SampleId, label: ClassLabel, replicate: u32, x: i32, y: i32) -> Self {
        Self {
            sample,
            label,
            replicate,
            x,
            y,
        }
    }
}

/// A record as returned by the store, before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// Bit-packed label as stored.
    pub label: i32,
    /// Encoded image payload.
    pub data: Bytes,
}
