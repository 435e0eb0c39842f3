// rust/patch-loader/src/catalog/mod.rs

//! Row catalog: every row key in the store, grouped by sample and class.
//!
//! The catalog is built once (from the store or from a snapshot) and is
//! read-only afterwards. Planning consumes rows destructively, so it always
//! works on a [`WorkingCatalog`] obtained through
//! [`RowCatalog::working_copy`]; re-planning therefore starts from pristine
//! counts every time.

mod loader;
mod stats;

pub use loader::load_catalog;
pub use stats::StatsMatrix;

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::error::{LoaderError, Result};
use crate::types::{ClassLabel, RowKey, SampleId};

/// Row keys of one sample, one ordered list per class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleRows {
    pub sample: SampleId,
    pub rows: Vec<Vec<RowKey>>,
}

impl SampleRows {
    pub fn count(&self, label: ClassLabel) -> usize {
        self.rows.get(label.index()).map_or(0, Vec::len)
    }

    pub fn total(&self) -> usize {
        self.rows.iter().map(Vec::len).sum()
    }
}

/// The full, immutable mapping sample -> class -> row keys.
///
/// Samples are kept in the (seeded, shuffled) order they were loaded in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowCatalog {
    num_classes: usize,
    samples: Vec<SampleRows>,
}

impl RowCatalog {
    /// Builds a catalog from already-grouped rows.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a sample does not carry exactly
    /// `num_classes` row lists, if a sample appears twice, or if a row key
    /// is filed under the wrong sample or class.
    pub fn from_samples(num_classes: usize, samples: Vec<SampleRows>) -> Result<Self> {
        let mut seen = std::collections::HashSet::with_capacity(samples.len());
        for entry in &samples {
            if !seen.insert(&entry.sample) {
                return Err(LoaderError::config(format!(
                    "sample {} appears more than once in the catalog",
                    entry.sample
                )));
            }
            if entry.rows.len() != num_classes {
                return Err(LoaderError::config(format!(
                    "sample {} has {} class lists, expected {}",
                    entry.sample,
                    entry.rows.len(),
                    num_classes
                )));
            }
            for (class, rows) in entry.rows.iter().enumerate() {
                if let Some(key) = rows
                    .iter()
                    .find(|k| k.sample != entry.sample || k.label.index() != class)
                {
                    return Err(LoaderError::config(format!(
                        "row key {key:?} filed under sample {} class {class}",
                        entry.sample
                    )));
                }
            }
        }
        Ok(Self {
            num_classes,
            samples,
        })
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn num_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn samples(&self) -> &[SampleRows] {
        &self.samples
    }

    pub fn sample(&self, index: usize) -> Option<&SampleRows> {
        self.samples.get(index)
    }

    /// Total number of rows across all samples and classes.
    pub fn total_rows(&self) -> usize {
        self.samples.iter().map(SampleRows::total).sum()
    }

    /// Per-(sample, class) row counts, in catalog sample order.
    pub fn stats(&self) -> StatsMatrix {
        StatsMatrix::from_catalog(self)
    }

    pub(crate) fn into_parts(self) -> (usize, Vec<SampleRows>) {
        (self.num_classes, self.samples)
    }

    /// Deep copy whose row lists can be consumed without touching `self`.
    pub fn working_copy(&self) -> WorkingCatalog {
        WorkingCatalog {
            rows: self
                .samples
                .iter()
                .map(|s| s.rows.iter().map(|r| r.iter().cloned().collect()).collect())
                .collect(),
        }
    }
}

/// Disposable copy of the catalog rows, consumed front-to-back.
#[derive(Debug, Clone)]
pub struct WorkingCatalog {
    rows: Vec<Vec<VecDeque<RowKey>>>,
}

impl WorkingCatalog {
    /// Whether `sample` still has rows of `label`.
    pub fn has_rows(&self, sample: usize, label: ClassLabel) -> bool {
        self.remaining(sample, label) > 0
    }

    pub fn remaining(&self, sample: usize, label: ClassLabel) -> usize {
        self.rows
            .get(sample)
            .and_then(|classes| classes.get(label.index()))
            .map_or(0, VecDeque::len)
    }

    /// Removes and returns the front row of `sample` for `label`.
    pub fn pop(&mut self, sample: usize, label: ClassLabel) -> Option<RowKey> {
        self.rows
            .get_mut(sample)
            .and_then(|classes| classes.get_mut(label.index()))
            .and_then(VecDeque::pop_front)
    }
}
