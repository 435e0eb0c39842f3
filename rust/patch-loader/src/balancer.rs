// rust/patch-loader/src/balancer.rs

//! Per-class row selection inside each planned split.

use std::ops::Range;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::catalog::WorkingCatalog;
use crate::error::{LoaderError, Result};
use crate::planner::SplitPlan;
use crate::ratios::Ratios;
use crate::types::{ClassLabel, RowKey};

/// The selected rows of every split, concatenated.
///
/// Split `s` owns `row_keys[boundaries[s].clone()]`. Boundaries are
/// contiguous and cover the whole array in split order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitAssignment {
    row_keys: Vec<RowKey>,
    boundaries: Vec<Range<usize>>,
}

impl SplitAssignment {
    /// Builds an assignment from per-split row lists.
    pub fn from_splits(splits: Vec<Vec<RowKey>>) -> Self {
        let mut row_keys = Vec::with_capacity(splits.iter().map(Vec::len).sum());
        let mut boundaries = Vec::with_capacity(splits.len());
        for rows in splits {
            let start = row_keys.len();
            row_keys.extend(rows);
            boundaries.push(start..row_keys.len());
        }
        Self {
            row_keys,
            boundaries,
        }
    }

    /// Reassembles an assignment, checking that the boundaries tile
    /// `row_keys` exactly.
    ///
    /// # Errors
    ///
    /// Returns a configuration error on gaps, overlaps or out-of-range
    /// boundaries.
    pub fn from_parts(row_keys: Vec<RowKey>, boundaries: Vec<Range<usize>>) -> Result<Self> {
        let mut expected = 0;
        for (split, range) in boundaries.iter().enumerate() {
            if range.start != expected || range.end < range.start {
                return Err(LoaderError::config(format!(
                    "split {split} boundary {range:?} does not start at {expected}"
                )));
            }
            expected = range.end;
        }
        if expected != row_keys.len() {
            return Err(LoaderError::config(format!(
                "split boundaries cover {expected} rows, assignment has {}",
                row_keys.len()
            )));
        }
        Ok(Self {
            row_keys,
            boundaries,
        })
    }

    pub fn num_splits(&self) -> usize {
        self.boundaries.len()
    }

    /// Every selected row, split by split.
    pub fn row_keys(&self) -> &[RowKey] {
        &self.row_keys
    }

    pub fn boundaries(&self) -> &[Range<usize>] {
        &self.boundaries
    }

    pub fn split(&self, split: usize) -> Option<&[RowKey]> {
        self.boundaries
            .get(split)
            .map(|range| &self.row_keys[range.clone()])
    }

    pub fn split_sizes(&self) -> Vec<usize> {
        self.boundaries.iter().map(ExactSizeIterator::len).collect()
    }

    /// Per-split, per-class row counts.
    pub fn class_counts(&self, num_classes: usize) -> Vec<Vec<usize>> {
        self.boundaries
            .iter()
            .map(|range| {
                let mut counts = vec![0; num_classes];
                for key in &self.row_keys[range.clone()] {
                    if let Some(count) = counts.get_mut(key.label.index()) {
                        *count += 1;
                    }
                }
                counts
            })
            .collect()
    }

    pub(crate) fn into_parts(self) -> (Vec<RowKey>, Vec<Range<usize>>) {
        (self.row_keys, self.boundaries)
    }
}

/// Selects rows for every split of `plan` from the working copy.
///
/// `max_patches` is divided between splits with `split_ratios`, and each
/// split quota between classes with `balance`, both by cumulative rounding.
/// `None` lifts every quota, so each split takes all rows of its samples.
/// A class whose rows run out before its quota is met is left short; this
/// is not an error. Each split's rows are shuffled with `rng` at the end.
///
/// # Errors
///
/// Returns a configuration error if the plan and `split_ratios` disagree on
/// the number of splits.
pub fn select<R: Rng + ?Sized>(
    plan: &SplitPlan,
    mut working: WorkingCatalog,
    split_ratios: &Ratios,
    balance: &Ratios,
    max_patches: Option<u64>,
    rng: &mut R,
) -> Result<SplitAssignment> {
    if plan.num_splits() != split_ratios.len() {
        return Err(LoaderError::config(format!(
            "plan has {} splits but {} split ratios were given",
            plan.num_splits(),
            split_ratios.len()
        )));
    }
    let split_quotas: Vec<Option<u64>> = match max_patches {
        Some(total) => split_ratios
            .cumulative_quotas(total)
            .into_iter()
            .map(Some)
            .collect(),
        None => vec![None; plan.num_splits()],
    };

    let mut splits = Vec::with_capacity(plan.num_splits());
    for (split, (bag, split_quota)) in plan.bags.iter().zip(split_quotas).enumerate() {
        let class_quotas: Vec<Option<u64>> = match split_quota {
            Some(total) => balance
                .cumulative_quotas(total)
                .into_iter()
                .map(Some)
                .collect(),
            None => vec![None; balance.len()],
        };

        let mut rows = Vec::new();
        for (class, quota) in class_quotas.into_iter().enumerate() {
            let label = ClassLabel::new(class);
            let taken = take_round_robin(&mut working, &bag.samples, label, quota, &mut rows);
            if let Some(quota) = quota.filter(|q| taken < *q) {
                debug!(split, class, quota, taken, "class quota under-filled");
            }
        }
        rows.shuffle(rng);
        splits.push(rows);
    }

    let assignment = SplitAssignment::from_splits(splits);
    info!(
        rows = assignment.row_keys().len(),
        split_sizes = ?assignment.split_sizes(),
        "selected balanced rows"
    );
    Ok(assignment)
}

/// Pops up to `quota` rows of `label` from the bag, one sample at a time in
/// round-robin order. Returns how many rows were taken.
fn take_round_robin(
    working: &mut WorkingCatalog,
    bag: &[usize],
    label: ClassLabel,
    quota: Option<u64>,
    out: &mut Vec<RowKey>,
) -> u64 {
    let mut taken = 0u64;
    let mut position = 0usize;
    while quota.map_or(true, |q| taken < q) {
        let Some(found) = find_supplied(working, bag, position, label) else {
            break;
        };
        match working.pop(bag[found], label) {
            Some(key) => out.push(key),
            None => break,
        }
        taken += 1;
        position = (found + 1) % bag.len();
    }
    taken
}

/// First bag position at or after `start` (wrapping) whose sample still has
/// rows of `label`.
fn find_supplied(
    working: &WorkingCatalog,
    bag: &[usize],
    start: usize,
    label: ClassLabel,
) -> Option<usize> {
    (0..bag.len())
        .map(|step| (start + step) % bag.len())
        .find(|&position| working.has_rows(bag[position], label))
}
