// rust/patch-loader/src/cursor.rs

//! Per-split read positions over the assigned row keys.

use std::ops::Range;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::balancer::SplitAssignment;
use crate::error::{LoaderError, Result};

/// Read state of one split.
///
/// `order` holds indices into the assignment's global row-key array and is
/// only ever permuted, never resized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchCursor {
    order: Vec<usize>,
    offset: usize,
    batch_size: usize,
}

impl BatchCursor {
    pub fn new(range: Range<usize>, batch_size: usize) -> Result<Self> {
        check_batch_size(batch_size)?;
        Ok(Self {
            order: range.collect(),
            offset: 0,
            batch_size,
        })
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// `ceil(len / batch_size)`.
    pub fn num_batches(&self) -> usize {
        self.order.len().div_ceil(self.batch_size)
    }

    /// Number of batches already consumed.
    pub fn batches_consumed(&self) -> usize {
        self.offset.div_ceil(self.batch_size)
    }

    pub fn is_exhausted(&self) -> bool {
        self.offset >= self.order.len()
    }

    /// Global row indices of the batch at the current offset. Empty once the
    /// split is exhausted; shorter than the batch size for the last batch.
    pub fn window(&self) -> &[usize] {
        let start = self.offset.min(self.order.len());
        let end = (start + self.batch_size).min(self.order.len());
        &self.order[start..end]
    }

    /// Moves past the current window.
    pub fn advance(&mut self) {
        self.offset = (self.offset + self.batch_size).min(self.order.len());
    }

    /// Resets the offset to zero, permuting the row order first if `shuffle`.
    pub fn rewind<R: Rng + ?Sized>(&mut self, shuffle: bool, rng: &mut R) {
        if shuffle {
            self.order.shuffle(rng);
        }
        self.offset = 0;
    }

    /// Changes the batch size and resets the offset. Order is kept.
    pub fn set_batch_size(&mut self, batch_size: usize) -> Result<()> {
        check_batch_size(batch_size)?;
        self.batch_size = batch_size;
        self.offset = 0;
        Ok(())
    }

    /// Row indices in current read order.
    pub fn order(&self) -> &[usize] {
        &self.order
    }
}

/// One cursor per split of an assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchCursorSet {
    cursors: Vec<BatchCursor>,
}

impl BatchCursorSet {
    /// Builds fresh cursors over every split of `assignment`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `batch_size` is zero.
    pub fn rebuild(assignment: &SplitAssignment, batch_size: usize) -> Result<Self> {
        let cursors = assignment
            .boundaries()
            .iter()
            .map(|range| BatchCursor::new(range.clone(), batch_size))
            .collect::<Result<_>>()?;
        Ok(Self { cursors })
    }

    pub fn num_splits(&self) -> usize {
        self.cursors.len()
    }

    pub fn get(&self, split: usize) -> Result<&BatchCursor> {
        let num_splits = self.cursors.len();
        self.cursors
            .get(split)
            .ok_or_else(|| LoaderError::invalid_split(split, num_splits))
    }

    pub fn num_batches(&self) -> Vec<usize> {
        self.cursors.iter().map(BatchCursor::num_batches).collect()
    }

    pub fn rewind<R: Rng + ?Sized>(&mut self, split: usize, shuffle: bool, rng: &mut R) -> Result<()> {
        let num_splits = self.cursors.len();
        self.cursors
            .get_mut(split)
            .ok_or_else(|| LoaderError::invalid_split(split, num_splits))?
            .rewind(shuffle, rng);
        Ok(())
    }

    /// Applies a new batch size to every cursor, resetting all offsets.
    pub fn set_batch_size(&mut self, batch_size: usize) -> Result<()> {
        check_batch_size(batch_size)?;
        for cursor in &mut self.cursors {
            cursor.set_batch_size(batch_size)?;
        }
        Ok(())
    }

    pub fn into_cursors(self) -> Vec<BatchCursor> {
        self.cursors
    }
}

fn check_batch_size(batch_size: usize) -> Result<()> {
    if batch_size == 0 {
        Err(LoaderError::config("batch size must be greater than 0"))
    } else {
        Ok(())
    }
}
