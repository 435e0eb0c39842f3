// rust/patch-loader/src/prefetch.rs

//! One-batch-lookahead prefetching per split.
//!
//! Every split owns a slot holding its cursor and at most one in-flight
//! resolve, spawned on the tokio runtime. `load_batch` waits for that
//! resolve, starts the next one, and only then decodes the records, so the
//! store round-trip for batch `k + 1` overlaps the caller's work on batch
//! `k`. Slots are locked independently; driving different splits from
//! different tasks never contends.
//!
//! A resolve that is no longer wanted (after a rewind or a batch-size
//! change) is not cancelled. Its handle is dropped and the result is
//! discarded when the task completes.

use std::sync::Arc;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::balancer::SplitAssignment;
use crate::cursor::{BatchCursor, BatchCursorSet};
use crate::error::{LoaderError, Result};
use crate::materialize::{Batch, Materializer};
use crate::store::RowStore;
use crate::types::{RawRecord, RowKey};

/// Externally visible state of a split's prefetch slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Nothing in flight: the split is exhausted or its last resolve failed.
    Idle,
    /// A resolve is in flight.
    Prefetching,
    /// The in-flight resolve has completed and waits to be consumed.
    Ready,
}

type Resolved = (Vec<RowKey>, Vec<RawRecord>);

struct SplitSlot {
    cursor: BatchCursor,
    pending: Option<JoinHandle<Result<Resolved>>>,
    rng: ChaCha8Rng,
    issued: u64,
    poisoned: bool,
}

impl SplitSlot {
    fn state(&self) -> SlotState {
        match &self.pending {
            None => SlotState::Idle,
            Some(handle) if handle.is_finished() => SlotState::Ready,
            Some(_) => SlotState::Prefetching,
        }
    }
}

pub struct PrefetchPipeline {
    store: Arc<dyn RowStore>,
    assignment: Arc<SplitAssignment>,
    slots: Vec<Mutex<SplitSlot>>,
    materializer: Arc<Materializer>,
    runtime: Handle,
}

impl PrefetchPipeline {
    /// Builds one slot per split and issues the first prefetch of each.
    ///
    /// Split `s` reshuffles with a ChaCha stream `s` derived from `seed`, so
    /// splits draw independent permutations.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `batch_size` is zero or if called
    /// outside a tokio runtime.
    pub fn start(
        store: Arc<dyn RowStore>,
        assignment: Arc<SplitAssignment>,
        batch_size: usize,
        materializer: Arc<Materializer>,
        seed: u64,
    ) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| {
            LoaderError::config_with_source("prefetch pipeline needs a tokio runtime", e)
        })?;
        let cursors = BatchCursorSet::rebuild(&assignment, batch_size)?.into_cursors();
        let mut pipeline = Self {
            store,
            assignment,
            slots: Vec::with_capacity(cursors.len()),
            materializer,
            runtime,
        };
        for (split, cursor) in cursors.into_iter().enumerate() {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            rng.set_stream(split as u64);
            let mut slot = SplitSlot {
                cursor,
                pending: None,
                rng,
                issued: 0,
                poisoned: false,
            };
            pipeline.issue(split, &mut slot);
            pipeline.slots.push(Mutex::new(slot));
        }
        debug!(
            splits = pipeline.slots.len(),
            batch_size,
            backend = pipeline.store.backend_type(),
            "started prefetch pipeline"
        );
        Ok(pipeline)
    }

    pub fn num_splits(&self) -> usize {
        self.slots.len()
    }

    pub fn assignment(&self) -> &Arc<SplitAssignment> {
        &self.assignment
    }

    pub fn materializer(&self) -> &Arc<Materializer> {
        &self.materializer
    }

    /// Swaps the materializer used for batches loaded from now on.
    pub fn set_materializer(&mut self, materializer: Arc<Materializer>) {
        self.materializer = materializer;
    }

    /// Returns the next batch of `split`.
    ///
    /// Waits only for this split's in-flight resolve. Past the last batch
    /// this fails with [`LoaderError::CursorExhausted`] until the split is
    /// rewound. A failed resolve is reported once as a store error and is
    /// not retried; the split stays idle until rewound.
    ///
    /// The cursor advances and the next window is requested before records
    /// are decoded. A batch the materializer rejects is therefore skipped:
    /// the error is returned and the following call yields the next window.
    ///
    /// # Errors
    ///
    /// Returns a store error for failed resolves, a decode error for records
    /// the materializer rejects, and `InvalidSplit` for a bad index.
    pub async fn load_batch(&self, split: usize) -> Result<Batch> {
        let mut slot = self.slot(split)?.lock().await;
        let Some(handle) = slot.pending.take() else {
            if slot.poisoned {
                return Err(LoaderError::store(format!(
                    "split {split} has no batch in flight after a failed resolve; rewind it"
                )));
            }
            return Err(LoaderError::cursor_exhausted(split, slot.cursor.num_batches()));
        };

        let (keys, records) = match handle.await {
            Ok(Ok(resolved)) => resolved,
            Ok(Err(err)) => {
                slot.poisoned = true;
                warn!(split, error = %err, "batch resolve failed");
                return Err(err);
            }
            Err(join) => {
                slot.poisoned = true;
                return Err(LoaderError::store_with_source(
                    format!("resolve task for split {split} did not complete"),
                    join,
                ));
            }
        };

        slot.cursor.advance();
        self.issue(split, &mut slot);
        drop(slot);

        let mut batch = self.materializer.materialize(split, &records)?;
        batch.keys = keys;
        Ok(batch)
    }

    /// Rewinds `split` to its first batch, optionally reshuffling its rows,
    /// and issues a fresh prefetch.
    pub async fn rewind(&self, split: usize, shuffle: bool) -> Result<()> {
        let mut slot = self.slot(split)?.lock().await;
        slot.pending = None;
        slot.poisoned = false;
        let SplitSlot { cursor, rng, .. } = &mut *slot;
        cursor.rewind(shuffle, rng);
        self.issue(split, &mut slot);
        Ok(())
    }

    /// Changes the batch size of every split, discarding in-flight resolves
    /// and prefetching each split's first batch again.
    pub async fn set_batch_size(&self, batch_size: usize) -> Result<()> {
        if batch_size == 0 {
            return Err(LoaderError::config("batch size must be greater than 0"));
        }
        for (split, slot) in self.slots.iter().enumerate() {
            let mut slot = slot.lock().await;
            slot.pending = None;
            slot.poisoned = false;
            slot.cursor.set_batch_size(batch_size)?;
            self.issue(split, &mut slot);
        }
        Ok(())
    }

    pub async fn num_batches(&self) -> Vec<usize> {
        let mut counts = Vec::with_capacity(self.slots.len());
        for slot in &self.slots {
            counts.push(slot.lock().await.cursor.num_batches());
        }
        counts
    }

    pub async fn batch_size(&self) -> usize {
        match self.slots.first() {
            Some(slot) => slot.lock().await.cursor.batch_size(),
            None => 0,
        }
    }

    pub async fn slot_state(&self, split: usize) -> Result<SlotState> {
        Ok(self.slot(split)?.lock().await.state())
    }

    /// Number of resolves issued for `split` since the pipeline started.
    pub async fn issued_requests(&self, split: usize) -> Result<u64> {
        Ok(self.slot(split)?.lock().await.issued)
    }

    fn slot(&self, split: usize) -> Result<&Mutex<SplitSlot>> {
        self.slots
            .get(split)
            .ok_or_else(|| LoaderError::invalid_split(split, self.slots.len()))
    }

    /// Spawns the resolve for the cursor's current window, unless the split
    /// is exhausted.
    fn issue(&self, split: usize, slot: &mut SplitSlot) {
        debug_assert!(slot.pending.is_none());
        if slot.cursor.is_exhausted() {
            trace!(split, "split exhausted, no prefetch issued");
            return;
        }
        let row_keys = self.assignment.row_keys();
        let keys: Vec<RowKey> = slot
            .cursor
            .window()
            .iter()
            .map(|&i| row_keys[i].clone())
            .collect();
        let store = Arc::clone(&self.store);
        slot.issued += 1;
        trace!(
            split,
            offset = slot.cursor.offset(),
            rows = keys.len(),
            "issuing prefetch"
        );
        slot.pending = Some(self.runtime.spawn(async move {
            let records = store.resolve_batch(&keys).await?;
            if records.len() != keys.len() {
                return Err(LoaderError::store(format!(
                    "store resolved {} records for {} keys",
                    records.len(),
                    keys.len()
                )));
            }
            Ok((keys, records))
        }));
    }
}
