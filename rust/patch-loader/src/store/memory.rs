// rust/patch-loader/src/store/memory.rs

//! In-memory row store.
//!
//! Holds the whole table in a `BTreeMap` keyed by [`RowKey`], so listings
//! come back in key order. Besides serving small datasets it can inject
//! failures and latency, and it counts requests, which makes it the test
//! double for real column stores.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use super::traits::RowStore;
use crate::error::{LoaderError, Result};
use crate::types::{ClassLabel, RawRecord, RowKey, SampleId};

#[derive(Default)]
pub struct MemoryStore {
    rows: RwLock<BTreeMap<RowKey, Bytes>>,
    unreachable: AtomicBool,
    failing_samples: Mutex<HashSet<SampleId>>,
    latency_micros: AtomicU64,
    fetch_calls: AtomicU64,
    resolve_calls: AtomicU64,
    batch_calls: AtomicU64,
    fetches_in_flight: AtomicU64,
    max_fetches_in_flight: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds artificial latency to every fetch and resolve request.
    #[must_use]
    pub fn with_latency(self, latency: Duration) -> Self {
        self.latency_micros
            .store(latency.as_micros() as u64, Ordering::Relaxed);
        self
    }

    /// Inserts (or replaces) one record.
    pub fn insert(&self, key: RowKey, data: Bytes) {
        self.rows
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, data);
    }

    /// Inserts `count` rows for one sample and class. Row `i` sits at
    /// `(x, y) = (i, 0)` of replicate 0 and carries `payload(i)`.
    pub fn insert_sample_rows(
        &self,
        sample: &SampleId,
        label: ClassLabel,
        count: usize,
        mut payload: impl FnMut(usize) -> Bytes,
    ) {
        let mut rows = self.rows.write().unwrap_or_else(|e| e.into_inner());
        for i in 0..count {
            let key = RowKey::new(sample.clone(), label, 0, i as i32, 0);
            rows.insert(key, payload(i));
        }
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.rows.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Makes every subsequent request fail as if the store were down.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Makes row-key fetches for `sample` fail.
    pub fn fail_sample(&self, sample: SampleId) {
        self.failing_samples
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(sample);
    }

    /// Number of `fetch_row_keys` calls served so far.
    pub fn fetch_calls(&self) -> u64 {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Number of single-key resolves served so far, batched ones included.
    pub fn resolve_calls(&self) -> u64 {
        self.resolve_calls.load(Ordering::SeqCst)
    }

    /// Number of `resolve_batch` calls served so far.
    pub fn batch_calls(&self) -> u64 {
        self.batch_calls.load(Ordering::SeqCst)
    }

    /// Highest number of `fetch_row_keys` calls observed in flight at once.
    pub fn max_fetches_in_flight(&self) -> u64 {
        self.max_fetches_in_flight.load(Ordering::SeqCst)
    }

    fn check_reachable(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            Err(LoaderError::store("memory store unreachable"))
        } else {
            Ok(())
        }
    }

    async fn simulate_latency(&self) {
        let micros = self.latency_micros.load(Ordering::Relaxed);
        if micros > 0 {
            tokio::time::sleep(Duration::from_micros(micros)).await;
        }
    }

    fn lookup(&self, key: &RowKey) -> Result<RawRecord> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        let rows = self.rows.read().unwrap_or_else(|e| e.into_inner());
        let data = rows.get(key).ok_or_else(|| {
            LoaderError::store(format!(
                "row not found: sample={} label={} rep={} x={} y={}",
                key.sample, key.label, key.replicate, key.x, key.y
            ))
        })?;
        Ok(RawRecord {
            label: key.label.store_value(),
            data: data.clone(),
        })
    }
}

#[async_trait]
impl RowStore for MemoryStore {
    async fn list_distinct_samples(&self) -> Result<Vec<(SampleId, ClassLabel)>> {
        self.check_reachable()?;
        self.simulate_latency().await;
        let rows = self.rows.read().unwrap_or_else(|e| e.into_inner());
        let distinct: BTreeSet<(SampleId, ClassLabel)> = rows
            .keys()
            .map(|key| (key.sample.clone(), key.label))
            .collect();
        Ok(distinct.into_iter().collect())
    }

    async fn fetch_row_keys(&self, sample: &SampleId, label: ClassLabel) -> Result<Vec<RowKey>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.check_reachable()?;
        let failing = self
            .failing_samples
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(sample);
        if failing {
            return Err(LoaderError::store(format!(
                "row-key query failed for sample {sample}"
            )));
        }
        let in_flight = self.fetches_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_fetches_in_flight
            .fetch_max(in_flight, Ordering::SeqCst);
        self.simulate_latency().await;
        self.fetches_in_flight.fetch_sub(1, Ordering::SeqCst);
        let rows = self.rows.read().unwrap_or_else(|e| e.into_inner());
        Ok(rows
            .keys()
            .filter(|key| &key.sample == sample && key.label == label)
            .cloned()
            .collect())
    }

    async fn resolve(&self, key: &RowKey) -> Result<RawRecord> {
        self.check_reachable()?;
        self.simulate_latency().await;
        self.lookup(key)
    }

    async fn resolve_batch(&self, keys: &[RowKey]) -> Result<Vec<RawRecord>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        self.check_reachable()?;
        self.simulate_latency().await;
        keys.iter().map(|key| self.lookup(key)).collect()
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}
