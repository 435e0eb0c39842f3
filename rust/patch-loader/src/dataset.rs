// rust/patch-loader/src/dataset.rs

//! The dataset facade.
//!
//! `PatchDataset` ties the pieces together: it builds (or restores) the row
//! catalog, plans and balances the splits, and serves batches through the
//! prefetch pipeline.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use patch_loader::{LoaderConfig, MemoryStore, PatchDataset, RawPixelDecoder, SplitOverrides};
//!
//! # async fn example() -> patch_loader::Result<()> {
//! let store = Arc::new(MemoryStore::new());
//! let config = LoaderConfig::from_file("loader.toml")?.with_env_overrides();
//! let mut dataset = PatchDataset::open(store, config, Arc::new(RawPixelDecoder)).await?;
//!
//! for _epoch in 0..10 {
//!     dataset.shuffle_splits(Some(0)).await?;
//!     for _ in 0..dataset.num_batches().await?[0] {
//!         let _batch = dataset.load_batch(0).await?;
//!         // Train on batch.features / batch.labels
//!     }
//! }
//!
//! // Re-plan with a new seed and more data
//! dataset.split_setup(SplitOverrides {
//!     max_patches: Some(100_000),
//!     seed: Some(7),
//!     ..Default::default()
//! })?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::info;

use crate::balancer::{self, SplitAssignment};
use crate::catalog::{self, RowCatalog};
use crate::config::{DatasetConfig, LoaderConfig};
use crate::error::{LoaderError, Result};
use crate::materialize::{Augmentation, Batch, Materializer, RecordDecoder};
use crate::planner;
use crate::prefetch::{PrefetchPipeline, SlotState};
use crate::snapshot::{self, SplitSnapshot};
use crate::store::RowStore;

/// Per-split augmentation policies; index `s` applies to split `s`.
pub type Augmentations = Vec<Option<Arc<dyn Augmentation>>>;

/// Parameters to change for one `split_setup` call. `None` keeps the
/// configured value.
#[derive(Clone, Default)]
pub struct SplitOverrides {
    pub max_patches: Option<u64>,
    pub split_ratios: Option<Vec<f64>>,
    pub balance_ratios: Option<Vec<f64>>,
    pub batch_size: Option<usize>,
    pub augmentations: Option<Augmentations>,
    pub seed: Option<u64>,
}

pub struct PatchDataset {
    config: LoaderConfig,
    store: Arc<dyn RowStore>,
    decoder: Arc<dyn RecordDecoder>,
    augmentations: Augmentations,
    catalog: Option<RowCatalog>,
    pipeline: Option<PrefetchPipeline>,
}

impl PatchDataset {
    /// Creates a dataset with no catalog and no splits.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `config` is invalid.
    pub fn new(
        store: Arc<dyn RowStore>,
        config: LoaderConfig,
        decoder: Arc<dyn RecordDecoder>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            store,
            decoder,
            augmentations: Vec::new(),
            catalog: None,
            pipeline: None,
        })
    }

    /// Creates a dataset ready to serve batches.
    ///
    /// A split snapshot at `snapshot.splits_path` is used as-is and the
    /// store is not queried for the catalog. Otherwise the catalog comes
    /// from `snapshot.rows_path` if that file exists, or from the store
    /// (saved to `rows_path` when set), and the splits are planned (saved to
    /// `splits_path` when set).
    pub async fn open(
        store: Arc<dyn RowStore>,
        config: LoaderConfig,
        decoder: Arc<dyn RecordDecoder>,
    ) -> Result<Self> {
        let rows_path = config.snapshot.rows_path.clone();
        let splits_path = config.snapshot.splits_path.clone();
        let mut dataset = Self::new(store, config, decoder)?;

        let rows_snapshot = rows_path.as_deref().filter(|p| p.exists());
        let splits_snapshot = splits_path.as_deref().filter(|p| p.exists());

        match rows_snapshot {
            Some(path) => dataset.load_rows(path)?,
            None if splits_snapshot.is_none() => {
                dataset.read_rows_from_store().await?;
                if let Some(path) = rows_path.as_deref() {
                    dataset.save_rows(path)?;
                }
            }
            None => {}
        }

        match splits_snapshot {
            Some(path) => dataset.load_splits(path, None, None)?,
            None => {
                dataset.split_setup(SplitOverrides::default())?;
                if let Some(path) = splits_path.as_deref() {
                    dataset.save_splits(path)?;
                }
            }
        }
        Ok(dataset)
    }

    /// Queries the store for the full catalog, replacing any loaded one.
    ///
    /// Existing splits keep serving until the next `split_setup`.
    pub async fn read_rows_from_store(&mut self) -> Result<()> {
        let seed = self.config.dataset.seed.unwrap_or_else(rand::random);
        let catalog = catalog::load_catalog(
            self.store.as_ref(),
            self.config.dataset.num_classes,
            self.config.catalog.concurrency,
            seed,
        )
        .await?;
        self.catalog = Some(catalog);
        Ok(())
    }

    /// Restores the catalog from a snapshot instead of querying the store.
    pub fn load_rows(&mut self, path: &Path) -> Result<()> {
        let catalog = snapshot::read_catalog(path, self.config.dataset.num_classes)?;
        info!(
            path = %path.display(),
            samples = catalog.num_samples(),
            rows = catalog.total_rows(),
            "restored row catalog"
        );
        self.catalog = Some(catalog);
        Ok(())
    }

    pub fn save_rows(&self, path: &Path) -> Result<()> {
        let catalog = self
            .catalog
            .as_ref()
            .ok_or_else(|| LoaderError::config("no row catalog loaded"))?;
        snapshot::write_catalog(&self.config.snapshot, path, catalog)
    }

    /// Re-plans the splits from a fresh copy of the catalog and restarts
    /// prefetching.
    ///
    /// Overrides are validated together with the rest of the dataset
    /// configuration before anything changes; on error the dataset is left
    /// as it was. With the same catalog, parameters and seed the resulting
    /// row keys are identical. Must be called within a tokio runtime.
    pub fn split_setup(&mut self, overrides: SplitOverrides) -> Result<()> {
        let catalog = self.catalog.as_ref().ok_or_else(|| {
            LoaderError::config("no row catalog loaded; read rows from the store or a snapshot first")
        })?;

        let mut dataset = self.config.dataset.clone();
        if let Some(max_patches) = overrides.max_patches {
            dataset.max_patches = Some(max_patches);
        }
        if let Some(split_ratios) = overrides.split_ratios {
            dataset.split_ratios = split_ratios;
        }
        if let Some(balance_ratios) = overrides.balance_ratios {
            dataset.balance_ratios = Some(balance_ratios);
        }
        if let Some(batch_size) = overrides.batch_size {
            dataset.batch_size = batch_size;
        }
        dataset.validate()?;
        let split_ratios = dataset.split_ratios()?;
        let balance = dataset.balance_ratios()?;

        let seed = overrides
            .seed
            .or(dataset.seed)
            .unwrap_or_else(rand::random);
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        let plan = planner::plan(&catalog.stats(), &split_ratios, dataset.sink_split, &mut rng)?;
        let assignment = balancer::select(
            &plan,
            catalog.working_copy(),
            &split_ratios,
            &balance,
            dataset.max_patches,
            &mut rng,
        )?;

        let augmentations = overrides
            .augmentations
            .unwrap_or_else(|| self.augmentations.clone());
        let pipeline_seed: u64 = rng.gen();
        self.install(assignment, &dataset, augmentations, pipeline_seed)?;
        self.config.dataset = dataset;
        info!(seed, split_sizes = ?self.split_sizes()?, "split setup complete");
        Ok(())
    }

    /// Restores a split assignment from a snapshot, skipping the catalog,
    /// the planner and the balancer.
    ///
    /// The snapshot's split ratios replace the configured ones.
    pub fn load_splits(
        &mut self,
        path: &Path,
        batch_size: Option<usize>,
        augmentations: Option<Augmentations>,
    ) -> Result<()> {
        let SplitSnapshot {
            split_ratios,
            assignment,
            ..
        } = snapshot::read_splits(path, self.config.dataset.num_classes)?;

        let mut dataset = self.config.dataset.clone();
        dataset.split_ratios = split_ratios;
        if let Some(batch_size) = batch_size {
            dataset.batch_size = batch_size;
        }
        dataset.validate()?;

        let augmentations = augmentations.unwrap_or_else(|| self.augmentations.clone());
        let seed = dataset.seed.unwrap_or_else(rand::random);
        self.install(assignment, &dataset, augmentations, seed)?;
        self.config.dataset = dataset;
        info!(path = %path.display(), split_sizes = ?self.split_sizes()?, "restored splits");
        Ok(())
    }

    pub fn save_splits(&self, path: &Path) -> Result<()> {
        let pipeline = self.pipeline()?;
        let snapshot = SplitSnapshot {
            num_classes: self.config.dataset.num_classes,
            split_ratios: self.config.dataset.split_ratios()?.as_slice().to_vec(),
            assignment: pipeline.assignment().as_ref().clone(),
        };
        snapshot::write_splits(&self.config.snapshot, path, &snapshot)
    }

    /// Returns the next batch of `split`. See [`PrefetchPipeline::load_batch`].
    pub async fn load_batch(&self, split: usize) -> Result<Batch> {
        self.pipeline()?.load_batch(split).await
    }

    /// Rewinds one split, optionally reshuffling its row order.
    pub async fn rewind(&self, split: usize, shuffle: bool) -> Result<()> {
        self.pipeline()?.rewind(split, shuffle).await
    }

    /// Reshuffles and rewinds `split`, or every split when `None`.
    pub async fn shuffle_splits(&self, split: Option<usize>) -> Result<()> {
        let pipeline = self.pipeline()?;
        match split {
            Some(split) => pipeline.rewind(split, true).await,
            None => {
                for split in 0..pipeline.num_splits() {
                    pipeline.rewind(split, true).await?;
                }
                Ok(())
            }
        }
    }

    /// Changes the batch size, rewinding every split.
    pub async fn set_batch_size(&mut self, batch_size: usize) -> Result<()> {
        let mut dataset = self.config.dataset.clone();
        dataset.batch_size = batch_size;
        dataset.validate()?;
        if let Some(pipeline) = &self.pipeline {
            pipeline.set_batch_size(batch_size).await?;
        }
        self.config.dataset = dataset;
        Ok(())
    }

    /// Replaces the per-split augmentations for batches loaded from now on.
    pub fn set_augmentations(&mut self, augmentations: Augmentations) {
        let materializer = Arc::new(self.materializer(augmentations.clone()));
        if let Some(pipeline) = &mut self.pipeline {
            pipeline.set_materializer(materializer);
        }
        self.augmentations = augmentations;
    }

    pub async fn num_batches(&self) -> Result<Vec<usize>> {
        Ok(self.pipeline()?.num_batches().await)
    }

    pub fn split_sizes(&self) -> Result<Vec<usize>> {
        Ok(self.pipeline()?.assignment().split_sizes())
    }

    /// Per-split, per-class row counts of the current assignment.
    pub fn class_counts(&self) -> Result<Vec<Vec<usize>>> {
        Ok(self
            .pipeline()?
            .assignment()
            .class_counts(self.config.dataset.num_classes))
    }

    pub async fn slot_state(&self, split: usize) -> Result<SlotState> {
        self.pipeline()?.slot_state(split).await
    }

    pub async fn issued_requests(&self, split: usize) -> Result<u64> {
        self.pipeline()?.issued_requests(split).await
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn catalog(&self) -> Option<&RowCatalog> {
        self.catalog.as_ref()
    }

    pub fn assignment(&self) -> Option<&SplitAssignment> {
        self.pipeline.as_ref().map(|p| p.assignment().as_ref())
    }

    pub fn num_splits(&self) -> usize {
        self.config.dataset.num_splits()
    }

    fn pipeline(&self) -> Result<&PrefetchPipeline> {
        self.pipeline.as_ref().ok_or_else(|| {
            LoaderError::config("splits are not set up; call split_setup or load_splits first")
        })
    }

    fn materializer(&self, augmentations: Augmentations) -> Materializer {
        Materializer::new(self.config.dataset.num_classes, Arc::clone(&self.decoder))
            .with_augmentations(augmentations)
    }

    fn install(
        &mut self,
        assignment: SplitAssignment,
        dataset: &DatasetConfig,
        augmentations: Augmentations,
        seed: u64,
    ) -> Result<()> {
        let materializer = Arc::new(self.materializer(augmentations.clone()));
        let pipeline = PrefetchPipeline::start(
            Arc::clone(&self.store),
            Arc::new(assignment),
            dataset.batch_size,
            materializer,
            seed,
        )?;
        self.pipeline = Some(pipeline);
        self.augmentations = augmentations;
        Ok(())
    }
}
