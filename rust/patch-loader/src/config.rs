// rust/patch-loader/src/config.rs

//! Configuration management for the patch loader.
//!
//! This module provides configuration parsing from TOML files, environment
//! variable overrides, and eager validation of configuration values. Every
//! configuration error is reported here, never at batch time.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{LoaderError, Result};
use crate::ratios::Ratios;
use crate::types::ClassLabel;

/// Default number of concurrent row-key fetches during catalog load.
pub const DEFAULT_CATALOG_CONCURRENCY: usize = 8;

// Top-level loader configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub dataset: DatasetConfig,
    pub catalog: CatalogConfig,
    pub snapshot: SnapshotConfig,
}

/// Partitioning and batching parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// Rows per batch.
    pub batch_size: usize,
    /// Number of classes; fixed per dataset.
    pub num_classes: usize,
    /// Upper bound on the rows selected across all splits. `None` selects
    /// every available row.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_patches: Option<u64>,
    /// Relative split sizes (training first). Normalized internally.
    pub split_ratios: Vec<f64>,
    /// Relative class frequencies within a split. `None` means uniform.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance_ratios: Option<Vec<f64>>,
    /// Seed for sample ordering, shuffling and split assignment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Split that absorbs samples that fit nowhere else.
    pub sink_split: usize,
}

/// Catalog construction options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Maximum number of outstanding row-key fetches.
    pub concurrency: usize,
}

/// Snapshot persistence options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    // Compression algorithm: "none", "lz4", or "zstd".
    pub compression: String,
    // Compression level (algorithm-specific).
    pub compression_level: i32,
    // Whether to use atomic writes (write to temp then rename).
    pub atomic_writes: bool,
    /// Catalog snapshot; loaded instead of querying the store when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_path: Option<PathBuf>,
    /// Split snapshot; loaded instead of planning when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub splits_path: Option<PathBuf>,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            batch_size: 8,
            num_classes: 2,
            max_patches: None,
            split_ratios: vec![7.0, 1.0, 2.0],
            balance_ratios: None,
            seed: None,
            sink_split: 0,
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CATALOG_CONCURRENCY,
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            compression: "lz4".to_string(),
            compression_level: 1,
            atomic_writes: true,
            rows_path: None,
            splits_path: None,
        }
    }
}

impl DatasetConfig {
    /// Normalized split ratios.
    pub fn split_ratios(&self) -> Result<Ratios> {
        Ratios::new("dataset.split_ratios", &self.split_ratios)
    }

    /// Normalized balance ratios, uniform when unset.
    pub fn balance_ratios(&self) -> Result<Ratios> {
        match &self.balance_ratios {
            Some(raw) => Ratios::new("dataset.balance_ratios", raw),
            None => Ok(Ratios::uniform(self.num_classes)),
        }
    }

    /// Number of splits.
    pub fn num_splits(&self) -> usize {
        self.split_ratios.len()
    }

    /// Validate dataset parameters.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(LoaderError::config(
                "dataset.batch_size must be greater than 0",
            ));
        }
        if self.num_classes == 0 {
            return Err(LoaderError::config(
                "dataset.num_classes must be greater than 0",
            ));
        }
        if self.num_classes > ClassLabel::MAX_CLASSES {
            return Err(LoaderError::config(format!(
                "dataset.num_classes must be at most {}",
                ClassLabel::MAX_CLASSES
            )));
        }
        if self.max_patches == Some(0) {
            return Err(LoaderError::config(
                "dataset.max_patches must be greater than 0 (omit it for unbounded)",
            ));
        }
        self.split_ratios()?;
        let balance = self.balance_ratios()?;
        if balance.len() != self.num_classes {
            return Err(LoaderError::config(format!(
                "dataset.balance_ratios has {} entries but num_classes is {}",
                balance.len(),
                self.num_classes
            )));
        }
        if self.sink_split >= self.num_splits() {
            return Err(LoaderError::config(format!(
                "dataset.sink_split {} out of range for {} splits",
                self.sink_split,
                self.num_splits()
            )));
        }
        Ok(())
    }
}

impl FromStr for LoaderConfig {
    type Err = LoaderError;

    /// Parse configuration from a TOML string.
    fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s)
            .map_err(|e| LoaderError::config_with_source("failed to parse TOML config", e))
    }
}

impl LoaderConfig {
    // Load configuration from a TOML file.
    //
    // # Errors
    //
    // Returns an error if the file cannot be read, parsed, or is invalid.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            LoaderError::config_with_source(
                format!("failed to read config file '{}'", path.display()),
                e,
            )
        })?;
        let config: Self = content.parse()?;
        config.validate()?;
        Ok(config)
    }

    // Apply environment variable overrides.
    //
    // Environment variables are prefixed with `PLD_` and use underscores
    // to separate nested fields. For example:
    // - `PLD_DATASET_BATCH_SIZE` overrides `dataset.batch_size`
    // - `PLD_DATASET_SEED` overrides `dataset.seed`
    // - `PLD_SNAPSHOT_ROWS_PATH` overrides `snapshot.rows_path`
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        // Dataset overrides
        if let Ok(val) = std::env::var("PLD_DATASET_BATCH_SIZE") {
            if let Ok(v) = val.parse() {
                self.dataset.batch_size = v;
            }
        }
        if let Ok(val) = std::env::var("PLD_DATASET_NUM_CLASSES") {
            if let Ok(v) = val.parse() {
                self.dataset.num_classes = v;
            }
        }
        if let Ok(val) = std::env::var("PLD_DATASET_MAX_PATCHES") {
            if val.eq_ignore_ascii_case("unbounded") {
                self.dataset.max_patches = None;
            } else if let Ok(v) = val.parse() {
                self.dataset.max_patches = Some(v);
            }
        }
        if let Ok(val) = std::env::var("PLD_DATASET_SPLIT_RATIOS") {
            if let Some(v) = parse_ratio_list(&val) {
                self.dataset.split_ratios = v;
            }
        }
        if let Ok(val) = std::env::var("PLD_DATASET_BALANCE_RATIOS") {
            if let Some(v) = parse_ratio_list(&val) {
                self.dataset.balance_ratios = Some(v);
            }
        }
        if let Ok(val) = std::env::var("PLD_DATASET_SEED") {
            if let Ok(v) = val.parse() {
                self.dataset.seed = Some(v);
            }
        }
        if let Ok(val) = std::env::var("PLD_DATASET_SINK_SPLIT") {
            if let Ok(v) = val.parse() {
                self.dataset.sink_split = v;
            }
        }

        // Catalog overrides
        if let Ok(val) = std::env::var("PLD_CATALOG_CONCURRENCY") {
            if let Ok(v) = val.parse() {
                self.catalog.concurrency = v;
            }
        }

        // Snapshot overrides
        if let Ok(val) = std::env::var("PLD_SNAPSHOT_COMPRESSION") {
            self.snapshot.compression = val;
        }
        if let Ok(val) = std::env::var("PLD_SNAPSHOT_COMPRESSION_LEVEL") {
            if let Ok(v) = val.parse() {
                self.snapshot.compression_level = v;
            }
        }
        if let Ok(val) = std::env::var("PLD_SNAPSHOT_ATOMIC_WRITES") {
            if let Ok(v) = val.parse() {
                self.snapshot.atomic_writes = v;
            }
        }
        if let Ok(val) = std::env::var("PLD_SNAPSHOT_ROWS_PATH") {
            self.snapshot.rows_path = Some(PathBuf::from(val));
        }
        if let Ok(val) = std::env::var("PLD_SNAPSHOT_SPLITS_PATH") {
            self.snapshot.splits_path = Some(PathBuf::from(val));
        }

        self
    }

    // Validate all configuration values.
    //
    // # Errors
    //
    // Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<()> {
        self.dataset.validate()?;

        if self.catalog.concurrency == 0 {
            return Err(LoaderError::config(
                "catalog.concurrency must be greater than 0",
            ));
        }

        let valid_compression = ["none", "lz4", "zstd"];
        if !valid_compression.contains(&self.snapshot.compression.as_str()) {
            return Err(LoaderError::config(format!(
                "snapshot.compression must be one of: {}",
                valid_compression.join(", ")
            )));
        }

        Ok(())
    }
}

/// Parses "7,2,1" style lists. Returns `None` if any entry is malformed.
fn parse_ratio_list(val: &str) -> Option<Vec<f64>> {
    val.split(',')
        .map(|part| part.trim().parse::<f64>().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = LoaderConfig::default();

        assert_eq!(config.dataset.batch_size, 8);
        assert_eq!(config.dataset.num_classes, 2);
        assert!(config.dataset.max_patches.is_none());
        assert_eq!(config.dataset.split_ratios, vec![7.0, 1.0, 2.0]);
        assert!(config.dataset.balance_ratios.is_none());
        assert!(config.dataset.seed.is_none());
        assert_eq!(config.dataset.sink_split, 0);

        assert_eq!(config.catalog.concurrency, DEFAULT_CATALOG_CONCURRENCY);

        assert_eq!(config.snapshot.compression, "lz4");
        assert!(config.snapshot.atomic_writes);
        assert!(config.snapshot.rows_path.is_none());
        assert!(config.snapshot.splits_path.is_none());
    }

    #[test]
    fn test_default_validates() {
        assert!(LoaderConfig::default().validate().is_ok());
    }

    #[test]
    fn test_from_str_empty() {
        let config: LoaderConfig = "".parse().unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_str_full() {
        let toml = r#"
            [dataset]
            batch_size = 32
            num_classes = 3
            max_patches = 1200
            split_ratios = [8, 1, 1]
            balance_ratios = [2, 1, 1]
            seed = 42
            sink_split = 0

            [catalog]
            concurrency = 16

            [snapshot]
            compression = "zstd"
            compression_level = 3
            atomic_writes = false
            rows_path = "/snapshots/rows.snap"
            splits_path = "/snapshots/splits.snap"
        "#;

        let config: LoaderConfig = toml.parse().unwrap();
        config.validate().unwrap();

        assert_eq!(config.dataset.batch_size, 32);
        assert_eq!(config.dataset.num_classes, 3);
        assert_eq!(config.dataset.max_patches, Some(1200));
        assert_eq!(config.dataset.split_ratios, vec![8.0, 1.0, 1.0]);
        assert_eq!(config.dataset.balance_ratios, Some(vec![2.0, 1.0, 1.0]));
        assert_eq!(config.dataset.seed, Some(42));
        assert_eq!(config.catalog.concurrency, 16);
        assert_eq!(config.snapshot.compression, "zstd");
        assert!(!config.snapshot.atomic_writes);
        assert_eq!(
            config.snapshot.rows_path,
            Some(PathBuf::from("/snapshots/rows.snap"))
        );
    }

    #[test]
    fn test_from_str_invalid_toml() {
        let result: std::result::Result<LoaderConfig, _> = "invalid = [".parse();
        assert!(result.is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [dataset]
            batch_size = 16
            "#
        )
        .unwrap();

        let config = LoaderConfig::from_file(file.path()).unwrap();
        assert_eq!(config.dataset.batch_size, 16);
    }

    #[test]
    fn test_from_file_rejects_invalid_values() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [dataset]
            batch_size = 0
            "#
        )
        .unwrap();

        assert!(LoaderConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn test_from_file_not_found() {
        assert!(LoaderConfig::from_file("/nonexistent/loader.toml").is_err());
    }

    #[test]
    fn test_validate_zero_batch_size() {
        let mut config = LoaderConfig::default();
        config.dataset.batch_size = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn test_validate_balance_length_mismatch() {
        let mut config = LoaderConfig::default();
        config.dataset.balance_ratios = Some(vec![1.0, 1.0, 1.0]);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("num_classes"));
    }

    #[test]
    fn test_validate_non_positive_ratios() {
        let mut config = LoaderConfig::default();
        config.dataset.split_ratios = vec![1.0, 0.0];
        assert!(config.validate().is_err());

        let mut config = LoaderConfig::default();
        config.dataset.balance_ratios = Some(vec![1.0, -1.0]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_class_count_bounds() {
        let mut config = LoaderConfig::default();
        config.dataset.num_classes = 0;
        assert!(config.validate().is_err());

        config.dataset.num_classes = 32;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_max_patches() {
        let mut config = LoaderConfig::default();
        config.dataset.max_patches = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_sink_split_out_of_range() {
        let mut config = LoaderConfig::default();
        config.dataset.sink_split = 3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_invalid_compression() {
        let mut config = LoaderConfig::default();
        config.snapshot.compression = "gzip".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_concurrency() {
        let mut config = LoaderConfig::default();
        config.catalog.concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_ratio_list() {
        assert_eq!(parse_ratio_list("7, 2,1"), Some(vec![7.0, 2.0, 1.0]));
        assert_eq!(parse_ratio_list("7,x"), None);
    }

    // Helper to clear all PLD_ environment variables for test isolation
    fn clear_pld_env_vars() {
        for (key, _) in std::env::vars() {
            if key.starts_with("PLD_") {
                std::env::remove_var(&key);
            }
        }
    }

    // Environment variable tests are combined into a single test to avoid
    // race conditions when tests run in parallel, since env vars are global state.
    #[test]
    fn test_env_overrides() {
        clear_pld_env_vars();

        std::env::set_var("PLD_DATASET_BATCH_SIZE", "64");
        std::env::set_var("PLD_DATASET_SEED", "12345");
        std::env::set_var("PLD_DATASET_SPLIT_RATIOS", "8,1,1");
        std::env::set_var("PLD_DATASET_MAX_PATCHES", "5000");
        std::env::set_var("PLD_SNAPSHOT_COMPRESSION", "zstd");
        std::env::set_var("PLD_SNAPSHOT_ROWS_PATH", "/env/rows.snap");

        let config = LoaderConfig::default().with_env_overrides();

        assert_eq!(config.dataset.batch_size, 64);
        assert_eq!(config.dataset.seed, Some(12345));
        assert_eq!(config.dataset.split_ratios, vec![8.0, 1.0, 1.0]);
        assert_eq!(config.dataset.max_patches, Some(5000));
        assert_eq!(config.snapshot.compression, "zstd");
        assert_eq!(
            config.snapshot.rows_path,
            Some(PathBuf::from("/env/rows.snap"))
        );

        clear_pld_env_vars();

        // Invalid values should be ignored (keep defaults)
        std::env::set_var("PLD_DATASET_BATCH_SIZE", "not_a_number");
        std::env::set_var("PLD_DATASET_SPLIT_RATIOS", "1,two");

        let config = LoaderConfig::default().with_env_overrides();
        assert_eq!(config.dataset.batch_size, 8);
        assert_eq!(config.dataset.split_ratios, vec![7.0, 1.0, 2.0]);

        clear_pld_env_vars();
    }

    #[test]
    fn test_serialize_roundtrip() {
        let mut original = LoaderConfig::default();
        original.dataset.seed = Some(7);
        let toml_str = toml::to_string(&original).unwrap();
        let parsed: LoaderConfig = toml_str.parse().unwrap();

        assert_eq!(original.dataset.batch_size, parsed.dataset.batch_size);
        assert_eq!(original.dataset.split_ratios, parsed.dataset.split_ratios);
        assert_eq!(parsed.dataset.seed, Some(7));
        assert_eq!(original.snapshot.compression, parsed.snapshot.compression);
    }
}
