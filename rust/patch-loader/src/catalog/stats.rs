// rust/patch-loader/src/catalog/stats.rs

use super::RowCatalog;

/// Sample x class row counts derived from a [`RowCatalog`].
///
/// Rows follow catalog sample order. The matrix is only used for planning
/// and is rebuilt whenever the catalog changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsMatrix {
    num_classes: usize,
    counts: Vec<u64>,
}

impl StatsMatrix {
    pub fn from_catalog(catalog: &RowCatalog) -> Self {
        let num_classes = catalog.num_classes();
        let mut counts = Vec::with_capacity(catalog.num_samples() * num_classes);
        for sample in catalog.samples() {
            counts.extend(sample.rows.iter().map(|r| r.len() as u64));
        }
        Self {
            num_classes,
            counts,
        }
    }

    /// Builds a matrix directly from per-sample count rows.
    ///
    /// # Panics
    ///
    /// Panics if a row does not have `num_classes` entries.
    pub fn from_rows(num_classes: usize, rows: &[Vec<u64>]) -> Self {
        let mut counts = Vec::with_capacity(rows.len() * num_classes);
        for row in rows {
            assert_eq!(row.len(), num_classes, "stats row has wrong class count");
            counts.extend_from_slice(row);
        }
        Self {
            num_classes,
            counts,
        }
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn num_samples(&self) -> usize {
        if self.num_classes == 0 {
            0
        } else {
            self.counts.len() / self.num_classes
        }
    }

    /// Per-class counts of one sample.
    pub fn row(&self, sample: usize) -> &[u64] {
        let start = sample * self.num_classes;
        &self.counts[start..start + self.num_classes]
    }

    /// Per-class totals over all samples.
    pub fn totals(&self) -> Vec<u64> {
        let mut totals = vec![0u64; self.num_classes];
        for sample in 0..self.num_samples() {
            for (total, count) in totals.iter_mut().zip(self.row(sample)) {
                *total += count;
            }
        }
        totals
    }
}
