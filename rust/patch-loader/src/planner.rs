// rust/patch-loader/src/planner.rs

//! Sample-disjoint split planning.
//!
//! Whole samples are packed into `N` bags so that every split's per-class
//! row count stays under `ratio * class_totals`. The sink split has the
//! class totals as its ceiling and therefore accepts anything that fits
//! nowhere else. A sample is never divided between bags.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::catalog::{RowCatalog, StatsMatrix};
use crate::error::{LoaderError, Result};
use crate::ratios::Ratios;
use crate::types::SampleId;

/// The samples assigned to one split, as catalog indices in assignment order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bag {
    pub samples: Vec<usize>,
}

impl Bag {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// One bag per split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitPlan {
    pub bags: Vec<Bag>,
}

impl SplitPlan {
    pub fn num_splits(&self) -> usize {
        self.bags.len()
    }

    /// Sample ids of split `split`, resolved against `catalog`.
    pub fn sample_ids<'a>(&self, catalog: &'a RowCatalog, split: usize) -> Vec<&'a SampleId> {
        self.bags
            .get(split)
            .map(|bag| {
                bag.samples
                    .iter()
                    .filter_map(|&i| catalog.sample(i).map(|s| &s.sample))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Packs every sample of `stats` into one of `ratios.len()` bags.
///
/// Samples are visited in an order drawn from `rng`. For each sample the
/// search starts at a rotating cursor and moves to the next split (wrapping)
/// until one can take the sample without exceeding its ceiling in any class.
/// After an assignment the cursor moves one split forward.
///
/// # Errors
///
/// Returns a configuration error if `sink` is not a valid split index.
pub fn plan<R: Rng + ?Sized>(
    stats: &StatsMatrix,
    ratios: &Ratios,
    sink: usize,
    rng: &mut R,
) -> Result<SplitPlan> {
    let num_splits = ratios.len();
    if sink >= num_splits {
        return Err(LoaderError::config(format!(
            "sink split {sink} out of range for {num_splits} splits"
        )));
    }
    let num_classes = stats.num_classes();
    let totals = stats.totals();

    let ceilings: Vec<Vec<f64>> = ratios
        .as_slice()
        .iter()
        .map(|ratio| totals.iter().map(|&t| ratio * t as f64).collect())
        .collect();
    let mut filled = vec![vec![0u64; num_classes]; num_splits];
    let mut bags = vec![Bag::default(); num_splits];

    let mut order: Vec<usize> = (0..stats.num_samples()).collect();
    order.shuffle(rng);

    let fits = |filled: &[u64], ceiling: &[f64], counts: &[u64]| {
        filled
            .iter()
            .zip(counts)
            .zip(ceiling)
            .all(|((f, c), limit)| (f + c) as f64 <= *limit)
    };

    let mut cursor = 0usize;
    for sample in order {
        let counts = stats.row(sample);
        // Terminates: the sink always fits.
        while cursor != sink && !fits(&filled[cursor], &ceilings[cursor], counts) {
            cursor = (cursor + 1) % num_splits;
        }
        bags[cursor].samples.push(sample);
        for (f, c) in filled[cursor].iter_mut().zip(counts) {
            *f += c;
        }
        cursor = (cursor + 1) % num_splits;
    }

    info!(
        samples = stats.num_samples(),
        bag_sizes = ?bags.iter().map(Bag::len).collect::<Vec<_>>(),
        "planned sample-disjoint splits"
    );
    Ok(SplitPlan { bags })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::collections::HashSet;

    fn alternating(n: usize) -> StatsMatrix {
        let rows: Vec<Vec<u64>> = (0..n)
            .map(|i| if i % 2 == 0 { vec![100, 50] } else { vec![50, 100] })
            .collect();
        StatsMatrix::from_rows(2, &rows)
    }

    fn ratios(raw: &[f64]) -> Ratios {
        Ratios::new("split_ratios", raw).unwrap()
    }

    fn split_counts(stats: &StatsMatrix, bag: &Bag) -> Vec<u64> {
        let mut counts = vec![0; stats.num_classes()];
        for &s in &bag.samples {
            for (c, v) in counts.iter_mut().zip(stats.row(s)) {
                *c += v;
            }
        }
        counts
    }

    #[test]
    fn test_every_sample_in_exactly_one_bag() {
        let stats = StatsMatrix::from_rows(
            3,
            &(0..37u64)
                .map(|i| vec![i % 5, (i * 7) % 11, 3])
                .collect::<Vec<_>>(),
        );
        for seed in 0..20 {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let plan = plan(&stats, &ratios(&[6.0, 3.0, 1.0]), 0, &mut rng).unwrap();
            let mut seen = HashSet::new();
            for bag in &plan.bags {
                for &s in &bag.samples {
                    assert!(seen.insert(s), "sample {s} assigned twice");
                }
            }
            assert_eq!(seen.len(), 37);
        }
    }

    #[test]
    fn test_non_sink_splits_respect_ceilings() {
        let stats = alternating(10);
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let plan = plan(&stats, &ratios(&[7.0, 2.0, 1.0]), 0, &mut rng).unwrap();
        let totals = stats.totals();

        for (split, ratio) in [(1, 0.2), (2, 0.1)] {
            let counts = split_counts(&stats, &plan.bags[split]);
            for (c, t) in counts.iter().zip(&totals) {
                assert!(*c as f64 <= ratio * *t as f64 + 1e-9);
            }
        }
        // No sample (100 rows of one class) fits the 75-row test ceiling.
        assert!(plan.bags[2].is_empty());
        assert!(!plan.bags[1].is_empty());
    }

    #[test]
    fn test_sink_absorbs_oversized_samples() {
        // One huge sample that fits nowhere but the sink.
        let stats = StatsMatrix::from_rows(1, &[vec![1000], vec![1], vec![1]]);
        for sink in 0..3 {
            let mut rng = ChaCha8Rng::seed_from_u64(3);
            let plan = plan(&stats, &ratios(&[1.0, 1.0, 1.0]), sink, &mut rng).unwrap();
            assert!(plan.bags[sink].samples.contains(&0));
        }
    }

    #[test]
    fn test_plan_is_deterministic() {
        let stats = alternating(30);
        let run = |seed| {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            plan(&stats, &ratios(&[7.0, 2.0, 1.0]), 0, &mut rng).unwrap()
        };
        assert_eq!(run(42), run(42));
        assert_ne!(run(42), run(7));
    }

    #[test]
    fn test_rejects_out_of_range_sink() {
        let stats = alternating(2);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let err = plan(&stats, &ratios(&[1.0, 1.0]), 2, &mut rng).unwrap_err();
        assert!(matches!(err, LoaderError::Config { .. }));
    }

    #[test]
    fn test_empty_stats() {
        let stats = StatsMatrix::from_rows(2, &[]);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let plan = plan(&stats, &ratios(&[1.0, 1.0]), 0, &mut rng).unwrap();
        assert_eq!(plan.num_splits(), 2);
        assert!(plan.bags.iter().all(Bag::is_empty));
    }
}
