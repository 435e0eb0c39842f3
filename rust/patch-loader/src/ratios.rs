// rust/patch-loader/src/ratios.rs

//! Normalized ratio vectors and cumulative quota rounding.

use serde::{Deserialize, Serialize};

use crate::error::{LoaderError, Result};

/// A validated ratio vector, normalized to sum to 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ratios(Vec<f64>);

impl Ratios {
    /// Validates and normalizes `raw`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `raw` is empty or holds a value that
    /// is not a finite positive number.
    pub fn new(name: &str, raw: &[f64]) -> Result<Self> {
        if raw.is_empty() {
            return Err(LoaderError::config(format!("{name} must not be empty")));
        }
        if let Some(bad) = raw.iter().find(|r| !r.is_finite() || **r <= 0.0) {
            return Err(LoaderError::config(format!(
                "{name} must be finite and positive, got {bad}"
            )));
        }
        let sum: f64 = raw.iter().sum();
        Ok(Self(raw.iter().map(|r| r / sum).collect()))
    }

    /// Uniform ratios over `n` entries.
    pub fn uniform(n: usize) -> Self {
        Self(vec![1.0 / n as f64; n])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    /// Splits `total` into per-entry quotas.
    ///
    /// Cumulative targets `round(total * cumsum(ratios))` are computed first
    /// and quotas are their consecutive differences, so the quotas always
    /// add up to `total` and no entry drifts by more than one. Halves round
    /// to even. When two boundaries round to the same value the entry on
    /// the right gets the zero quota.
    pub fn cumulative_quotas(&self, total: u64) -> Vec<u64> {
        let mut quotas = Vec::with_capacity(self.0.len());
        let mut acc = 0.0;
        let mut previous = 0u64;
        for (i, ratio) in self.0.iter().enumerate() {
            acc += ratio;
            let border = if i + 1 == self.0.len() {
                total
            } else {
                ((total as f64) * acc).round_ties_even().min(total as f64) as u64
            };
            let border = border.max(previous);
            quotas.push(border - previous);
            previous = border;
        }
        quotas
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization() {
        let ratios = Ratios::new("split_ratios", &[7.0, 2.0, 1.0]).unwrap();
        let values = ratios.as_slice();
        assert!((values[0] - 0.7).abs() < 1e-12);
        assert!((values[1] - 0.2).abs() < 1e-12);
        assert!((values[2] - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_invalid() {
        assert!(Ratios::new("r", &[]).is_err());
        assert!(Ratios::new("r", &[1.0, 0.0]).is_err());
        assert!(Ratios::new("r", &[1.0, -2.0]).is_err());
        assert!(Ratios::new("r", &[f64::NAN]).is_err());
        assert!(Ratios::new("r", &[f64::INFINITY, 1.0]).is_err());
    }

    #[test]
    fn test_cumulative_quotas_sum_to_total() {
        let ratios = Ratios::new("r", &[7.0, 2.0, 1.0]).unwrap();
        assert_eq!(ratios.cumulative_quotas(300), vec![210, 60, 30]);

        let ratios = Ratios::new("r", &[1.0, 1.0, 1.0]).unwrap();
        let quotas = ratios.cumulative_quotas(10);
        assert_eq!(quotas.iter().sum::<u64>(), 10);
        for q in quotas {
            assert!((3..=4).contains(&q));
        }
    }

    #[test]
    fn test_cumulative_quotas_ties_round_to_even() {
        // 5 * 0.5 = 2.5 rounds to 2, leaving 3 for the second class.
        let ratios = Ratios::uniform(2);
        assert_eq!(ratios.cumulative_quotas(5), vec![2, 3]);
        // 7 * 0.5 = 3.5 rounds to 4.
        assert_eq!(ratios.cumulative_quotas(7), vec![4, 3]);
    }

    #[test]
    fn test_cumulative_quotas_zero_total() {
        let ratios = Ratios::uniform(3);
        assert_eq!(ratios.cumulative_quotas(0), vec![0, 0, 0]);
    }
}
