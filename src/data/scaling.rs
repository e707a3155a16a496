//! Feature standardization
//!
//! Per-feature mean and variance are learned once from the training split and
//! then frozen; later batches are scaled with the same statistics. Raw values
//! stay `f64` until standardized, which is the only narrowing to `f32`.

use serde::{Deserialize, Serialize};

use super::matrix::FeatureMatrix;
use crate::error::{DetectorError, Result};

/// Running statistics for a single feature
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureStats {
    /// Sample count
    pub count: u64,
    /// Running mean
    pub mean: f64,
    /// Running M2 for variance (Welford's algorithm)
    pub m2: f64,
}

impl FeatureStats {
    /// Update statistics with a new value using Welford's online algorithm
    #[inline]
    pub fn update(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = value - self.mean;
        self.m2 += delta * delta2;
    }

    /// Population variance
    pub fn variance(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.m2 / self.count as f64
        }
    }

    /// Divisor used when scaling; constant features keep a unit scale
    pub fn scale(&self) -> f64 {
        let std = self.variance().sqrt();
        if std > f64::EPSILON {
            std
        } else {
            1.0
        }
    }

    /// Standardize a value using z-score, saturating at the `f32` range
    #[inline]
    pub fn standardize(&self, value: f64) -> f32 {
        let z = (value - self.mean) / self.scale();
        if z.is_nan() {
            0.0
        } else {
            z.clamp(-f32::MAX as f64, f32::MAX as f64) as f32
        }
    }
}

/// Frozen per-feature scaling statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScalingStatistics {
    stats: Vec<FeatureStats>,
}

impl ScalingStatistics {
    /// Learn statistics from unscaled rows
    pub fn fit(rows: &[Vec<f64>]) -> Result<Self> {
        let Some(first) = rows.first() else {
            return Err(DetectorError::EmptyDataset(
                "cannot fit scaling statistics on zero rows".to_string(),
            ));
        };

        let mut stats = vec![FeatureStats::default(); first.len()];
        for row in rows {
            check_width(stats.len(), row.len())?;
            for (s, &value) in stats.iter_mut().zip(row) {
                s.update(value);
            }
        }

        Ok(Self { stats })
    }

    pub fn n_features(&self) -> usize {
        self.stats.len()
    }

    pub fn feature(&self, index: usize) -> Option<&FeatureStats> {
        self.stats.get(index)
    }

    /// Scale unscaled rows into a feature matrix
    pub fn apply(&self, rows: &[Vec<f64>]) -> Result<FeatureMatrix> {
        let mut matrix = FeatureMatrix::new(self.stats.len());
        for row in rows {
            check_width(self.stats.len(), row.len())?;
            matrix.push_row(
                row.iter()
                    .zip(&self.stats)
                    .map(|(&value, s)| s.standardize(value))
                    .collect(),
            )?;
        }
        Ok(matrix)
    }
}

fn check_width(expected: usize, got: usize) -> Result<()> {
    if expected != got {
        return Err(DetectorError::InvalidDimension { expected, got });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_stats_population_variance() {
        let mut stats = FeatureStats::default();
        for v in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            stats.update(v);
        }
        assert!((stats.mean - 5.0).abs() < 1e-9);
        assert!((stats.variance() - 4.0).abs() < 1e-9);
        assert!((stats.standardize(7.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_constant_feature_scales_to_zero() {
        let scaling = ScalingStatistics::fit(&[vec![3.0], vec![3.0], vec![3.0]]).unwrap();

        let scaled = scaling.apply(&[vec![3.0], vec![5.0]]).unwrap();
        assert_eq!(scaled.rows(), &[vec![0.0], vec![2.0]]);
    }

    #[test]
    fn test_values_beyond_f32_range_saturate() {
        let scaling = ScalingStatistics::fit(&[vec![1.0], vec![2.0], vec![3.0]]).unwrap();

        let scaled = scaling
            .apply(&[vec![1e39], vec![1e300], vec![-1e300], vec![3e38]])
            .unwrap();
        assert_eq!(scaled.rows()[0][0], f32::MAX);
        assert_eq!(scaled.rows()[1][0], f32::MAX);
        assert_eq!(scaled.rows()[2][0], -f32::MAX);
        assert!(scaled.rows()[3][0] > 1e38);
        assert!(scaled.is_finite());
    }

    #[test]
    fn test_fit_on_empty_fails() {
        let err = ScalingStatistics::fit(&[]).unwrap_err();
        assert!(matches!(err, DetectorError::EmptyDataset(_)));
    }

    #[test]
    fn test_apply_checks_width() {
        let scaling = ScalingStatistics::fit(&[vec![1.0, 2.0]]).unwrap();
        let err = scaling.apply(&[vec![1.0]]).unwrap_err();
        assert!(matches!(err, DetectorError::InvalidDimension { expected: 2, got: 1 }));
    }
}
