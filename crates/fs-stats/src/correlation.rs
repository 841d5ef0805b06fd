//! Pearson correlation on top of the covariance accumulator.

use fs_columnar::Column;
use fs_types::DType;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::covariance::CovarianceState;
use crate::{StatsError, VarianceOptions};

/// Covariance state plus `Σ(x - mean_x)²` and `Σ(y - mean_y)²`, tracked
/// against the same means as the embedded covariance.
///
/// The coefficient is undefined when either column is constant: the
/// denominator is zero and `finalize` yields NaN or an infinity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationState {
    covariance: CovarianceState,
    sum_sq_dev_x: f64,
    sum_sq_dev_y: f64,
}

/// Single-variable form of the parallel update.
fn merge_sq_dev(count1: usize, mean1: f64, m1: f64, count2: usize, mean2: f64, m2: f64) -> f64 {
    if count2 == 0 {
        return m1;
    }
    if count1 == 0 {
        return m2;
    }
    let n1 = count1 as f64;
    let n2 = count2 as f64;
    let mean = (mean1 * n1 + mean2 * n2) / (n1 + n2);
    m1 + m2 + n1 * (mean1 - mean) * (mean1 - mean) + n2 * (mean2 - mean) * (mean2 - mean)
}

impl CorrelationState {
    pub fn new(dtype: DType, options: VarianceOptions) -> Result<Self, StatsError> {
        Ok(Self {
            covariance: CovarianceState::new(dtype, options)?,
            sum_sq_dev_x: 0.0,
            sum_sq_dev_y: 0.0,
        })
    }

    #[must_use]
    pub fn covariance(&self) -> &CovarianceState {
        &self.covariance
    }

    #[must_use]
    pub fn sum_sq_dev_x(&self) -> f64 {
        self.sum_sq_dev_x
    }

    #[must_use]
    pub fn sum_sq_dev_y(&self) -> f64 {
        self.sum_sq_dev_y
    }

    pub fn consume(&mut self, x: &Column, y: &Column) -> Result<(), StatsError> {
        let kernel = self.covariance.kernel();
        let paired = kernel.validate(x, y)?;
        let xy = kernel.co_moments(x, y, &paired.joint)?;
        let xx = kernel.co_moments(x, x, &paired.joint)?;
        let yy = kernel.co_moments(y, y, &paired.joint)?;

        let mut covariance = self.covariance.empty_like();
        covariance.absorb(xy, paired.all_valid);
        let chunk = Self {
            covariance,
            sum_sq_dev_x: xx.co_moment,
            sum_sq_dev_y: yy.co_moment,
        };
        self.merge(&chunk)?;
        trace!(rows = x.len(), pairs = xy.count, "correlation chunk consumed");
        Ok(())
    }

    /// Merge the embedded covariance first, then both deviation sums against
    /// the pre-merge means.
    pub fn merge(&mut self, other: &Self) -> Result<(), StatsError> {
        let mine = self.covariance.moments();
        let theirs = other.covariance.moments();
        self.covariance.merge(&other.covariance)?;
        self.sum_sq_dev_x = merge_sq_dev(
            mine.count,
            mine.mean_x,
            self.sum_sq_dev_x,
            theirs.count,
            theirs.mean_x,
            other.sum_sq_dev_x,
        );
        self.sum_sq_dev_y = merge_sq_dev(
            mine.count,
            mine.mean_y,
            self.sum_sq_dev_y,
            theirs.count,
            theirs.mean_y,
            other.sum_sq_dev_y,
        );
        Ok(())
    }

    pub fn merged(mut self, other: &Self) -> Result<Self, StatsError> {
        self.merge(other)?;
        Ok(self)
    }

    /// `co_moment / sqrt(Σdx² · Σdy²)` under the same null and count rules as
    /// covariance. The `count - ddof` divisors cancel.
    #[must_use]
    pub fn finalize(&self) -> Option<f64> {
        self.covariance.is_reportable().then(|| {
            self.covariance.co_moment() / (self.sum_sq_dev_x * self.sum_sq_dev_y).sqrt()
        })
    }
}

#[cfg(test)]
mod tests {
    use fs_columnar::Column;
    use fs_types::DType;

    use super::CorrelationState;
    use crate::{StatsError, VarianceOptions};

    fn state(dtype: DType) -> CorrelationState {
        CorrelationState::new(dtype, VarianceOptions::default()).expect("state")
    }

    #[test]
    fn perfectly_linear_columns_correlate_to_one() {
        let mut acc = state(DType::Float64);
        acc.consume(
            &Column::from_slice(&[1.0_f64, 2.0, 3.0, 4.0, 5.0]),
            &Column::from_slice(&[2.0_f64, 4.0, 6.0, 8.0, 10.0]),
        )
        .expect("consume");
        let corr = acc.finalize().expect("value");
        assert!((corr - 1.0).abs() < 1e-12, "got {corr}");
    }

    #[test]
    fn reversed_columns_correlate_to_minus_one() {
        let mut acc = state(DType::Int32);
        acc.consume(
            &Column::from_slice(&[1_i32, 2, 3, 4]),
            &Column::from_slice(&[40_i32, 30, 20, 10]),
        )
        .expect("consume");
        assert!((acc.finalize().expect("value") + 1.0).abs() < 1e-12);
    }

    #[test]
    fn self_correlation_is_one() {
        let column = Column::from_options(&[Some(3.5_f64), None, Some(-1.0), Some(8.25), Some(0.0)]);
        let mut acc = state(DType::Float64);
        acc.consume(&column, &column).expect("consume");
        assert!((acc.finalize().expect("value") - 1.0).abs() < 1e-12);
    }

    #[test]
    fn chunks_merge_to_single_pass_result() {
        let x: Vec<f64> = (0..64).map(|i| f64::from(i) * 0.5 - 3.0).collect();
        let y: Vec<f64> = (0..64).map(|i| (f64::from(i) * 0.7).sin() + f64::from(i) * 0.1).collect();
        let whole_x = Column::from_slice(&x);
        let whole_y = Column::from_slice(&y);

        let mut single = state(DType::Float64);
        single.consume(&whole_x, &whole_y).expect("consume");

        let mut left = state(DType::Float64);
        left.consume(
            &whole_x.slice(0, 20).expect("slice"),
            &whole_y.slice(0, 20).expect("slice"),
        )
        .expect("consume");
        let mut right = state(DType::Float64);
        right
            .consume(
                &whole_x.slice(20, 44).expect("slice"),
                &whole_y.slice(20, 44).expect("slice"),
            )
            .expect("consume");
        let merged = right.merged(&left).expect("merge");

        let a = single.finalize().expect("single");
        let b = merged.finalize().expect("merged");
        assert!((a - b).abs() < 1e-12, "{a} vs {b}");
        assert!((single.sum_sq_dev_x() - merged.sum_sq_dev_x()).abs() < 1e-9);
    }

    #[test]
    fn sequential_chunks_accumulate_deviation_sums() {
        let mut acc = state(DType::Int16);
        acc.consume(
            &Column::from_slice(&[1_i16, 2]),
            &Column::from_slice(&[1_i16, 3]),
        )
        .expect("consume");
        acc.consume(
            &Column::from_slice(&[3_i16, 4]),
            &Column::from_slice(&[2_i16, 5]),
        )
        .expect("consume");
        // x = 1..4 around 2.5, y = [1, 3, 2, 5] around 2.75
        assert!((acc.sum_sq_dev_x() - 5.0).abs() < 1e-12);
        assert!((acc.sum_sq_dev_y() - 8.75).abs() < 1e-12);
    }

    #[test]
    fn constant_column_gives_non_finite_result() {
        let mut acc = state(DType::Float64);
        acc.consume(
            &Column::from_slice(&[2.0_f64, 2.0, 2.0]),
            &Column::from_slice(&[1.0_f64, 2.0, 3.0]),
        )
        .expect("consume");
        let corr = acc.finalize().expect("value is produced");
        assert!(!corr.is_finite());
    }

    #[test]
    fn fresh_and_voided_states_give_none() {
        assert_eq!(state(DType::Float32).finalize(), None);

        let options = VarianceOptions::default().with_skip_nulls(false);
        let mut acc = CorrelationState::new(DType::Float32, options).expect("state");
        acc.consume(
            &Column::from_options(&[Some(1.0_f32), None, Some(2.0)]),
            &Column::from_options(&[Some(1.0_f32), None, Some(3.0)]),
        )
        .expect("consume");
        assert_eq!(acc.finalize(), None);
    }

    #[test]
    fn unsupported_dtype_fails_before_consuming() {
        let err = CorrelationState::new(DType::Float16, VarianceOptions::default())
            .expect_err("unsupported");
        assert!(matches!(err, StatsError::Type(_)));
    }
}
