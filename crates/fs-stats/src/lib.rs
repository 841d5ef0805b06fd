#![forbid(unsafe_code)]

//! Streaming, mergeable covariance and correlation over nullable columns.
//!
//! Narrow integer columns accumulate exact integer sums; wider integers,
//! floats and decimals use pairwise summation over an f64 projection. Both
//! paths produce [`CoMoments`] that merge with Chan's parallel update, so
//! chunking and merge order change results only by rounding.

pub mod correlation;
pub mod covariance;
pub mod integer;
pub mod kernel;
pub mod pairwise;

use fs_columnar::{Column, ColumnError};
use fs_types::{DType, TypeError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use correlation::CorrelationState;
pub use covariance::{CoMoments, CovarianceState};
pub use kernel::Kernel;
pub use pairwise::{PairwiseSum, pairwise_sum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VarianceOptions {
    /// Divisor is `count - ddof`.
    pub ddof: usize,
    /// Fewer valid pairs than this gives no result.
    pub min_count: usize,
    /// When false, any null in the input gives no result.
    pub skip_nulls: bool,
}

impl Default for VarianceOptions {
    fn default() -> Self {
        Self {
            ddof: 1,
            min_count: 0,
            skip_nulls: true,
        }
    }
}

impl VarianceOptions {
    #[must_use]
    pub fn with_ddof(mut self, ddof: usize) -> Self {
        self.ddof = ddof;
        self
    }

    #[must_use]
    pub fn with_min_count(mut self, min_count: usize) -> Self {
        self.min_count = min_count;
        self
    }

    #[must_use]
    pub fn with_skip_nulls(mut self, skip_nulls: bool) -> Self {
        self.skip_nulls = skip_nulls;
        self
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StatsError {
    #[error("column length mismatch: x={left}, y={right}")]
    LengthMismatch { left: usize, right: usize },
    #[error("valid values from x ({left}) must equal valid values from y ({right})")]
    ValidCountMismatch { left: usize, right: usize },
    #[error("accumulator for {expected:?} cannot consume a {found:?} column")]
    DtypeMismatch { expected: DType, found: DType },
    #[error("cannot merge a {right:?} state into a {left:?} state")]
    StateMismatch { left: DType, right: DType },
    #[error(transparent)]
    Type(#[from] TypeError),
    #[error(transparent)]
    Column(#[from] ColumnError),
}

/// Covariance of two whole columns.
pub fn covariance(
    x: &Column,
    y: &Column,
    options: &VarianceOptions,
) -> Result<Option<f64>, StatsError> {
    let mut state = CovarianceState::new(x.dtype(), *options)?;
    state.consume(x, y)?;
    Ok(state.finalize())
}

/// Pearson correlation of two whole columns.
pub fn correlation(
    x: &Column,
    y: &Column,
    options: &VarianceOptions,
) -> Result<Option<f64>, StatsError> {
    let mut state = CorrelationState::new(x.dtype(), *options)?;
    state.consume(x, y)?;
    Ok(state.finalize())
}

/// Variance of one column: its covariance with itself.
pub fn variance(x: &Column, options: &VarianceOptions) -> Result<Option<f64>, StatsError> {
    covariance(x, x, options)
}
