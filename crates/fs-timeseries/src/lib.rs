#![forbid(unsafe_code)]

use fs_columnar::{ArithmeticOp, Column, ColumnBuilder, ColumnError};
use fs_stats::{StatsError, VarianceOptions, covariance, variance};
use fs_types::{Scalar, cast_scalar};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShiftOptions {
    /// Positive shifts move values toward the end, negative toward the start.
    pub periods: i64,
    /// Value for the vacated slots; `None` leaves them null.
    pub fill_value: Option<Scalar>,
}

impl Default for ShiftOptions {
    fn default() -> Self {
        Self {
            periods: 1,
            fill_value: None,
        }
    }
}

impl ShiftOptions {
    #[must_use]
    pub fn new(periods: i64) -> Self {
        Self {
            periods,
            fill_value: None,
        }
    }

    #[must_use]
    pub fn with_fill(mut self, fill_value: Scalar) -> Self {
        self.fill_value = Some(fill_value);
        self
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TimeSeriesError {
    #[error("lag {lag} cannot be greater than the length of the column ({len})")]
    LagOutOfRange { lag: usize, len: usize },
    #[error("periods {periods} cannot be greater than the length of the column ({len})")]
    PeriodsOutOfRange { periods: i64, len: usize },
    #[error(transparent)]
    Column(#[from] ColumnError),
    #[error(transparent)]
    Stats(#[from] StatsError),
}

/// Shift values by `options.periods` slots into a new column of the same
/// dtype and length.
///
/// Vacated slots take the fill value cast to the column dtype, or null.
/// Shifting by at least the column length yields a column made only of
/// fill. The fill is cast even when nothing is vacated, so an incompatible
/// fill is always an error.
pub fn shift(column: &Column, options: &ShiftOptions) -> Result<Column, ColumnError> {
    let len = column.len();
    let fill = cast_scalar(
        options.fill_value.clone().unwrap_or(Scalar::Null),
        column.dtype(),
    )?;
    let pad = usize::try_from(options.periods.unsigned_abs())
        .unwrap_or(usize::MAX)
        .min(len);

    let mut builder = ColumnBuilder::new(column.dtype());
    builder.reserve(len);
    if options.periods >= 0 {
        builder.append_scalar(fill, pad)?;
        builder.append_column_range(column, 0, len - pad)?;
    } else {
        builder.append_column_range(column, pad, len - pad)?;
        builder.append_scalar(fill, pad)?;
    }
    trace!(periods = options.periods, len, "column shifted");
    Ok(builder.finish())
}

/// Lag autocorrelation with default variance options.
pub fn autocorrelation(column: &Column, lag: usize) -> Result<Option<f64>, TimeSeriesError> {
    autocorrelation_with_options(column, lag, &VarianceOptions::default())
}

/// `cov(x, shift(x, lag)) / var(x) / (len - 1 - lag)`.
///
/// The covariance runs over the slots where both `x` and its shifted copy
/// are valid. `None` when either statistic has no value.
pub fn autocorrelation_with_options(
    column: &Column,
    lag: usize,
    options: &VarianceOptions,
) -> Result<Option<f64>, TimeSeriesError> {
    let len = column.len();
    if lag > len {
        debug!(lag, len, "autocorrelation lag out of range");
        return Err(TimeSeriesError::LagOutOfRange { lag, len });
    }
    let periods = i64::try_from(lag).map_err(|_| TimeSeriesError::LagOutOfRange { lag, len })?;

    let shifted = shift(column, &ShiftOptions::new(periods))?;
    let leading = column.with_joint_validity(&shifted)?;
    let lagged = shifted.with_joint_validity(column)?;

    let cov = covariance(&leading, &lagged, options)?;
    let var = variance(column, options)?;
    let (Some(cov), Some(var)) = (cov, var) else {
        return Ok(None);
    };
    let observations = len as f64 - 1.0 - lag as f64;
    Ok(Some(cov / var / observations))
}

/// `x / shift(x, periods) - 1` as a Float64 column.
///
/// Slots with no predecessor, or with a null on either side, are null.
/// Division by zero follows IEEE-754.
pub fn percent_change(column: &Column, periods: i64) -> Result<Column, TimeSeriesError> {
    let len = column.len();
    if periods.unsigned_abs() > len as u64 {
        debug!(periods, len, "percent change periods out of range");
        return Err(TimeSeriesError::PeriodsOutOfRange { periods, len });
    }
    let shifted = shift(column, &ShiftOptions::new(periods))?;
    let ratio = column.binary_numeric(&shifted, ArithmeticOp::Div)?;
    Ok(ratio.binary_scalar(1.0, ArithmeticOp::Sub)?)
}
