//! Per-dtype kernel selection.
//!
//! The dtype is resolved to a [`NumericClass`] once, when an accumulator is
//! built. Each consume call then matches on the column storage of that
//! class only.

use fs_columnar::{Column, ColumnData, ValidityMask};
use fs_types::{DType, NumericClass, decimal_to_f64};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::StatsError;
use crate::covariance::CoMoments;
use crate::integer::{max_run_length, narrow_moments};
use crate::pairwise::pairwise_sum;

/// Serialized as its dtype; the class is re-resolved on the way back in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "DType", into = "DType")]
pub struct Kernel {
    dtype: DType,
    class: NumericClass,
}

impl TryFrom<DType> for Kernel {
    type Error = StatsError;

    fn try_from(dtype: DType) -> Result<Self, Self::Error> {
        Self::resolve(dtype)
    }
}

impl From<Kernel> for DType {
    fn from(kernel: Kernel) -> Self {
        kernel.dtype
    }
}

/// A validated column pair: the slots usable on both sides, and whether
/// either side had any null.
#[derive(Debug, Clone)]
pub(crate) struct PairedInput {
    pub joint: ValidityMask,
    pub all_valid: bool,
}

impl Kernel {
    /// Fails for dtypes without a numeric implementation.
    pub fn resolve(dtype: DType) -> Result<Self, StatsError> {
        let class = dtype.numeric_class()?;
        Ok(Self { dtype, class })
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    #[must_use]
    pub fn class(&self) -> NumericClass {
        self.class
    }

    /// Both columns must carry the kernel dtype, share a length, and have
    /// the same number of valid slots.
    pub(crate) fn validate(&self, x: &Column, y: &Column) -> Result<PairedInput, StatsError> {
        for found in [x.dtype(), y.dtype()] {
            if found != self.dtype {
                debug!(expected = ?self.dtype, found = ?found, "rejected column dtype");
                return Err(StatsError::DtypeMismatch {
                    expected: self.dtype,
                    found,
                });
            }
        }
        if x.len() != y.len() {
            debug!(x = x.len(), y = y.len(), "rejected column pair length");
            return Err(StatsError::LengthMismatch {
                left: x.len(),
                right: y.len(),
            });
        }
        let (valid_x, valid_y) = (x.valid_count(), y.valid_count());
        if valid_x != valid_y {
            debug!(x = valid_x, y = valid_y, "rejected column pair valid counts");
            return Err(StatsError::ValidCountMismatch {
                left: valid_x,
                right: valid_y,
            });
        }
        Ok(PairedInput {
            joint: x.validity().and_mask(y.validity()),
            all_valid: x.null_count() == 0 && y.null_count() == 0,
        })
    }

    /// Count, means and co-moment of `x` and `y` over `joint`.
    pub(crate) fn co_moments(
        &self,
        x: &Column,
        y: &Column,
        joint: &ValidityMask,
    ) -> Result<CoMoments, StatsError> {
        let moments = match self.class {
            NumericClass::NarrowInteger { bit_width } => {
                narrow(x.data(), y.data(), joint, max_run_length(bit_width))
            }
            NumericClass::Wide => wide(x.data(), y.data(), joint),
            NumericClass::Decimal { scale } => match (x.data(), y.data()) {
                (ColumnData::Decimal128(a), ColumnData::Decimal128(b)) => Some(projected_moments(
                    a,
                    b,
                    joint,
                    |v| decimal_to_f64(v, scale),
                )),
                _ => None,
            },
        };
        moments.ok_or(StatsError::DtypeMismatch {
            expected: self.dtype,
            found: y.dtype(),
        })
    }
}

fn narrow(
    x: &ColumnData,
    y: &ColumnData,
    joint: &ValidityMask,
    max_run: usize,
) -> Option<CoMoments> {
    Some(match (x, y) {
        (ColumnData::Int8(a), ColumnData::Int8(b)) => narrow_moments(a, b, joint, max_run),
        (ColumnData::Int16(a), ColumnData::Int16(b)) => narrow_moments(a, b, joint, max_run),
        (ColumnData::Int32(a), ColumnData::Int32(b)) => narrow_moments(a, b, joint, max_run),
        (ColumnData::UInt8(a), ColumnData::UInt8(b)) => narrow_moments(a, b, joint, max_run),
        (ColumnData::UInt16(a), ColumnData::UInt16(b)) => narrow_moments(a, b, joint, max_run),
        (ColumnData::UInt32(a), ColumnData::UInt32(b)) => narrow_moments(a, b, joint, max_run),
        _ => return None,
    })
}

fn wide(x: &ColumnData, y: &ColumnData, joint: &ValidityMask) -> Option<CoMoments> {
    Some(match (x, y) {
        (ColumnData::Int64(a), ColumnData::Int64(b)) => {
            projected_moments(a, b, joint, |v| v as f64)
        }
        (ColumnData::UInt64(a), ColumnData::UInt64(b)) => {
            projected_moments(a, b, joint, |v| v as f64)
        }
        (ColumnData::Float32(a), ColumnData::Float32(b)) => {
            projected_moments(a, b, joint, f64::from)
        }
        (ColumnData::Float64(a), ColumnData::Float64(b)) => projected_moments(a, b, joint, |v| v),
        _ => return None,
    })
}

/// Two-pass pairwise path: means first, then the co-moment around them.
pub(crate) fn projected_moments<T, P>(x: &[T], y: &[T], joint: &ValidityMask, project: P) -> CoMoments
where
    T: Copy,
    P: Fn(T) -> f64,
{
    let count = joint.count_valid();
    if count == 0 {
        return CoMoments::EMPTY;
    }
    let n = count as f64;
    let mean_x = pairwise_sum(joint, |i| project(x[i])) / n;
    let mean_y = pairwise_sum(joint, |i| project(y[i])) / n;
    let co_moment = pairwise_sum(joint, |i| {
        (project(x[i]) - mean_x) * (project(y[i]) - mean_y)
    });
    CoMoments {
        count,
        mean_x,
        mean_y,
        co_moment,
    }
}
