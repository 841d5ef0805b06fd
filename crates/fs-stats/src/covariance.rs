//! Mergeable covariance accumulator.

use fs_columnar::Column;
use fs_types::DType;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::kernel::Kernel;
use crate::{StatsError, VarianceOptions};

/// Count, means and co-moment `Σ(x - mean_x)(y - mean_y)` of a set of pairs.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CoMoments {
    pub count: usize,
    pub mean_x: f64,
    pub mean_y: f64,
    pub co_moment: f64,
}

impl CoMoments {
    pub const EMPTY: Self = Self {
        count: 0,
        mean_x: 0.0,
        mean_y: 0.0,
        co_moment: 0.0,
    };

    /// Chan's parallel update. Associative and commutative up to rounding;
    /// an empty side returns the other side unchanged.
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        if other.count == 0 {
            return *self;
        }
        if self.count == 0 {
            return *other;
        }
        let n1 = self.count as f64;
        let n2 = other.count as f64;
        let count = self.count + other.count;
        let n = count as f64;
        let mean_x = (self.mean_x * n1 + other.mean_x * n2) / n;
        let mean_y = (self.mean_y * n1 + other.mean_y * n2) / n;
        let co_moment = self.co_moment
            + other.co_moment
            + n1 * (self.mean_x - mean_x) * (self.mean_y - mean_y)
            + n2 * (other.mean_x - mean_x) * (other.mean_y - mean_y);
        Self {
            count,
            mean_x,
            mean_y,
            co_moment,
        }
    }
}

/// Running covariance of two columns of one dtype.
///
/// Feed it whole columns or successive chunks with [`consume`], combine
/// states built on disjoint chunks with [`merge`], and read the result with
/// [`finalize`]. States are plain values: each worker owns its own, and
/// they serialize so partial results can cross process boundaries.
///
/// [`consume`]: CovarianceState::consume
/// [`merge`]: CovarianceState::merge
/// [`finalize`]: CovarianceState::finalize
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CovarianceState {
    kernel: Kernel,
    moments: CoMoments,
    all_valid: bool,
    options: VarianceOptions,
}

impl CovarianceState {
    /// Fails for dtypes with no numeric kernel, before any data is seen.
    pub fn new(dtype: DType, options: VarianceOptions) -> Result<Self, StatsError> {
        Ok(Self {
            kernel: Kernel::resolve(dtype)?,
            moments: CoMoments::EMPTY,
            all_valid: true,
            options,
        })
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        self.kernel.dtype()
    }

    #[must_use]
    pub fn kernel(&self) -> Kernel {
        self.kernel
    }

    #[must_use]
    pub fn moments(&self) -> CoMoments {
        self.moments
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.moments.count
    }

    #[must_use]
    pub fn mean_x(&self) -> f64 {
        self.moments.mean_x
    }

    #[must_use]
    pub fn mean_y(&self) -> f64 {
        self.moments.mean_y
    }

    #[must_use]
    pub fn co_moment(&self) -> f64 {
        self.moments.co_moment
    }

    #[must_use]
    pub fn all_valid(&self) -> bool {
        self.all_valid
    }

    #[must_use]
    pub fn decimal_scale(&self) -> i32 {
        self.kernel.dtype().decimal_scale()
    }

    #[must_use]
    pub fn options(&self) -> &VarianceOptions {
        &self.options
    }

    /// Fold one chunk of jointly-valid pairs into the state.
    ///
    /// The chunk is validated and reduced on its own before the merge, so an
    /// error leaves the state exactly as it was. Nulls only affect the
    /// arithmetic; whether they void the result is decided in `finalize`.
    pub fn consume(&mut self, x: &Column, y: &Column) -> Result<(), StatsError> {
        let paired = self.kernel.validate(x, y)?;
        let chunk = self.kernel.co_moments(x, y, &paired.joint)?;
        self.absorb(chunk, paired.all_valid);
        trace!(
            dtype = ?self.dtype(),
            rows = x.len(),
            pairs = chunk.count,
            total = self.moments.count,
            "covariance chunk consumed"
        );
        Ok(())
    }

    pub(crate) fn absorb(&mut self, chunk: CoMoments, all_valid: bool) {
        self.all_valid &= all_valid;
        self.moments = self.moments.merge(&chunk);
    }

    /// Empty state with the same kernel and options.
    pub(crate) fn empty_like(&self) -> Self {
        Self {
            moments: CoMoments::EMPTY,
            all_valid: true,
            ..self.clone()
        }
    }

    /// Merge a state accumulated independently on other data. Options are
    /// taken from `self`.
    pub fn merge(&mut self, other: &Self) -> Result<(), StatsError> {
        if self.dtype() != other.dtype() {
            return Err(StatsError::StateMismatch {
                left: self.dtype(),
                right: other.dtype(),
            });
        }
        self.absorb(other.moments, other.all_valid);
        trace!(
            left = self.moments.count - other.moments.count,
            right = other.moments.count,
            "covariance states merged"
        );
        Ok(())
    }

    /// By-value form of [`merge`](Self::merge).
    pub fn merged(mut self, other: &Self) -> Result<Self, StatsError> {
        self.merge(other)?;
        Ok(self)
    }

    /// Whether `finalize` will produce a value under the current options.
    #[must_use]
    pub fn is_reportable(&self) -> bool {
        let count = self.moments.count;
        count > self.options.ddof
            && count >= self.options.min_count
            && (self.all_valid || self.options.skip_nulls)
    }

    /// `co_moment / (count - ddof)`, or `None` when there are too few pairs,
    /// fewer than `min_count`, or nulls were seen without `skip_nulls`.
    #[must_use]
    pub fn finalize(&self) -> Option<f64> {
        self.is_reportable().then(|| {
            self.moments.co_moment / (self.moments.count - self.options.ddof) as f64
        })
    }
}
