//! Exact accumulation for integers of at most 32 bits.
//!
//! `sum_x` and `sum_y` stay in `i64` and the cross sum in `i128`, so nothing
//! is rounded until the final division. Runs are flushed into the running
//! [`CoMoments`] every [`max_run_length`] values to keep the `i64` sums in
//! range.

use fs_columnar::ValidityMask;

use crate::covariance::CoMoments;

/// Largest number of values of `bit_width` bits whose sum fits an `i64`.
///
/// Unsigned 32-bit: `0 <= sum < 2^63`; signed 32-bit: `-2^62 <= sum < 2^62`.
#[must_use]
pub fn max_run_length(bit_width: u32) -> usize {
    let bound = 1_u64 << (63 - bit_width.min(63));
    usize::try_from(bound).unwrap_or(usize::MAX)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntegerMoments {
    count: i64,
    sum_x: i64,
    sum_y: i64,
    sum_xy: i128,
}

impl IntegerMoments {
    pub fn push(&mut self, x: i64, y: i64) {
        self.sum_x += x;
        self.sum_y += y;
        self.sum_xy += i128::from(x) * i128::from(y);
        self.count += 1;
    }

    #[must_use]
    pub fn count(&self) -> i64 {
        self.count
    }

    #[must_use]
    pub fn mean_x(&self) -> f64 {
        self.sum_x as f64 / self.count as f64
    }

    #[must_use]
    pub fn mean_y(&self) -> f64 {
        self.sum_y as f64 / self.count as f64
    }

    /// `sum_xy - sum_x * sum_y / count`, with the division split into an
    /// exact integer quotient and a fractional remainder.
    #[must_use]
    pub fn co_moment(&self) -> f64 {
        let count = i128::from(self.count);
        let sum_product = i128::from(self.sum_x) * i128::from(self.sum_y);
        let whole = sum_product / count;
        let fraction = (sum_product % count) as f64 / self.count as f64;
        (self.sum_xy - whole) as f64 - fraction
    }

    #[must_use]
    pub fn to_moments(&self) -> CoMoments {
        if self.count == 0 {
            return CoMoments::EMPTY;
        }
        CoMoments {
            count: self.count as usize,
            mean_x: self.mean_x(),
            mean_y: self.mean_y(),
            co_moment: self.co_moment(),
        }
    }
}

/// Co-moments of `x` and `y` over the slots set in `joint`, flushing the
/// exact sums every `max_run` values.
pub fn narrow_moments<T>(x: &[T], y: &[T], joint: &ValidityMask, max_run: usize) -> CoMoments
where
    T: Copy + Into<i64>,
{
    let max_run = max_run.max(1);
    let mut merged = CoMoments::EMPTY;
    let mut run = IntegerMoments::default();
    for (start, len) in joint.set_runs() {
        for idx in start..start + len {
            run.push(x[idx].into(), y[idx].into());
            if run.count() as usize == max_run {
                merged = merged.merge(&run.to_moments());
                run = IntegerMoments::default();
            }
        }
    }
    merged.merge(&run.to_moments())
}

#[cfg(test)]
mod tests {
    use fs_columnar::ValidityMask;

    use super::{IntegerMoments, max_run_length, narrow_moments};

    fn moments_of(pairs: &[(i64, i64)]) -> IntegerMoments {
        let mut acc = IntegerMoments::default();
        for &(x, y) in pairs {
            acc.push(x, y);
        }
        acc
    }

    #[test]
    fn run_bounds_follow_bit_width() {
        assert_eq!(max_run_length(8), 1 << 55);
        assert_eq!(max_run_length(16), 1 << 47);
        assert_eq!(max_run_length(32), 1 << 31);
    }

    #[test]
    fn exact_co_moment_for_linear_data() {
        let acc = moments_of(&[(1, 2), (2, 4), (3, 6), (4, 8), (5, 10)]);
        assert_eq!(acc.mean_x(), 3.0);
        assert_eq!(acc.mean_y(), 6.0);
        assert_eq!(acc.co_moment(), 20.0);
    }

    #[test]
    fn fractional_remainder_is_kept() {
        assert_eq!(moments_of(&[(1, 1), (2, 4)]).co_moment(), 1.5);
        assert_eq!(moments_of(&[(-1, 1), (-2, 4)]).co_moment(), -1.5);
    }

    #[test]
    fn empty_run_has_empty_moments() {
        let moments = IntegerMoments::default().to_moments();
        assert_eq!(moments.count, 0);
        assert_eq!(moments.co_moment, 0.0);
    }

    #[test]
    fn bounded_runs_match_single_run() {
        let x: Vec<i32> = (0..200).map(|i| (i * 37) % 101 - 50).collect();
        let y: Vec<i32> = (0..200).map(|i| (i * 11) % 53).collect();
        let mut bits = vec![true; 200];
        for bit in bits.iter_mut().step_by(9) {
            *bit = false;
        }
        let joint = ValidityMask::from_bools(&bits);

        let whole = narrow_moments(&x, &y, &joint, usize::MAX);
        let bounded = narrow_moments(&x, &y, &joint, 7);
        assert_eq!(whole.count, bounded.count);
        assert!((whole.mean_x - bounded.mean_x).abs() < 1e-12);
        assert!((whole.mean_y - bounded.mean_y).abs() < 1e-12);
        assert!((whole.co_moment - bounded.co_moment).abs() < 1e-9 * whole.co_moment.abs());
    }

    #[test]
    fn unsigned_extremes_do_not_overflow() {
        let x = vec![u32::MAX; 64];
        let y = vec![u32::MAX; 64];
        let moments = narrow_moments(&x, &y, &ValidityMask::all_valid(64), usize::MAX);
        assert_eq!(moments.count, 64);
        assert_eq!(moments.mean_x, f64::from(u32::MAX));
        assert_eq!(moments.co_moment, 0.0);
    }
}
