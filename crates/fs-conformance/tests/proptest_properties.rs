#![forbid(unsafe_code)]

//! Property tests for the accumulators and time-series transforms.
//!
//! Paired columns are generated with one shared validity pattern so the
//! valid-count precondition holds for every generated pair.

use proptest::prelude::*;

use fs_columnar::Column;
use fs_stats::{
    CorrelationState, CovarianceState, VarianceOptions, correlation, covariance, variance,
};
use fs_timeseries::{ShiftOptions, shift};
use fs_types::DType;

// ---------------------------------------------------------------------------
// Strategy generators
// ---------------------------------------------------------------------------

/// One row of a paired input: validity plus an integer on each side.
fn arb_row() -> impl Strategy<Value = (bool, i32, i32)> {
    (
        prop_oneof![4 => Just(true), 1 => Just(false)],
        -1_000_i32..1_000,
        -1_000_i32..1_000,
    )
}

fn arb_rows(max_len: usize) -> impl Strategy<Value = Vec<(bool, i32, i32)>> {
    proptest::collection::vec(arb_row(), 0..=max_len)
}

fn int_pair(rows: &[(bool, i32, i32)]) -> (Column, Column) {
    let x: Vec<Option<i32>> = rows.iter().map(|&(v, x, _)| v.then_some(x)).collect();
    let y: Vec<Option<i32>> = rows.iter().map(|&(v, _, y)| v.then_some(y)).collect();
    (Column::from_options(&x), Column::from_options(&y))
}

fn float_pair(rows: &[(bool, i32, i32)]) -> (Column, Column) {
    let x: Vec<Option<f64>> = rows
        .iter()
        .map(|&(v, x, _)| v.then_some(f64::from(x) * 0.25))
        .collect();
    let y: Vec<Option<f64>> = rows
        .iter()
        .map(|&(v, _, y)| v.then_some(f64::from(y) * 0.5 - 3.0))
        .collect();
    (Column::from_options(&x), Column::from_options(&y))
}

/// Rows together with two sorted cut points splitting them into three chunks.
fn arb_chunked_rows(max_len: usize) -> impl Strategy<Value = (Vec<(bool, i32, i32)>, usize, usize)> {
    arb_rows(max_len).prop_flat_map(|rows| {
        let n = rows.len();
        (Just(rows), 0..=n, 0..=n).prop_map(|(rows, a, b)| (rows, a.min(b), a.max(b)))
    })
}

fn close(a: Option<f64>, b: Option<f64>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0),
        _ => false,
    }
}

fn chunk_state(x: &Column, y: &Column, offset: usize, len: usize) -> CovarianceState {
    let mut state =
        CovarianceState::new(x.dtype(), VarianceOptions::default()).expect("supported dtype");
    state
        .consume(
            &x.slice(offset, len).expect("slice x"),
            &y.slice(offset, len).expect("slice y"),
        )
        .expect("consume");
    state
}

// ---------------------------------------------------------------------------
// Covariance
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    /// The exact integer path and the pairwise float path agree.
    #[test]
    fn prop_integer_and_float_paths_agree(rows in arb_rows(200)) {
        let (xi, yi) = int_pair(&rows);
        let x: Vec<Option<f64>> = rows.iter().map(|&(v, x, _)| v.then_some(f64::from(x))).collect();
        let y: Vec<Option<f64>> = rows.iter().map(|&(v, _, y)| v.then_some(f64::from(y))).collect();
        let (xf, yf) = (Column::from_options(&x), Column::from_options(&y));

        let options = VarianceOptions::default();
        let exact = covariance(&xi, &yi, &options).expect("int cov");
        let approx = covariance(&xf, &yf, &options).expect("float cov");
        prop_assert!(close(exact, approx), "int={:?} float={:?}", exact, approx);
    }

    /// Covariance of (x, y) equals covariance of (y, x).
    #[test]
    fn prop_covariance_is_symmetric(rows in arb_rows(120)) {
        let options = VarianceOptions::default();
        let (xi, yi) = int_pair(&rows);
        prop_assert_eq!(
            covariance(&xi, &yi, &options).expect("xy"),
            covariance(&yi, &xi, &options).expect("yx")
        );
        let (xf, yf) = float_pair(&rows);
        prop_assert_eq!(
            covariance(&xf, &yf, &options).expect("xy"),
            covariance(&yf, &xf, &options).expect("yx")
        );
    }

    /// Any two-way split, merged in either order, matches the single pass.
    #[test]
    fn prop_merge_is_commutative((rows, cut, _) in arb_chunked_rows(150)) {
        let (x, y) = float_pair(&rows);
        let n = x.len();
        let whole = chunk_state(&x, &y, 0, n).finalize();

        let left = chunk_state(&x, &y, 0, cut);
        let right = chunk_state(&x, &y, cut, n - cut);
        let lr = left.clone().merged(&right).expect("merge").finalize();
        let rl = right.merged(&left).expect("merge").finalize();

        prop_assert!(close(whole, lr), "whole={:?} left+right={:?}", whole, lr);
        prop_assert!(close(lr, rl), "left+right={:?} right+left={:?}", lr, rl);
    }

    /// Grouping of three chunks does not matter.
    #[test]
    fn prop_merge_is_associative((rows, a, b) in arb_chunked_rows(150)) {
        let (x, y) = int_pair(&rows);
        let n = x.len();
        let first = chunk_state(&x, &y, 0, a);
        let second = chunk_state(&x, &y, a, b - a);
        let third = chunk_state(&x, &y, b, n - b);

        let left_first = first
            .clone()
            .merged(&second)
            .and_then(|s| s.merged(&third))
            .expect("merge");
        let right_first = second
            .merged(&third)
            .and_then(|s| first.merged(&s))
            .expect("merge");
        prop_assert_eq!(left_first.count(), right_first.count());
        prop_assert!(close(left_first.finalize(), right_first.finalize()));
    }

    /// Merging a fresh state in either direction changes nothing.
    #[test]
    fn prop_empty_state_is_merge_identity(rows in arb_rows(100)) {
        let (x, y) = float_pair(&rows);
        let state = chunk_state(&x, &y, 0, x.len());
        let empty = CovarianceState::new(DType::Float64, VarianceOptions::default())
            .expect("state");

        let right = state.clone().merged(&empty).expect("merge");
        let left = empty.merged(&state).expect("merge");
        prop_assert_eq!(&right, &state);
        prop_assert_eq!(left.moments(), state.moments());
    }

    /// Reading the result twice gives the same answer and leaves the state alone.
    #[test]
    fn prop_finalize_is_idempotent(rows in arb_rows(100)) {
        let (x, y) = int_pair(&rows);
        let state = chunk_state(&x, &y, 0, x.len());
        let before = state.clone();
        let first = state.finalize();
        let second = state.finalize();
        prop_assert_eq!(first, second);
        prop_assert_eq!(state, before);
    }
}

// ---------------------------------------------------------------------------
// Correlation and shift
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// A column is perfectly correlated with itself whenever it varies.
    #[test]
    fn prop_self_correlation_is_one(rows in arb_rows(120)) {
        let (x, _) = float_pair(&rows);
        let options = VarianceOptions::default();
        let spread = variance(&x, &options).expect("variance");
        prop_assume!(spread.is_some_and(|v| v > 1e-6));
        let corr = correlation(&x, &x, &options).expect("corr").expect("value");
        prop_assert!((corr - 1.0).abs() < 1e-9, "corr={}", corr);
    }

    /// Correlation merged across a split matches the single pass.
    #[test]
    fn prop_correlation_merge_matches_single_pass((rows, cut, _) in arb_chunked_rows(150)) {
        let (x, y) = float_pair(&rows);
        let n = x.len();
        let options = VarianceOptions::default();

        let mut whole = CorrelationState::new(DType::Float64, options).expect("state");
        whole.consume(&x, &y).expect("consume");

        let mut left = CorrelationState::new(DType::Float64, options).expect("state");
        left.consume(&x.slice(0, cut).expect("slice"), &y.slice(0, cut).expect("slice"))
            .expect("consume");
        let mut right = CorrelationState::new(DType::Float64, options).expect("state");
        right
            .consume(
                &x.slice(cut, n - cut).expect("slice"),
                &y.slice(cut, n - cut).expect("slice"),
            )
            .expect("consume");
        let merged = left.merged(&right).expect("merge");

        let (a, b) = (whole.finalize(), merged.finalize());
        prop_assume!(a.is_none_or(f64::is_finite));
        prop_assert!(close(a, b), "whole={:?} merged={:?}", a, b);
    }

    /// Shifting by k and back by -k restores every slot that was not pushed out.
    #[test]
    fn prop_shift_inverse_restores_interior((rows, k, _) in arb_chunked_rows(80)) {
        let (x, _) = int_pair(&rows);
        let n = x.len();
        let periods = i64::try_from(k).expect("small");
        let there = shift(&x, &ShiftOptions::new(periods)).expect("shift");
        let back = shift(&there, &ShiftOptions::new(-periods)).expect("shift");

        prop_assert_eq!(back.len(), n);
        for idx in 0..n - k {
            prop_assert_eq!(back.value(idx), x.value(idx), "slot {}", idx);
        }
        for idx in n - k..n {
            prop_assert!(!back.is_valid(idx), "slot {} should be padding", idx);
        }
    }
}

#[test]
fn fresh_states_finalize_to_none_for_every_numeric_dtype() {
    let dtypes = [
        DType::Int8,
        DType::Int16,
        DType::Int32,
        DType::Int64,
        DType::UInt8,
        DType::UInt16,
        DType::UInt32,
        DType::UInt64,
        DType::Float32,
        DType::Float64,
        DType::Decimal128 { scale: 4 },
    ];
    for dtype in dtypes {
        let cov = CovarianceState::new(dtype, VarianceOptions::default()).expect("supported");
        assert_eq!(cov.finalize(), None, "{dtype:?}");
        let corr = CorrelationState::new(dtype, VarianceOptions::default()).expect("supported");
        assert_eq!(corr.finalize(), None, "{dtype:?}");
    }
}
