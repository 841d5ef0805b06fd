#![forbid(unsafe_code)]

//! JSON fixture harness for the statistics and time-series operations.
//!
//! A fixture names one operation, its input columns and the expected outcome.
//! [`run_suite`] loads every `*.json` file under a directory and reports one
//! [`CaseReport`] per fixture.

use std::fs;
use std::path::{Path, PathBuf};

use fs_columnar::{Column, ColumnError};
use fs_stats::{StatsError, VarianceOptions, correlation, covariance, variance};
use fs_timeseries::{
    ShiftOptions, TimeSeriesError, autocorrelation_with_options, percent_change, shift,
};
use fs_types::{DType, Scalar, TypeError};
use serde::{Deserialize, Serialize};
use serde_json::Number;
use thiserror::Error;
use tracing::{debug, info};

pub const DEFAULT_TOLERANCE: f64 = 1e-9;

fn default_tolerance() -> f64 {
    DEFAULT_TOLERANCE
}

#[must_use]
pub fn default_fixture_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
}

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Column(#[from] ColumnError),
    #[error("fixture format error: {0}")]
    FixtureFormat(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum FixtureOperation {
    Covariance {
        #[serde(default)]
        options: VarianceOptions,
    },
    Correlation {
        #[serde(default)]
        options: VarianceOptions,
    },
    Variance {
        #[serde(default)]
        options: VarianceOptions,
    },
    Shift {
        #[serde(default)]
        options: ShiftOptions,
    },
    Autocorrelation {
        lag: usize,
        #[serde(default)]
        options: VarianceOptions,
    },
    PercentChange {
        periods: i64,
    },
}

impl FixtureOperation {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Covariance { .. } => "covariance",
            Self::Correlation { .. } => "correlation",
            Self::Variance { .. } => "variance",
            Self::Shift { .. } => "shift",
            Self::Autocorrelation { .. } => "autocorrelation",
            Self::PercentChange { .. } => "percent_change",
        }
    }

    fn arity(&self) -> usize {
        match self {
            Self::Covariance { .. } | Self::Correlation { .. } => 2,
            _ => 1,
        }
    }
}

/// Column literal: integers for integer dtypes, unscaled integers for
/// decimals, raw bits for half floats, `true`/`false` for bool, strings for
/// utf8, plain numbers otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureColumn {
    pub dtype: DType,
    pub values: Vec<Option<FixtureValue>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FixtureValue {
    Bool(bool),
    Number(Number),
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    LengthMismatch,
    ValidCountMismatch,
    DtypeMismatch,
    StateMismatch,
    OutOfBounds,
    ScalarMismatch,
    InvalidCast,
    LossyCast,
    UnsupportedDtype,
    ValueIsMissing,
    LagOutOfRange,
    PeriodsOutOfRange,
}

impl ErrorKind {
    #[must_use]
    pub fn of(err: &TimeSeriesError) -> Self {
        match err {
            TimeSeriesError::LagOutOfRange { .. } => Self::LagOutOfRange,
            TimeSeriesError::PeriodsOutOfRange { .. } => Self::PeriodsOutOfRange,
            TimeSeriesError::Column(err) => Self::of_column(err),
            TimeSeriesError::Stats(err) => match err {
                StatsError::LengthMismatch { .. } => Self::LengthMismatch,
                StatsError::ValidCountMismatch { .. } => Self::ValidCountMismatch,
                StatsError::DtypeMismatch { .. } => Self::DtypeMismatch,
                StatsError::StateMismatch { .. } => Self::StateMismatch,
                StatsError::Type(err) => Self::of_type(err),
                StatsError::Column(err) => Self::of_column(err),
            },
        }
    }

    fn of_column(err: &ColumnError) -> Self {
        match err {
            ColumnError::LengthMismatch { .. } => Self::LengthMismatch,
            ColumnError::DtypeMismatch { .. } => Self::DtypeMismatch,
            ColumnError::OutOfBounds { .. } => Self::OutOfBounds,
            ColumnError::ScalarMismatch { .. } => Self::ScalarMismatch,
            ColumnError::Type(err) => Self::of_type(err),
        }
    }

    fn of_type(err: &TypeError) -> Self {
        match err {
            TypeError::InvalidCast { .. } => Self::InvalidCast,
            TypeError::LossyCast { .. } => Self::LossyCast,
            TypeError::UnsupportedDtype { .. } => Self::UnsupportedDtype,
            TypeError::ValueIsMissing => Self::ValueIsMissing,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixtureExpected {
    /// `value: null` expects no result.
    Scalar {
        value: Option<f64>,
        #[serde(default = "default_tolerance")]
        tolerance: f64,
    },
    Column {
        #[serde(flatten)]
        column: FixtureColumn,
        #[serde(default = "default_tolerance")]
        tolerance: f64,
    },
    Error {
        kind: ErrorKind,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fixture {
    pub name: String,
    #[serde(flatten)]
    pub operation: FixtureOperation,
    pub inputs: Vec<FixtureColumn>,
    pub expected: FixtureExpected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseReport {
    pub name: String,
    pub operation: String,
    pub passed: bool,
    #[serde(default)]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteReport {
    pub fixture_count: usize,
    pub passed: usize,
    pub failed: usize,
    pub cases: Vec<CaseReport>,
}

impl SuiteReport {
    #[must_use]
    pub fn is_green(&self) -> bool {
        self.failed == 0 && self.fixture_count > 0
    }

    #[must_use]
    pub fn failures(&self) -> Vec<&CaseReport> {
        self.cases.iter().filter(|case| !case.passed).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Outcome {
    Scalar(Option<f64>),
    Column(Column),
}

pub fn build_column(fixture: &FixtureColumn) -> Result<Column, HarnessError> {
    if fixture.dtype == DType::Float16 {
        let bits = fixture
            .values
            .iter()
            .map(|value| value.as_ref().map(half_bits).transpose())
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Column::float16_bits(&bits));
    }
    let scalars = fixture
        .values
        .iter()
        .map(|value| match value {
            None => Ok(Scalar::Null),
            Some(literal) => literal_scalar(literal, fixture.dtype),
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Column::new(fixture.dtype, scalars)?)
}

fn half_bits(literal: &FixtureValue) -> Result<u16, HarnessError> {
    match literal {
        FixtureValue::Number(number) => number.as_u64().and_then(|bits| u16::try_from(bits).ok()),
        _ => None,
    }
    .ok_or_else(|| {
        HarnessError::FixtureFormat(format!("{literal:?} is not a float16 bit pattern"))
    })
}

fn literal_scalar(literal: &FixtureValue, dtype: DType) -> Result<Scalar, HarnessError> {
    let scalar = match (literal, dtype) {
        (FixtureValue::Bool(flag), DType::Bool) => Some(Scalar::Bool(*flag)),
        (FixtureValue::Text(text), DType::Utf8) => Some(Scalar::Utf8(text.clone())),
        (FixtureValue::Number(number), dtype) if dtype.is_numeric() => {
            number_scalar(number, dtype)
        }
        _ => None,
    };
    scalar.ok_or_else(|| {
        HarnessError::FixtureFormat(format!("{literal:?} is not a valid {dtype:?} literal"))
    })
}

fn number_scalar(number: &Number, dtype: DType) -> Option<Scalar> {
    match dtype {
        DType::Decimal128 { scale } => number.as_i64().map(|value| Scalar::Decimal128 {
            value: i128::from(value),
            scale,
        }),
        t if t.is_integer() => number
            .as_i64()
            .map(Scalar::Int64)
            .or_else(|| number.as_u64().map(Scalar::UInt64)),
        _ => number.as_f64().map(Scalar::Float64),
    }
}

fn execute(operation: &FixtureOperation, inputs: &[Column]) -> Result<Outcome, TimeSeriesError> {
    let first = &inputs[0];
    Ok(match operation {
        FixtureOperation::Covariance { options } => {
            Outcome::Scalar(covariance(first, &inputs[1], options)?)
        }
        FixtureOperation::Correlation { options } => {
            Outcome::Scalar(correlation(first, &inputs[1], options)?)
        }
        FixtureOperation::Variance { options } => Outcome::Scalar(variance(first, options)?),
        FixtureOperation::Shift { options } => Outcome::Column(shift(first, options)?),
        FixtureOperation::Autocorrelation { lag, options } => {
            Outcome::Scalar(autocorrelation_with_options(first, *lag, options)?)
        }
        FixtureOperation::PercentChange { periods } => {
            Outcome::Column(percent_change(first, *periods)?)
        }
    })
}

fn within(actual: f64, expected: f64, tolerance: f64) -> bool {
    (actual.is_nan() && expected.is_nan())
        || actual == expected
        || (actual - expected).abs() <= tolerance
}

fn compare_columns(actual: &Column, expected: &Column, tolerance: f64) -> Result<(), String> {
    if actual.dtype() != expected.dtype() {
        return Err(format!(
            "dtype mismatch: actual={:?}, expected={:?}",
            actual.dtype(),
            expected.dtype()
        ));
    }
    if actual.len() != expected.len() {
        return Err(format!(
            "length mismatch: actual={}, expected={}",
            actual.len(),
            expected.len()
        ));
    }
    for (idx, (a, e)) in actual.scalars().iter().zip(expected.scalars()).enumerate() {
        if a.semantic_eq(&e) {
            continue;
        }
        let close = match (a.to_f64(), e.to_f64()) {
            (Ok(a), Ok(e)) => within(a, e, tolerance),
            _ => false,
        };
        if !close {
            return Err(format!("slot {idx}: actual={a:?}, expected={e:?}"));
        }
    }
    Ok(())
}

fn check(
    outcome: Result<Outcome, TimeSeriesError>,
    expected: &FixtureExpected,
) -> Result<(), String> {
    match (outcome, expected) {
        (Ok(Outcome::Scalar(actual)), FixtureExpected::Scalar { value, tolerance }) => {
            match (actual, value) {
                (None, None) => Ok(()),
                (Some(a), Some(e)) if within(a, *e, *tolerance) => Ok(()),
                (a, e) => Err(format!("scalar mismatch: actual={a:?}, expected={e:?}")),
            }
        }
        (Ok(Outcome::Column(actual)), FixtureExpected::Column { column, tolerance }) => {
            let expected = build_column(column).map_err(|err| err.to_string())?;
            compare_columns(&actual, &expected, *tolerance)
        }
        (Err(err), FixtureExpected::Error { kind }) => {
            let actual = ErrorKind::of(&err);
            if actual == *kind {
                Ok(())
            } else {
                Err(format!("error mismatch: actual={actual:?} ({err}), expected={kind:?}"))
            }
        }
        (Err(err), _) => Err(format!("unexpected error: {err}")),
        (Ok(outcome), expected) => Err(format!(
            "outcome shape mismatch: actual={outcome:?}, expected={expected:?}"
        )),
    }
}

fn evaluate(fixture: &Fixture) -> Result<(), String> {
    let arity = fixture.operation.arity();
    if fixture.inputs.len() != arity {
        return Err(format!(
            "fixture format error: {} takes {arity} input(s), found {}",
            fixture.operation.name(),
            fixture.inputs.len()
        ));
    }
    let inputs = fixture
        .inputs
        .iter()
        .map(build_column)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| err.to_string())?;
    check(execute(&fixture.operation, &inputs), &fixture.expected)
}

/// Run one fixture. Malformed fixtures are reported as failed cases.
#[must_use]
pub fn run_fixture(fixture: &Fixture) -> CaseReport {
    let result = evaluate(fixture);
    if let Err(detail) = &result {
        debug!(case = %fixture.name, %detail, "fixture case failed");
    }
    CaseReport {
        name: fixture.name.clone(),
        operation: fixture.operation.name().to_owned(),
        passed: result.is_ok(),
        detail: result.err(),
    }
}

pub fn load_fixture(path: &Path) -> Result<Fixture, HarnessError> {
    let body = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&body)?)
}

/// Every `*.json` fixture under `root`, ordered by path.
pub fn load_fixtures(root: &Path) -> Result<Vec<Fixture>, HarnessError> {
    list_fixture_files(root)?
        .iter()
        .map(|path| load_fixture(path))
        .collect()
}

fn list_fixture_files(root: &Path) -> Result<Vec<PathBuf>, HarnessError> {
    if !root.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(current) = stack.pop() {
        for entry in fs::read_dir(current)? {
            let path = entry?.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}

#[must_use]
pub fn run_fixtures(fixtures: &[Fixture]) -> SuiteReport {
    let cases: Vec<CaseReport> = fixtures.iter().map(run_fixture).collect();
    let passed = cases.iter().filter(|case| case.passed).count();
    SuiteReport {
        fixture_count: cases.len(),
        passed,
        failed: cases.len() - passed,
        cases,
    }
}

pub fn run_suite(root: &Path) -> Result<SuiteReport, HarnessError> {
    let fixtures = load_fixtures(root)?;
    let report = run_fixtures(&fixtures);
    info!(
        root = %root.display(),
        fixtures = report.fixture_count,
        passed = report.passed,
        failed = report.failed,
        "conformance suite finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use fs_timeseries::TimeSeriesError;
    use fs_types::DType;

    use super::{
        ErrorKind, Fixture, FixtureColumn, FixtureOperation, FixtureValue, build_column,
        run_fixture,
    };

    fn parse(body: &str) -> Fixture {
        serde_json::from_str(body).expect("fixture parses")
    }

    #[test]
    fn fixture_parses_with_flattened_operation() {
        let fixture = parse(
            r#"{
                "name": "cov",
                "operation": "covariance",
                "options": {"ddof": 0},
                "inputs": [
                    {"dtype": "int32", "values": [1, 2, null]},
                    {"dtype": "int32", "values": [3, 4, null]}
                ],
                "expected": {"scalar": {"value": 0.25}}
            }"#,
        );
        assert_eq!(fixture.operation.name(), "covariance");
        match &fixture.operation {
            FixtureOperation::Covariance { options } => assert_eq!(options.ddof, 0),
            other => panic!("unexpected operation {other:?}"),
        }
        assert!(run_fixture(&fixture).passed);
    }

    #[test]
    fn mismatching_value_fails_with_detail() {
        let fixture = parse(
            r#"{
                "name": "var",
                "operation": "variance",
                "inputs": [{"dtype": "float64", "values": [1.0, 2.0, 3.0]}],
                "expected": {"scalar": {"value": 2.0}}
            }"#,
        );
        let report = run_fixture(&fixture);
        assert!(!report.passed);
        let detail = report.detail.expect("detail");
        assert!(detail.contains("scalar mismatch"), "{detail}");
    }

    #[test]
    fn expected_error_kind_is_matched() {
        let fixture = parse(
            r#"{
                "name": "lag",
                "operation": "autocorrelation",
                "lag": 4,
                "inputs": [{"dtype": "int64", "values": [1, 2, 3]}],
                "expected": {"error": {"kind": "lag_out_of_range"}}
            }"#,
        );
        assert!(run_fixture(&fixture).passed);
    }

    #[test]
    fn wrong_input_count_is_reported() {
        let fixture = parse(
            r#"{
                "name": "corr",
                "operation": "correlation",
                "inputs": [{"dtype": "int64", "values": [1, 2, 3]}],
                "expected": {"scalar": {"value": 1.0}}
            }"#,
        );
        let report = run_fixture(&fixture);
        assert!(!report.passed);
        assert!(report.detail.expect("detail").contains("takes 2 input(s)"));
    }

    #[test]
    fn decimal_literals_are_unscaled() {
        let column = build_column(&FixtureColumn {
            dtype: DType::Decimal128 { scale: 2 },
            values: vec![Some(FixtureValue::Number(150.into())), None],
        })
        .expect("column");
        assert_eq!(column.to_f64_values().expect("project")[0], 1.5);
        assert_eq!(column.null_count(), 1);
    }

    #[test]
    fn out_of_range_integer_literal_is_rejected() {
        let err = build_column(&FixtureColumn {
            dtype: DType::Int8,
            values: vec![Some(FixtureValue::Number(300.into()))],
        })
        .expect_err("does not fit");
        assert!(err.to_string().contains("does not fit"), "{err}");
    }

    #[test]
    fn bool_and_text_literals_build_storage_columns() {
        let fixture: FixtureColumn =
            serde_json::from_str(r#"{"dtype": "utf8", "values": ["a", null, "c"]}"#)
                .expect("parse");
        assert_eq!(fixture.values[0], Some(FixtureValue::Text("a".to_owned())));
        let column = build_column(&fixture).expect("column");
        assert_eq!(column.dtype(), DType::Utf8);
        assert_eq!(column.null_count(), 1);

        let fixture: FixtureColumn =
            serde_json::from_str(r#"{"dtype": "bool", "values": [true, false]}"#).expect("parse");
        assert_eq!(build_column(&fixture).expect("column").valid_count(), 2);
    }

    #[test]
    fn literal_of_the_wrong_kind_is_a_format_error() {
        let err = build_column(&FixtureColumn {
            dtype: DType::Bool,
            values: vec![Some(FixtureValue::Number(1.into()))],
        })
        .expect_err("number for bool");
        assert!(err.to_string().starts_with("fixture format error"), "{err}");

        let err = build_column(&FixtureColumn {
            dtype: DType::Float64,
            values: vec![Some(FixtureValue::Text("1.5".to_owned()))],
        })
        .expect_err("text for float");
        assert!(err.to_string().starts_with("fixture format error"), "{err}");
    }

    #[test]
    fn error_kinds_follow_the_wrapped_error() {
        let err = TimeSeriesError::PeriodsOutOfRange { periods: 9, len: 2 };
        assert_eq!(ErrorKind::of(&err), ErrorKind::PeriodsOutOfRange);
    }
}
