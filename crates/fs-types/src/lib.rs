#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Physical element type of a column.
///
/// The set is closed: every statistics kernel is selected by matching on
/// this enum, never through open-ended runtime dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    Int8,
    Int16,
    Int32,
    Int64,
    #[serde(rename = "uint8")]
    UInt8,
    #[serde(rename = "uint16")]
    UInt16,
    #[serde(rename = "uint32")]
    UInt32,
    #[serde(rename = "uint64")]
    UInt64,
    /// IEEE half precision, stored as raw bits. Storable and shiftable, but
    /// no numeric kernel accepts it.
    Float16,
    Float32,
    Float64,
    /// 128-bit fixed point: `unscaled / 10^scale`.
    Decimal128 { scale: i32 },
    Bool,
    Utf8,
}

/// Kernel family a numeric dtype resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericClass {
    /// Integers of at most 32 bits: exact integer accumulation.
    NarrowInteger { bit_width: u32 },
    /// 64-bit integers and floats: pairwise summation over an f64 projection.
    Wide,
    /// Fixed point projected to f64 with the given scale.
    Decimal { scale: i32 },
}

impl DType {
    /// Element width in bits; 0 for variable-width strings.
    #[must_use]
    pub fn bit_width(self) -> u32 {
        match self {
            Self::Bool => 1,
            Self::Utf8 => 0,
            Self::Int8 | Self::UInt8 => 8,
            Self::Int16 | Self::UInt16 | Self::Float16 => 16,
            Self::Int32 | Self::UInt32 | Self::Float32 => 32,
            Self::Int64 | Self::UInt64 | Self::Float64 => 64,
            Self::Decimal128 { .. } => 128,
        }
    }

    #[must_use]
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            Self::Int8
                | Self::Int16
                | Self::Int32
                | Self::Int64
                | Self::UInt8
                | Self::UInt16
                | Self::UInt32
                | Self::UInt64
        )
    }

    #[must_use]
    pub fn is_float(self) -> bool {
        matches!(self, Self::Float16 | Self::Float32 | Self::Float64)
    }

    /// Fixed-point scale for decimal dtypes, 0 for everything else.
    #[must_use]
    pub fn decimal_scale(self) -> i32 {
        match self {
            Self::Decimal128 { scale } => scale,
            _ => 0,
        }
    }

    /// Whether scalars of this dtype convert to and from the other numeric
    /// dtypes.
    #[must_use]
    pub fn is_numeric(self) -> bool {
        !matches!(self, Self::Float16 | Self::Bool | Self::Utf8)
    }

    pub fn numeric_class(self) -> Result<NumericClass, TypeError> {
        match self {
            Self::Float16 | Self::Bool | Self::Utf8 => {
                Err(TypeError::UnsupportedDtype { dtype: self })
            }
            Self::Decimal128 { scale } => Ok(NumericClass::Decimal { scale }),
            dtype if dtype.is_integer() && dtype.bit_width() <= 32 => {
                Ok(NumericClass::NarrowInteger {
                    bit_width: dtype.bit_width(),
                })
            }
            _ => Ok(NumericClass::Wide),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Scalar {
    Null,
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    #[serde(rename = "uint8")]
    UInt8(u8),
    #[serde(rename = "uint16")]
    UInt16(u16),
    #[serde(rename = "uint32")]
    UInt32(u32),
    #[serde(rename = "uint64")]
    UInt64(u64),
    Float16(u16),
    Float32(f32),
    Float64(f64),
    Decimal128 { value: i128, scale: i32 },
    Bool(bool),
    Utf8(String),
}

impl Scalar {
    /// Dtype of a non-null scalar. `Null` is untyped.
    #[must_use]
    pub fn dtype(&self) -> Option<DType> {
        Some(match self {
            Self::Null => return None,
            Self::Int8(_) => DType::Int8,
            Self::Int16(_) => DType::Int16,
            Self::Int32(_) => DType::Int32,
            Self::Int64(_) => DType::Int64,
            Self::UInt8(_) => DType::UInt8,
            Self::UInt16(_) => DType::UInt16,
            Self::UInt32(_) => DType::UInt32,
            Self::UInt64(_) => DType::UInt64,
            Self::Float16(_) => DType::Float16,
            Self::Float32(_) => DType::Float32,
            Self::Float64(_) => DType::Float64,
            Self::Decimal128 { scale, .. } => DType::Decimal128 { scale: *scale },
            Self::Bool(_) => DType::Bool,
            Self::Utf8(_) => DType::Utf8,
        })
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Exact integer value for integer scalars.
    #[must_use]
    pub fn as_i128(&self) -> Option<i128> {
        match self {
            Self::Int8(v) => Some(i128::from(*v)),
            Self::Int16(v) => Some(i128::from(*v)),
            Self::Int32(v) => Some(i128::from(*v)),
            Self::Int64(v) => Some(i128::from(*v)),
            Self::UInt8(v) => Some(i128::from(*v)),
            Self::UInt16(v) => Some(i128::from(*v)),
            Self::UInt32(v) => Some(i128::from(*v)),
            Self::UInt64(v) => Some(i128::from(*v)),
            _ => None,
        }
    }

    pub fn to_f64(&self) -> Result<f64, TypeError> {
        match self {
            Self::Null => Err(TypeError::ValueIsMissing),
            Self::Float16(_) => Err(TypeError::UnsupportedDtype {
                dtype: DType::Float16,
            }),
            Self::Bool(_) => Err(TypeError::UnsupportedDtype { dtype: DType::Bool }),
            Self::Utf8(_) => Err(TypeError::UnsupportedDtype { dtype: DType::Utf8 }),
            Self::Float32(v) => Ok(f64::from(*v)),
            Self::Float64(v) => Ok(*v),
            Self::Decimal128 { value, scale } => Ok(decimal_to_f64(*value, *scale)),
            other => Ok(other.as_i128().map_or(f64::NAN, |v| v as f64)),
        }
    }

    /// Equality that treats two NaN floats as equal.
    #[must_use]
    pub fn semantic_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Float64(a), Self::Float64(b)) => (a.is_nan() && b.is_nan()) || a == b,
            (Self::Float32(a), Self::Float32(b)) => (a.is_nan() && b.is_nan()) || a == b,
            _ => self == other,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TypeError {
    #[error("cannot cast scalar of dtype {from:?} to {to:?}")]
    InvalidCast { from: DType, to: DType },
    #[error("value {value} does not fit {to:?} without loss")]
    LossyCast { value: String, to: DType },
    #[error("dtype {dtype:?} has no numeric implementation")]
    UnsupportedDtype { dtype: DType },
    #[error("value is missing")]
    ValueIsMissing,
}

/// Project a fixed-point value onto f64.
#[must_use]
pub fn decimal_to_f64(value: i128, scale: i32) -> f64 {
    value as f64 / 10_f64.powi(scale)
}

fn pow10(exp: u32) -> Option<i128> {
    10_i128.checked_pow(exp)
}

fn lossy(value: impl ToString, to: DType) -> TypeError {
    TypeError::LossyCast {
        value: value.to_string(),
        to,
    }
}

fn integer_scalar(value: i128, target: DType) -> Result<Scalar, TypeError> {
    let out = match target {
        DType::Int8 => i8::try_from(value).map(Scalar::Int8).ok(),
        DType::Int16 => i16::try_from(value).map(Scalar::Int16).ok(),
        DType::Int32 => i32::try_from(value).map(Scalar::Int32).ok(),
        DType::Int64 => i64::try_from(value).map(Scalar::Int64).ok(),
        DType::UInt8 => u8::try_from(value).map(Scalar::UInt8).ok(),
        DType::UInt16 => u16::try_from(value).map(Scalar::UInt16).ok(),
        DType::UInt32 => u32::try_from(value).map(Scalar::UInt32).ok(),
        DType::UInt64 => u64::try_from(value).map(Scalar::UInt64).ok(),
        _ => None,
    };
    out.ok_or_else(|| lossy(value, target))
}

fn integral_f64_to_i128(value: f64, target: DType) -> Result<i128, TypeError> {
    // i128::MAX as f64 rounds up to 2^127, so the upper bound is exclusive.
    if !value.is_finite()
        || value != value.trunc()
        || value < i128::MIN as f64
        || value >= i128::MAX as f64
    {
        return Err(lossy(value, target));
    }
    Ok(value as i128)
}

fn rescale_decimal(value: i128, from: i32, to: i32, target: DType) -> Result<i128, TypeError> {
    let delta = to.checked_sub(from).ok_or_else(|| lossy(value, target))?;
    let factor = pow10(delta.unsigned_abs()).ok_or_else(|| lossy(value, target))?;
    if delta >= 0 {
        value.checked_mul(factor).ok_or_else(|| lossy(value, target))
    } else if value % factor == 0 {
        Ok(value / factor)
    } else {
        Err(lossy(value, target))
    }
}

/// Cast a scalar to `target`, refusing casts that would lose information
/// other than float rounding.
pub fn cast_scalar(value: Scalar, target: DType) -> Result<Scalar, TypeError> {
    let Some(from) = value.dtype() else {
        return Ok(Scalar::Null);
    };
    if from == target {
        return Ok(value);
    }
    if !from.is_numeric() || !target.is_numeric() {
        return Err(TypeError::InvalidCast { from, to: target });
    }

    match target {
        t if t.is_integer() => {
            let whole = match value {
                Scalar::Float32(v) => integral_f64_to_i128(f64::from(v), target)?,
                Scalar::Float64(v) => integral_f64_to_i128(v, target)?,
                Scalar::Decimal128 { value, scale } => rescale_decimal(value, scale, 0, target)?,
                other => other
                    .as_i128()
                    .ok_or(TypeError::InvalidCast { from, to: target })?,
            };
            integer_scalar(whole, target)
        }
        DType::Float32 => Ok(Scalar::Float32(value.to_f64()? as f32)),
        DType::Float64 => Ok(Scalar::Float64(value.to_f64()?)),
        DType::Decimal128 { scale } => {
            let unscaled = match value {
                Scalar::Decimal128 {
                    value,
                    scale: from_scale,
                } => rescale_decimal(value, from_scale, scale, target)?,
                Scalar::Float32(v) => {
                    integral_f64_to_i128(f64::from(v) * 10_f64.powi(scale), target)?
                }
                Scalar::Float64(v) => integral_f64_to_i128(v * 10_f64.powi(scale), target)?,
                other => {
                    let whole = other
                        .as_i128()
                        .ok_or(TypeError::InvalidCast { from, to: target })?;
                    rescale_decimal(whole, 0, scale, target)?
                }
            };
            Ok(Scalar::Decimal128 {
                value: unscaled,
                scale,
            })
        }
        _ => Err(TypeError::InvalidCast { from, to: target }),
    }
}
