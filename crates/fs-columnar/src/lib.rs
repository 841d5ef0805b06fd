#![forbid(unsafe_code)]

use std::iter::repeat_n;

use fs_types::{DType, Scalar, TypeError, cast_scalar, decimal_to_f64};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Packed validity bitmap: bit `i` set means slot `i` is non-null.
///
/// Bits past `len` in the last word are always clear; run scanning and
/// counting rely on that.
#[derive(Debug, Clone, Eq)]
pub struct ValidityMask {
    words: Vec<u64>,
    len: usize,
}

impl ValidityMask {
    #[must_use]
    pub fn from_bools(bits: &[bool]) -> Self {
        let len = bits.len();
        let mut words = vec![0_u64; len.div_ceil(64)];
        for (idx, &valid) in bits.iter().enumerate() {
            if valid {
                words[idx / 64] |= 1_u64 << (idx % 64);
            }
        }
        Self { words, len }
    }

    #[must_use]
    pub fn all_valid(len: usize) -> Self {
        let word_count = len.div_ceil(64);
        let mut words = vec![u64::MAX; word_count];
        let remainder = len % 64;
        if remainder > 0 && !words.is_empty() {
            let last = words.len() - 1;
            words[last] = (1_u64 << remainder) - 1;
        }
        Self { words, len }
    }

    #[must_use]
    pub fn all_invalid(len: usize) -> Self {
        Self {
            words: vec![0_u64; len.div_ceil(64)],
            len,
        }
    }

    #[must_use]
    pub fn get(&self, idx: usize) -> bool {
        if idx >= self.len {
            return false;
        }
        (self.words[idx / 64] >> (idx % 64)) & 1 == 1
    }

    pub fn set(&mut self, idx: usize, value: bool) {
        if idx >= self.len {
            return;
        }
        if value {
            self.words[idx / 64] |= 1_u64 << (idx % 64);
        } else {
            self.words[idx / 64] &= !(1_u64 << (idx % 64));
        }
    }

    #[must_use]
    pub fn count_valid(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    #[must_use]
    pub fn null_count(&self) -> usize {
        self.len - self.count_valid()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn and_mask(&self, other: &Self) -> Self {
        let len = self.len.min(other.len);
        let word_count = len.div_ceil(64);
        let mut words: Vec<u64> = self.words[..word_count]
            .iter()
            .zip(&other.words[..word_count])
            .map(|(a, b)| a & b)
            .collect();
        clear_tail(&mut words, len);
        Self { words, len }
    }

    #[must_use]
    pub fn or_mask(&self, other: &Self) -> Self {
        let len = self.len.min(other.len);
        let word_count = len.div_ceil(64);
        let mut words: Vec<u64> = self.words[..word_count]
            .iter()
            .zip(&other.words[..word_count])
            .map(|(a, b)| a | b)
            .collect();
        clear_tail(&mut words, len);
        Self { words, len }
    }

    #[must_use]
    pub fn not_mask(&self) -> Self {
        let mut words: Vec<u64> = self.words.iter().map(|w| !w).collect();
        clear_tail(&mut words, self.len);
        Self {
            words,
            len: self.len,
        }
    }

    /// Copy of the bits in `[offset, offset + len)`, clamped to the mask.
    #[must_use]
    pub fn slice(&self, offset: usize, len: usize) -> Self {
        let start = offset.min(self.len);
        let end = offset.saturating_add(len).min(self.len);
        let mut out = Self::all_invalid(end - start);
        for (run_start, run_len) in self.set_runs() {
            let lo = run_start.max(start);
            let hi = (run_start + run_len).min(end);
            for idx in lo..hi {
                out.set(idx - start, true);
            }
        }
        out
    }

    pub fn bits(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.len).map(|idx| self.get(idx))
    }

    /// Runs of consecutive valid slots as `(start, len)`, in order.
    #[must_use]
    pub fn set_runs(&self) -> SetRuns<'_> {
        SetRuns { mask: self, pos: 0 }
    }

    fn next_with(&self, from: usize, valid: bool) -> Option<usize> {
        if from >= self.len {
            return None;
        }
        let load = |idx: usize| {
            if valid {
                self.words[idx]
            } else {
                !self.words[idx]
            }
        };
        let mut word_idx = from / 64;
        let mut word = load(word_idx) & (u64::MAX << (from % 64));
        loop {
            if word != 0 {
                let idx = word_idx * 64 + word.trailing_zeros() as usize;
                return (idx < self.len).then_some(idx);
            }
            word_idx += 1;
            if word_idx >= self.words.len() {
                return None;
            }
            word = load(word_idx);
        }
    }
}

fn clear_tail(words: &mut [u64], len: usize) {
    let remainder = len % 64;
    if remainder > 0
        && let Some(last) = words.last_mut()
    {
        *last &= (1_u64 << remainder) - 1;
    }
}

/// Iterator returned by [`ValidityMask::set_runs`]. Skips whole words of
/// nulls or valid slots at a time.
#[derive(Debug, Clone)]
pub struct SetRuns<'a> {
    mask: &'a ValidityMask,
    pos: usize,
}

impl Iterator for SetRuns<'_> {
    type Item = (usize, usize);

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.mask.next_with(self.pos, true)?;
        let end = self
            .mask
            .next_with(start, false)
            .unwrap_or(self.mask.len);
        self.pos = end;
        Some((start, end - start))
    }
}

impl PartialEq for ValidityMask {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && self.words == other.words
    }
}

impl Serialize for ValidityMask {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let bits: Vec<bool> = self.bits().collect();
        let mut state = serializer.serialize_struct("ValidityMask", 1)?;
        state.serialize_field("bits", &bits)?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for ValidityMask {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            bits: Vec<bool>,
        }
        let raw = Raw::deserialize(deserializer)?;
        Ok(Self::from_bools(&raw.bits))
    }
}

/// Contiguous typed storage. Null slots hold `Default::default()`; callers
/// consult the column's [`ValidityMask`] before reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "dtype", content = "values", rename_all = "snake_case")]
pub enum ColumnData {
    Int8(Vec<i8>),
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    #[serde(rename = "uint8")]
    UInt8(Vec<u8>),
    #[serde(rename = "uint16")]
    UInt16(Vec<u16>),
    #[serde(rename = "uint32")]
    UInt32(Vec<u32>),
    #[serde(rename = "uint64")]
    UInt64(Vec<u64>),
    Float16(Vec<u16>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    Decimal128(Vec<i128>),
    Bool(Vec<bool>),
    Utf8(Vec<String>),
}

/// Evaluate `$body` with `$v` bound to the typed vector of any variant.
macro_rules! for_each_variant {
    ($data:expr, $v:ident => $body:expr) => {
        match $data {
            ColumnData::Int8($v) => $body,
            ColumnData::Int16($v) => $body,
            ColumnData::Int32($v) => $body,
            ColumnData::Int64($v) => $body,
            ColumnData::UInt8($v) => $body,
            ColumnData::UInt16($v) => $body,
            ColumnData::UInt32($v) => $body,
            ColumnData::UInt64($v) => $body,
            ColumnData::Float16($v) => $body,
            ColumnData::Float32($v) => $body,
            ColumnData::Float64($v) => $body,
            ColumnData::Decimal128($v) => $body,
            ColumnData::Bool($v) => $body,
            ColumnData::Utf8($v) => $body,
        }
    };
}

/// Pair two same-variant storages, binding `$a` and `$b`; `$mismatch` runs
/// when the variants differ.
macro_rules! zip_variants {
    ($left:expr, $right:expr, ($a:ident, $b:ident) => $body:expr, _ => $mismatch:expr) => {
        match ($left, $right) {
            (ColumnData::Int8($a), ColumnData::Int8($b)) => $body,
            (ColumnData::Int16($a), ColumnData::Int16($b)) => $body,
            (ColumnData::Int32($a), ColumnData::Int32($b)) => $body,
            (ColumnData::Int64($a), ColumnData::Int64($b)) => $body,
            (ColumnData::UInt8($a), ColumnData::UInt8($b)) => $body,
            (ColumnData::UInt16($a), ColumnData::UInt16($b)) => $body,
            (ColumnData::UInt32($a), ColumnData::UInt32($b)) => $body,
            (ColumnData::UInt64($a), ColumnData::UInt64($b)) => $body,
            (ColumnData::Float16($a), ColumnData::Float16($b)) => $body,
            (ColumnData::Float32($a), ColumnData::Float32($b)) => $body,
            (ColumnData::Float64($a), ColumnData::Float64($b)) => $body,
            (ColumnData::Decimal128($a), ColumnData::Decimal128($b)) => $body,
            (ColumnData::Bool($a), ColumnData::Bool($b)) => $body,
            (ColumnData::Utf8($a), ColumnData::Utf8($b)) => $body,
            _ => $mismatch,
        }
    };
}

impl ColumnData {
    #[must_use]
    pub fn with_capacity(dtype: DType, capacity: usize) -> Self {
        match dtype {
            DType::Int8 => Self::Int8(Vec::with_capacity(capacity)),
            DType::Int16 => Self::Int16(Vec::with_capacity(capacity)),
            DType::Int32 => Self::Int32(Vec::with_capacity(capacity)),
            DType::Int64 => Self::Int64(Vec::with_capacity(capacity)),
            DType::UInt8 => Self::UInt8(Vec::with_capacity(capacity)),
            DType::UInt16 => Self::UInt16(Vec::with_capacity(capacity)),
            DType::UInt32 => Self::UInt32(Vec::with_capacity(capacity)),
            DType::UInt64 => Self::UInt64(Vec::with_capacity(capacity)),
            DType::Float16 => Self::Float16(Vec::with_capacity(capacity)),
            DType::Float32 => Self::Float32(Vec::with_capacity(capacity)),
            DType::Float64 => Self::Float64(Vec::with_capacity(capacity)),
            DType::Decimal128 { .. } => Self::Decimal128(Vec::with_capacity(capacity)),
            DType::Bool => Self::Bool(Vec::with_capacity(capacity)),
            DType::Utf8 => Self::Utf8(Vec::with_capacity(capacity)),
        }
    }

    /// Whether this storage variant can back a column of `dtype`.
    #[must_use]
    pub fn matches(&self, dtype: DType) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(&Self::with_capacity(dtype, 0))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        for_each_variant!(self, v => v.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn reserve(&mut self, additional: usize) {
        for_each_variant!(self, v => v.reserve(additional));
    }

    fn push_defaults(&mut self, n: usize) {
        for_each_variant!(self, v => v.resize(v.len() + n, Default::default()));
    }

    /// Append `n` copies of a scalar already cast to this storage's type.
    fn push_repeat(&mut self, value: Scalar, n: usize) -> Result<(), ColumnError> {
        match (self, value) {
            (Self::Int8(v), Scalar::Int8(x)) => v.extend(repeat_n(x, n)),
            (Self::Int16(v), Scalar::Int16(x)) => v.extend(repeat_n(x, n)),
            (Self::Int32(v), Scalar::Int32(x)) => v.extend(repeat_n(x, n)),
            (Self::Int64(v), Scalar::Int64(x)) => v.extend(repeat_n(x, n)),
            (Self::UInt8(v), Scalar::UInt8(x)) => v.extend(repeat_n(x, n)),
            (Self::UInt16(v), Scalar::UInt16(x)) => v.extend(repeat_n(x, n)),
            (Self::UInt32(v), Scalar::UInt32(x)) => v.extend(repeat_n(x, n)),
            (Self::UInt64(v), Scalar::UInt64(x)) => v.extend(repeat_n(x, n)),
            (Self::Float16(v), Scalar::Float16(x)) => v.extend(repeat_n(x, n)),
            (Self::Float32(v), Scalar::Float32(x)) => v.extend(repeat_n(x, n)),
            (Self::Float64(v), Scalar::Float64(x)) => v.extend(repeat_n(x, n)),
            (Self::Decimal128(v), Scalar::Decimal128 { value, .. }) => {
                v.extend(repeat_n(value, n));
            }
            (Self::Bool(v), Scalar::Bool(x)) => v.extend(repeat_n(x, n)),
            (Self::Utf8(v), Scalar::Utf8(x)) => v.extend(repeat_n(x, n)),
            (_, other) => {
                return Err(ColumnError::ScalarMismatch {
                    scalar: format!("{other:?}"),
                });
            }
        }
        Ok(())
    }

    fn extend_range(&mut self, other: &Self, offset: usize, len: usize) -> Result<(), ColumnError> {
        zip_variants!(
            self,
            other,
            (dst, src) => dst.extend_from_slice(&src[offset..offset + len]),
            _ => return Err(ColumnError::ScalarMismatch {
                scalar: "storage variant".to_owned(),
            })
        );
        Ok(())
    }

    fn slice(&self, offset: usize, len: usize) -> Self {
        match self {
            Self::Int8(v) => Self::Int8(v[offset..offset + len].to_vec()),
            Self::Int16(v) => Self::Int16(v[offset..offset + len].to_vec()),
            Self::Int32(v) => Self::Int32(v[offset..offset + len].to_vec()),
            Self::Int64(v) => Self::Int64(v[offset..offset + len].to_vec()),
            Self::UInt8(v) => Self::UInt8(v[offset..offset + len].to_vec()),
            Self::UInt16(v) => Self::UInt16(v[offset..offset + len].to_vec()),
            Self::UInt32(v) => Self::UInt32(v[offset..offset + len].to_vec()),
            Self::UInt64(v) => Self::UInt64(v[offset..offset + len].to_vec()),
            Self::Float16(v) => Self::Float16(v[offset..offset + len].to_vec()),
            Self::Float32(v) => Self::Float32(v[offset..offset + len].to_vec()),
            Self::Float64(v) => Self::Float64(v[offset..offset + len].to_vec()),
            Self::Decimal128(v) => Self::Decimal128(v[offset..offset + len].to_vec()),
            Self::Bool(v) => Self::Bool(v[offset..offset + len].to_vec()),
            Self::Utf8(v) => Self::Utf8(v[offset..offset + len].to_vec()),
        }
    }

    fn scalar_at(&self, idx: usize, dtype: DType) -> Scalar {
        match self {
            Self::Int8(v) => Scalar::Int8(v[idx]),
            Self::Int16(v) => Scalar::Int16(v[idx]),
            Self::Int32(v) => Scalar::Int32(v[idx]),
            Self::Int64(v) => Scalar::Int64(v[idx]),
            Self::UInt8(v) => Scalar::UInt8(v[idx]),
            Self::UInt16(v) => Scalar::UInt16(v[idx]),
            Self::UInt32(v) => Scalar::UInt32(v[idx]),
            Self::UInt64(v) => Scalar::UInt64(v[idx]),
            Self::Float16(v) => Scalar::Float16(v[idx]),
            Self::Float32(v) => Scalar::Float32(v[idx]),
            Self::Float64(v) => Scalar::Float64(v[idx]),
            Self::Decimal128(v) => Scalar::Decimal128 {
                value: v[idx],
                scale: dtype.decimal_scale(),
            },
            Self::Bool(v) => Scalar::Bool(v[idx]),
            Self::Utf8(v) => Scalar::Utf8(v[idx].clone()),
        }
    }
}

/// Rust primitives that back a column variant one-to-one.
pub trait NativeType: Copy + Default + PartialEq + std::fmt::Debug + Send + Sync + 'static {
    const DTYPE: DType;

    fn wrap(values: Vec<Self>) -> ColumnData;

    fn slice_of(data: &ColumnData) -> Option<&[Self]>;
}

macro_rules! native_type {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl NativeType for $ty {
                const DTYPE: DType = DType::$variant;

                fn wrap(values: Vec<Self>) -> ColumnData {
                    ColumnData::$variant(values)
                }

                fn slice_of(data: &ColumnData) -> Option<&[Self]> {
                    match data {
                        ColumnData::$variant(v) => Some(v),
                        _ => None,
                    }
                }
            }
        )*
    };
}

native_type!(
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u8 => UInt8,
    u16 => UInt16,
    u32 => UInt32,
    u64 => UInt64,
    f32 => Float32,
    f64 => Float64,
    bool => Bool,
);

/// Element-wise arithmetic; every op produces a Float64 column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl ArithmeticOp {
    fn kernel(self) -> fn(f64, f64) -> f64 {
        match self {
            Self::Add => |a, b| a + b,
            Self::Sub => |a, b| a - b,
            Self::Mul => |a, b| a * b,
            Self::Div => |a, b| a / b,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ColumnError {
    #[error("column length mismatch: left={left}, right={right}")]
    LengthMismatch { left: usize, right: usize },
    #[error("expected dtype {expected:?} but found {found:?}")]
    DtypeMismatch { expected: DType, found: DType },
    #[error("range offset={offset} len={len} is outside column of length {column_len}")]
    OutOfBounds {
        offset: usize,
        len: usize,
        column_len: usize,
    },
    #[error("scalar {scalar} does not match the column storage")]
    ScalarMismatch { scalar: String },
    #[error(transparent)]
    Type(#[from] TypeError),
}

/// Zip two f64 slices through `op`; invalid output slots get 0.0.
fn vectorized_binary_f64(
    left: &[f64],
    right: &[f64],
    validity: &ValidityMask,
    op: ArithmeticOp,
) -> Vec<f64> {
    let apply = op.kernel();
    left.iter()
        .zip(right.iter())
        .enumerate()
        .map(|(i, (&l, &r))| if validity.get(i) { apply(l, r) } else { 0.0 })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawColumn")]
pub struct Column {
    dtype: DType,
    data: ColumnData,
    validity: ValidityMask,
}

/// Wire shape of a [`Column`] before the storage is checked against the
/// dtype and the validity length.
#[derive(Deserialize)]
struct RawColumn {
    dtype: DType,
    data: ColumnData,
    validity: ValidityMask,
}

impl TryFrom<RawColumn> for Column {
    type Error = ColumnError;

    fn try_from(raw: RawColumn) -> Result<Self, Self::Error> {
        Self::from_parts(raw.dtype, raw.data, raw.validity)
    }
}

impl Column {
    /// Build a column from scalars, casting each to `dtype`.
    pub fn new(dtype: DType, values: Vec<Scalar>) -> Result<Self, ColumnError> {
        let mut builder = ColumnBuilder::new(dtype);
        builder.reserve(values.len());
        for value in values {
            builder.append_scalar(value, 1)?;
        }
        Ok(builder.finish())
    }

    pub fn from_parts(
        dtype: DType,
        data: ColumnData,
        validity: ValidityMask,
    ) -> Result<Self, ColumnError> {
        if data.len() != validity.len() {
            return Err(ColumnError::LengthMismatch {
                left: data.len(),
                right: validity.len(),
            });
        }
        if !data.matches(dtype) {
            return Err(ColumnError::ScalarMismatch {
                scalar: format!("storage for {dtype:?}"),
            });
        }
        Ok(Self {
            dtype,
            data,
            validity,
        })
    }

    #[must_use]
    pub fn from_slice<T: NativeType>(values: &[T]) -> Self {
        Self {
            dtype: T::DTYPE,
            data: T::wrap(values.to_vec()),
            validity: ValidityMask::all_valid(values.len()),
        }
    }

    #[must_use]
    pub fn from_options<T: NativeType>(values: &[Option<T>]) -> Self {
        let bits: Vec<bool> = values.iter().map(Option::is_some).collect();
        Self {
            dtype: T::DTYPE,
            data: T::wrap(values.iter().map(|v| v.unwrap_or_default()).collect()),
            validity: ValidityMask::from_bools(&bits),
        }
    }

    #[must_use]
    pub fn decimal128(values: &[Option<i128>], scale: i32) -> Self {
        let bits: Vec<bool> = values.iter().map(Option::is_some).collect();
        Self {
            dtype: DType::Decimal128 { scale },
            data: ColumnData::Decimal128(values.iter().map(|v| v.unwrap_or_default()).collect()),
            validity: ValidityMask::from_bools(&bits),
        }
    }

    /// String column; `None` entries are null.
    #[must_use]
    pub fn utf8(values: &[Option<&str>]) -> Self {
        let bits: Vec<bool> = values.iter().map(Option::is_some).collect();
        Self {
            dtype: DType::Utf8,
            data: ColumnData::Utf8(
                values
                    .iter()
                    .map(|v| v.map(str::to_owned).unwrap_or_default())
                    .collect(),
            ),
            validity: ValidityMask::from_bools(&bits),
        }
    }

    /// Half-precision column from raw IEEE-754 binary16 bits.
    #[must_use]
    pub fn float16_bits(values: &[Option<u16>]) -> Self {
        let bits: Vec<bool> = values.iter().map(Option::is_some).collect();
        Self {
            dtype: DType::Float16,
            data: ColumnData::Float16(values.iter().map(|v| v.unwrap_or_default()).collect()),
            validity: ValidityMask::from_bools(&bits),
        }
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.validity.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn data(&self) -> &ColumnData {
        &self.data
    }

    #[must_use]
    pub fn validity(&self) -> &ValidityMask {
        &self.validity
    }

    #[must_use]
    pub fn null_count(&self) -> usize {
        self.validity.null_count()
    }

    #[must_use]
    pub fn valid_count(&self) -> usize {
        self.validity.count_valid()
    }

    #[must_use]
    pub fn is_valid(&self, idx: usize) -> bool {
        self.validity.get(idx)
    }

    /// Typed view of the storage, including placeholder values in null slots.
    #[must_use]
    pub fn values<T: NativeType>(&self) -> Option<&[T]> {
        T::slice_of(&self.data)
    }

    /// Scalar at `idx`; `Scalar::Null` for null slots, `None` past the end.
    #[must_use]
    pub fn value(&self, idx: usize) -> Option<Scalar> {
        if idx >= self.len() {
            return None;
        }
        if !self.validity.get(idx) {
            return Some(Scalar::Null);
        }
        Some(self.data.scalar_at(idx, self.dtype))
    }

    #[must_use]
    pub fn scalars(&self) -> Vec<Scalar> {
        (0..self.len()).filter_map(|idx| self.value(idx)).collect()
    }

    pub fn slice(&self, offset: usize, len: usize) -> Result<Self, ColumnError> {
        if offset.checked_add(len).is_none_or(|end| end > self.len()) {
            return Err(ColumnError::OutOfBounds {
                offset,
                len,
                column_len: self.len(),
            });
        }
        Ok(Self {
            dtype: self.dtype,
            data: self.data.slice(offset, len),
            validity: self.validity.slice(offset, len),
        })
    }

    /// Same values, with every slot that is null in `other` also nulled.
    pub fn with_joint_validity(&self, other: &Self) -> Result<Self, ColumnError> {
        if self.len() != other.len() {
            return Err(ColumnError::LengthMismatch {
                left: self.len(),
                right: other.len(),
            });
        }
        Ok(Self {
            dtype: self.dtype,
            data: self.data.clone(),
            validity: self.validity.and_mask(&other.validity),
        })
    }

    /// Project the storage onto f64. Null slots hold 0.0.
    pub fn to_f64_values(&self) -> Result<Vec<f64>, ColumnError> {
        let out = match &self.data {
            ColumnData::Int8(v) => v.iter().map(|&x| f64::from(x)).collect(),
            ColumnData::Int16(v) => v.iter().map(|&x| f64::from(x)).collect(),
            ColumnData::Int32(v) => v.iter().map(|&x| f64::from(x)).collect(),
            ColumnData::Int64(v) => v.iter().map(|&x| x as f64).collect(),
            ColumnData::UInt8(v) => v.iter().map(|&x| f64::from(x)).collect(),
            ColumnData::UInt16(v) => v.iter().map(|&x| f64::from(x)).collect(),
            ColumnData::UInt32(v) => v.iter().map(|&x| f64::from(x)).collect(),
            ColumnData::UInt64(v) => v.iter().map(|&x| x as f64).collect(),
            ColumnData::Float32(v) => v.iter().map(|&x| f64::from(x)).collect(),
            ColumnData::Float64(v) => v.clone(),
            ColumnData::Decimal128(v) => {
                let scale = self.dtype.decimal_scale();
                v.iter().map(|&x| decimal_to_f64(x, scale)).collect()
            }
            ColumnData::Float16(_) | ColumnData::Bool(_) | ColumnData::Utf8(_) => {
                return Err(TypeError::UnsupportedDtype { dtype: self.dtype }.into());
            }
        };
        Ok(out)
    }

    /// Element-wise `self op right` over the f64 projection of both sides.
    /// A slot is null in the output if it is null on either side.
    pub fn binary_numeric(&self, right: &Self, op: ArithmeticOp) -> Result<Self, ColumnError> {
        if self.len() != right.len() {
            return Err(ColumnError::LengthMismatch {
                left: self.len(),
                right: right.len(),
            });
        }
        let left_values = self.to_f64_values()?;
        let right_values = right.to_f64_values()?;
        let validity = self.validity.and_mask(&right.validity);
        let out = vectorized_binary_f64(&left_values, &right_values, &validity, op);
        Ok(Self {
            dtype: DType::Float64,
            data: ColumnData::Float64(out),
            validity,
        })
    }

    /// Element-wise `self op rhs`; nulls stay null.
    pub fn binary_scalar(&self, rhs: f64, op: ArithmeticOp) -> Result<Self, ColumnError> {
        let left_values = self.to_f64_values()?;
        let rhs_values = vec![rhs; left_values.len()];
        let out = vectorized_binary_f64(&left_values, &rhs_values, &self.validity, op);
        Ok(Self {
            dtype: DType::Float64,
            data: ColumnData::Float64(out),
            validity: self.validity.clone(),
        })
    }

    /// Equality over logical values: null slots compare equal regardless of
    /// their placeholder, NaN equals NaN.
    #[must_use]
    pub fn semantic_eq(&self, other: &Self) -> bool {
        self.dtype == other.dtype
            && self.len() == other.len()
            && (0..self.len()).all(|idx| match (self.value(idx), other.value(idx)) {
                (Some(a), Some(b)) => a.semantic_eq(&b),
                _ => false,
            })
    }
}

/// Incremental column construction; the only way output columns are made.
#[derive(Debug, Clone)]
pub struct ColumnBuilder {
    dtype: DType,
    data: ColumnData,
    bits: Vec<bool>,
}

impl ColumnBuilder {
    #[must_use]
    pub fn new(dtype: DType) -> Self {
        Self {
            dtype,
            data: ColumnData::with_capacity(dtype, 0),
            bits: Vec::new(),
        }
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn reserve(&mut self, additional: usize) {
        self.data.reserve(additional);
        self.bits.reserve(additional);
    }

    /// Append `value` `n` times after casting it to the builder dtype.
    /// A null scalar appends `n` nulls.
    pub fn append_scalar(&mut self, value: Scalar, n: usize) -> Result<(), ColumnError> {
        let cast = cast_scalar(value, self.dtype)?;
        if cast.is_null() {
            self.append_nulls(n);
            return Ok(());
        }
        self.data.push_repeat(cast, n)?;
        self.bits.extend(repeat_n(true, n));
        Ok(())
    }

    pub fn append_nulls(&mut self, n: usize) {
        self.data.push_defaults(n);
        self.bits.extend(repeat_n(false, n));
    }

    /// Copy `len` slots of `column` starting at `offset`, nulls included.
    pub fn append_column_range(
        &mut self,
        column: &Column,
        offset: usize,
        len: usize,
    ) -> Result<(), ColumnError> {
        if column.dtype != self.dtype {
            return Err(ColumnError::DtypeMismatch {
                expected: self.dtype,
                found: column.dtype,
            });
        }
        if offset.checked_add(len).is_none_or(|end| end > column.len()) {
            return Err(ColumnError::OutOfBounds {
                offset,
                len,
                column_len: column.len(),
            });
        }
        self.data.extend_range(&column.data, offset, len)?;
        self.bits
            .extend((offset..offset + len).map(|idx| column.validity.get(idx)));
        Ok(())
    }

    #[must_use]
    pub fn finish(self) -> Column {
        Column {
            dtype: self.dtype,
            data: self.data,
            validity: ValidityMask::from_bools(&self.bits),
        }
    }
}
