//! Parameter and column value types, and their Rust conversions.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::types::{ToSqlOutput, ValueRef};

use crate::error::{Error, Result};

/// A value that can be bound to a prepared statement parameter or read from
/// a result column. Mirrors the engine's five storage classes.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// 64-bit signed integer.
    Integer(i64),
    /// 64-bit IEEE float.
    Real(f64),
    /// UTF-8 text.
    Text(String),
    /// Binary blob.
    Blob(Vec<u8>),
}

impl Value {
    /// Returns `true` for SQL NULL.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Converts the stored value into `T`, failing with a cast error when
    /// the storage class or magnitude does not fit.
    pub fn decode<T: FromValue>(&self) -> Result<T> {
        T::from_value(self).ok_or_else(|| Error::cast(self, std::any::type_name::<T>()))
    }

    /// Short human-readable description used in error messages.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Null => "NULL".to_owned(),
            Self::Integer(i) => format!("integer {i}"),
            Self::Real(r) => format!("real {r}"),
            Self::Text(t) => format!("text `{t}`"),
            Self::Blob(b) => format!("{}-byte blob", b.len()),
        }
    }

    /// Renders the value as a standalone SQL literal. Used where the engine
    /// does not accept bound parameters (column defaults, check clauses).
    #[must_use]
    pub(crate) fn to_literal_sql(&self) -> String {
        match self {
            Self::Null => "NULL".to_owned(),
            Self::Integer(i) => i.to_string(),
            Self::Real(r) => r.to_string(),
            Self::Text(t) => format!("'{}'", t.replace('\'', "''")),
            Self::Blob(b) => {
                let mut out = String::with_capacity(3 + b.len() * 2);
                out.push_str("X'");
                for byte in b {
                    out.push_str(&format!("{byte:02X}"));
                }
                out.push('\'');
                out
            }
        }
    }

    /// Borrowing view for the binding layer.
    pub(crate) fn to_engine(&self) -> ToSqlOutput<'_> {
        match self {
            Self::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Self::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            Self::Real(r) => ToSqlOutput::Borrowed(ValueRef::Real(*r)),
            Self::Text(t) => ToSqlOutput::Borrowed(ValueRef::Text(t.as_bytes())),
            Self::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        }
    }

    /// Owned engine value, used where the binding layer wants ownership
    /// (scalar function results).
    pub(crate) fn into_engine(self) -> rusqlite::types::Value {
        match self {
            Self::Null => rusqlite::types::Value::Null,
            Self::Integer(i) => rusqlite::types::Value::Integer(i),
            Self::Real(r) => rusqlite::types::Value::Real(r),
            Self::Text(t) => rusqlite::types::Value::Text(t),
            Self::Blob(b) => rusqlite::types::Value::Blob(b),
        }
    }

    /// Snapshot of an engine column value.
    pub(crate) fn from_engine(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Self::Null,
            ValueRef::Integer(i) => Self::Integer(i),
            ValueRef::Real(r) => Self::Real(r),
            ValueRef::Text(t) => Self::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Self::Blob(b.to_vec()),
        }
    }
}

/// Conversion of a Rust value into its stored form. Total: every
/// implementor encodes as exactly one [`Value`].
pub trait ToValue {
    /// Encodes `self` as a database value.
    fn to_value(&self) -> Value;
}

/// Fallible conversion of a stored value back into a Rust type.
///
/// Returns `None` when the storage class is wrong or the magnitude does not
/// fit the target exactly.
pub trait FromValue: Sized {
    /// Decodes a database value, or `None` when it does not fit.
    fn from_value(value: &Value) -> Option<Self>;
}

impl ToValue for Value {
    fn to_value(&self) -> Value {
        self.clone()
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Option<Self> {
        Some(value.clone())
    }
}

impl ToValue for bool {
    fn to_value(&self) -> Value {
        Value::Integer(i64::from(*self))
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Integer(i) => Some(*i != 0),
            Value::Real(r) => Some(*r != 0.0),
            Value::Text(t) => {
                if t.eq_ignore_ascii_case("true") {
                    Some(true)
                } else if t.eq_ignore_ascii_case("false") {
                    Some(false)
                } else {
                    t.parse::<i64>().ok().map(|i| i != 0)
                }
            }
            _ => None,
        }
    }
}

macro_rules! impl_signed_integer {
    ($($t:ty),*) => {
        $(
            impl ToValue for $t {
                fn to_value(&self) -> Value {
                    Value::Integer(i64::from(*self))
                }
            }

            impl FromValue for $t {
                fn from_value(value: &Value) -> Option<Self> {
                    let wide = i64::from_value(value)?;
                    Self::try_from(wide).ok()
                }
            }
        )*
    };
}

impl_signed_integer!(i8, i16, i32);

impl ToValue for i64 {
    fn to_value(&self) -> Value {
        Value::Integer(*self)
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Integer(i) => Some(*i),
            // Accept exactly representable integral floats.
            #[allow(clippy::cast_possible_truncation)]
            Value::Real(r) if r.fract() == 0.0 && *r >= -9.007_199_254_740_992e15 && *r <= 9.007_199_254_740_992e15 => {
                Some(*r as Self)
            }
            Value::Text(t) => t.parse().ok(),
            _ => None,
        }
    }
}

impl ToValue for isize {
    fn to_value(&self) -> Value {
        Value::Integer(*self as i64)
    }
}

impl FromValue for isize {
    fn from_value(value: &Value) -> Option<Self> {
        Self::try_from(i64::from_value(value)?).ok()
    }
}

macro_rules! impl_small_unsigned {
    ($($t:ty),*) => {
        $(
            impl ToValue for $t {
                fn to_value(&self) -> Value {
                    Value::Integer(i64::from(*self))
                }
            }

            impl FromValue for $t {
                fn from_value(value: &Value) -> Option<Self> {
                    Self::try_from(i64::from_value(value)?).ok()
                }
            }
        )*
    };
}

impl_small_unsigned!(u8, u16, u32);

impl ToValue for u64 {
    fn to_value(&self) -> Value {
        // Values beyond the signed range are stored as decimal text; this
        // is the documented round-trip exception for unsigned 64-bit.
        i64::try_from(*self).map_or_else(|_| Value::Text(self.to_string()), Value::Integer)
    }
}

impl FromValue for u64 {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Integer(i) => Self::try_from(*i).ok(),
            Value::Text(t) => t.parse().ok(),
            _ => None,
        }
    }
}

impl ToValue for usize {
    fn to_value(&self) -> Value {
        (*self as u64).to_value()
    }
}

impl FromValue for usize {
    fn from_value(value: &Value) -> Option<Self> {
        Self::try_from(u64::from_value(value)?).ok()
    }
}

impl ToValue for f64 {
    fn to_value(&self) -> Value {
        Value::Real(*self)
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Real(r) => Some(*r),
            #[allow(clippy::cast_precision_loss)]
            Value::Integer(i) => Some(*i as Self),
            Value::Text(t) => t.parse().ok(),
            _ => None,
        }
    }
}

impl ToValue for f32 {
    fn to_value(&self) -> Value {
        Value::Real(f64::from(*self))
    }
}

impl FromValue for f32 {
    fn from_value(value: &Value) -> Option<Self> {
        let wide = f64::from_value(value)?;
        #[allow(clippy::cast_possible_truncation)]
        let narrow = wide as Self;
        // Exact-fit narrowing only.
        if f64::from(narrow) == wide || wide.is_nan() {
            Some(narrow)
        } else {
            None
        }
    }
}

impl ToValue for String {
    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Text(t) => Some(t.clone()),
            // Numeric storage converts through standard formatting.
            Value::Integer(i) => Some(i.to_string()),
            Value::Real(r) => Some(r.to_string()),
            _ => None,
        }
    }
}

impl ToValue for &str {
    fn to_value(&self) -> Value {
        Value::Text((*self).to_owned())
    }
}

impl ToValue for Vec<u8> {
    fn to_value(&self) -> Value {
        Value::Blob(self.clone())
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Blob(b) => Some(b.clone()),
            _ => None,
        }
    }
}

impl ToValue for &[u8] {
    fn to_value(&self) -> Value {
        Value::Blob(self.to_vec())
    }
}

impl ToValue for SystemTime {
    fn to_value(&self) -> Value {
        // Seconds since the Unix epoch, negative for earlier instants.
        let seconds = self.duration_since(UNIX_EPOCH).map_or_else(
            |earlier| -earlier.duration().as_secs_f64(),
            |d| d.as_secs_f64(),
        );
        Value::Real(seconds)
    }
}

impl FromValue for SystemTime {
    fn from_value(value: &Value) -> Option<Self> {
        let seconds = f64::from_value(value)?;
        if !seconds.is_finite() {
            return None;
        }
        let magnitude = Duration::try_from_secs_f64(seconds.abs()).ok()?;
        if seconds >= 0.0 {
            UNIX_EPOCH.checked_add(magnitude)
        } else {
            UNIX_EPOCH.checked_sub(magnitude)
        }
    }
}

impl ToValue for url::Url {
    fn to_value(&self) -> Value {
        Value::Text(self.as_str().to_owned())
    }
}

impl FromValue for url::Url {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Text(t) => Self::parse(t).ok(),
            _ => None,
        }
    }
}

impl<T: ToValue> ToValue for Option<T> {
    fn to_value(&self) -> Value {
        self.as_ref().map_or(Value::Null, ToValue::to_value)
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Option<Self> {
        if value.is_null() {
            Some(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}

macro_rules! impl_from_for_value {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    v.to_value()
                }
            }
        )*
    };
}

impl_from_for_value!(bool, i8, i16, i32, i64, u8, u16, u32, u64, f32, f64, String, &str, Vec<u8>, &[u8], SystemTime);

/// Convenience macro for building parameter lists.
///
/// Usage: `params![1_i64, blob.as_slice(), "text"]`
#[macro_export]
macro_rules! params {
    ($($val:expr),* $(,)?) => {
        &[$($crate::Value::from($val)),*][..]
    };
}
