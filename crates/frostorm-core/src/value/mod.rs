mod arith;
mod compare;


use std::{fmt, hash::Hash};
use thiserror::Error as ThisError;
use time::{Date, PrimitiveDateTime, Time};
use ulid::Ulid;

pub use arith::ArithmeticOp;

///
/// Value
///
/// Dialect-neutral scalar carried by attributes, literals, bound parameters
/// and store rows.
///
/// Null → SQL NULL. Comparisons involving Null are unknown under SQL rules
/// (`sql_cmp`), but Null sorts first under the canonical order used for keys.
///

#[derive(Clone, Debug)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Blob(Vec<u8>),
    Date(Date),
    Time(Time),
    Timestamp(PrimitiveDateTime),
    Ulid(Ulid),
}

impl Value {
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub const fn is_numeric(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Float(_))
    }

    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    #[expect(clippy::cast_precision_loss)]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Kind of this value, or `None` for Null.
    #[must_use]
    pub const fn kind(&self) -> Option<ValueKind> {
        match self {
            Self::Null => None,
            Self::Bool(_) => Some(ValueKind::Bool),
            Self::Int(_) => Some(ValueKind::Int),
            Self::Float(_) => Some(ValueKind::Float),
            Self::Text(_) => Some(ValueKind::Text),
            Self::Blob(_) => Some(ValueKind::Blob),
            Self::Date(_) => Some(ValueKind::Date),
            Self::Time(_) => Some(ValueKind::Time),
            Self::Timestamp(_) => Some(ValueKind::Timestamp),
            Self::Ulid(_) => Some(ValueKind::Ulid),
        }
    }

    /// Stable rank used by canonical ordering across value families.
    const fn family_rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Int(_) | Self::Float(_) => 2,
            Self::Text(_) => 3,
            Self::Blob(_) => 4,
            Self::Date(_) => 5,
            Self::Time(_) => 6,
            Self::Timestamp(_) => 7,
            Self::Ulid(_) => 8,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v:?}"),
            Self::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Self::Blob(bytes) => {
                write!(f, "X'")?;
                for b in bytes {
                    write!(f, "{b:02X}")?;
                }
                write!(f, "'")
            }
            Self::Date(d) => write!(f, "DATE '{d}'"),
            Self::Time(t) => write!(f, "TIME '{t}'"),
            Self::Timestamp(ts) => write!(f, "TIMESTAMP '{ts}'"),
            Self::Ulid(u) => write!(f, "'{u}'"),
        }
    }
}

macro_rules! impl_value_from {
    ( $( $ty:ty => $variant:ident ),* $(,)? ) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Self::$variant(v.into())
                }
            }
        )*
    };
}

impl_value_from! {
    bool => Bool,
    i32 => Int,
    i64 => Int,
    u32 => Int,
    f64 => Float,
    String => Text,
    &str => Text,
    Vec<u8> => Blob,
    Date => Date,
    Time => Time,
    PrimitiveDateTime => Timestamp,
    Ulid => Ulid,
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

///
/// ValueKind
///
/// Declared column type. Used by the metadata model for validation and by
/// literal coercion when binding to typed attributes.
///

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ValueKind {
    Bool,
    Int,
    Float,
    Text,
    Blob,
    Date,
    Time,
    Timestamp,
    Ulid,
}

impl ValueKind {
    /// Coerce a value into this kind where the conversion is lossless.
    pub fn coerce(self, value: Value) -> Result<Value, ValueError> {
        match (self, value) {
            (_, Value::Null) => Ok(Value::Null),
            (Self::Float, Value::Int(v)) => {
                #[expect(clippy::cast_precision_loss)]
                let f = v as f64;
                Ok(Value::Float(f))
            }
            #[expect(clippy::cast_possible_truncation)]
            (Self::Int, Value::Float(f)) if f.fract() == 0.0 && f.is_finite() => {
                Ok(Value::Int(f as i64))
            }
            (Self::Ulid, Value::Text(s)) => Ulid::from_string(&s)
                .map(Value::Ulid)
                .map_err(|_| ValueError::Coercion {
                    kind: self,
                    value: Value::Text(s),
                }),
            (kind, value) if value.kind() == Some(kind) => Ok(value),
            (kind, value) => Err(ValueError::Coercion { kind, value }),
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Text => "text",
            Self::Blob => "blob",
            Self::Date => "date",
            Self::Time => "time",
            Self::Timestamp => "timestamp",
            Self::Ulid => "ulid",
        };
        write!(f, "{label}")
    }
}

///
/// ValueError
///

#[derive(Clone, Debug, PartialEq, ThisError)]
pub enum ValueError {
    #[error("cannot coerce {value} into {kind}")]
    Coercion { kind: ValueKind, value: Value },

    #[error("division by zero")]
    DivisionByZero,

    #[error("numeric overflow in {op}")]
    Overflow { op: ArithmeticOp },

    #[error("operator {op} is not defined for {left} and {right}")]
    TypeMismatch {
        op: ArithmeticOp,
        left: Value,
        right: Value,
    },
}
