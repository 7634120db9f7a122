use super::Value;
use std::{
    cmp::Ordering,
    hash::{Hash, Hasher},
};

// 2^63: the first float above every i64.
const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;

impl Value {
    /// Total order over all values.
    ///
    /// Null sorts first, families sort by rank, and Int/Float compare
    /// numerically so `Int(1)` and `Float(1.0)` are the same key.
    #[must_use]
    pub fn canonical_cmp(&self, other: &Self) -> Ordering {
        let rank = self.family_rank().cmp(&other.family_rank());
        if rank != Ordering::Equal {
            return rank;
        }

        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => cmp_float(*a, *b),
            (Self::Int(a), Self::Float(b)) => cmp_int_float(*a, *b),
            (Self::Float(a), Self::Int(b)) => cmp_int_float(*b, *a).reverse(),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            (Self::Blob(a), Self::Blob(b)) => a.cmp(b),
            (Self::Date(a), Self::Date(b)) => a.cmp(b),
            (Self::Time(a), Self::Time(b)) => a.cmp(b),
            (Self::Timestamp(a), Self::Timestamp(b)) => a.cmp(b),
            (Self::Ulid(a), Self::Ulid(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }

    /// SQL comparison: unknown when either side is Null or the families differ.
    #[must_use]
    pub fn sql_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.is_null() || other.is_null() {
            return None;
        }
        if self.family_rank() != other.family_rank() {
            return None;
        }

        Some(self.canonical_cmp(other))
    }

    /// SQL equality under three-valued logic.
    #[must_use]
    pub fn sql_eq(&self, other: &Self) -> Option<bool> {
        self.sql_cmp(other).map(Ordering::is_eq)
    }
}

// -0.0 and 0.0 are one key; NaNs keep their total_cmp place.
fn cmp_float(a: f64, b: f64) -> Ordering {
    if a == b {
        Ordering::Equal
    } else {
        a.total_cmp(&b)
    }
}

// Exact comparison; no rounding of the integer through f64.
fn cmp_int_float(int: i64, float: f64) -> Ordering {
    if float.is_nan() {
        return if float.is_sign_negative() {
            Ordering::Greater
        } else {
            Ordering::Less
        };
    }
    if float >= I64_BOUND {
        return Ordering::Less;
    }
    if float < -I64_BOUND {
        return Ordering::Greater;
    }

    let whole = float.trunc();
    #[expect(clippy::cast_possible_truncation)]
    let truncated = whole as i64;
    int.cmp(&truncated).then_with(|| {
        if float > whole {
            Ordering::Less
        } else if float < whole {
            Ordering::Greater
        } else {
            Ordering::Equal
        }
    })
}

/// The Int an integral float equals, when one exists.
fn integral(float: f64) -> Option<i64> {
    if float.fract() != 0.0 || float >= I64_BOUND || float < -I64_BOUND {
        return None;
    }
    #[expect(clippy::cast_possible_truncation)]
    let int = float as i64;
    Some(int)
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.canonical_cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        self.canonical_cmp(other)
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.family_rank().hash(state);
        match self {
            Self::Null => {}
            Self::Bool(b) => b.hash(state),
            Self::Int(v) => v.hash(state),
            // integral floats hash like the equal Int
            Self::Float(f) => match integral(*f) {
                Some(int) => int.hash(state),
                None => f.to_bits().hash(state),
            },
            Self::Text(s) => s.hash(state),
            Self::Blob(b) => b.hash(state),
            Self::Date(d) => d.hash(state),
            Self::Time(t) => t.hash(state),
            Self::Timestamp(ts) => ts.hash(state),
            Self::Ulid(u) => u.hash(state),
        }
    }
}
