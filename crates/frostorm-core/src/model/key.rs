use crate::value::Value;
use std::fmt;

///
/// KeyGeneration
///
/// Primary-key assignment strategy.
///
/// - `Identity` keys are only known after the insert returns.
/// - `Sequence` and `Ulid` keys are fetched before the insert.
///

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum KeyGeneration {
    #[default]
    Assigned,
    Identity,
    Sequence(String),
    Ulid,
}

impl KeyGeneration {
    #[must_use]
    pub const fn is_identity(&self) -> bool {
        matches!(self, Self::Identity)
    }
}

///
/// PrimaryKeyDescriptor
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PrimaryKeyDescriptor {
    /// Indices into the attribute list, in key-column order.
    pub attributes: Vec<usize>,
    pub generation: KeyGeneration,
}

impl PrimaryKeyDescriptor {
    #[must_use]
    pub const fn is_composite(&self) -> bool {
        self.attributes.len() > 1
    }

    #[must_use]
    pub fn contains(&self, attribute: usize) -> bool {
        self.attributes.contains(&attribute)
    }
}

///
/// PrimaryKey
///
/// Ordered key values, one per key column. A key containing Null is
/// incomplete and never enters the identity map.
///

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PrimaryKey(Vec<Value>);

impl PrimaryKey {
    #[must_use]
    pub const fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    #[must_use]
    pub fn single(value: impl Into<Value>) -> Self {
        Self(vec![value.into()])
    }

    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.0
    }

    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        self.0
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.0.is_empty() && self.0.iter().all(|v| !v.is_null())
    }
}

impl From<Value> for PrimaryKey {
    fn from(value: Value) -> Self {
        Self(vec![value])
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{value}")?;
        }
        write!(f, "]")
    }
}
