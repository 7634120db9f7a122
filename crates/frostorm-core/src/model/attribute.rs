use crate::value::ValueKind;

///
/// AttributeDescriptor
/// One persisted scalar attribute (embedded sub-attributes are flattened).
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AttributeDescriptor {
    /// Attribute name as used in query paths; embedded attributes are
    /// named `embedded.sub`.
    pub name: String,
    pub column: String,
    pub kind: ValueKind,
    pub nullable: bool,
    /// Index of the owning embedded descriptor, if any.
    pub embedded: Option<usize>,
}

impl AttributeDescriptor {
    /// The last path segment of the attribute name.
    #[must_use]
    pub fn leaf_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }
}

///
/// EmbeddedDescriptor
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EmbeddedDescriptor {
    pub name: String,
    /// Indices into the owning entity's attribute list.
    pub attributes: Vec<usize>,
}

///
/// VersionPolicy
///
/// How a version column advances on every successful update.
///

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum VersionPolicy {
    #[default]
    Increment,
    Timestamp,
}

///
/// VersionDescriptor
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct VersionDescriptor {
    /// Index of the version attribute in the attribute list.
    pub attribute: usize,
    pub policy: VersionPolicy,
}
