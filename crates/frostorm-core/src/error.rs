use crate::db::store::StoreError;
use std::fmt;
use thiserror::Error as ThisError;

///
/// InternalError
///
/// Structured runtime error with a stable internal classification.
/// Not a stable API; the facade crate maps it onto the public error type.
///

#[derive(Debug, ThisError)]
#[error("{message}")]
pub struct InternalError {
    pub class: ErrorClass,
    pub origin: ErrorOrigin,
    pub message: String,

    /// Optional structured error detail.
    /// The variant (if present) must correspond to `class`.
    pub detail: Option<ErrorDetail>,
}

impl InternalError {
    /// Construct an InternalError without a structured detail payload.
    pub fn new(class: ErrorClass, origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self {
            class,
            origin,
            message: message.into(),
            detail: None,
        }
    }

    /// Construct a compile-time semantic failure.
    pub fn semantic(err: SemanticError) -> Self {
        Self {
            class: ErrorClass::Semantic,
            origin: ErrorOrigin::Compile,
            message: err.to_string(),
            detail: Some(ErrorDetail::Semantic(err)),
        }
    }

    /// Construct a failure for an operation on an instance the context does not track.
    pub(crate) fn not_managed(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::NotManaged, ErrorOrigin::Context, message)
    }

    /// Construct an optimistic-lock failure for a concurrently modified row.
    pub(crate) fn optimistic_lock(entity: impl Into<String>, key: impl Into<String>) -> Self {
        let entity = entity.into();
        let key = key.into();

        Self {
            class: ErrorClass::OptimisticLock,
            origin: ErrorOrigin::Writer,
            message: format!(
                "optimistic lock failure: {entity} {key} was changed or deleted concurrently"
            ),
            detail: Some(ErrorDetail::OptimisticLock { entity, key }),
        }
    }

    /// Construct a missing-row failure for callers that require existence.
    pub fn not_found(entity: impl Into<String>, key: impl Into<String>) -> Self {
        let entity = entity.into();
        let key = key.into();

        Self {
            class: ErrorClass::NotFound,
            origin: ErrorOrigin::Loader,
            message: format!("entity not found: {entity} {key}"),
            detail: Some(ErrorDetail::NotFound { entity, key }),
        }
    }

    /// Construct a model-origin invariant violation (invalid mapping metadata).
    pub(crate) fn model_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::InvariantViolation, ErrorOrigin::Model, message)
    }

    /// Construct a model-origin unsupported mapping error.
    pub(crate) fn model_unsupported(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Unsupported, ErrorOrigin::Model, message)
    }

    /// Construct a statement-origin invariant violation.
    pub(crate) fn statement_invariant(message: impl Into<String>) -> Self {
        Self::new(
            ErrorClass::InvariantViolation,
            ErrorOrigin::Statement,
            message,
        )
    }

    /// Construct a context-origin invariant violation.
    pub(crate) fn context_invariant(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::InvariantViolation, ErrorOrigin::Context, message)
    }

    /// Construct a loader-origin invariant violation.
    pub(crate) fn loader_invariant(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::InvariantViolation, ErrorOrigin::Loader, message)
    }

    /// Construct a writer-origin invariant violation.
    pub(crate) fn writer_invariant(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::InvariantViolation, ErrorOrigin::Writer, message)
    }

    /// Construct a writer-origin conflict (duplicate key, key mutation).
    pub(crate) fn writer_conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Conflict, ErrorOrigin::Writer, message)
    }

    /// Construct a session-origin unsupported error.
    pub(crate) fn session_unsupported(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Unsupported, ErrorOrigin::Session, message)
    }

    /// Construct a config-origin error.
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Unsupported, ErrorOrigin::Config, message)
    }

    /// Construct an internal error for a poisoned lock.
    pub(crate) fn lock_poisoned(origin: ErrorOrigin, what: &str) -> Self {
        Self::new(
            ErrorClass::Internal,
            origin,
            format!("{what} lock poisoned"),
        )
    }

    #[must_use]
    pub const fn is_semantic(&self) -> bool {
        matches!(self.class, ErrorClass::Semantic)
    }

    #[must_use]
    pub const fn is_not_managed(&self) -> bool {
        matches!(self.class, ErrorClass::NotManaged)
    }

    #[must_use]
    pub const fn is_optimistic_lock(&self) -> bool {
        matches!(self.class, ErrorClass::OptimisticLock)
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self.class, ErrorClass::NotFound)
    }

    #[must_use]
    pub const fn is_store(&self) -> bool {
        matches!(self.detail, Some(ErrorDetail::Store(_)))
    }

    /// Borrow the semantic detail, if this is a compile failure.
    #[must_use]
    pub const fn semantic_detail(&self) -> Option<&SemanticError> {
        match &self.detail {
            Some(ErrorDetail::Semantic(err)) => Some(err),
            _ => None,
        }
    }

    #[must_use]
    pub fn display_with_class(&self) -> String {
        format!("{}:{}: {}", self.origin, self.class, self.message)
    }
}

impl From<SemanticError> for InternalError {
    fn from(err: SemanticError) -> Self {
        Self::semantic(err)
    }
}

impl From<StoreError> for InternalError {
    fn from(err: StoreError) -> Self {
        let class = match err {
            StoreError::DuplicateKey { .. } => ErrorClass::Conflict,
            _ => ErrorClass::Internal,
        };

        Self {
            class,
            origin: ErrorOrigin::Store,
            message: err.to_string(),
            detail: Some(ErrorDetail::Store(err)),
        }
    }
}

///
/// ErrorDetail
///
/// Structured, class-specific error detail carried by [`InternalError`].
///

#[derive(Debug, ThisError)]
pub enum ErrorDetail {
    #[error("{0}")]
    Semantic(SemanticError),

    #[error("{0}")]
    Store(StoreError),

    #[error("optimistic lock failure on {entity} {key}")]
    OptimisticLock { entity: String, key: String },

    #[error("not found: {entity} {key}")]
    NotFound { entity: String, key: String },
}

///
/// SemanticError
///
/// Query-language failures detected while parsing or compiling. These are
/// never recovered; compilation aborts on the first one.
///

#[remain::sorted]
#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
pub enum SemanticError {
    #[error("ambiguous selection: {message}")]
    AmbiguousSelection { message: String },

    #[error("collection-valued path '{path}' cannot be used here")]
    CollectionPathNotAllowed { path: String },

    #[error("identification variable '{alias}' is declared more than once")]
    DuplicateAlias { alias: String },

    #[error("invalid expression: {message}")]
    InvalidExpression { message: String },

    #[error("no binding supplied for parameter {parameter}")]
    MissingBinding { parameter: String },

    #[error("attribute '{attribute}' of {entity} is not a relationship")]
    NotARelationship { entity: String, attribute: String },

    #[error("syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },

    #[error("unknown identification variable '{alias}'")]
    UnknownAlias { alias: String },

    #[error("unknown attribute path '{path}' on {entity}")]
    UnknownAttribute { entity: String, path: String },

    #[error("unknown entity '{name}'")]
    UnknownEntity { name: String },

    #[error("unsupported construct: {construct}")]
    Unsupported { construct: String },
}

///
/// ErrorClass
/// Internal error taxonomy for runtime classification.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorClass {
    Semantic,
    NotManaged,
    OptimisticLock,
    NotFound,
    Conflict,
    Unsupported,
    InvariantViolation,
    Internal,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Semantic => "semantic",
            Self::NotManaged => "not_managed",
            Self::OptimisticLock => "optimistic_lock",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Unsupported => "unsupported",
            Self::InvariantViolation => "invariant_violation",
            Self::Internal => "internal",
        };
        write!(f, "{label}")
    }
}

///
/// ErrorOrigin
/// Internal origin taxonomy for runtime classification.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorOrigin {
    Model,
    Statement,
    Compile,
    Context,
    Loader,
    Writer,
    Store,
    Session,
    Config,
}

impl fmt::Display for ErrorOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Model => "model",
            Self::Statement => "statement",
            Self::Compile => "compile",
            Self::Context => "context",
            Self::Loader => "loader",
            Self::Writer => "writer",
            Self::Store => "store",
            Self::Session => "session",
            Self::Config => "config",
        };
        write!(f, "{label}")
    }
}
