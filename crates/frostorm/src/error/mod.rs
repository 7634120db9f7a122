#[cfg(test)]
mod tests;

use derive_more::Display;
use frostorm_core::error::{
    ErrorClass, ErrorDetail, ErrorOrigin as CoreErrorOrigin, InternalError, SemanticError,
};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

///
/// Error
/// Public error type with a stable kind + origin taxonomy.
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize, ThisError)]
#[error("{message}")]
pub struct Error {
    pub kind: ErrorKind,
    pub origin: ErrorOrigin,
    pub message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self {
            kind,
            origin,
            message: message.into(),
        }
    }

    #[must_use]
    pub const fn is_optimistic_lock(&self) -> bool {
        matches!(self.kind, ErrorKind::Persistence(PersistenceErrorKind::OptimisticLock))
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self.kind, ErrorKind::Persistence(PersistenceErrorKind::NotFound))
    }
}

impl From<InternalError> for Error {
    fn from(err: InternalError) -> Self {
        let kind = match (err.class, &err.detail) {
            (ErrorClass::Semantic, Some(ErrorDetail::Semantic(semantic))) => {
                ErrorKind::Query(semantic.into())
            }
            (ErrorClass::Semantic, _) => ErrorKind::Query(QueryErrorKind::Invalid),
            (ErrorClass::NotManaged, _) => ErrorKind::Persistence(PersistenceErrorKind::NotManaged),
            (ErrorClass::OptimisticLock, _) => {
                ErrorKind::Persistence(PersistenceErrorKind::OptimisticLock)
            }
            (ErrorClass::NotFound, _) => ErrorKind::Persistence(PersistenceErrorKind::NotFound),
            (ErrorClass::Conflict, _) => ErrorKind::Persistence(PersistenceErrorKind::Conflict),
            (ErrorClass::Unsupported, _) => ErrorKind::Unsupported,
            (ErrorClass::InvariantViolation | ErrorClass::Internal, _) => ErrorKind::Internal,
        };

        Self::new(kind, err.origin.into(), err.message)
    }
}

///
/// ErrorKind
/// Public error taxonomy for callers.
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum ErrorKind {
    Query(QueryErrorKind),
    Persistence(PersistenceErrorKind),

    /// The operation is well-formed but not offered in this position.
    Unsupported,

    /// The caller cannot remediate this.
    Internal,
}

///
/// QueryErrorKind
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum QueryErrorKind {
    /// Query text does not parse.
    Syntax,

    /// Names an entity, alias or attribute the mapping does not have.
    UnknownName,

    /// A parameter has no bound value.
    MissingBinding,

    /// Parses and resolves, but is not a valid query.
    Invalid,

    /// Valid, but uses a construct the compiler does not support.
    Unsupported,
}

impl From<&SemanticError> for QueryErrorKind {
    fn from(err: &SemanticError) -> Self {
        match err {
            SemanticError::Syntax { .. } => Self::Syntax,
            SemanticError::UnknownAlias { .. }
            | SemanticError::UnknownAttribute { .. }
            | SemanticError::UnknownEntity { .. }
            | SemanticError::NotARelationship { .. } => Self::UnknownName,
            SemanticError::MissingBinding { .. } => Self::MissingBinding,
            SemanticError::Unsupported { .. } => Self::Unsupported,
            SemanticError::AmbiguousSelection { .. }
            | SemanticError::CollectionPathNotAllowed { .. }
            | SemanticError::DuplicateAlias { .. }
            | SemanticError::InvalidExpression { .. } => Self::Invalid,
        }
    }
}

///
/// PersistenceErrorKind
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum PersistenceErrorKind {
    /// The instance is not tracked by the session.
    NotManaged,

    /// The row changed since it was read.
    OptimisticLock,

    /// The row does not exist.
    NotFound,

    /// Key or state conflict.
    Conflict,
}

///
/// ErrorOrigin
/// Public origin taxonomy for callers.
///

#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, PartialEq, Serialize)]
pub enum ErrorOrigin {
    Compile,
    Config,
    Context,
    Loader,
    Model,
    Session,
    Statement,
    Store,
    Writer,
}

impl From<CoreErrorOrigin> for ErrorOrigin {
    fn from(origin: CoreErrorOrigin) -> Self {
        match origin {
            CoreErrorOrigin::Compile => Self::Compile,
            CoreErrorOrigin::Config => Self::Config,
            CoreErrorOrigin::Context => Self::Context,
            CoreErrorOrigin::Loader => Self::Loader,
            CoreErrorOrigin::Model => Self::Model,
            CoreErrorOrigin::Session => Self::Session,
            CoreErrorOrigin::Statement => Self::Statement,
            CoreErrorOrigin::Store => Self::Store,
            CoreErrorOrigin::Writer => Self::Writer,
        }
    }
}
