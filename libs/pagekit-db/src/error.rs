use thiserror::Error;

use crate::shape::FieldKind;

#[derive(Debug, Error)]
pub enum PagingError {
    #[error(transparent)]
    Descriptor(#[from] pagekit::Error),

    #[error("unknown field: {0}")]
    UnknownField(String),

    #[error("type mismatch on {field}: expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: FieldKind,
        got: &'static str,
    },

    #[error("{constraint} constraint is not supported on {kind} field {field}")]
    UnsupportedConstraint {
        field: String,
        constraint: pagekit::ConstraintKind,
        kind: FieldKind,
    },

    #[error("cannot page by cursor over ordering key {0}")]
    UnsupportedCursorOrdering(String),

    #[error("cursor entity {0} not found")]
    CursorNotFound(String),

    #[error("projection: {0}")]
    Projection(String),

    #[error("cannot decode result: {0}")]
    Decode(String),

    #[error("invalid pager configuration: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error(transparent)]
    Db(#[from] sea_orm::DbErr),
}

impl From<figment::Error> for PagingError {
    fn from(e: figment::Error) -> Self {
        PagingError::Config(Box::new(e))
    }
}

pub type PagingResult<T> = Result<T, PagingError>;
