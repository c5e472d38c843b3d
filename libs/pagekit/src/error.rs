/// Descriptor-level errors.
///
/// Every variant is raised synchronously while a `Page` or a `Constraint` is
/// being built, before any store access happens.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("cannot convert {got} value to {expected}")]
    Conversion {
        expected: &'static str,
        got: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
