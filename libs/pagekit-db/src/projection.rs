//! Positional DTO projection.
//!
//! A [`Projection`] lists field paths; each page entity yields one value per
//! path, in declaration order, and [`FromProjection`] builds the target type
//! from that row.

use pagekit::{FromValue, Value};

use crate::error::{PagingError, PagingResult};
use crate::record::Record;
use crate::shape::EntityShape;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Projection {
    paths: Vec<String>,
}

impl Projection {
    #[must_use]
    pub fn of<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    /// Record keys for the paths. Only root and to-one paths can be
    /// projected: a to-many path has no single value per entity.
    pub(crate) fn keys(&self, shape: &EntityShape) -> PagingResult<Vec<String>> {
        if self.paths.is_empty() {
            return Err(PagingError::Projection("no paths to project".to_owned()));
        }
        self.paths
            .iter()
            .map(|path| {
                let resolved = shape.resolve(path)?;
                if resolved.is_to_many() {
                    return Err(PagingError::Projection(format!(
                        "{path} is a to-many path"
                    )));
                }
                Ok(resolved.record_key())
            })
            .collect()
    }
}

pub(crate) fn project_record<D: FromProjection>(record: &Record, keys: &[String]) -> PagingResult<D> {
    D::from_projection(keys.iter().map(|k| record.value(k)).collect())
}

/// Construction from projected values, position for position.
pub trait FromProjection: Sized {
    /// # Errors
    /// Returns `PagingError::Projection` on arity or type mismatch.
    fn from_projection(values: Vec<Value>) -> PagingResult<Self>;
}

impl FromProjection for Vec<Value> {
    fn from_projection(values: Vec<Value>) -> PagingResult<Self> {
        Ok(values)
    }
}

fn check_arity(values: &[Value], expected: usize) -> PagingResult<()> {
    if values.len() == expected {
        Ok(())
    } else {
        Err(PagingError::Projection(format!(
            "expected {expected} values, got {}",
            values.len()
        )))
    }
}

fn next<T: FromValue>(it: &mut impl Iterator<Item = (usize, Value)>) -> PagingResult<T> {
    let (i, v) = it
        .next()
        .ok_or_else(|| PagingError::Projection("missing value".to_owned()))?;
    T::from_value(v).map_err(|e| PagingError::Projection(format!("value {i}: {e}")))
}

macro_rules! tuple_projection {
    ($n:literal => $($t:ident),+) => {
        impl<$($t: FromValue),+> FromProjection for ($($t,)+) {
            fn from_projection(values: Vec<Value>) -> PagingResult<Self> {
                check_arity(&values, $n)?;
                let mut it = values.into_iter().enumerate();
                Ok(($(next::<$t>(&mut it)?,)+))
            }
        }
    };
}

tuple_projection!(1 => A);
tuple_projection!(2 => A, B);
tuple_projection!(3 => A, B, C);
tuple_projection!(4 => A, B, C, D);
tuple_projection!(5 => A, B, C, D, E);
tuple_projection!(6 => A, B, C, D, E, F);
