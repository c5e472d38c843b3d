#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Store-agnostic page descriptors.
//!
//! This crate only describes what to fetch: a [`Page`] with its window,
//! ordering and criteria groups, the [`Constraint`] attached to each
//! criterion, and the [`PartialResultList`] a fetch returns. Turning a page
//! into SQL lives in `pagekit-db`.

pub mod constraint;
pub mod error;
pub mod page;
pub mod result;
pub mod value;

pub use constraint::{Comparison, Constraint, ConstraintKind, LikeAnchor};
pub use error::{Error, Result};
pub use page::{
    Criteria, Cursor, DEFAULT_ORDER_FIELD, MAX_LIMIT, OrderKey, Page, PageBuilder, SortDir,
};
pub use result::{PartialResultList, UNKNOWN_TOTAL};
pub use value::{FromValue, Value};
