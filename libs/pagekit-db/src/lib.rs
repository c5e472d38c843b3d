#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Relational execution of [`pagekit::Page`] descriptors over `sea-orm`.
//!
//! An [`EntityShape`] describes the tables behind a pageable entity. The
//! [`Pager`] translates a page against it, runs a two-phase fetch (parent
//! identities, then a fetch-join of their associations), collapses join
//! fan-out into one [`Record`] per entity and optionally counts the total.
//!
//! The pieces are usable on their own: [`translate`] for the query plan,
//! [`constraint_condition`] for single criteria and [`build_keyset_predicate`]
//! with [`normalize_result_order`] for cursor paging.

pub mod config;
pub mod error;
pub mod keyset;
pub mod materialize;
pub mod pager;
pub mod predicate;
pub mod projection;
pub mod record;
pub mod residual;
pub mod shape;
pub mod translate;

pub use config::{CollectionFilterMode, ENV_PREFIX, PagerConfig};
pub use error::{PagingError, PagingResult};
pub use keyset::{
    KeysetTerm, build_keyset_predicate, fetch_direction, normalize_result_order, null_ordering,
};
pub use materialize::{HydrationPlan, arrange};
pub use pager::Pager;
pub use predicate::{constraint_condition, normalize_constraint};
pub use projection::{FromProjection, Projection};
pub use record::Record;
pub use residual::{ChildTest, CollectionSort, CollectionTrim, Criterion, ResidualFilter};
pub use shape::{ELEMENT_FIELD, EntityShape, Field, FieldKind, Resolved, SoftDelete, ToMany, ToOne};
pub use translate::{OrderTerm, ROOT_ALIAS, Translation, translate};
