//! Immutable page descriptor and its builder.
//!
//! A `Page` says which slice of an entity set to return: either an
//! `offset`/`limit` window or a keyset window anchored on a cursor entity,
//! a multi-key ordering, and two criteria groups. Every entry of
//! `required` must hold, and at least one entry of `optional` must hold when
//! that group is non-empty.
//!
//! # Example
//!
//! ```
//! use pagekit::{Constraint, Page};
//!
//! let page = Page::with()
//!     .range(20, 10)
//!     .order_by("name", true)
//!     .order_by("id", false)
//!     .all_match([("active", Constraint::from(true))])
//!     .any_match([
//!         ("name", Constraint::like_starts("a").unwrap()),
//!         ("address.city", Constraint::ignore_case("Oslo").unwrap()),
//!     ])
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(page.offset(), 20);
//! assert_eq!(page.order()[0].field, "name");
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{Constraint, Error, Result, Value};

/// Largest limit a store accepts as a bound parameter.
pub const MAX_LIMIT: u64 = 9_223_372_036_854_775_807;

/// Field ordered on when the caller gives no ordering.
pub const DEFAULT_ORDER_FIELD: &str = "id";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortDir {
    #[serde(rename = "asc")]
    Asc,
    #[serde(rename = "desc")]
    Desc,
}

impl SortDir {
    #[must_use]
    pub fn from_ascending(ascending: bool) -> Self {
        if ascending { SortDir::Asc } else { SortDir::Desc }
    }

    #[must_use]
    pub fn is_ascending(self) -> bool {
        matches!(self, SortDir::Asc)
    }

    /// Reverse the sort direction (Asc <-> Desc)
    #[must_use]
    pub fn reverse(self) -> Self {
        match self {
            SortDir::Asc => SortDir::Desc,
            SortDir::Desc => SortDir::Asc,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderKey {
    pub field: String,
    pub dir: SortDir,
}

/// Anchor entity of a keyset page.
///
/// `keys` may carry a snapshot of the anchor's ordering-field values. Keys
/// that are missing are looked up from the store by `identity`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cursor {
    pub identity: Value,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub keys: BTreeMap<String, Value>,
}

impl Cursor {
    pub fn identity(identity: impl Into<Value>) -> Self {
        Self {
            identity: identity.into(),
            keys: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_key(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.keys.insert(field.into(), value.into());
        self
    }

    #[must_use]
    pub fn key(&self, field: &str) -> Option<&Value> {
        self.keys.get(field)
    }
}

impl From<Value> for Cursor {
    fn from(identity: Value) -> Self {
        Cursor::identity(identity)
    }
}

impl From<i64> for Cursor {
    fn from(identity: i64) -> Self {
        Cursor::identity(identity)
    }
}

impl From<uuid::Uuid> for Cursor {
    fn from(identity: uuid::Uuid) -> Self {
        Cursor::identity(identity)
    }
}

pub type Criteria = BTreeMap<String, Constraint>;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "PageWire")]
pub struct Page {
    offset: u64,
    limit: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cursor: Option<Cursor>,
    #[serde(default)]
    reversed: bool,
    order: Vec<OrderKey>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    required: Criteria,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    optional: Criteria,
}

impl Page {
    #[must_use]
    pub fn with() -> PageBuilder {
        PageBuilder::default()
    }

    /// Plain offset window ordered by the default key.
    ///
    /// # Errors
    /// Returns `Error::InvalidArgument` for a negative offset or a limit below one.
    pub fn of(offset: i64, limit: i64) -> Result<Self> {
        Page::with().range(offset, limit).build()
    }

    /// Everything, ordered by the default key.
    #[must_use]
    pub fn all() -> Self {
        Self::unbounded(MAX_LIMIT)
    }

    /// The first entity by the default key.
    #[must_use]
    pub fn one() -> Self {
        Self::unbounded(1)
    }

    fn unbounded(limit: u64) -> Self {
        Self {
            offset: 0,
            limit,
            cursor: None,
            reversed: false,
            order: default_order(),
            required: Criteria::new(),
            optional: Criteria::new(),
        }
    }

    /// Offset into the result set. Ignored for keyset pages.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    #[must_use]
    pub fn limit(&self) -> u64 {
        self.limit
    }

    #[must_use]
    pub fn cursor(&self) -> Option<&Cursor> {
        self.cursor.as_ref()
    }

    #[must_use]
    pub fn is_keyset(&self) -> bool {
        self.cursor.is_some()
    }

    /// Keyset pages only: walk backwards from the cursor.
    #[must_use]
    pub fn is_reversed(&self) -> bool {
        self.reversed
    }

    /// Ordering keys; the first one is the primary key.
    #[must_use]
    pub fn order(&self) -> &[OrderKey] {
        &self.order
    }

    #[must_use]
    pub fn required(&self) -> &Criteria {
        &self.required
    }

    #[must_use]
    pub fn optional(&self) -> &Criteria {
        &self.optional
    }

    /// Stable key for result caches: equal pages give equal keys.
    ///
    /// Criteria are keyed by path so their insertion order does not matter;
    /// ordering keys are significant in sequence.
    #[must_use]
    pub fn cache_key(&self) -> String {
        let mut h = Sha256::new();
        h.update(format!("o={};l={};r={};", self.offset, self.limit, self.reversed));
        if let Some(cursor) = &self.cursor {
            h.update("c=");
            feed_value(&mut h, &cursor.identity);
            for (field, value) in &cursor.keys {
                h.update(format!("{field}:"));
                feed_value(&mut h, value);
            }
        }
        for key in &self.order {
            h.update(format!("s={}:{};", key.field, key.dir.is_ascending()));
        }
        for (tag, criteria) in [("all", &self.required), ("any", &self.optional)] {
            for (path, constraint) in criteria {
                h.update(format!("{tag}={path}:"));
                feed_constraint(&mut h, constraint);
            }
        }
        hex::encode(h.finalize())
    }

    /// Same descriptor anchored on a new cursor, for walking page by page.
    #[must_use]
    pub fn after(&self, cursor: Cursor, reversed: bool) -> Self {
        Self {
            offset: 0,
            cursor: Some(cursor),
            reversed,
            ..self.clone()
        }
    }
}

fn feed_value(h: &mut Sha256, value: &Value) {
    h.update(format!("{}({value});", value.kind_name()));
}

fn feed_constraint(h: &mut Sha256, constraint: &Constraint) {
    h.update(format!("{}[", constraint.kind()));
    match constraint {
        Constraint::Like { pattern, anchor } => {
            h.update(format!("{}:{pattern}", anchor.as_str()));
        }
        Constraint::Order { value, op } => {
            h.update(op.symbol());
            feed_value(h, value);
        }
        Constraint::Between { min, max } => {
            feed_value(h, min);
            feed_value(h, max);
        }
        Constraint::Not(inner) => feed_constraint(h, inner),
        Constraint::Equals(v)
        | Constraint::IgnoreCase(v)
        | Constraint::Bool(v)
        | Constraint::Numeric(v)
        | Constraint::Enumerated(v) => feed_value(h, v),
    }
    h.update("]");
}

fn default_order() -> Vec<OrderKey> {
    vec![OrderKey {
        field: DEFAULT_ORDER_FIELD.to_owned(),
        dir: SortDir::Desc,
    }]
}

/// Builder for [`Page`]. Problems are recorded as they happen and reported
/// by [`PageBuilder::build`].
#[derive(Debug, Default)]
#[must_use]
pub struct PageBuilder {
    window: Option<Window>,
    order: Vec<OrderKey>,
    required: Option<Criteria>,
    optional: Option<Criteria>,
    error: Option<Error>,
}

#[derive(Debug)]
enum Window {
    Offset { offset: u64, limit: u64 },
    Keyset { cursor: Cursor, limit: u64, reversed: bool },
}

impl PageBuilder {
    fn fail(&mut self, err: Error) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    fn check_limit(&mut self, limit: i64) -> u64 {
        match u64::try_from(limit) {
            Ok(l) if l >= 1 => l,
            _ => {
                self.fail(Error::InvalidArgument(format!(
                    "limit must be at least 1, got {limit}"
                )));
                1
            }
        }
    }

    fn set_window(&mut self, window: Window) {
        if self.window.is_some() {
            self.fail(Error::InvalidState("range already set".to_owned()));
            return;
        }
        self.window = Some(window);
    }

    /// Offset window.
    pub fn range(mut self, offset: i64, limit: i64) -> Self {
        let limit = self.check_limit(limit);
        let offset = u64::try_from(offset).unwrap_or_else(|_| {
            self.fail(Error::InvalidArgument(format!(
                "offset must not be negative, got {offset}"
            )));
            0
        });
        self.set_window(Window::Offset { offset, limit });
        self
    }

    /// Keyset window: entities strictly after `cursor` in traversal order,
    /// or strictly before it when `reversed`.
    pub fn range_after(mut self, cursor: impl Into<Cursor>, limit: i64, reversed: bool) -> Self {
        let limit = self.check_limit(limit);
        let cursor = cursor.into();
        if cursor.identity.is_null() {
            self.fail(Error::InvalidArgument(
                "cursor identity must not be null".to_owned(),
            ));
        }
        self.set_window(Window::Keyset {
            cursor,
            limit,
            reversed,
        });
        self
    }

    /// Append an ordering key. Repeated calls build a composite sort with the
    /// first call as the primary key; naming a field twice updates its
    /// direction in place.
    pub fn order_by(mut self, field: impl Into<String>, ascending: bool) -> Self {
        let field = field.into();
        let dir = SortDir::from_ascending(ascending);
        if let Some(existing) = self.order.iter_mut().find(|k| k.field == field) {
            existing.dir = dir;
        } else {
            self.order.push(OrderKey { field, dir });
        }
        self
    }

    /// Criteria that must all hold. May be called once.
    pub fn all_match<I, K, C>(mut self, criteria: I) -> Self
    where
        I: IntoIterator<Item = (K, C)>,
        K: Into<String>,
        C: Into<Constraint>,
    {
        if self.required.is_some() {
            self.fail(Error::InvalidState("all_match already set".to_owned()));
        } else {
            self.required = Some(collect_criteria(criteria));
        }
        self
    }

    /// Criteria of which at least one must hold. May be called once.
    pub fn any_match<I, K, C>(mut self, criteria: I) -> Self
    where
        I: IntoIterator<Item = (K, C)>,
        K: Into<String>,
        C: Into<Constraint>,
    {
        if self.optional.is_some() {
            self.fail(Error::InvalidState("any_match already set".to_owned()));
        } else {
            self.optional = Some(collect_criteria(criteria));
        }
        self
    }

    /// # Errors
    /// Returns the first problem recorded while building: `InvalidArgument`
    /// for bad bounds or a null cursor, `InvalidState` for repeated calls.
    pub fn build(self) -> Result<Page> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let (offset, limit, cursor, reversed) = match self.window {
            None => (0, MAX_LIMIT, None, false),
            Some(Window::Offset { offset, limit }) => (offset, limit, None, false),
            Some(Window::Keyset {
                cursor,
                limit,
                reversed,
            }) => (0, limit, Some(cursor), reversed),
        };
        let order = if self.order.is_empty() {
            default_order()
        } else {
            self.order
        };
        Ok(Page {
            offset,
            limit,
            cursor,
            reversed,
            order,
            required: self.required.unwrap_or_default(),
            optional: self.optional.unwrap_or_default(),
        })
    }
}

fn collect_criteria<I, K, C>(criteria: I) -> Criteria
where
    I: IntoIterator<Item = (K, C)>,
    K: Into<String>,
    C: Into<Constraint>,
{
    criteria
        .into_iter()
        .map(|(k, c)| (k.into(), c.into()))
        .collect()
}

/// Unvalidated serde shape; deserialized pages go through the same checks
/// as built ones.
#[derive(Deserialize)]
struct PageWire {
    #[serde(default)]
    offset: i64,
    limit: i64,
    #[serde(default)]
    cursor: Option<Cursor>,
    #[serde(default)]
    reversed: bool,
    #[serde(default)]
    order: Vec<OrderKey>,
    #[serde(default)]
    required: Criteria,
    #[serde(default)]
    optional: Criteria,
}

impl TryFrom<PageWire> for Page {
    type Error = Error;

    fn try_from(w: PageWire) -> Result<Self> {
        let mut b = match w.cursor {
            Some(cursor) => Page::with().range_after(cursor, w.limit, w.reversed),
            None => Page::with().range(w.offset, w.limit),
        };
        for key in w.order {
            b = b.order_by(key.field, key.dir.is_ascending());
        }
        b.all_match(w.required).any_match(w.optional).build()
    }
}
