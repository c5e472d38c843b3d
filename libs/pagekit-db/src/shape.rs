//! Attribute graph of a pageable entity.
//!
//! An [`EntityShape`] names the root table, its identity column and the
//! fields a page may filter or order on. Fields are reached by path:
//!
//! - `name`: a column of the root table
//! - `address.city`: a column of a to-one association
//! - `phones.number`: a column of a to-many association
//! - `tags`: the value of an element collection
//!
//! # Example
//!
//! ```
//! use pagekit_db::{EntityShape, FieldKind, SoftDelete, ToMany, ToOne};
//!
//! let shape = EntityShape::new("users", "id", FieldKind::I64)
//!     .field("name", "name", FieldKind::String)
//!     .field("active", "active", FieldKind::Bool)
//!     .to_one(
//!         ToOne::new("address", "addresses", "address_id", "id")
//!             .field("city", "city", FieldKind::String),
//!     )
//!     .to_many(
//!         ToMany::new("phones", "phones", "user_id", "id", FieldKind::I64)
//!             .field("number", "number", FieldKind::String),
//!     )
//!     .element_collection("tags", "user_tags", "user_id", "tag", FieldKind::String)
//!     .soft_delete(SoftDelete::flag("deleted"));
//!
//! assert!(shape.resolve("address.city").is_ok());
//! assert!(shape.resolve("phones.missing").is_err());
//! ```

use std::fmt;

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use pagekit::{DEFAULT_ORDER_FIELD, Value};
use uuid::Uuid;

use crate::error::{PagingError, PagingResult};

/// Logical column types. Drives re-typing of raw criteria values, store
/// binds and decoding of fetched rows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FieldKind {
    String,
    /// Enum stored by constant name.
    Enum,
    I64,
    F64,
    Decimal,
    Bool,
    Uuid,
    DateTimeUtc,
    Date,
    Time,
}

impl FieldKind {
    #[must_use]
    pub fn is_numeric(self) -> bool {
        matches!(self, FieldKind::I64 | FieldKind::F64 | FieldKind::Decimal)
    }

    #[must_use]
    pub fn is_textual(self) -> bool {
        matches!(self, FieldKind::String | FieldKind::Enum)
    }

    /// Kinds whose store text form (`CAST .. AS TEXT`) equals their
    /// in-memory display form, so text matching agrees on both sides.
    #[must_use]
    pub fn has_canonical_text(self) -> bool {
        self.is_textual() || self == FieldKind::I64
    }

    /// Re-type `value` into this kind. Raw strings are parsed, anything
    /// already of the right kind passes through, `Null` stays `Null`.
    ///
    /// # Errors
    /// Returns `PagingError::TypeMismatch` when the value cannot represent this kind.
    pub fn normalize(self, field: &str, value: &Value) -> PagingResult<Value> {
        let coerced = match (self, value) {
            (_, Value::Null) => Some(Value::Null),
            (FieldKind::String | FieldKind::Enum, Value::String(_)) => Some(value.clone()),
            (FieldKind::String | FieldKind::Enum, other) => Some(Value::String(other.to_string())),
            (FieldKind::I64, v) => v
                .coerce_like(&Value::from(0))
                .filter(|n| n.as_number().is_some_and(BigDecimal::is_integer)),
            (FieldKind::F64 | FieldKind::Decimal, v) => v.coerce_like(&Value::from(0)),
            (FieldKind::Bool, v) => v.coerce_like(&Value::Bool(false)),
            (FieldKind::Uuid, v) => v.coerce_like(&Value::Uuid(Uuid::nil())),
            (FieldKind::DateTimeUtc, v) => {
                v.coerce_like(&Value::DateTime(DateTime::<Utc>::default()))
            }
            (FieldKind::Date, v) => v.coerce_like(&Value::Date(NaiveDate::default())),
            (FieldKind::Time, v) => v.coerce_like(&Value::Time(NaiveTime::default())),
        };
        coerced.ok_or_else(|| PagingError::TypeMismatch {
            field: field.to_owned(),
            expected: self,
            got: value.kind_name(),
        })
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::String => write!(f, "String"),
            FieldKind::Enum => write!(f, "Enum"),
            FieldKind::I64 => write!(f, "I64"),
            FieldKind::F64 => write!(f, "F64"),
            FieldKind::Decimal => write!(f, "Decimal"),
            FieldKind::Bool => write!(f, "Bool"),
            FieldKind::Uuid => write!(f, "Uuid"),
            FieldKind::DateTimeUtc => write!(f, "DateTimeUtc"),
            FieldKind::Date => write!(f, "Date"),
            FieldKind::Time => write!(f, "Time"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub column: String,
    pub kind: FieldKind,
}

impl Field {
    fn new(name: impl Into<String>, column: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            column: column.into(),
            kind,
        }
    }
}

/// How deleted rows are recognized. Deleted rows never reach a page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SoftDelete {
    /// Boolean column; `true` means deleted.
    Flag(String),
    /// Nullable timestamp column; set means deleted.
    Timestamp(String),
}

impl SoftDelete {
    pub fn flag(column: impl Into<String>) -> Self {
        SoftDelete::Flag(column.into())
    }

    pub fn timestamp(column: impl Into<String>) -> Self {
        SoftDelete::Timestamp(column.into())
    }
}

/// Association holding at most one row per root row, joined on
/// `table.remote_column = root.local_column`.
#[derive(Clone, Debug)]
#[must_use]
pub struct ToOne {
    pub(crate) name: String,
    pub(crate) table: String,
    pub(crate) local_column: String,
    pub(crate) remote_column: String,
    pub(crate) fields: Vec<Field>,
}

impl ToOne {
    pub fn new(
        name: impl Into<String>,
        table: impl Into<String>,
        local_column: impl Into<String>,
        remote_column: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            local_column: local_column.into(),
            remote_column: remote_column.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, column: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(Field::new(name, column, kind));
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Clone, Debug)]
pub(crate) enum Members {
    /// Child entities, de-duplicated by their identity.
    Entities { identity: Field },
    /// Scalar values, de-duplicated by value.
    Elements,
}

/// Association with any number of rows per root row, joined on
/// `table.parent_column = root.identity`.
#[derive(Clone, Debug)]
#[must_use]
pub struct ToMany {
    pub(crate) name: String,
    pub(crate) table: String,
    pub(crate) parent_column: String,
    pub(crate) members: Members,
    pub(crate) fields: Vec<Field>,
    pub(crate) soft_delete: Option<SoftDelete>,
}

/// Field name under which element collection values are exposed.
pub const ELEMENT_FIELD: &str = "value";

impl ToMany {
    pub fn new(
        name: impl Into<String>,
        table: impl Into<String>,
        parent_column: impl Into<String>,
        identity_column: impl Into<String>,
        identity_kind: FieldKind,
    ) -> Self {
        let identity_column = identity_column.into();
        let identity = Field::new(identity_column.clone(), identity_column, identity_kind);
        Self {
            name: name.into(),
            table: table.into(),
            parent_column: parent_column.into(),
            fields: vec![identity.clone()],
            members: Members::Entities { identity },
            soft_delete: None,
        }
    }

    fn elements(
        name: impl Into<String>,
        table: impl Into<String>,
        parent_column: impl Into<String>,
        value_column: impl Into<String>,
        kind: FieldKind,
    ) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            parent_column: parent_column.into(),
            members: Members::Elements,
            fields: vec![Field::new(ELEMENT_FIELD, value_column, kind)],
            soft_delete: None,
        }
    }

    pub fn field(mut self, name: impl Into<String>, column: impl Into<String>, kind: FieldKind) -> Self {
        let field = Field::new(name, column, kind);
        if let Some(existing) = self.fields.iter_mut().find(|f| f.name == field.name) {
            *existing = field;
        } else {
            self.fields.push(field);
        }
        self
    }

    pub fn soft_delete(mut self, soft_delete: SoftDelete) -> Self {
        self.soft_delete = Some(soft_delete);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn is_element_collection(&self) -> bool {
        matches!(self.members, Members::Elements)
    }

    fn get(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// A path resolved against a shape.
#[derive(Clone, Copy, Debug)]
pub enum Resolved<'s> {
    Root(&'s Field),
    ToOne(&'s ToOne, &'s Field),
    ToMany(&'s ToMany, &'s Field),
}

impl Resolved<'_> {
    #[must_use]
    pub fn field(&self) -> &Field {
        match self {
            Resolved::Root(f) | Resolved::ToOne(_, f) | Resolved::ToMany(_, f) => f,
        }
    }

    #[must_use]
    pub fn is_to_many(&self) -> bool {
        matches!(self, Resolved::ToMany(..))
    }

    /// Key under which a materialized record exposes the value.
    #[must_use]
    pub fn record_key(&self) -> String {
        match self {
            Resolved::Root(f) => f.name.clone(),
            Resolved::ToOne(a, f) => format!("{}.{}", a.name, f.name),
            Resolved::ToMany(c, _) if c.is_element_collection() => c.name.clone(),
            Resolved::ToMany(c, f) => format!("{}.{}", c.name, f.name),
        }
    }
}

#[derive(Clone, Debug)]
#[must_use]
pub struct EntityShape {
    pub(crate) table: String,
    pub(crate) identity: Field,
    pub(crate) fields: Vec<Field>,
    pub(crate) to_one: Vec<ToOne>,
    pub(crate) to_many: Vec<ToMany>,
    pub(crate) soft_delete: Option<SoftDelete>,
}

impl EntityShape {
    /// The identity column is also exposed as a field under its own name.
    pub fn new(table: impl Into<String>, identity_column: impl Into<String>, kind: FieldKind) -> Self {
        let column = identity_column.into();
        let identity = Field::new(column.clone(), column, kind);
        Self {
            table: table.into(),
            fields: vec![identity.clone()],
            identity,
            to_one: Vec::new(),
            to_many: Vec::new(),
            soft_delete: None,
        }
    }

    pub fn field(mut self, name: impl Into<String>, column: impl Into<String>, kind: FieldKind) -> Self {
        let field = Field::new(name, column, kind);
        if let Some(existing) = self.fields.iter_mut().find(|f| f.name == field.name) {
            *existing = field;
        } else {
            self.fields.push(field);
        }
        self
    }

    pub fn to_one(mut self, assoc: ToOne) -> Self {
        self.to_one.push(assoc);
        self
    }

    pub fn to_many(mut self, assoc: ToMany) -> Self {
        self.to_many.push(assoc);
        self
    }

    pub fn element_collection(
        self,
        name: impl Into<String>,
        table: impl Into<String>,
        parent_column: impl Into<String>,
        value_column: impl Into<String>,
        kind: FieldKind,
    ) -> Self {
        self.to_many(ToMany::elements(name, table, parent_column, value_column, kind))
    }

    pub fn soft_delete(mut self, soft_delete: SoftDelete) -> Self {
        self.soft_delete = Some(soft_delete);
        self
    }

    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    #[must_use]
    pub fn identity(&self) -> &Field {
        &self.identity
    }

    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    #[must_use]
    pub fn to_one_associations(&self) -> &[ToOne] {
        &self.to_one
    }

    #[must_use]
    pub fn to_many_associations(&self) -> &[ToMany] {
        &self.to_many
    }

    /// Resolve a criteria or ordering path.
    ///
    /// The default ordering field `id` falls back to the identity column when
    /// the shape declares no field of that name.
    ///
    /// # Errors
    /// Returns `PagingError::UnknownField` when the path does not exist.
    pub fn resolve(&self, path: &str) -> PagingResult<Resolved<'_>> {
        let unknown = || PagingError::UnknownField(path.to_owned());
        match path.split_once('.') {
            None => {
                if let Some(f) = self.fields.iter().find(|f| f.name == path) {
                    return Ok(Resolved::Root(f));
                }
                if path == DEFAULT_ORDER_FIELD {
                    return Ok(Resolved::Root(&self.identity));
                }
                self.to_many
                    .iter()
                    .find(|c| c.name == path && c.is_element_collection())
                    .and_then(|c| c.get(ELEMENT_FIELD).map(|f| Resolved::ToMany(c, f)))
                    .ok_or_else(unknown)
            }
            Some((assoc, rest)) => {
                if let Some(a) = self.to_one.iter().find(|a| a.name == assoc) {
                    return a
                        .fields
                        .iter()
                        .find(|f| f.name == rest)
                        .map(|f| Resolved::ToOne(a, f))
                        .ok_or_else(unknown);
                }
                self.to_many
                    .iter()
                    .find(|c| c.name == assoc && !c.is_element_collection())
                    .and_then(|c| c.get(rest).map(|f| Resolved::ToMany(c, f)))
                    .ok_or_else(unknown)
            }
        }
    }

    pub(crate) fn collection(&self, name: &str) -> Option<&ToMany> {
        self.to_many.iter().find(|c| c.name == name)
    }
}
