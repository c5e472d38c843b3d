//! Typed predicate variants attached to criteria entries.
//!
//! A `Constraint` can be evaluated in memory with [`Constraint::applies`];
//! the store-side rendering of the same condition lives in the database crate.
//! Both must agree for every variant, because to-many association criteria
//! are sometimes evaluated on already fetched rows instead of in the query.
//!
//! Only `Not` may wrap another constraint, and it may not wrap itself.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result, Value};

/// Where the wildcard goes in a `LIKE` pattern.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LikeAnchor {
    /// `v%`
    StartsWith,
    /// `%v`
    EndsWith,
    /// `%v%`
    Contains,
}

impl LikeAnchor {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            LikeAnchor::StartsWith => "starts_with",
            LikeAnchor::EndsWith => "ends_with",
            LikeAnchor::Contains => "contains",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Lt,
    Lte,
    Gt,
    Gte,
}

impl Comparison {
    #[must_use]
    pub fn holds(self, ord: Ordering) -> bool {
        match self {
            Comparison::Lt => ord == Ordering::Less,
            Comparison::Lte => ord != Ordering::Greater,
            Comparison::Gt => ord == Ordering::Greater,
            Comparison::Gte => ord != Ordering::Less,
        }
    }

    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Comparison::Lt => "<",
            Comparison::Lte => "<=",
            Comparison::Gt => ">",
            Comparison::Gte => ">=",
        }
    }
}

/// Variant tag, handy for logging and for error messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConstraintKind {
    Equals,
    Like,
    IgnoreCase,
    Order,
    Between,
    Bool,
    Numeric,
    Enumerated,
    Not,
}

impl ConstraintKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ConstraintKind::Equals => "equals",
            ConstraintKind::Like => "like",
            ConstraintKind::IgnoreCase => "ignore_case",
            ConstraintKind::Order => "order",
            ConstraintKind::Between => "between",
            ConstraintKind::Bool => "bool",
            ConstraintKind::Numeric => "numeric",
            ConstraintKind::Enumerated => "enumerated",
            ConstraintKind::Not => "not",
        }
    }
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "ConstraintWire", into = "ConstraintWire")]
pub enum Constraint {
    /// Plain equality; what a bare literal in a criteria map means.
    /// `Equals(Null)` tests for `IS NULL`.
    Equals(Value),
    /// Case-insensitive pattern match.
    Like { pattern: String, anchor: LikeAnchor },
    IgnoreCase(Value),
    Order { value: Value, op: Comparison },
    /// Closed range, both ends inclusive.
    Between { min: Value, max: Value },
    /// Raw input interpreted through [`Value::truthy`].
    Bool(Value),
    Numeric(Value),
    Enumerated(Value),
    Not(Box<Constraint>),
}

fn require_value(value: Value, what: &str) -> Result<Value> {
    if value.is_null() {
        return Err(Error::InvalidArgument(format!(
            "{what} constraint requires a non-null value"
        )));
    }
    Ok(value)
}

impl Constraint {
    /// # Errors
    /// Returns `Error::InvalidArgument` if `pattern` is null.
    pub fn like(pattern: impl Into<Value>, anchor: LikeAnchor) -> Result<Self> {
        let pattern = require_value(pattern.into(), "like")?;
        Ok(Constraint::Like {
            pattern: pattern.to_string(),
            anchor,
        })
    }

    /// # Errors
    /// Returns `Error::InvalidArgument` if `pattern` is null.
    pub fn like_contains(pattern: impl Into<Value>) -> Result<Self> {
        Self::like(pattern, LikeAnchor::Contains)
    }

    /// # Errors
    /// Returns `Error::InvalidArgument` if `pattern` is null.
    pub fn like_starts(pattern: impl Into<Value>) -> Result<Self> {
        Self::like(pattern, LikeAnchor::StartsWith)
    }

    /// # Errors
    /// Returns `Error::InvalidArgument` if `pattern` is null.
    pub fn like_ends(pattern: impl Into<Value>) -> Result<Self> {
        Self::like(pattern, LikeAnchor::EndsWith)
    }

    /// # Errors
    /// Returns `Error::InvalidArgument` if `value` is null.
    pub fn ignore_case(value: impl Into<Value>) -> Result<Self> {
        Ok(Constraint::IgnoreCase(require_value(value.into(), "ignore-case")?))
    }

    /// # Errors
    /// Returns `Error::InvalidArgument` if `value` is null.
    pub fn order(value: impl Into<Value>, op: Comparison) -> Result<Self> {
        Ok(Constraint::Order {
            value: require_value(value.into(), "order")?,
            op,
        })
    }

    /// # Errors
    /// Returns `Error::InvalidArgument` if `value` is null.
    pub fn lt(value: impl Into<Value>) -> Result<Self> {
        Self::order(value, Comparison::Lt)
    }

    /// # Errors
    /// Returns `Error::InvalidArgument` if `value` is null.
    pub fn lte(value: impl Into<Value>) -> Result<Self> {
        Self::order(value, Comparison::Lte)
    }

    /// # Errors
    /// Returns `Error::InvalidArgument` if `value` is null.
    pub fn gt(value: impl Into<Value>) -> Result<Self> {
        Self::order(value, Comparison::Gt)
    }

    /// # Errors
    /// Returns `Error::InvalidArgument` if `value` is null.
    pub fn gte(value: impl Into<Value>) -> Result<Self> {
        Self::order(value, Comparison::Gte)
    }

    /// # Errors
    /// Returns `Error::InvalidArgument` if either bound is null.
    pub fn between(min: impl Into<Value>, max: impl Into<Value>) -> Result<Self> {
        Ok(Constraint::Between {
            min: require_value(min.into(), "between")?,
            max: require_value(max.into(), "between")?,
        })
    }

    /// # Errors
    /// Returns `Error::InvalidArgument` if `value` is null.
    pub fn truthy(value: impl Into<Value>) -> Result<Self> {
        Ok(Constraint::Bool(require_value(value.into(), "bool")?))
    }

    /// # Errors
    /// Returns `Error::InvalidArgument` if `value` is null.
    pub fn numeric(value: impl Into<Value>) -> Result<Self> {
        Ok(Constraint::Numeric(require_value(value.into(), "numeric")?))
    }

    /// # Errors
    /// Returns `Error::InvalidArgument` if `value` is null.
    pub fn enumerated(value: impl Into<Value>) -> Result<Self> {
        Ok(Constraint::Enumerated(require_value(
            value.into(),
            "enumerated",
        )?))
    }

    /// Negate a literal or another constraint. `Not(null)` means `IS NOT NULL`.
    ///
    /// # Errors
    /// Returns `Error::InvalidArgument` if `inner` is itself a `Not`.
    pub fn not(inner: impl Into<Constraint>) -> Result<Self> {
        let inner = inner.into();
        if matches!(inner, Constraint::Not(_)) {
            return Err(Error::InvalidArgument(
                "not constraint cannot wrap another not".to_owned(),
            ));
        }
        Ok(Constraint::Not(Box::new(inner)))
    }

    #[must_use]
    pub fn kind(&self) -> ConstraintKind {
        match self {
            Constraint::Equals(_) => ConstraintKind::Equals,
            Constraint::Like { .. } => ConstraintKind::Like,
            Constraint::IgnoreCase(_) => ConstraintKind::IgnoreCase,
            Constraint::Order { .. } => ConstraintKind::Order,
            Constraint::Between { .. } => ConstraintKind::Between,
            Constraint::Bool(_) => ConstraintKind::Bool,
            Constraint::Numeric(_) => ConstraintKind::Numeric,
            Constraint::Enumerated(_) => ConstraintKind::Enumerated,
            Constraint::Not(_) => ConstraintKind::Not,
        }
    }

    /// Strip wrappers down to the innermost literal. For `Like` this is the
    /// pattern text, for `Between` the lower bound.
    #[must_use]
    pub fn unwrap(&self) -> Value {
        match self {
            Constraint::Equals(v)
            | Constraint::IgnoreCase(v)
            | Constraint::Order { value: v, .. }
            | Constraint::Between { min: v, .. }
            | Constraint::Bool(v)
            | Constraint::Numeric(v)
            | Constraint::Enumerated(v) => v.clone(),
            Constraint::Like { pattern, .. } => Value::String(pattern.clone()),
            Constraint::Not(inner) => inner.unwrap(),
        }
    }

    /// Rebuild the constraint with its comparable values passed through `f`.
    ///
    /// `Like`, `IgnoreCase` and `Bool` carry text or truthiness input and are
    /// returned unchanged.
    ///
    /// # Errors
    /// Returns the first error produced by `f`.
    pub fn map_values<E>(
        &self,
        f: &mut impl FnMut(&Value) -> std::result::Result<Value, E>,
    ) -> std::result::Result<Constraint, E> {
        Ok(match self {
            Constraint::Equals(v) => Constraint::Equals(f(v)?),
            Constraint::Order { value, op } => Constraint::Order {
                value: f(value)?,
                op: *op,
            },
            Constraint::Between { min, max } => Constraint::Between {
                min: f(min)?,
                max: f(max)?,
            },
            Constraint::Numeric(v) => Constraint::Numeric(f(v)?),
            Constraint::Enumerated(v) => Constraint::Enumerated(f(v)?),
            Constraint::Not(inner) => Constraint::Not(Box::new(inner.map_values(f)?)),
            Constraint::Like { .. } | Constraint::IgnoreCase(_) | Constraint::Bool(_) => {
                self.clone()
            }
        })
    }

    /// Evaluate the condition against an already materialized value.
    #[must_use]
    pub fn applies(&self, candidate: &Value) -> bool {
        match self {
            Constraint::Equals(v) => v.loosely_equals(candidate),
            Constraint::Like { pattern, anchor } => like_applies(pattern, *anchor, candidate),
            Constraint::IgnoreCase(v) => {
                !candidate.is_null()
                    && candidate.to_string().to_lowercase() == v.to_string().to_lowercase()
            }
            Constraint::Order { value, op } => value
                .coerce_like(candidate)
                .and_then(|v| candidate.compare(&v))
                .is_some_and(|ord| op.holds(ord)),
            Constraint::Between { min, max } => between_applies(min, max, candidate),
            Constraint::Bool(v) => v.truthy() == candidate.truthy(),
            Constraint::Numeric(v) => {
                matches!(candidate, Value::Number(_)) && v.loosely_equals(candidate)
            }
            Constraint::Enumerated(v) => {
                !candidate.is_null() && candidate.to_string() == v.to_string()
            }
            Constraint::Not(inner) => !inner.applies(candidate),
        }
    }
}

fn like_applies(pattern: &str, anchor: LikeAnchor, candidate: &Value) -> bool {
    match candidate {
        Value::Null => false,
        // Booleans have no useful text form; treat the pattern as a truth value.
        Value::Bool(b) => Value::String(pattern.to_owned()).truthy() == *b,
        other => {
            let hay = other.to_string().to_lowercase();
            let needle = pattern.to_lowercase();
            match anchor {
                LikeAnchor::Contains => hay.contains(&needle),
                LikeAnchor::StartsWith => hay.starts_with(&needle),
                LikeAnchor::EndsWith => hay.ends_with(&needle),
            }
        }
    }
}

fn between_applies(min: &Value, max: &Value, candidate: &Value) -> bool {
    let (Some(lo), Some(hi)) = (min.coerce_like(candidate), max.coerce_like(candidate)) else {
        return false;
    };
    matches!(
        (candidate.compare(&lo), candidate.compare(&hi)),
        (Some(Ordering::Greater | Ordering::Equal), Some(Ordering::Less | Ordering::Equal))
    )
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::Equals(Value::Null) => f.write_str("IS NULL"),
            Constraint::Equals(v) => write!(f, "= '{v}'"),
            Constraint::Like { pattern, anchor } => match anchor {
                LikeAnchor::Contains => write!(f, "LIKE '%{pattern}%'"),
                LikeAnchor::StartsWith => write!(f, "LIKE '{pattern}%'"),
                LikeAnchor::EndsWith => write!(f, "LIKE '%{pattern}'"),
            },
            Constraint::IgnoreCase(v) => write!(f, "ILIKE '{v}'"),
            Constraint::Order { value, op } => write!(f, "{} '{value}'", op.symbol()),
            Constraint::Between { min, max } => write!(f, "BETWEEN '{min}' AND '{max}'"),
            Constraint::Bool(v) => write!(f, "IS {}", v.truthy()),
            Constraint::Numeric(v) => write!(f, "= {v}"),
            Constraint::Enumerated(v) => write!(f, "= {v}"),
            Constraint::Not(inner) => write!(f, "NOT ({inner})"),
        }
    }
}

impl From<Value> for Constraint {
    fn from(v: Value) -> Self {
        Constraint::Equals(v)
    }
}

/// Equality on a float literal; NaN and the infinities are rejected rather
/// than read as `IS NULL`.
impl TryFrom<f64> for Constraint {
    type Error = Error;

    fn try_from(v: f64) -> Result<Self> {
        Value::try_from(v).map(Constraint::Equals)
    }
}

macro_rules! literal_constraint {
    ($($t:ty),*) => {
        $(impl From<$t> for Constraint {
            fn from(v: $t) -> Self {
                Constraint::Equals(Value::from(v))
            }
        })*
    };
}

literal_constraint!(
    i32,
    i64,
    u32,
    u64,
    bool,
    &str,
    String,
    uuid::Uuid,
    chrono::DateTime<chrono::Utc>,
    chrono::NaiveDate,
    chrono::NaiveTime,
    bigdecimal::BigDecimal
);

/* ---------- serde wire form ---------- */

#[derive(Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum TaggedConstraint {
    Eq { value: Value },
    Like { pattern: String, anchor: LikeAnchor },
    IgnoreCase { value: Value },
    Order { value: Value, cmp: Comparison },
    Between { min: Value, max: Value },
    Bool { value: Value },
    Numeric { value: Value },
    Enum { value: Value },
    Not { inner: Box<Constraint> },
}

/// A bare scalar is an equality literal; anything else is tagged by `op`.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ConstraintWire {
    Tagged(TaggedConstraint),
    Literal(Value),
}

impl TryFrom<ConstraintWire> for Constraint {
    type Error = Error;

    fn try_from(wire: ConstraintWire) -> Result<Self> {
        match wire {
            ConstraintWire::Literal(v) => Ok(Constraint::Equals(v)),
            ConstraintWire::Tagged(t) => match t {
                TaggedConstraint::Eq { value } => Ok(Constraint::Equals(value)),
                TaggedConstraint::Like { pattern, anchor } => Constraint::like(pattern, anchor),
                TaggedConstraint::IgnoreCase { value } => Constraint::ignore_case(value),
                TaggedConstraint::Order { value, cmp } => Constraint::order(value, cmp),
                TaggedConstraint::Between { min, max } => Constraint::between(min, max),
                TaggedConstraint::Bool { value } => Constraint::truthy(value),
                TaggedConstraint::Numeric { value } => Constraint::numeric(value),
                TaggedConstraint::Enum { value } => Constraint::enumerated(value),
                TaggedConstraint::Not { inner } => Constraint::not(*inner),
            },
        }
    }
}

impl From<Constraint> for ConstraintWire {
    fn from(c: Constraint) -> Self {
        let tagged = match c {
            Constraint::Equals(v) => return ConstraintWire::Literal(v),
            Constraint::Like { pattern, anchor } => TaggedConstraint::Like { pattern, anchor },
            Constraint::IgnoreCase(value) => TaggedConstraint::IgnoreCase { value },
            Constraint::Order { value, op } => TaggedConstraint::Order { value, cmp: op },
            Constraint::Between { min, max } => TaggedConstraint::Between { min, max },
            Constraint::Bool(value) => TaggedConstraint::Bool { value },
            Constraint::Numeric(value) => TaggedConstraint::Numeric { value },
            Constraint::Enumerated(value) => TaggedConstraint::Enum { value },
            Constraint::Not(inner) => TaggedConstraint::Not { inner },
        };
        ConstraintWire::Tagged(tagged)
    }
}
