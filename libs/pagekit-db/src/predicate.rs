//! `Constraint` → `sea_query` condition compiler.
//!
//! Every rendered condition must select exactly the rows for which
//! `Constraint::applies` holds on the column value, including `NULL`s, so
//! that store-side and in-memory evaluation can be mixed freely.

use bigdecimal::{BigDecimal, ToPrimitive};
use pagekit::{Comparison, Constraint, ConstraintKind, LikeAnchor, Value};
use rust_decimal::Decimal;
use sea_orm::DbBackend;
use sea_orm::sea_query::{Alias, Condition, Expr, Func, LikeExpr, SimpleExpr};

use crate::error::{PagingError, PagingResult};
use crate::shape::{Field, FieldKind, SoftDelete};

/// Qualified column reference `alias.column`.
#[must_use]
pub(crate) fn column(alias: &str, column: &str) -> SimpleExpr {
    Expr::col((Alias::new(alias), Alias::new(column))).into()
}

/* ---------- coercion helpers ---------- */

fn bigdecimal_to_decimal(field: &Field, bd: &BigDecimal) -> PagingResult<Decimal> {
    // Preserve precision via string.
    let s = bd.normalized().to_string();
    Decimal::from_str_exact(&s)
        .or_else(|_| s.parse::<Decimal>())
        .map_err(|_| mismatch(field, "number"))
}

fn mismatch(field: &Field, got: &'static str) -> PagingError {
    PagingError::TypeMismatch {
        field: field.name.clone(),
        expected: field.kind,
        got,
    }
}

/// Convert an already normalized value into a store bind for `field`.
pub(crate) fn store_value(field: &Field, v: &Value) -> PagingResult<sea_orm::Value> {
    use sea_orm::Value as V;

    Ok(match (field.kind, v) {
        (FieldKind::String | FieldKind::Enum, Value::String(s)) => V::String(Some(Box::new(s.clone()))),
        (FieldKind::I64, Value::Number(n)) => {
            V::BigInt(Some(n.to_i64().ok_or_else(|| mismatch(field, "number"))?))
        }
        (FieldKind::F64, Value::Number(n)) => {
            V::Double(Some(n.to_f64().ok_or_else(|| mismatch(field, "number"))?))
        }
        (FieldKind::Decimal, Value::Number(n)) => {
            V::Decimal(Some(Box::new(bigdecimal_to_decimal(field, n)?)))
        }
        (FieldKind::Bool, Value::Bool(b)) => V::Bool(Some(*b)),
        (FieldKind::Uuid, Value::Uuid(u)) => V::Uuid(Some(Box::new(*u))),
        (FieldKind::DateTimeUtc, Value::DateTime(dt)) => V::ChronoDateTimeUtc(Some(Box::new(*dt))),
        (FieldKind::Date, Value::Date(d)) => V::ChronoDate(Some(Box::new(*d))),
        (FieldKind::Time, Value::Time(t)) => V::ChronoTime(Some(Box::new(*t))),
        (_, other) => return Err(mismatch(field, other.kind_name())),
    })
}

/// Normalize then convert.
pub(crate) fn bind(field: &Field, v: &Value) -> PagingResult<sea_orm::Value> {
    store_value(field, &field.kind.normalize(&field.name, v)?)
}

/// Re-type the comparable values of a constraint against the field kind and
/// reject variants the field cannot express.
///
/// # Errors
/// `TypeMismatch` for values that do not fit the kind, `UnsupportedConstraint`
/// for `Numeric` on non-numeric fields, `Enumerated` on non-textual fields,
/// `Bool` on fields that are neither boolean nor numeric, and text matching
/// (`Like`, `IgnoreCase`) on kinds without a canonical text form. `Like` on a
/// boolean reads the pattern as a truth value and stays allowed.
pub fn normalize_constraint(field: &Field, constraint: &Constraint) -> PagingResult<Constraint> {
    let unsupported = |kind: ConstraintKind| PagingError::UnsupportedConstraint {
        field: field.name.clone(),
        constraint: kind,
        kind: field.kind,
    };
    let leaf = match constraint {
        Constraint::Not(inner) => inner,
        other => other,
    };
    match leaf {
        Constraint::Numeric(_) if !field.kind.is_numeric() => {
            return Err(unsupported(ConstraintKind::Numeric));
        }
        Constraint::Enumerated(_) if !field.kind.is_textual() => {
            return Err(unsupported(ConstraintKind::Enumerated));
        }
        Constraint::Bool(_) if !(field.kind == FieldKind::Bool || field.kind.is_numeric()) => {
            return Err(unsupported(ConstraintKind::Bool));
        }
        Constraint::Like { .. }
            if !(field.kind == FieldKind::Bool || field.kind.has_canonical_text()) =>
        {
            return Err(unsupported(ConstraintKind::Like));
        }
        Constraint::IgnoreCase(_) if !field.kind.has_canonical_text() => {
            return Err(unsupported(ConstraintKind::IgnoreCase));
        }
        _ => {}
    }
    constraint.map_values(&mut |v| field.kind.normalize(&field.name, v))
}

/* ---------- LIKE helpers ---------- */

fn like_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '%' | '_' | '\\' => {
                out.push('\\');
                out.push(ch);
            }
            c => out.push(c),
        }
    }
    out
}

fn like_pattern(pattern: &str, anchor: LikeAnchor) -> String {
    let escaped = like_escape(&pattern.to_lowercase());
    match anchor {
        LikeAnchor::Contains => format!("%{escaped}%"),
        LikeAnchor::StartsWith => format!("{escaped}%"),
        LikeAnchor::EndsWith => format!("%{escaped}"),
    }
}

/// String form of a column for LIKE and case-insensitive comparison.
fn as_text(target: SimpleExpr, kind: FieldKind, backend: DbBackend) -> SimpleExpr {
    if kind.is_textual() {
        return target;
    }
    let ty = if backend == DbBackend::MySql { "CHAR" } else { "TEXT" };
    Func::cast_as(target, Alias::new(ty)).into()
}

fn truthiness(target: &SimpleExpr, field: &Field, truthy: bool) -> Condition {
    let col = || Expr::expr(target.clone());
    let is_bool = field.kind == FieldKind::Bool;
    match (truthy, is_bool) {
        (true, true) => Condition::all().add(col().eq(true)),
        (true, false) => Condition::all().add(col().ne(0i64)),
        (false, true) => Condition::any().add(col().eq(false)).add(col().is_null()),
        (false, false) => Condition::any().add(col().eq(0i64)).add(col().is_null()),
    }
}

/* ---------- Constraint -> Condition ---------- */

/// Render a normalized constraint against `target`, the store expression of
/// `field`. Run [`normalize_constraint`] first.
///
/// # Errors
/// Returns `PagingError::TypeMismatch` if a value cannot be bound for the field kind.
pub fn constraint_condition(
    constraint: &Constraint,
    target: &SimpleExpr,
    field: &Field,
    backend: DbBackend,
) -> PagingResult<Condition> {
    let col = || Expr::expr(target.clone());

    Ok(match constraint {
        Constraint::Equals(Value::Null) => Condition::all().add(col().is_null()),
        Constraint::Equals(v) | Constraint::Numeric(v) | Constraint::Enumerated(v) => {
            Condition::all().add(col().eq(store_value(field, v)?))
        }
        Constraint::Like { pattern, anchor } => {
            if field.kind == FieldKind::Bool {
                // Same rule as in-memory evaluation: the pattern is read as a truth value.
                let truthy = Value::String(pattern.clone()).truthy();
                Condition::all().add(col().eq(truthy))
            } else {
                let text = as_text(target.clone(), field.kind, backend);
                Condition::all().add(
                    Expr::expr(Func::lower(text))
                        .like(LikeExpr::new(like_pattern(pattern, *anchor)).escape('\\')),
                )
            }
        }
        Constraint::IgnoreCase(v) => {
            let text = as_text(target.clone(), field.kind, backend);
            Condition::all().add(Expr::expr(Func::lower(text)).eq(v.to_string().to_lowercase()))
        }
        Constraint::Order { value, op } => {
            let v = store_value(field, value)?;
            Condition::all().add(match op {
                Comparison::Lt => col().lt(v),
                Comparison::Lte => col().lte(v),
                Comparison::Gt => col().gt(v),
                Comparison::Gte => col().gte(v),
            })
        }
        Constraint::Between { min, max } => Condition::all().add(
            col().between(store_value(field, min)?, store_value(field, max)?),
        ),
        Constraint::Bool(v) => truthiness(target, field, v.truthy()),
        Constraint::Not(inner) => {
            let negated = constraint_condition(inner, target, field, backend)?.not();
            if inner.applies(&Value::Null) {
                negated
            } else {
                // NOT over NULL is unknown; keep NULL rows on the negated side.
                Condition::any().add(negated).add(col().is_null())
            }
        }
    })
}

/// Rows that are not soft-deleted.
#[must_use]
pub(crate) fn live_rows(alias: &str, soft_delete: Option<&SoftDelete>) -> Option<Condition> {
    soft_delete.map(|sd| match sd {
        SoftDelete::Flag(c) => Condition::any()
            .add(Expr::expr(column(alias, c)).eq(false))
            .add(Expr::expr(column(alias, c)).is_null()),
        SoftDelete::Timestamp(c) => Condition::all().add(Expr::expr(column(alias, c)).is_null()),
    })
}
