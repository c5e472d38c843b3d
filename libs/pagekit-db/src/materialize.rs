//! Two-phase fetch and row de-duplication.
//!
//! Phase A selects the page's parent identities with the full filter,
//! ordering, keyset bound and window, so `LIMIT` counts parents and never
//! joined rows. Phase B fetch-joins the root, to-one and to-many columns of
//! exactly those parents; [`group_rows`] collapses the fan-out back into one
//! [`Record`] per parent and [`arrange`] restores the phase A order.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use pagekit::Value;
use rust_decimal::Decimal;
use sea_orm::QueryResult;
use sea_orm::sea_query::{Alias, Condition, Expr, JoinType, Order, Query, SelectStatement, SimpleExpr};
use uuid::Uuid;

use crate::error::{PagingError, PagingResult};
use crate::predicate::{bind, column, live_rows};
use crate::record::Record;
use crate::shape::{EntityShape, FieldKind, Members, ToMany};
use crate::translate::{ROOT_ALIAS, Translation, collection_alias, join_to_ones, to_one_alias};

/// Result alias of the parent identity in phase A.
pub(crate) const IDENTITY_ALIAS: &str = "pk";

/// Read column `alias` of `row` as a value of `kind`.
pub(crate) fn decode(row: &QueryResult, alias: &str, kind: FieldKind) -> PagingResult<Value> {
    let value = match kind {
        FieldKind::String | FieldKind::Enum => {
            row.try_get::<Option<String>>("", alias)?.map(Value::String)
        }
        FieldKind::I64 => row.try_get::<Option<i64>>("", alias)?.map(Value::from),
        FieldKind::F64 => row
            .try_get::<Option<f64>>("", alias)?
            .map(Value::try_from)
            .transpose()
            .map_err(|e| PagingError::Decode(e.to_string()))?,
        FieldKind::Decimal => match row.try_get::<Option<Decimal>>("", alias)? {
            Some(d) => Some(Value::number(
                BigDecimal::from_str(&d.to_string()).map_err(|e| PagingError::Decode(e.to_string()))?,
            )),
            None => None,
        },
        FieldKind::Bool => row.try_get::<Option<bool>>("", alias)?.map(Value::Bool),
        FieldKind::Uuid => row.try_get::<Option<Uuid>>("", alias)?.map(Value::Uuid),
        FieldKind::DateTimeUtc => row
            .try_get::<Option<DateTime<Utc>>>("", alias)?
            .map(Value::DateTime),
        FieldKind::Date => row.try_get::<Option<NaiveDate>>("", alias)?.map(Value::Date),
        FieldKind::Time => row.try_get::<Option<NaiveTime>>("", alias)?.map(Value::Time),
    };
    Ok(value.unwrap_or(Value::Null))
}

/// Phase A: parent identities of one window.
#[must_use]
pub(crate) fn ids_query(
    shape: &EntityShape,
    translation: &Translation,
    keyset: Option<Condition>,
    limit: u64,
    offset: u64,
) -> SelectStatement {
    let mut query = Query::select();
    query
        .expr_as(
            column(ROOT_ALIAS, &shape.identity.column),
            Alias::new(IDENTITY_ALIAS),
        )
        .from_as(Alias::new(&shape.table), Alias::new(ROOT_ALIAS));
    join_to_ones(&mut query, shape);
    let mut cond = translation.filter.clone();
    if let Some(keyset) = keyset {
        cond = cond.add(keyset);
    }
    query.cond_where(cond);
    translation.apply_order(&mut query);
    query.limit(limit).offset(offset);
    query
}

#[derive(Clone, Debug)]
enum Target {
    /// Record key on the parent.
    Parent(String),
    /// Field of a child in the collection at this index.
    Child { collection: usize, field: String },
}

#[derive(Clone, Debug)]
struct Slot {
    alias: String,
    expr: SimpleExpr,
    kind: FieldKind,
    target: Target,
}

/// Phase B column layout for a shape. Slot 0 is the parent identity.
#[derive(Debug)]
pub struct HydrationPlan<'s> {
    shape: &'s EntityShape,
    /// Collections joined and grouped by this plan.
    collections: &'s [ToMany],
    slots: Vec<Slot>,
    /// Per collection, the slot that de-duplicates its children.
    child_keys: Vec<usize>,
}

impl<'s> HydrationPlan<'s> {
    /// Plan hydrating every field and collection of `shape`.
    #[must_use]
    pub fn new(shape: &'s EntityShape) -> Self {
        Self::build(shape, &shape.to_many)
    }

    /// Plan for root and to-one fields only. No collection is joined, so
    /// each parent yields exactly one row.
    #[must_use]
    pub fn scalar(shape: &'s EntityShape) -> Self {
        Self::build(shape, &[])
    }

    fn build(shape: &'s EntityShape, collections: &'s [ToMany]) -> Self {
        let mut slots = Vec::new();
        let mut push = |expr: SimpleExpr, kind: FieldKind, target: Target| {
            let alias = format!("c{}", slots.len());
            slots.push(Slot {
                alias,
                expr,
                kind,
                target,
            });
            slots.len() - 1
        };

        let identity = &shape.identity;
        push(
            column(ROOT_ALIAS, &identity.column),
            identity.kind,
            Target::Parent(identity.name.clone()),
        );
        for f in shape.fields.iter().filter(|f| f.name != identity.name) {
            push(column(ROOT_ALIAS, &f.column), f.kind, Target::Parent(f.name.clone()));
        }
        for assoc in &shape.to_one {
            let alias = to_one_alias(&assoc.name);
            for f in &assoc.fields {
                push(
                    column(&alias, &f.column),
                    f.kind,
                    Target::Parent(format!("{}.{}", assoc.name, f.name)),
                );
            }
        }

        let mut child_keys = Vec::with_capacity(collections.len());
        for (ci, collection) in collections.iter().enumerate() {
            let alias = collection_alias(&collection.name);
            let key_name = match &collection.members {
                Members::Entities { identity } => identity.name.as_str(),
                Members::Elements => crate::shape::ELEMENT_FIELD,
            };
            let mut key_slot = None;
            for f in &collection.fields {
                let slot = push(
                    column(&alias, &f.column),
                    f.kind,
                    Target::Child {
                        collection: ci,
                        field: f.name.clone(),
                    },
                );
                if f.name == key_name {
                    key_slot = Some(slot);
                }
            }
            // Every collection declares its key field; slot 0 is never a child.
            child_keys.push(key_slot.unwrap_or(0));
        }

        Self {
            shape,
            collections,
            slots,
            child_keys,
        }
    }

    /// Phase B query for the given parent identities.
    ///
    /// # Errors
    /// Returns `PagingError::TypeMismatch` if an identity cannot be bound.
    pub fn query(&self, ids: &[Value]) -> PagingResult<SelectStatement> {
        let shape = self.shape;
        let mut query = Query::select();
        for slot in &self.slots {
            query.expr_as(slot.expr.clone(), Alias::new(&slot.alias));
        }
        query.from_as(Alias::new(&shape.table), Alias::new(ROOT_ALIAS));
        join_to_ones(&mut query, shape);
        for collection in self.collections {
            let alias = collection_alias(&collection.name);
            let mut on = Condition::all().add(
                Expr::expr(column(&alias, &collection.parent_column))
                    .eq(column(ROOT_ALIAS, &shape.identity.column)),
            );
            if let Some(live) = live_rows(&alias, collection.soft_delete.as_ref()) {
                on = on.add(live);
            }
            query.join_as(
                JoinType::LeftJoin,
                Alias::new(&collection.table),
                Alias::new(&alias),
                on,
            );
        }

        let bound = ids
            .iter()
            .map(|id| bind(&shape.identity, id))
            .collect::<PagingResult<Vec<_>>>()?;
        query.and_where(Expr::expr(column(ROOT_ALIAS, &shape.identity.column)).is_in(bound));

        query.order_by_expr(self.slots[0].expr.clone(), Order::Asc);
        for &key in &self.child_keys {
            query.order_by_expr(self.slots[key].expr.clone(), Order::Asc);
        }
        Ok(query)
    }

    /// Decode one phase B row into slot order.
    ///
    /// # Errors
    /// Propagates column decoding failures.
    pub fn decode_row(&self, row: &QueryResult) -> PagingResult<Vec<Value>> {
        self.slots
            .iter()
            .map(|slot| decode(row, &slot.alias, slot.kind))
            .collect()
    }

    /// Collapse fan-out rows into one record per parent, in first-seen order.
    ///
    /// Children are de-duplicated by identity, element collection values by
    /// value. A `NULL` key means the outer join found no child.
    #[must_use]
    pub fn group_rows(&self, rows: Vec<Vec<Value>>) -> Vec<Record> {
        let collections = self.collections;
        let mut records: Vec<Record> = Vec::new();
        let mut index: HashMap<Value, usize> = HashMap::new();
        let mut seen: Vec<Vec<HashSet<Value>>> = Vec::new();

        for row in rows {
            let Some(identity) = row.first().filter(|v| !v.is_null()) else {
                continue;
            };
            let pos = if let Some(&pos) = index.get(identity) {
                pos
            } else {
                let mut record = Record::with_identity(identity.clone());
                for (slot, value) in self.slots.iter().zip(&row) {
                    if let Target::Parent(key) = &slot.target {
                        record.set(key.clone(), value.clone());
                    }
                }
                for collection in collections {
                    record.collection_mut(&collection.name);
                }
                records.push(record);
                seen.push(vec![HashSet::new(); collections.len()]);
                index.insert(identity.clone(), records.len() - 1);
                records.len() - 1
            };

            for (ci, collection) in collections.iter().enumerate() {
                let Some(key) = row.get(self.child_keys[ci]).filter(|v| !v.is_null()) else {
                    continue;
                };
                if !seen[pos][ci].insert(key.clone()) {
                    continue;
                }
                let mut child = Record::with_identity(key.clone());
                for (slot, value) in self.slots.iter().zip(&row) {
                    if let Target::Child { collection, field } = &slot.target
                        && *collection == ci
                    {
                        child.set(field.clone(), value.clone());
                    }
                }
                records[pos].collection_mut(&collection.name).push(child);
            }
        }
        records
    }
}

/// Order `records` like `ids`, dropping identities with no record.
#[must_use]
pub fn arrange(ids: &[Value], records: Vec<Record>) -> Vec<Record> {
    let mut by_id: HashMap<Value, Record> = records
        .into_iter()
        .map(|r| (r.identity().clone(), r))
        .collect();
    ids.iter().filter_map(|id| by_id.remove(id)).collect()
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::shape::{SoftDelete, ToMany, ToOne};
    use sea_orm::sea_query::SqliteQueryBuilder;

    fn shape() -> EntityShape {
        EntityShape::new("users", "id", FieldKind::I64)
            .field("name", "name", FieldKind::String)
            .to_one(ToOne::new("address", "addresses", "address_id", "id").field(
                "city",
                "city",
                FieldKind::String,
            ))
            .to_many(
                ToMany::new("phones", "phones", "user_id", "id", FieldKind::I64)
                    .field("number", "number", FieldKind::String)
                    .soft_delete(SoftDelete::timestamp("deleted_at")),
            )
            .element_collection("tags", "user_tags", "user_id", "tag", FieldKind::String)
    }

    // Slots: id, name, address.city, phones.id, phones.number, tags.
    fn row(id: i64, phone: Option<(i64, &str)>, tag: Option<&str>) -> Vec<Value> {
        vec![
            Value::from(id),
            Value::from(format!("user{id}")),
            Value::Null,
            phone.map_or(Value::Null, |(p, _)| Value::from(p)),
            phone.map_or(Value::Null, |(_, n)| Value::from(n)),
            tag.map_or(Value::Null, Value::from),
        ]
    }

    #[test]
    fn plan_layout() {
        let s = shape();
        let plan = HydrationPlan::new(&s);
        assert_eq!(plan.slots.len(), 6);
        assert_eq!(plan.child_keys, vec![3, 5]);
    }

    #[test]
    fn group_collapses_cartesian_fan_out() {
        let s = shape();
        let plan = HydrationPlan::new(&s);
        let rows = vec![
            row(2, Some((20, "555")), Some("a")),
            row(2, Some((20, "555")), Some("b")),
            row(2, Some((21, "777")), Some("a")),
            row(2, Some((21, "777")), Some("b")),
            row(1, None, None),
        ];
        let records = plan.group_rows(rows);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].identity(), &Value::from(2));
        assert_eq!(records[0].collection("phones").len(), 2);
        assert_eq!(records[0].collection("tags").len(), 2);
        assert_eq!(records[0].collection("phones")[1].value("number"), Value::from("777"));
        assert_eq!(records[0].collection("tags")[1].value("value"), Value::from("b"));
        assert!(records[1].collection("phones").is_empty());
        assert_eq!(records[1].value("name"), Value::from("user1"));

        let json = records[1].to_json();
        assert_eq!(json["phones"], serde_json::json!([]));
        assert_eq!(json["address"], serde_json::Value::Null);
    }

    #[test]
    fn arrange_follows_identity_order() {
        let s = shape();
        let plan = HydrationPlan::new(&s);
        let records = plan.group_rows(vec![row(1, None, None), row(2, None, None), row(3, None, None)]);
        let ids = [Value::from(3), Value::from(9), Value::from(1)];
        let arranged = arrange(&ids, records);
        let got: Vec<_> = arranged.iter().map(|r| r.identity().clone()).collect();
        assert_eq!(got, vec![Value::from(3), Value::from(1)]);
    }

    #[test]
    fn hydration_query_joins_live_children() {
        let s = shape();
        let sql = HydrationPlan::new(&s)
            .query(&[Value::from(1), Value::from(2)])
            .unwrap()
            .to_string(SqliteQueryBuilder);
        assert!(sql.contains(r#"LEFT JOIN "addresses" AS "o_address""#), "{sql}");
        assert!(sql.contains(r#"LEFT JOIN "phones" AS "m_phones""#), "{sql}");
        assert!(sql.contains(r#""m_phones"."deleted_at" IS NULL"#), "{sql}");
        assert!(sql.contains(r#""r"."id" IN (1, 2)"#), "{sql}");
    }

    #[test]
    fn scalar_plan_skips_collections() {
        let s = shape();
        let plan = HydrationPlan::scalar(&s);
        assert_eq!(plan.slots.len(), 3);
        assert!(plan.child_keys.is_empty());

        let sql = plan.query(&[Value::from(2)]).unwrap().to_string(SqliteQueryBuilder);
        assert!(sql.contains(r#"LEFT JOIN "addresses" AS "o_address""#), "{sql}");
        assert!(!sql.contains("m_phones"), "{sql}");
        assert!(!sql.contains("user_tags"), "{sql}");

        let records = plan.group_rows(vec![
            vec![Value::from(2), Value::from("user2"), Value::from("Oslo")],
            vec![Value::from(1), Value::from("user1"), Value::Null],
        ]);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].value("address.city"), Value::from("Oslo"));
        assert!(records[0].collection("phones").is_empty());
    }
}
