//! Page → query plan.
//!
//! The translator splits a [`Page`] into what the store evaluates (filter,
//! ordering, keyset bounds) and what is evaluated on materialized records
//! (residual criteria, collection trimming and sorting). Root and to-one
//! criteria always go to the store. To-many criteria go to the store as
//! correlated `EXISTS` subqueries, or stay in memory, per
//! [`CollectionFilterMode`].

use std::collections::BTreeMap;

use pagekit::{Constraint, Cursor, Page, SortDir};
use sea_orm::DbBackend;
use sea_orm::sea_query::{
    Alias, Condition, Expr, Func, JoinType, Order, Query, SelectStatement, SimpleExpr,
    SubQueryStatement,
};
use tracing::debug;

use crate::config::{CollectionFilterMode, PagerConfig};
use crate::error::{PagingError, PagingResult};
use crate::keyset::{KeysetTerm, build_keyset_predicate, fetch_direction, null_ordering};
use crate::predicate::{column, constraint_condition, live_rows, normalize_constraint};
use crate::record::Record;
use crate::residual::{ChildTest, CollectionSort, CollectionTrim, Criterion, ResidualFilter};
use crate::shape::{EntityShape, Field, Resolved, ToMany};

/// Alias of the root table in every generated query.
pub const ROOT_ALIAS: &str = "r";

#[must_use]
pub(crate) fn to_one_alias(name: &str) -> String {
    format!("o_{name}")
}

#[must_use]
pub(crate) fn collection_alias(name: &str) -> String {
    format!("m_{name}")
}

/// Store expression of a resolved path. To-many fields are addressed through
/// their collection alias and are only valid inside a correlated subquery.
fn target(resolved: &Resolved<'_>) -> SimpleExpr {
    match resolved {
        Resolved::Root(f) => column(ROOT_ALIAS, &f.column),
        Resolved::ToOne(a, f) => column(&to_one_alias(&a.name), &f.column),
        Resolved::ToMany(c, f) => column(&collection_alias(&c.name), &f.column),
    }
}

/// `LEFT JOIN` every to-one association of `shape` onto the root alias.
pub(crate) fn join_to_ones(query: &mut SelectStatement, shape: &EntityShape) {
    for assoc in &shape.to_one {
        let alias = to_one_alias(&assoc.name);
        query.join_as(
            JoinType::LeftJoin,
            Alias::new(&assoc.table),
            Alias::new(&alias),
            Expr::expr(column(&alias, &assoc.remote_column))
                .eq(column(ROOT_ALIAS, &assoc.local_column)),
        );
    }
}

/// One `ORDER BY` key of the parent query.
#[derive(Clone, Debug)]
pub struct OrderTerm {
    pub path: String,
    pub field: Field,
    pub expr: SimpleExpr,
    pub dir: SortDir,
    /// Ordered by a to-many representative value.
    pub to_many: bool,
    /// False only for the identity column.
    pub nullable: bool,
}

/// Everything needed to fetch and post-process one page.
#[derive(Clone, Debug)]
pub struct Translation {
    /// Soft delete, pushed-down required criteria and the optional group.
    pub filter: Condition,
    pub order: Vec<OrderTerm>,
    pub residual: ResidualFilter,
    pub trims: Vec<CollectionTrim>,
    pub sorts: Vec<CollectionSort>,
    pub cursor: Option<Cursor>,
    pub reversed: bool,
    /// Zero for keyset pages.
    pub offset: u64,
    pub limit: u64,
}

impl Translation {
    /// Parents must be filtered after hydration.
    #[must_use]
    pub fn is_batched(&self) -> bool {
        !self.residual.is_empty()
    }

    /// Apply the ordering, flipped for reversed keyset pages. Nullable keys
    /// sort `NULL` below every value.
    pub fn apply_order(&self, query: &mut SelectStatement) {
        for term in &self.order {
            let dir = fetch_direction(term.dir, self.reversed);
            let order = if dir.is_ascending() {
                Order::Asc
            } else {
                Order::Desc
            };
            if term.nullable {
                query.order_by_expr_with_nulls(term.expr.clone(), order, null_ordering(dir));
            } else {
                query.order_by_expr(term.expr.clone(), order);
            }
        }
    }

    /// Keyset bound from the cursor's value for every order term, in order;
    /// `None` stands for a `NULL` key.
    #[must_use]
    pub fn keyset_condition(&self, values: Vec<Option<sea_orm::Value>>) -> Condition {
        let terms: Vec<KeysetTerm> = self
            .order
            .iter()
            .zip(values)
            .map(|(term, value)| KeysetTerm {
                expr: term.expr.clone(),
                dir: term.dir,
                value,
                nullable: term.nullable,
            })
            .collect();
        build_keyset_predicate(&terms, self.reversed)
    }

    /// Trim then sort the collections of a hydrated parent.
    pub fn finish(&self, record: &mut Record) {
        for trim in &self.trims {
            trim.apply(record);
        }
        // Stable sorts, least significant key first.
        for sort in self.sorts.iter().rev() {
            sort.apply(record);
        }
    }
}

struct CollectionGroup<'s> {
    collection: &'s ToMany,
    tests: Vec<ChildTest>,
    conditions: Vec<Condition>,
}

type Groups<'s> = BTreeMap<&'s str, CollectionGroup<'s>>;

struct Translator<'s> {
    shape: &'s EntityShape,
    cfg: &'s PagerConfig,
    backend: DbBackend,
}

impl<'s> Translator<'s> {
    fn criterion(
        &self,
        path: &str,
        constraint: &Constraint,
    ) -> PagingResult<(Resolved<'s>, Constraint, Condition)> {
        let resolved = self.shape.resolve(path)?;
        let field = resolved.field();
        let normalized = normalize_constraint(field, constraint)?;
        let condition = constraint_condition(&normalized, &target(&resolved), field, self.backend)?;
        Ok((resolved, normalized, condition))
    }

    fn correlated(&self, collection: &ToMany, conditions: &[Condition]) -> (String, Condition) {
        let alias = collection_alias(&collection.name);
        let mut cond = Condition::all().add(
            Expr::expr(column(&alias, &collection.parent_column))
                .eq(column(ROOT_ALIAS, &self.shape.identity.column)),
        );
        if let Some(live) = live_rows(&alias, collection.soft_delete.as_ref()) {
            cond = cond.add(live);
        }
        for c in conditions {
            cond = cond.add(c.clone());
        }
        (alias, cond)
    }

    fn exists(&self, collection: &ToMany, conditions: &[Condition]) -> SimpleExpr {
        let (alias, cond) = self.correlated(collection, conditions);
        Expr::exists(
            Query::select()
                .expr(Expr::val(1))
                .from_as(Alias::new(&collection.table), Alias::new(&alias))
                .cond_where(cond)
                .to_owned(),
        )
    }

    /// First value of the collection in its own sort order: `MIN` ascending,
    /// `MAX` descending, over the children kept by the required criteria.
    fn representative(
        &self,
        collection: &ToMany,
        field: &Field,
        dir: SortDir,
        conditions: &[Condition],
    ) -> SimpleExpr {
        let (alias, cond) = self.correlated(collection, conditions);
        let col = column(&alias, &field.column);
        let agg = if dir.is_ascending() {
            Func::min(col)
        } else {
            Func::max(col)
        };
        let sub = Query::select()
            .expr(agg)
            .from_as(Alias::new(&collection.table), Alias::new(&alias))
            .cond_where(cond)
            .to_owned();
        SimpleExpr::SubQuery(None, Box::new(SubQueryStatement::SelectStatement(sub)))
    }

    fn in_memory(&self) -> bool {
        self.cfg.collection_filter == CollectionFilterMode::InMemory
    }

    /// AND group. Root and to-one criteria go straight into `filter`; to-many
    /// criteria are grouped per collection so one child must satisfy them all.
    fn required(
        &self,
        page: &Page,
        mut filter: Condition,
        residual: &mut ResidualFilter,
    ) -> PagingResult<(Condition, Groups<'s>)> {
        let mut groups: Groups<'s> = BTreeMap::new();
        for (path, constraint) in page.required() {
            let (resolved, normalized, condition) = self.criterion(path, constraint)?;
            match resolved {
                Resolved::ToMany(collection, field) => {
                    let group = groups
                        .entry(collection.name.as_str())
                        .or_insert_with(|| CollectionGroup {
                            collection,
                            tests: Vec::new(),
                            conditions: Vec::new(),
                        });
                    group.tests.push(ChildTest {
                        field: field.name.clone(),
                        constraint: normalized,
                    });
                    group.conditions.push(condition);
                }
                Resolved::Root(_) | Resolved::ToOne(..) => filter = filter.add(condition),
            }
        }

        for group in groups.values() {
            if self.in_memory() {
                residual.required.push(Criterion::Collection {
                    collection: group.collection.name.clone(),
                    tests: group.tests.clone(),
                });
            } else {
                filter = filter.add(self.exists(group.collection, &group.conditions));
            }
        }
        Ok((filter, groups))
    }

    /// OR group. Evaluated wholly in memory when it mixes in a to-many
    /// criterion under [`CollectionFilterMode::InMemory`].
    fn optional(
        &self,
        page: &Page,
        filter: Condition,
        residual: &mut ResidualFilter,
    ) -> PagingResult<Condition> {
        let mut optional = Vec::with_capacity(page.optional().len());
        for (path, constraint) in page.optional() {
            optional.push(self.criterion(path, constraint)?);
        }
        if optional.is_empty() {
            return Ok(filter);
        }

        if self.in_memory() && optional.iter().any(|(r, _, _)| r.is_to_many()) {
            residual.optional = optional
                .into_iter()
                .map(|(resolved, constraint, _)| match resolved {
                    Resolved::ToMany(collection, field) => Criterion::Collection {
                        collection: collection.name.clone(),
                        tests: vec![ChildTest {
                            field: field.name.clone(),
                            constraint,
                        }],
                    },
                    scalar => Criterion::Scalar {
                        key: scalar.record_key(),
                        constraint,
                    },
                })
                .collect();
            return Ok(filter);
        }

        let mut any = Condition::any();
        for (resolved, _, condition) in optional {
            any = match resolved {
                Resolved::ToMany(collection, _) => {
                    any.add(self.exists(collection, std::slice::from_ref(&condition)))
                }
                Resolved::Root(_) | Resolved::ToOne(..) => any.add(condition),
            };
        }
        Ok(filter.add(any))
    }

    /// Order terms, plus the in-memory sorts of collections ordered on.
    fn ordering(
        &self,
        page: &Page,
        groups: &Groups<'s>,
    ) -> PagingResult<(Vec<OrderTerm>, Vec<CollectionSort>)> {
        let shape = self.shape;
        let mut order = Vec::with_capacity(page.order().len() + 1);
        let mut sorts = Vec::new();
        let mut has_identity = false;
        for key in page.order() {
            let resolved = shape.resolve(&key.field)?;
            let term = match resolved {
                Resolved::ToMany(collection, field) => {
                    let conditions = groups
                        .get(collection.name.as_str())
                        .map_or(&[][..], |g| g.conditions.as_slice());
                    sorts.push(CollectionSort {
                        collection: collection.name.clone(),
                        field: field.name.clone(),
                        dir: key.dir,
                    });
                    OrderTerm {
                        path: key.field.clone(),
                        field: field.clone(),
                        expr: self.representative(collection, field, key.dir, conditions),
                        dir: key.dir,
                        to_many: true,
                        nullable: true,
                    }
                }
                Resolved::Root(field) | Resolved::ToOne(_, field) => {
                    let is_identity = matches!(
                        resolved,
                        Resolved::Root(f) if f.column == shape.identity.column
                    );
                    has_identity |= is_identity;
                    OrderTerm {
                        path: key.field.clone(),
                        field: field.clone(),
                        expr: target(&resolved),
                        dir: key.dir,
                        to_many: false,
                        nullable: !is_identity,
                    }
                }
            };
            order.push(term);
        }

        if self.cfg.identity_tiebreaker && !has_identity {
            let dir = order.last().map_or(SortDir::Desc, |t| t.dir);
            order.push(OrderTerm {
                path: shape.identity.name.clone(),
                field: shape.identity.clone(),
                expr: column(ROOT_ALIAS, &shape.identity.column),
                dir,
                to_many: false,
                nullable: false,
            });
        }
        Ok((order, sorts))
    }

    fn translate(&self, page: &Page) -> PagingResult<Translation> {
        let shape = self.shape;
        let mut filter = Condition::all();
        if let Some(live) = live_rows(ROOT_ALIAS, shape.soft_delete.as_ref()) {
            filter = filter.add(live);
        }
        let mut residual = ResidualFilter::default();

        let (filter, groups) = self.required(page, filter, &mut residual)?;
        let filter = self.optional(page, filter, &mut residual)?;
        let (order, sorts) = self.ordering(page, &groups)?;
        let trims = groups
            .values()
            .map(|g| CollectionTrim {
                collection: g.collection.name.clone(),
                tests: g.tests.clone(),
            })
            .collect();

        let cursor = page.cursor().cloned();
        if cursor.is_some()
            && let Some(term) = order.iter().find(|t| t.to_many)
        {
            return Err(PagingError::UnsupportedCursorOrdering(term.path.clone()));
        }
        let limit = self.cfg.clamp_limit(page.limit());
        let offset = if cursor.is_some() { 0 } else { page.offset() };

        debug!(
            table = %shape.table,
            required = page.required().len(),
            optional = page.optional().len(),
            order_terms = order.len(),
            residual = !residual.is_empty(),
            keyset = cursor.is_some(),
            offset,
            limit,
            "page translated"
        );

        Ok(Translation {
            filter,
            order,
            residual,
            trims,
            sorts,
            cursor,
            reversed: page.is_reversed(),
            offset,
            limit,
        })
    }
}

/// Translate `page` against `shape` for `backend`.
///
/// # Errors
/// `UnknownField` for paths the shape does not declare, `TypeMismatch` and
/// `UnsupportedConstraint` for criteria that do not fit their field, and
/// `UnsupportedCursorOrdering` for keyset pages ordered by a to-many path.
pub fn translate(
    page: &Page,
    shape: &EntityShape,
    cfg: &PagerConfig,
    backend: DbBackend,
) -> PagingResult<Translation> {
    Translator {
        shape,
        cfg,
        backend,
    }
    .translate(page)
}
