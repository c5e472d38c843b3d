//! Fluent facade running a [`Page`] against a connection.
//!
//! # Quick Start
//!
//! ```ignore
//! use pagekit::{Constraint, Page};
//! use pagekit_db::{EntityShape, FieldKind, Pager, PagerConfig};
//!
//! let page = Page::with()
//!     .range(0, 20)
//!     .order_by("name", true)
//!     .all_match([("phones.number", Constraint::like_contains("11")?)])
//!     .build()?;
//!
//! let users = Pager::new(&db, &user_shape())
//!     .config(PagerConfig::default())
//!     .fetch_as::<UserDto>(&page)
//!     .await?;
//! ```
//!
//! One call runs its queries sequentially on the borrowed connection: the
//! cursor lookup (keyset pages whose cursor lacks key values), the identity
//! window, the hydration fetch-join and the optional count. Store errors are
//! returned unchanged and nothing is retried.

use pagekit::{Cursor, Page, PartialResultList, Value};
use sea_orm::sea_query::{Alias, Condition, Expr, Func, Query, SelectStatement};
use sea_orm::{ConnectionTrait, DbBackend, QueryResult};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, trace, warn};

use crate::config::PagerConfig;
use crate::error::{PagingError, PagingResult};
use crate::keyset::normalize_result_order;
use crate::materialize::{HydrationPlan, IDENTITY_ALIAS, arrange, decode, ids_query};
use crate::predicate::{bind, column, live_rows};
use crate::projection::{FromProjection, Projection, project_record};
use crate::record::Record;
use crate::shape::EntityShape;
use crate::translate::{ROOT_ALIAS, Translation, join_to_ones, translate};

/// Parents hydrated per fetch-join query.
const HYDRATION_CHUNK: usize = 500;

const TOTAL_ALIAS: &str = "total";

/// How much of each parent phase B loads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Hydration {
    /// Every field and collection.
    Full,
    /// Root and to-one fields; collections only when the page filters on
    /// them in memory.
    Scalar,
}

#[must_use]
pub struct Pager<'a, C>
where
    C: ConnectionTrait,
{
    conn: &'a C,
    shape: &'a EntityShape,
    cfg: PagerConfig,
    count: Option<bool>,
}

impl<'a, C> Pager<'a, C>
where
    C: ConnectionTrait,
{
    pub fn new(conn: &'a C, shape: &'a EntityShape) -> Self {
        Self {
            conn,
            shape,
            cfg: PagerConfig::default(),
            count: None,
        }
    }

    pub fn config(mut self, cfg: PagerConfig) -> Self {
        self.cfg = cfg;
        self
    }

    /// Whether `fetch` also computes the total; defaults to
    /// [`PagerConfig::count_by_default`].
    pub fn with_count(mut self, count: bool) -> Self {
        self.count = Some(count);
        self
    }

    fn backend(&self) -> DbBackend {
        self.conn.get_database_backend()
    }

    fn wants_count(&self) -> bool {
        self.count.unwrap_or(self.cfg.count_by_default)
    }

    /// Fetch one page of records.
    ///
    /// # Errors
    /// Translation errors before any query runs; `CursorNotFound` when a
    /// keyset cursor names no live entity; `Db` for store failures.
    pub async fn fetch(&self, page: &Page) -> PagingResult<PartialResultList<Record>> {
        self.run(page, Hydration::Full).await
    }

    #[instrument(skip_all, fields(table = %self.shape.table, offset = page.offset(), limit = page.limit(), ?hydration))]
    async fn run(&self, page: &Page, hydration: Hydration) -> PagingResult<PartialResultList<Record>> {
        let translation = translate(page, self.shape, &self.cfg, self.backend())?;
        let records = self.records(&translation, hydration).await?;
        let total = if self.wants_count() {
            Some(self.count_translated(&translation).await?)
        } else {
            None
        };
        let result = PartialResultList::new(records, translation.offset, total);
        debug!(
            items = result.len(),
            estimated_total = result.estimated_total(),
            "page fetched"
        );
        Ok(result)
    }

    /// Fetch one page and deserialize each record into `T`.
    ///
    /// # Errors
    /// As [`Pager::fetch`], plus `Decode` when a record does not fit `T`.
    pub async fn fetch_as<T: DeserializeOwned>(
        &self,
        page: &Page,
    ) -> PagingResult<PartialResultList<T>> {
        self.fetch(page).await?.try_map(|r| r.deserialize())
    }

    /// Fetch one page projected onto `D`.
    ///
    /// # Errors
    /// As [`Pager::fetch`], plus `Projection` for unprojectable paths or rows
    /// that do not fit `D`.
    pub async fn project<D: FromProjection>(
        &self,
        page: &Page,
        projection: &Projection,
    ) -> PagingResult<PartialResultList<D>> {
        let keys = projection.keys(self.shape)?;
        self.run(page, Hydration::Scalar)
            .await?
            .try_map(|r| project_record(&r, &keys))
    }

    /// Number of entities matching the page's criteria, ignoring its window.
    ///
    /// # Errors
    /// Translation errors, or `Db` for store failures.
    #[instrument(skip_all, fields(table = %self.shape.table))]
    pub async fn count(&self, page: &Page) -> PagingResult<u64> {
        let translation = translate(page, self.shape, &self.cfg, self.backend())?;
        self.count_translated(&translation).await
    }

    /* ---------- execution ---------- */

    async fn query_all(&self, query: &SelectStatement) -> PagingResult<Vec<QueryResult>> {
        let stmt = self.backend().build(query);
        trace!(sql = %stmt.sql, "query");
        Ok(self.conn.query_all(stmt).await?)
    }

    async fn query_one(&self, query: &SelectStatement) -> PagingResult<Option<QueryResult>> {
        let stmt = self.backend().build(query);
        trace!(sql = %stmt.sql, "query");
        Ok(self.conn.query_one(stmt).await?)
    }

    async fn records(&self, t: &Translation, hydration: Hydration) -> PagingResult<Vec<Record>> {
        let keyset = match &t.cursor {
            Some(cursor) => Some(t.keyset_condition(self.cursor_values(t, cursor).await?)),
            None => None,
        };
        let plan = if hydration == Hydration::Scalar && !t.is_batched() {
            HydrationPlan::scalar(self.shape)
        } else {
            HydrationPlan::new(self.shape)
        };

        let mut records = if t.is_batched() {
            self.filtered(t, keyset, &plan).await?
        } else {
            let ids = self.ids(t, keyset, t.limit, t.offset).await?;
            self.hydrate(&plan, &ids).await?
        };
        for record in &mut records {
            t.finish(record);
        }
        normalize_result_order(&mut records, t.reversed);
        Ok(records)
    }

    async fn ids(
        &self,
        t: &Translation,
        keyset: Option<Condition>,
        limit: u64,
        offset: u64,
    ) -> PagingResult<Vec<Value>> {
        let query = ids_query(self.shape, t, keyset, limit, offset);
        let rows = self.query_all(&query).await?;
        let kind = self.shape.identity.kind;
        rows.iter()
            .map(|row| decode(row, IDENTITY_ALIAS, kind))
            .collect()
    }

    async fn hydrate(&self, plan: &HydrationPlan<'_>, ids: &[Value]) -> PagingResult<Vec<Record>> {
        let mut records = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(HYDRATION_CHUNK) {
            let rows = self.query_all(&plan.query(chunk)?).await?;
            let decoded = rows
                .iter()
                .map(|row| plan.decode_row(row))
                .collect::<PagingResult<Vec<_>>>()?;
            trace!(parents = chunk.len(), rows = decoded.len(), "hydrated");
            records.extend(plan.group_rows(decoded));
        }
        Ok(arrange(ids, records))
    }

    /// Window over parents that pass the residual filter: fetch batches of
    /// identities, hydrate, test, skip `offset` matches, keep `limit`.
    async fn filtered(
        &self,
        t: &Translation,
        keyset: Option<Condition>,
        plan: &HydrationPlan<'_>,
    ) -> PagingResult<Vec<Record>> {
        let batch = self.cfg.batch_size(t.limit);
        let mut skip = t.offset;
        let mut store_offset = 0u64;
        let mut out = Vec::new();

        loop {
            let ids = self.ids(t, keyset.clone(), batch, store_offset).await?;
            let fetched = u64::try_from(ids.len()).unwrap_or(u64::MAX);
            for record in self.hydrate(plan, &ids).await? {
                if !t.residual.matches(&record) {
                    continue;
                }
                if skip > 0 {
                    skip -= 1;
                    continue;
                }
                out.push(record);
                if u64::try_from(out.len()).unwrap_or(u64::MAX) >= t.limit {
                    return Ok(out);
                }
            }
            debug!(store_offset, fetched, kept = out.len(), "in-memory filter batch");
            if fetched < batch {
                return Ok(out);
            }
            store_offset = store_offset.saturating_add(batch);
        }
    }

    /// Store value of every order term for the cursor entity. Keys carried by
    /// the cursor are used as is; the rest are read from the store. `None`
    /// marks a `NULL` key.
    async fn cursor_values(
        &self,
        t: &Translation,
        cursor: &Cursor,
    ) -> PagingResult<Vec<Option<sea_orm::Value>>> {
        let identity = &self.shape.identity;
        let identity_expr = column(ROOT_ALIAS, &identity.column);

        let mut values: Vec<Option<Value>> = t
            .order
            .iter()
            .map(|term| {
                if term.expr == identity_expr {
                    Some(cursor.identity.clone())
                } else {
                    cursor.key(&term.path).cloned()
                }
            })
            .collect();

        if values.iter().any(Option::is_none) {
            let mut query = Query::select();
            for (i, term) in t.order.iter().enumerate() {
                query.expr_as(term.expr.clone(), Alias::new(format!("k{i}")));
            }
            query.from_as(Alias::new(&self.shape.table), Alias::new(ROOT_ALIAS));
            join_to_ones(&mut query, self.shape);
            let mut cond = Condition::all()
                .add(Expr::expr(identity_expr.clone()).eq(bind(identity, &cursor.identity)?));
            if let Some(live) = live_rows(ROOT_ALIAS, self.shape.soft_delete.as_ref()) {
                cond = cond.add(live);
            }
            query.cond_where(cond);
            let row = self
                .query_one(&query)
                .await?
                .ok_or_else(|| PagingError::CursorNotFound(cursor.identity.to_string()))?;
            for (i, (slot, term)) in values.iter_mut().zip(&t.order).enumerate() {
                if slot.is_none() {
                    *slot = Some(decode(&row, &format!("k{i}"), term.field.kind)?);
                }
            }
        }

        values
            .into_iter()
            .zip(&t.order)
            .map(|(value, term)| {
                value
                    .filter(|v| !v.is_null())
                    .map(|v| bind(&term.field, &v))
                    .transpose()
            })
            .collect()
    }

    async fn count_translated(&self, t: &Translation) -> PagingResult<u64> {
        if t.is_batched() {
            warn!(
                table = %self.shape.table,
                "count ignores collection criteria evaluated in memory and may overcount"
            );
        }
        let mut query = Query::select();
        query
            .expr_as(
                Func::count(column(ROOT_ALIAS, &self.shape.identity.column)),
                Alias::new(TOTAL_ALIAS),
            )
            .from_as(Alias::new(&self.shape.table), Alias::new(ROOT_ALIAS));
        join_to_ones(&mut query, self.shape);
        query.cond_where(t.filter.clone());

        let total = self
            .query_one(&query)
            .await?
            .map(|row| row.try_get::<i64>("", TOTAL_ALIAS))
            .transpose()?
            .unwrap_or(0);
        Ok(u64::try_from(total).unwrap_or(0))
    }
}
