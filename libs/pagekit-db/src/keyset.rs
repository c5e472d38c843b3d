//! Keyset (cursor) paging.
//!
//! Two independent pieces: [`build_keyset_predicate`] selects the rows
//! strictly after (or, reversed, strictly before) the cursor's key tuple,
//! and [`normalize_result_order`] puts a reversed fetch back into traversal
//! order. A reversed page is fetched with every `ORDER BY` direction flipped
//! so that the `limit` rows nearest to the cursor come first.
//!
//! `NULL` sorts below every value in both directions; [`null_ordering`] pins
//! that in the `ORDER BY` so every backend agrees with the predicate.

use pagekit::SortDir;
use sea_orm::sea_query::{Condition, Expr, NullOrdering, SimpleExpr};

/// One ordering key with the cursor entity's value for it; `None` is `NULL`.
#[derive(Clone, Debug)]
pub struct KeysetTerm {
    pub expr: SimpleExpr,
    pub dir: SortDir,
    pub value: Option<sea_orm::Value>,
    /// Whether rows may hold `NULL` for this key. False for the identity.
    pub nullable: bool,
}

impl KeysetTerm {
    fn equal(&self) -> SimpleExpr {
        let col = Expr::expr(self.expr.clone());
        match &self.value {
            Some(v) => col.eq(v.clone()),
            None => col.is_null(),
        }
    }

    /// Rows past the cursor on this key alone, or `None` when there are none.
    fn beyond(&self, upward: bool) -> Option<Condition> {
        let col = || Expr::expr(self.expr.clone());
        match (&self.value, upward) {
            (Some(v), true) => Some(Condition::all().add(col().gt(v.clone()))),
            (Some(v), false) if self.nullable => Some(
                Condition::any()
                    .add(col().lt(v.clone()))
                    .add(col().is_null()),
            ),
            (Some(v), false) => Some(Condition::all().add(col().lt(v.clone()))),
            (None, true) => Some(Condition::all().add(col().is_not_null())),
            (None, false) => None,
        }
    }
}

/// Lexicographic "strictly after the cursor in traversal order" condition:
///
/// ```text
/// OR over i of ( AND over j < i of (kj = cj) AND ki op ci )
/// op = '>' when (ascending XOR reversed), '<' otherwise
/// ```
///
/// with `NULL` below every value: `= NULL` is `IS NULL`, `> NULL` is
/// `IS NOT NULL`, `< c` also admits `NULL`, and `< NULL` drops the branch.
#[must_use]
pub fn build_keyset_predicate(terms: &[KeysetTerm], reversed: bool) -> Condition {
    let mut main_condition = Condition::any();
    let mut branches = 0usize;

    for (i, term) in terms.iter().enumerate() {
        let Some(beyond) = term.beyond(term.dir.is_ascending() != reversed) else {
            continue;
        };
        let mut prefix_condition = Condition::all();
        for prev in &terms[..i] {
            prefix_condition = prefix_condition.add(prev.equal());
        }
        main_condition = main_condition.add(prefix_condition.add(beyond));
        branches += 1;
    }

    if branches == 0 {
        // Nothing lies past the cursor.
        main_condition = main_condition.add(Expr::val(1).eq(0));
    }
    main_condition
}

/// `NULLS FIRST` for ascending fetches, `NULLS LAST` for descending ones.
#[must_use]
pub fn null_ordering(fetch_dir: SortDir) -> NullOrdering {
    if fetch_dir.is_ascending() {
        NullOrdering::First
    } else {
        NullOrdering::Last
    }
}

/// Direction to put in `ORDER BY` for a key when fetching.
#[must_use]
pub fn fetch_direction(dir: SortDir, reversed: bool) -> SortDir {
    if reversed { dir.reverse() } else { dir }
}

/// Restore traversal order of rows fetched with reversed directions.
pub fn normalize_result_order<T>(rows: &mut [T], reversed: bool) {
    if reversed {
        rows.reverse();
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use sea_orm::sea_query::{Alias, Query, SqliteQueryBuilder};

    fn term(name: &str, dir: SortDir, value: i64) -> KeysetTerm {
        KeysetTerm {
            expr: Expr::col(Alias::new(name)).into(),
            dir,
            value: Some(value.into()),
            nullable: name != "id",
        }
    }

    fn null_term(name: &str, dir: SortDir) -> KeysetTerm {
        KeysetTerm {
            expr: Expr::col(Alias::new(name)).into(),
            dir,
            value: None,
            nullable: true,
        }
    }

    fn render(cond: Condition) -> String {
        Query::select()
            .expr(Expr::val(1))
            .from(Alias::new("t"))
            .cond_where(cond)
            .to_string(SqliteQueryBuilder)
    }

    #[test]
    fn single_key_forward_and_reversed() {
        let terms = [term("id", SortDir::Asc, 10)];
        assert!(render(build_keyset_predicate(&terms, false)).ends_with(r#"WHERE "id" > 10"#));
        assert!(render(build_keyset_predicate(&terms, true)).ends_with(r#"WHERE "id" < 10"#));

        let terms = [term("id", SortDir::Desc, 10)];
        assert!(render(build_keyset_predicate(&terms, false)).ends_with(r#"WHERE "id" < 10"#));
        assert!(render(build_keyset_predicate(&terms, true)).ends_with(r#"WHERE "id" > 10"#));
    }

    #[test]
    fn nulls_sort_below_every_value() {
        // Descending walk: NULL keys come after all values.
        let terms = [term("active", SortDir::Desc, 0), term("id", SortDir::Desc, 7)];
        let sql = render(build_keyset_predicate(&terms, false));
        assert!(sql.contains(r#""active" < 0 OR "active" IS NULL"#), "{sql}");
        assert!(sql.contains(r#""active" = 0 AND "id" < 7"#), "{sql}");

        // Cursor on a NULL key: only NULL keys with a later identity remain.
        let terms = [null_term("active", SortDir::Desc), term("id", SortDir::Desc, 7)];
        let sql = render(build_keyset_predicate(&terms, false));
        assert!(sql.contains(r#""active" IS NULL AND "id" < 7"#), "{sql}");
        assert!(!sql.contains(r#""active" <"#), "{sql}");

        // Walking back from a NULL key reaches every non-NULL key.
        let sql = render(build_keyset_predicate(&terms, true));
        assert!(sql.contains(r#""active" IS NOT NULL"#), "{sql}");
        assert!(sql.contains(r#""active" IS NULL AND "id" > 7"#), "{sql}");

        let sql = render(build_keyset_predicate(&[null_term("active", SortDir::Asc)], true));
        assert!(sql.contains("1 = 0"), "{sql}");

        let sql = render(build_keyset_predicate(&[term("age", SortDir::Asc, 4)], true));
        assert!(sql.contains(r#""age" < 4 OR "age" IS NULL"#), "{sql}");
    }

    #[test]
    fn null_ordering_follows_fetch_direction() {
        assert!(matches!(null_ordering(SortDir::Asc), NullOrdering::First));
        assert!(matches!(null_ordering(SortDir::Desc), NullOrdering::Last));
    }

    #[test]
    fn composite_key_builds_prefix_chain() {
        let terms = [term("score", SortDir::Desc, 5), term("id", SortDir::Asc, 3)];
        let sql = render(build_keyset_predicate(&terms, false));
        assert!(sql.contains(r#""score" < 5 OR "score" IS NULL"#), "{sql}");
        assert!(sql.contains(r#""score" = 5 AND "id" > 3"#), "{sql}");

        let sql = render(build_keyset_predicate(&terms, true));
        assert!(sql.contains(r#""score" > 5"#), "{sql}");
        assert!(sql.contains(r#""score" = 5 AND "id" < 3"#), "{sql}");
    }

    #[test]
    fn fetch_direction_flips_only_when_reversed() {
        assert_eq!(fetch_direction(SortDir::Asc, false), SortDir::Asc);
        assert_eq!(fetch_direction(SortDir::Asc, true), SortDir::Desc);
        assert_eq!(fetch_direction(SortDir::Desc, true), SortDir::Asc);
    }

    #[test]
    fn normalize_reverses_only_reversed_pages() {
        let mut rows = vec![3, 2, 1];
        normalize_result_order(&mut rows, false);
        assert_eq!(rows, vec![3, 2, 1]);
        normalize_result_order(&mut rows, true);
        assert_eq!(rows, vec![1, 2, 3]);
    }
}
