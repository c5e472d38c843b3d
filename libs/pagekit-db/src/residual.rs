//! Criteria evaluated on materialized records instead of in the query.
//!
//! Collection criteria are existential: a parent matches when at least one
//! child satisfies every test grouped for that collection. This is the same
//! meaning the `EXISTS` rendering has, so both modes select the same parents.

use std::cmp::Ordering;

use pagekit::{Constraint, SortDir, Value};

use crate::record::Record;

/// A field-level test on a child record of one collection.
#[derive(Clone, Debug, PartialEq)]
pub struct ChildTest {
    pub field: String,
    pub constraint: Constraint,
}

impl ChildTest {
    fn holds(&self, child: &Record) -> bool {
        self.constraint.applies(&child.value(&self.field))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Criterion {
    /// Root or to-one value, addressed by record key.
    Scalar { key: String, constraint: Constraint },
    /// Some child of `collection` passes all `tests`.
    Collection {
        collection: String,
        tests: Vec<ChildTest>,
    },
}

impl Criterion {
    #[must_use]
    pub fn holds(&self, record: &Record) -> bool {
        match self {
            Criterion::Scalar { key, constraint } => constraint.applies(&record.value(key)),
            Criterion::Collection { collection, tests } => record
                .collection(collection)
                .iter()
                .any(|child| tests.iter().all(|t| t.holds(child))),
        }
    }
}

/// The part of a page's criteria left for in-memory evaluation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResidualFilter {
    pub required: Vec<Criterion>,
    /// Evaluated as a whole: at least one must hold when non-empty.
    pub optional: Vec<Criterion>,
}

impl ResidualFilter {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.required.is_empty() && self.optional.is_empty()
    }

    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        self.required.iter().all(|c| c.holds(record))
            && (self.optional.is_empty() || self.optional.iter().any(|c| c.holds(record)))
    }
}

/// Drops fetched children that fail the page's required criteria on their
/// collection.
#[derive(Clone, Debug, PartialEq)]
pub struct CollectionTrim {
    pub collection: String,
    pub tests: Vec<ChildTest>,
}

impl CollectionTrim {
    pub fn apply(&self, record: &mut Record) {
        record
            .collection_mut(&self.collection)
            .retain(|child| self.tests.iter().all(|t| t.holds(child)));
    }
}

/// In-memory ordering of a collection, from an ordering key on one of its fields.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollectionSort {
    pub collection: String,
    pub field: String,
    pub dir: SortDir,
}

impl CollectionSort {
    /// Stable sort; `NULL`s go last in either direction.
    pub fn apply(&self, record: &mut Record) {
        let field = self.field.as_str();
        let dir = self.dir;
        record.collection_mut(&self.collection).sort_by(|a, b| {
            compare_nulls_last(&a.value(field), &b.value(field), dir)
        });
    }
}

fn compare_nulls_last(a: &Value, b: &Value, dir: SortDir) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => {
            let ord = a.compare(b).unwrap_or(Ordering::Equal);
            if dir.is_ascending() { ord } else { ord.reverse() }
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn parent(name: &str, phones: &[(i64, &str)]) -> Record {
        let mut r = Record::new();
        r.set("name", Value::from(name));
        for (id, number) in phones {
            let mut p = Record::new();
            p.set("id", Value::from(*id));
            p.set("number", Value::from(*number));
            r.collection_mut("phones").push(p);
        }
        r
    }

    fn test(field: &str, c: Constraint) -> ChildTest {
        ChildTest {
            field: field.to_owned(),
            constraint: c,
        }
    }

    #[test]
    fn collection_criterion_is_existential() {
        let c = Criterion::Collection {
            collection: "phones".to_owned(),
            tests: vec![test("number", Constraint::like_contains("11").unwrap())],
        };
        assert!(c.holds(&parent("a", &[(1, "000"), (2, "5115")])));
        assert!(!c.holds(&parent("b", &[(1, "000")])));
        assert!(!c.holds(&parent("c", &[])));
    }

    #[test]
    fn grouped_tests_must_hold_on_the_same_child() {
        let c = Criterion::Collection {
            collection: "phones".to_owned(),
            tests: vec![
                test("number", Constraint::like_starts("1").unwrap()),
                test("id", Constraint::gt(1).unwrap()),
            ],
        };
        assert!(!c.holds(&parent("a", &[(1, "100"), (2, "200")])));
        assert!(c.holds(&parent("a", &[(1, "100"), (2, "150")])));
    }

    #[test]
    fn optional_group_needs_one_match() {
        let filter = ResidualFilter {
            required: vec![],
            optional: vec![
                Criterion::Scalar {
                    key: "name".to_owned(),
                    constraint: Constraint::from("zed"),
                },
                Criterion::Collection {
                    collection: "phones".to_owned(),
                    tests: vec![test("number", Constraint::from("1"))],
                },
            ],
        };
        assert!(filter.matches(&parent("zed", &[])));
        assert!(filter.matches(&parent("amy", &[(1, "1")])));
        assert!(!filter.matches(&parent("amy", &[(1, "2")])));
        assert!(ResidualFilter::default().matches(&parent("amy", &[])));
    }

    #[test]
    fn trim_and_sort_collections() {
        let mut r = parent("a", &[(3, "c"), (1, "a"), (2, "b")]);
        r.collection_mut("phones")[1].set("number", Value::Null);
        CollectionTrim {
            collection: "phones".to_owned(),
            tests: vec![test("id", Constraint::gte(1).unwrap())],
        }
        .apply(&mut r);
        CollectionSort {
            collection: "phones".to_owned(),
            field: "number".to_owned(),
            dir: SortDir::Desc,
        }
        .apply(&mut r);
        let numbers: Vec<_> = r.collection("phones").iter().map(|p| p.value("number")).collect();
        assert_eq!(numbers, vec![Value::from("c"), Value::from("b"), Value::Null]);

        CollectionTrim {
            collection: "phones".to_owned(),
            tests: vec![test("id", Constraint::lt(3).unwrap())],
        }
        .apply(&mut r);
        assert_eq!(r.collection("phones").len(), 2);
    }
}
