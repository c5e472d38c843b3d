#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{connect, ids, seed_contacts, shape, strings};
use pagekit::{Constraint, Page, PartialResultList};
use pagekit_db::{CollectionFilterMode, Pager, PagerConfig, PagingError, Projection, Record};
use sea_orm::DatabaseConnection;
use serde::Deserialize;

fn in_memory() -> PagerConfig {
    PagerConfig {
        collection_filter: CollectionFilterMode::InMemory,
        ..PagerConfig::default()
    }
}

async fn fetch(conn: &DatabaseConnection, cfg: PagerConfig, page: &Page) -> PartialResultList<Record> {
    Pager::new(conn, &shape()).config(cfg).fetch(page).await.unwrap()
}

fn phones(list: &PartialResultList<Record>, index: usize) -> Vec<String> {
    strings(list.items()[index].collection("phones"), "number")
}

fn with_phone_like(offset: i64, pattern: &str) -> Page {
    Page::with()
        .range(offset, 2)
        .order_by("id", true)
        .all_match([("phones.number", Constraint::like_contains(pattern).unwrap())])
        .build()
        .unwrap()
}

#[tokio::test]
async fn collection_criterion_selects_parents_and_trims_children() {
    let conn = connect().await.unwrap();
    seed_contacts(&conn).await.unwrap();

    let first = fetch(&conn, PagerConfig::default(), &with_phone_like(0, "11")).await;
    assert_eq!(ids(&first), vec![1, 2]);
    assert_eq!(first.estimated_total(), 4);
    assert_eq!(phones(&first, 0), vec!["111"]);
    assert_eq!(phones(&first, 1), vec!["311"]);
    // Unrelated collections are untouched.
    assert_eq!(strings(first.items()[0].collection("tags"), "value"), vec!["a", "b"]);

    let second = fetch(&conn, PagerConfig::default(), &with_phone_like(2, "11")).await;
    assert_eq!(ids(&second), vec![3, 6]);
    assert_eq!(phones(&second, 0), vec!["611", "511"]);
    assert_eq!(second.has_more(), Some(false));
}

#[tokio::test]
async fn in_memory_mode_selects_the_same_page() {
    let conn = connect().await.unwrap();
    seed_contacts(&conn).await.unwrap();

    for offset in [0, 2] {
        let page = with_phone_like(offset, "11");
        let exists = fetch(&conn, PagerConfig::default(), &page).await;
        let memory = fetch(&conn, in_memory(), &page).await;
        assert_eq!(ids(&memory), ids(&exists));
        assert_eq!(phones(&memory, 0), phones(&exists, 0));
        // The count cannot see criteria evaluated in memory.
        assert_eq!(memory.estimated_total(), 6);
    }
}

#[tokio::test]
async fn deleted_children_neither_match_nor_load() {
    let conn = connect().await.unwrap();
    seed_contacts(&conn).await.unwrap();

    for cfg in [PagerConfig::default(), in_memory()] {
        let page = with_phone_like(0, "115");
        assert!(fetch(&conn, cfg, &page).await.is_empty());
    }

    let page = Page::with().range(0, 3).order_by("id", false).build().unwrap();
    let items = fetch(&conn, PagerConfig::default(), &page).await;
    assert_eq!(ids(&items), vec![6, 5, 4]);
    assert_eq!(phones(&items, 1), vec!["999"]);
    assert!(items.items()[2].collection("phones").is_empty());
    assert!(items.items()[2].collection("tags").is_empty());
}

#[tokio::test]
async fn criteria_on_one_collection_hold_on_the_same_child() {
    let conn = connect().await.unwrap();
    seed_contacts(&conn).await.unwrap();
    // User 1 has a phone starting with 1 and another with id 11, but no
    // single phone satisfying both.
    let page = Page::with()
        .order_by("id", true)
        .all_match([
            ("phones.number", Constraint::like_starts("1").unwrap()),
            ("phones.id", Constraint::gte(11).unwrap()),
        ])
        .build()
        .unwrap();
    for cfg in [PagerConfig::default(), in_memory()] {
        assert!(fetch(&conn, cfg, &page).await.is_empty());
    }
}

#[tokio::test]
async fn optional_group_mixes_scalar_and_collection_criteria() {
    let conn = connect().await.unwrap();
    seed_contacts(&conn).await.unwrap();
    let page = Page::with()
        .order_by("id", true)
        .any_match([
            ("name", Constraint::from("dan")),
            ("phones.number", Constraint::like_starts("9").unwrap()),
        ])
        .build()
        .unwrap();
    for cfg in [PagerConfig::default(), in_memory()] {
        let items = fetch(&conn, cfg, &page).await;
        assert_eq!(ids(&items), vec![4, 5]);
        // Optional criteria select parents but leave their children whole.
        assert_eq!(phones(&items, 1), vec!["999"]);
    }
}

#[tokio::test]
async fn element_collection_criteria() {
    let conn = connect().await.unwrap();
    seed_contacts(&conn).await.unwrap();
    let page = Page::with()
        .order_by("id", true)
        .all_match([("tags", Constraint::from("a"))])
        .build()
        .unwrap();
    let items = fetch(&conn, PagerConfig::default(), &page).await;
    assert_eq!(ids(&items), vec![1, 2, 6]);
    assert_eq!(items.estimated_total(), 3);
    assert_eq!(strings(items.items()[0].collection("tags"), "value"), vec!["a"]);
}

#[tokio::test]
async fn orders_parents_by_collection_field() {
    let conn = connect().await.unwrap();
    seed_contacts(&conn).await.unwrap();

    let asc = Page::with().order_by("phones.number", true).build().unwrap();
    let items = fetch(&conn, PagerConfig::default(), &asc).await;
    assert_eq!(ids(&items), vec![4, 1, 2, 3, 6, 5]);
    assert_eq!(phones(&items, 3), vec!["444", "511", "611"]);

    let desc = Page::with().order_by("phones.number", false).build().unwrap();
    let items = fetch(&conn, PagerConfig::default(), &desc).await;
    assert_eq!(ids(&items), vec![5, 6, 3, 2, 1, 4]);
    assert_eq!(phones(&items, 2), vec!["611", "511", "444"]);
    assert_eq!(phones(&items, 4), vec!["222", "111"]);
}

#[tokio::test]
async fn ordering_follows_trimmed_children() {
    let conn = connect().await.unwrap();
    seed_contacts(&conn).await.unwrap();
    // Only phones containing 1 count, so user 1 ranks by 111 rather than 222.
    let page = Page::with()
        .order_by("phones.number", false)
        .all_match([("phones.number", Constraint::like_contains("1").unwrap())])
        .build()
        .unwrap();
    let items = fetch(&conn, PagerConfig::default(), &page).await;
    assert_eq!(ids(&items), vec![6, 3, 2, 1]);
    assert_eq!(phones(&items, 1), vec!["611", "511"]);
}

#[tokio::test]
async fn keyset_over_collection_ordering_is_rejected() {
    let conn = connect().await.unwrap();
    seed_contacts(&conn).await.unwrap();
    let page = Page::with()
        .range_after(1i64, 2, false)
        .order_by("phones.number", true)
        .build()
        .unwrap();
    let err = Pager::new(&conn, &shape()).fetch(&page).await.unwrap_err();
    assert!(matches!(err, PagingError::UnsupportedCursorOrdering(p) if p == "phones.number"));
}

#[derive(Debug, Deserialize)]
struct Phone {
    id: i64,
    number: String,
}

#[derive(Debug, Deserialize)]
struct Contact {
    name: String,
    phones: Vec<Phone>,
    tags: Vec<String>,
}

#[tokio::test]
async fn nested_records_deserialize() {
    let conn = connect().await.unwrap();
    seed_contacts(&conn).await.unwrap();
    let page = Page::with().range(0, 1).order_by("id", true).build().unwrap();
    let shape = shape();
    let contacts = Pager::new(&conn, &shape)
        .fetch_as::<Contact>(&page)
        .await
        .unwrap()
        .into_items();
    assert_eq!(contacts.len(), 1);
    assert_eq!(contacts[0].name, "ann");
    let phones: Vec<(i64, &str)> = contacts[0]
        .phones
        .iter()
        .map(|p| (p.id, p.number.as_str()))
        .collect();
    assert_eq!(phones, vec![(10, "111"), (11, "222")]);
    assert_eq!(contacts[0].tags, vec!["a", "b"]);
}

#[tokio::test]
async fn in_memory_filter_walks_several_batches() {
    let conn = connect().await.unwrap();
    seed_contacts(&conn).await.unwrap();
    // Batches of two parents: [1, 2] are skipped, 3 and 6 come from the
    // second and third batches.
    let cfg = PagerConfig {
        overfetch_factor: 1,
        ..in_memory()
    };

    let page = fetch(&conn, cfg.clone(), &with_phone_like(2, "11")).await;
    assert_eq!(ids(&page), vec![3, 6]);
    assert_eq!(phones(&page, 0), vec!["611", "511"]);
    assert_eq!(phones(&page, 1), vec!["711"]);

    let past_the_end = fetch(&conn, cfg.clone(), &with_phone_like(4, "11")).await;
    assert!(past_the_end.is_empty());

    let first = fetch(&conn, cfg, &with_phone_like(1, "11")).await;
    assert_eq!(ids(&first), vec![2, 3]);
}

#[tokio::test]
async fn numeric_child_criteria_agree_across_modes() {
    let conn = connect().await.unwrap();
    seed_contacts(&conn).await.unwrap();
    let cases = [
        // Phone ids 11, 31 and 51; the deleted 50 never matches.
        (Constraint::like_ends("1").unwrap(), vec![1, 3, 5]),
        (Constraint::gt(30).unwrap(), vec![3, 5, 6]),
        (Constraint::between(20, 30).unwrap(), vec![2, 3]),
        (Constraint::not(Constraint::gte(20).unwrap()).unwrap(), vec![1]),
    ];
    for (constraint, expected) in cases {
        let page = Page::with()
            .order_by("id", true)
            .all_match([("phones.id", constraint.clone())])
            .build()
            .unwrap();
        let exists = fetch(&conn, PagerConfig::default(), &page).await;
        let memory = fetch(&conn, in_memory(), &page).await;
        assert_eq!(ids(&exists), expected, "{constraint}");
        assert_eq!(ids(&memory), expected, "{constraint}");
        for i in 0..expected.len() {
            assert_eq!(phones(&memory, i), phones(&exists, i), "{constraint}");
        }
    }
}

#[tokio::test]
async fn projection_reads_one_row_per_parent() {
    let conn = connect().await.unwrap();
    seed_contacts(&conn).await.unwrap();
    let projection = Projection::of(["id", "name"]);

    let page = Page::with().range(0, 3).order_by("id", true).build().unwrap();
    let rows = Pager::new(&conn, &shape())
        .project::<(i64, String)>(&page, &projection)
        .await
        .unwrap();
    let expected = vec![(1, "ann".to_owned()), (2, "bob".to_owned()), (3, "cid".to_owned())];
    assert_eq!(rows.items(), expected.as_slice());
    assert_eq!(rows.estimated_total(), 6);

    // Criteria evaluated in memory still see the children.
    let rows = Pager::new(&conn, &shape())
        .config(in_memory())
        .project::<(i64, String)>(&with_phone_like(2, "11"), &projection)
        .await
        .unwrap();
    let expected = vec![(3, "cid".to_owned()), (6, "fay".to_owned())];
    assert_eq!(rows.items(), expected.as_slice());
}
