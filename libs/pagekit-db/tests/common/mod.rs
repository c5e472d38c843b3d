#![allow(clippy::unwrap_used, clippy::expect_used)]
#![allow(dead_code)]

use anyhow::Result;
use pagekit::{PartialResultList, Value};
use pagekit_db::{EntityShape, FieldKind, Record, SoftDelete, ToMany, ToOne};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection};

pub const CITIES: [&str; 4] = ["Oslo", "Rome", "Lima", "Kyiv"];

/// Single-connection in-memory database; every pooled connection would
/// otherwise see its own empty database.
pub async fn connect() -> Result<DatabaseConnection> {
    let mut opts = ConnectOptions::new("sqlite::memory:");
    opts.max_connections(1).min_connections(1).sqlx_logging(false);
    let conn = Database::connect(opts).await?;
    for ddl in [
        "CREATE TABLE addresses (
id INTEGER PRIMARY KEY NOT NULL,
city TEXT NOT NULL
)",
        "CREATE TABLE users (
id INTEGER PRIMARY KEY NOT NULL,
name TEXT NOT NULL,
age INTEGER,
active BOOLEAN,
address_id INTEGER,
deleted BOOLEAN NOT NULL DEFAULT 0
)",
        "CREATE TABLE phones (
id INTEGER PRIMARY KEY NOT NULL,
user_id INTEGER NOT NULL,
number TEXT NOT NULL,
deleted_at TEXT
)",
        "CREATE TABLE user_tags (
user_id INTEGER NOT NULL,
tag TEXT NOT NULL
)",
    ] {
        conn.execute_unprepared(ddl).await?;
    }
    let rows: Vec<String> = CITIES
        .iter()
        .enumerate()
        .map(|(i, city)| format!("({}, '{city}')", i + 1))
        .collect();
    conn.execute_unprepared(&format!(
        "INSERT INTO addresses (id, city) VALUES {}",
        rows.join(", ")
    ))
    .await?;
    Ok(conn)
}

pub fn shape() -> EntityShape {
    EntityShape::new("users", "id", FieldKind::I64)
        .field("name", "name", FieldKind::String)
        .field("age", "age", FieldKind::I64)
        .field("active", "active", FieldKind::Bool)
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
        .soft_delete(SoftDelete::flag("deleted"))
}

/// Generated person `id`, as stored by [`seed_people`].
#[derive(Clone, Debug)]
pub struct Person {
    pub id: i64,
    pub name: String,
    pub age: i64,
    /// `None` every tenth id.
    pub active: Option<bool>,
    /// `None` every fifth id.
    pub city: Option<&'static str>,
}

pub fn person(id: i64) -> Person {
    let city_index = usize::try_from(id % 4).unwrap();
    Person {
        id,
        name: format!("user{id:03}"),
        age: id % 50,
        active: (id % 10 != 0).then_some(id % 3 == 0),
        city: (id % 5 != 0).then_some(CITIES[city_index]),
    }
}

/// Users `1..=n` with generated attributes and no collections.
pub async fn seed_people(conn: &DatabaseConnection, n: i64) -> Result<Vec<Person>> {
    let people: Vec<Person> = (1..=n).map(person).collect();
    let rows: Vec<String> = people
        .iter()
        .map(|p| {
            let active = p.active.map_or("NULL", |a| if a { "1" } else { "0" });
            let address = p.city.map_or_else(
                || "NULL".to_owned(),
                |c| {
                    let pos = CITIES.iter().position(|x| *x == c).unwrap() + 1;
                    pos.to_string()
                },
            );
            format!("({}, '{}', {}, {active}, {address})", p.id, p.name, p.age)
        })
        .collect();
    conn.execute_unprepared(&format!(
        "INSERT INTO users (id, name, age, active, address_id) VALUES {}",
        rows.join(", ")
    ))
    .await?;
    Ok(people)
}

/// Six users with phones and tags:
///
/// | id | name | phones                       | tags |
/// |----|------|------------------------------|------|
/// | 1  | ann  | 111, 222                     | a, b |
/// | 2  | bob  | 311                          | a    |
/// | 3  | cid  | 611, 444, 511                | c    |
/// | 4  | dan  |                              |      |
/// | 5  | eve  | 115 (deleted), 999           |      |
/// | 6  | fay  | 711                          | a    |
pub async fn seed_contacts(conn: &DatabaseConnection) -> Result<()> {
    for sql in [
        "INSERT INTO users (id, name, age, active, address_id) VALUES
(1, 'ann', 30, 1, 1), (2, 'bob', 40, 0, 2), (3, 'cid', 25, 1, NULL),
(4, 'dan', 30, NULL, 3), (5, 'eve', 50, 1, 4), (6, 'fay', 35, 0, 1)",
        "INSERT INTO phones (id, user_id, number, deleted_at) VALUES
(10, 1, '111', NULL), (11, 1, '222', NULL), (20, 2, '311', NULL),
(30, 3, '611', NULL), (31, 3, '444', NULL), (32, 3, '511', NULL),
(50, 5, '115', '2024-01-01T00:00:00Z'), (51, 5, '999', NULL), (60, 6, '711', NULL)",
        "INSERT INTO user_tags (user_id, tag) VALUES
(1, 'a'), (1, 'b'), (2, 'a'), (3, 'c'), (6, 'a')",
    ] {
        conn.execute_unprepared(sql).await?;
    }
    Ok(())
}

pub fn ids(list: &PartialResultList<Record>) -> Vec<i64> {
    list.items()
        .iter()
        .map(|r| i64::try_from(r.identity().clone()).unwrap())
        .collect()
}

pub fn strings(records: &[Record], key: &str) -> Vec<String> {
    records
        .iter()
        .map(|r| String::try_from(r.value(key)).unwrap())
        .collect()
}

pub fn count_where(people: &[Person], pred: impl Fn(&Person) -> bool) -> u64 {
    u64::try_from(people.iter().filter(|p| pred(p)).count()).unwrap()
}

pub fn value_of(id: i64) -> Value {
    Value::from(id)
}
