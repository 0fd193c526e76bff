//! Shared setup for the integration tests: an in-memory SQLite database
//! behind the sqlx `Any` driver, with the fixture queries loaded.

#![allow(dead_code)]

use std::path::PathBuf;

use fayl::prelude::*;
use sqlx::any::AnyPoolOptions;

pub fn fixtures() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/queries")
}

/// A client on a fresh database with an empty `users` table.
///
/// The pool holds a single connection that never expires, so the in-memory
/// database lives as long as the client.
pub async fn setup() -> Fayl {
    sqlx::any::install_default_drivers();
    let pool = AnyPoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();

    let fayl = Fayl::init(Options::new(pool, fixtures())).await.unwrap();
    fayl.run("schema.create_users")
        .exec(&Context::new())
        .await
        .unwrap();
    fayl
}

pub async fn insert(fayl: &Fayl, id: i64, name: &str, score: Option<i64>) {
    fayl.run("users.insert")
        .with_param("id", id)
        .with_param("name", name)
        .with_param("email", format!("{}@example.com", name.to_lowercase()))
        .with_param("score", score)
        .exec(&Context::new())
        .await
        .unwrap();
}

pub async fn count_users(fayl: &Fayl) -> i64 {
    let mut row = Record::new();
    fayl.run("users.count")
        .scan_map(&mut row)
        .query(&Context::new())
        .await
        .unwrap();
    row["n"].as_i64().unwrap()
}
