use futures::executor::block_on;
use plughost_core::db::{open_db, share};
use plughost_core::{
    Contribution, Extension, ExtensionContext, ExtensionHost, ExtensionManifest, HostError,
    HostResult,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

struct Idle;

impl Extension for Idle {
    fn activate(&self, _ctx: &ExtensionContext) -> HostResult<()> {
        Ok(())
    }
}

#[derive(Debug, Deserialize, PartialEq)]
struct Bookmark {
    id: i64,
    url: String,
    visits: i64,
}

fn context(host: &ExtensionHost) -> ExtensionContext {
    let manifest = ExtensionManifest::new("bookmarks", "Bookmarks", "1.0.0", vec![Contribution::Commands]);
    host.load(manifest, Arc::new(Idle)).unwrap();
    let ctx = host.context("bookmarks").unwrap();
    block_on(ctx.database().run(
        "CREATE TABLE IF NOT EXISTS bookmarks (
            id INTEGER PRIMARY KEY,
            url TEXT NOT NULL UNIQUE,
            visits INTEGER NOT NULL DEFAULT 0
        )",
        &[],
    ))
    .unwrap();
    ctx
}

#[test]
fn run_query_and_get_round_trip_through_context() {
    let host = ExtensionHost::new().unwrap();
    let ctx = context(&host);
    let db = ctx.database();

    let inserted = block_on(db.run(
        "INSERT INTO bookmarks (url, visits) VALUES (?1, ?2)",
        &[json!("https://example.org"), json!(3)],
    ))
    .unwrap();
    assert_eq!(inserted.changes, 1);
    assert_eq!(inserted.last_insert_rowid, Some(1));
    block_on(db.run(
        "INSERT INTO bookmarks (url) VALUES (?1)",
        &[json!("https://rust-lang.org")],
    ))
    .unwrap();

    let rows = block_on(db.query("SELECT url, visits FROM bookmarks ORDER BY id", &[])).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["url"], json!("https://example.org"));
    assert_eq!(rows[1]["visits"], json!(0));

    let typed: Vec<Bookmark> = block_on(db.query_as(
        "SELECT id, url, visits FROM bookmarks WHERE visits > ?1",
        &[json!(1)],
    ))
    .unwrap();
    assert_eq!(
        typed,
        vec![Bookmark {
            id: 1,
            url: "https://example.org".to_string(),
            visits: 3,
        }]
    );

    let missing: Option<Bookmark> = block_on(db.get_as(
        "SELECT id, url, visits FROM bookmarks WHERE url = ?1",
        &[json!("https://nowhere.test")],
    ))
    .unwrap();
    assert!(missing.is_none());
}

#[test]
fn constraint_violation_surfaces_as_db_error() {
    let host = ExtensionHost::new().unwrap();
    let ctx = context(&host);
    let insert = "INSERT INTO bookmarks (url) VALUES (?1)";
    block_on(ctx.database().run(insert, &[json!("https://dup.test")])).unwrap();

    let err = block_on(ctx.database().run(insert, &[json!("https://dup.test")])).unwrap_err();
    assert!(matches!(err, HostError::Db(_)));
}

#[test]
fn row_shape_mismatch_is_reported() {
    let host = ExtensionHost::new().unwrap();
    let ctx = context(&host);
    block_on(ctx.database().run(
        "INSERT INTO bookmarks (url) VALUES (?1)",
        &[json!("https://example.org")],
    ))
    .unwrap();

    let err = block_on(ctx.database().get_as::<Bookmark>("SELECT url FROM bookmarks", &[]))
        .unwrap_err();
    assert!(err.to_string().contains("row does not match"));
}

#[test]
fn extension_tables_share_the_host_database_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("plughost.db");
    let host = ExtensionHost::builder()
        .connection(share(open_db(&path).unwrap()))
        .build()
        .unwrap();
    let ctx = context(&host);
    block_on(ctx.database().run(
        "INSERT INTO bookmarks (url) VALUES (?1)",
        &[json!("https://persisted.test")],
    ))
    .unwrap();
    drop(ctx);
    host.shutdown();
    drop(host);

    let conn = open_db(&path).unwrap();
    let url: String = conn
        .query_row("SELECT url FROM bookmarks", [], |row| row.get(0))
        .unwrap();
    assert_eq!(url, "https://persisted.test");
}
