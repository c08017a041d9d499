mod common;

use common::Workspace;
use next_ledger::config::Config;
use next_ledger::db::Db;
use next_ledger::hash::location_hash;
use next_ledger::Error;

#[tokio::test]
async fn file_database_connects_and_migrates() {
    let ws = Workspace::new();
    let config = Config::default().with_db_path(ws.db_path());

    let db = Db::open(&config).await.unwrap();
    assert!(db.health_check().await.is_ok());
    assert_eq!(db.journal_mode().await.unwrap().to_lowercase(), "wal");

    // Migrating twice is a no-op.
    db.migrate().await.unwrap();
    db.close().await;

    assert!(ws.db_path().exists(), "parent directory and file are created");
}

#[tokio::test]
async fn data_survives_reopen() {
    let ws = Workspace::new();
    let config = Config::default().with_db_path(ws.db_path());
    let file = ws.write("a.txt", "a");
    let hash = location_hash(&file);

    let db = Db::open(&config).await.unwrap();
    db.upsert(&file, &hash, "c1", "lint").await.unwrap();
    db.close().await;

    let db = Db::open(&config).await.unwrap();
    let item = db.get(&hash, "lint").await.unwrap().expect("row persisted");
    assert_eq!(item.location, file);
    assert_eq!(item.content_hash, "c1");
    db.close().await;
}

#[tokio::test]
async fn unwritable_parent_is_resource_error() {
    let ws = Workspace::new();
    // A regular file where the parent directory should be.
    let blocker = ws.write("blocker", "x");
    let config = Config::default().with_db_path(format!("{blocker}/sub/ledger.db"));

    let err = Db::open(&config).await.err().expect("open must fail");
    assert!(matches!(err, Error::Resource { .. }));
    assert_eq!(err.exit_code(), 3);
}
