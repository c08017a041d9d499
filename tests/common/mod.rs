//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use sqlx::SqlitePool;
use sqlx::sqlite::SqliteConnectOptions;
use tempfile::TempDir;

/// A scratch directory of files to enqueue.
pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `content` to `name` and return the absolute location string.
    pub fn write(&self, name: &str, content: &str) -> String {
        let path = self.dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path.to_str().unwrap().to_string()
    }

    /// Write `count` distinct files named `file-<i>.txt`.
    pub fn write_many(&self, count: usize) -> Vec<String> {
        (0..count)
            .map(|i| self.write(&format!("file-{i:03}.txt"), &format!("content {i}")))
            .collect()
    }

    pub fn db_path(&self) -> PathBuf {
        self.dir.path().join(".quality").join("ledger.db")
    }
}

/// A second, plain connection to an existing ledger file, for arranging
/// storage-level conditions the engine API cannot produce.
pub async fn connect_raw(path: &Path) -> SqlitePool {
    let options = SqliteConnectOptions::new().filename(path);
    SqlitePool::connect_with(options).await.unwrap()
}
