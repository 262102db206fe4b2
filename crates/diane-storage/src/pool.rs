//! Connection pool, following `crucible-sqlite::SqlitePool`: a single
//! `rusqlite::Connection` behind a `parking_lot::Mutex` rather than r2d2,
//! since this hub is single-writer/few-reader (spec.md §5) and the teacher
//! crate made the same call to avoid a dependency version conflict.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::Connection;

use crate::schema;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_memory() -> Self {
        Self {
            path: PathBuf::from(":memory:"),
        }
    }
}

pub struct StorePool {
    conn: Mutex<Connection>,
}

impl StorePool {
    pub fn new(config: StoreConfig) -> rusqlite::Result<Self> {
        let conn = if config.path.as_os_str() == ":memory:" {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = config.path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            Connection::open(&config.path)?
        };
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        schema::apply_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> rusqlite::Result<T> {
        let guard = self.conn.lock();
        f(&guard)
    }

    pub fn with_connection_mut<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> rusqlite::Result<T>,
    ) -> rusqlite::Result<T> {
        let mut guard = self.conn.lock();
        f(&mut guard)
    }
}

pub fn path_display(path: &Path) -> String {
    path.display().to_string()
}
