// src/store/mod.rs — Durable run and iteration records

pub mod schema;
#[allow(clippy::module_inception)]
pub mod store;

use rusqlite::Connection;
use std::path::Path;

pub use store::Store;

/// Open (or create) the database at the given path.
pub fn open(path: &Path) -> anyhow::Result<Store> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let conn = Connection::open(path)?;
    // Enable WAL mode for better concurrent performance
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;

    schema::run_migrations(&conn)?;
    Ok(Store::new(conn))
}

/// Create an in-memory database (for testing).
pub fn open_in_memory() -> anyhow::Result<Store> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    schema::run_migrations(&conn)?;
    Ok(Store::new(conn))
}
