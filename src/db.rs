use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::types::Value;
use rusqlite::Connection;
use tracing::{debug, warn};

use crate::store::{MasterStore, STORE_COLUMNS};

const TABLE: &str = "posts";

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating store directory {}", dir.display()))?;
    }
    let conn = Connection::open(path)
        .with_context(|| format!("opening store {}", path.display()))?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn table_columns(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", TABLE))?;
    let cols = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(cols)
}

// ── Load ──

/// Read the master table. A missing file or table gives an empty store, and
/// so does any read failure (logged).
pub fn load_store(path: &Path) -> MasterStore {
    if !path.exists() {
        debug!(path = %path.display(), "no store yet");
        return MasterStore::new();
    }
    match read_store(path) {
        Ok(store) => store,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "store unreadable, starting empty");
            MasterStore::new()
        }
    }
}

fn read_store(path: &Path) -> Result<MasterStore> {
    let conn = Connection::open(path)?;
    let columns = table_columns(&conn)?;
    if columns.is_empty() {
        return Ok(MasterStore::new());
    }

    let width = columns.len();
    let mut stmt = conn.prepare(&format!("SELECT * FROM {} ORDER BY rowid", TABLE))?;
    let rows = stmt
        .query_map([], |row| {
            (0..width)
                .map(|i| row.get::<_, Value>(i))
                .collect::<Result<Vec<_>, _>>()
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(MasterStore::from_parts(columns, rows))
}

// ── Save ──

/// Rewrite the master table from the store, in store order, in one
/// transaction. Columns the table lacks are added first.
pub fn save_store(path: &Path, store: &MasterStore) -> Result<()> {
    let conn = connect(path)?;
    let tx = conn.unchecked_transaction()?;

    let create_cols: Vec<String> = if store.columns().is_empty() {
        STORE_COLUMNS.iter().map(|c| quote(c)).collect()
    } else {
        store.columns().iter().map(|c| quote(c)).collect()
    };
    tx.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {} ({});",
        TABLE,
        create_cols.join(", ")
    ))?;

    let existing = table_columns(&tx)?;
    for col in store.columns() {
        if !existing.contains(col) {
            debug!(column = %col, "adding store column");
            tx.execute_batch(&format!("ALTER TABLE {} ADD COLUMN {};", TABLE, quote(col)))?;
        }
    }

    tx.execute(&format!("DELETE FROM {}", TABLE), [])?;
    if !store.columns().is_empty() {
        let names: Vec<String> = store.columns().iter().map(|c| quote(c)).collect();
        let slots: Vec<String> = (1..=names.len()).map(|i| format!("?{}", i)).collect();
        let mut stmt = tx.prepare(&format!(
            "INSERT INTO {} ({}) VALUES ({})",
            TABLE,
            names.join(", "),
            slots.join(", ")
        ))?;
        for row in store.rows() {
            stmt.execute(rusqlite::params_from_iter(row.iter()))?;
        }
    }
    if table_columns(&tx)?.iter().any(|c| c == "url") {
        tx.execute_batch(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{0}_url ON {0}(url);",
            TABLE
        ))?;
    }
    tx.commit()
        .with_context(|| format!("saving store {}", path.display()))?;
    Ok(())
}
