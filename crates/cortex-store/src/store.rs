use std::path::Path;

use rusqlite::Connection;

use crate::schema;
use crate::{Error, Result};

/// The single writer authority over cortex persistent state.
///
/// Every durable mutation in the system flows through a method on this type;
/// nothing else opens the database for writing. Readers in other processes
/// may open their own WAL connections.
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "busy_timeout", 5_000)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let store = Self { conn };
        schema::init_schema(&store.conn)?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        schema::init_schema(&store.conn)?;
        Ok(store)
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Embedding support is an optional backend; absent here. Callers that
    /// want a semantic tier degrade to FTS ranking when this is false.
    pub fn embeddings_available(&self) -> bool {
        false
    }

    /// Quick structural check, consumed by the brain-db probe
    pub fn integrity_ok(&self) -> Result<bool> {
        let verdict: String = self
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get(0))?;
        Ok(verdict == "ok")
    }
}

/// Retry a statement once on a transient lock, then surface the error.
pub(crate) fn retry_once<T>(mut f: impl FnMut() -> rusqlite::Result<T>) -> rusqlite::Result<T> {
    match f() {
        Err(rusqlite::Error::SqliteFailure(e, msg))
            if e.code == rusqlite::ErrorCode::DatabaseBusy
                || e.code == rusqlite::ErrorCode::DatabaseLocked =>
        {
            let _ = msg;
            f()
        }
        other => other,
    }
}

/// Deserialize a JSON list column
pub(crate) fn json_list(raw: &str) -> Result<Vec<String>> {
    Ok(serde_json::from_str(raw)?)
}

/// Serialize a list for a JSON column
pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// Build an FTS5 MATCH expression from free text: terms are stripped to
/// word characters and quoted, joined with OR. Returns None when nothing
/// searchable remains.
pub(crate) fn fts_expr(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| t.len() >= 2)
        .map(|t| format!("\"{}\"", t.to_lowercase()))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

/// Same as [`fts_expr`] but restricted to one FTS column
pub(crate) fn fts_column_expr(column: &str, query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| t.len() >= 2)
        .map(|t| format!("{}:\"{}\"", column, t.to_lowercase()))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

/// Map a missing-row error into NotFound with a useful label
pub(crate) fn not_found<T>(what: &str, id: &str) -> Result<T> {
    Err(Error::NotFound(format!("{} '{}'", what, id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.integrity_ok().unwrap());
        assert!(!store.embeddings_available());
    }

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = Store::open(&dir.path().join("cortex.db")).unwrap();
        assert!(store.integrity_ok().unwrap());
    }

    #[test]
    fn test_fts_expr_sanitizes() {
        assert_eq!(
            fts_expr("restart the-executor NOW!").as_deref(),
            Some("\"restart\" OR \"the\" OR \"executor\" OR \"now\"")
        );
        assert_eq!(fts_expr("?? !"), None);
    }

    #[test]
    fn test_fts_column_expr() {
        assert_eq!(
            fts_column_expr("outcome", "crash loop").as_deref(),
            Some("outcome:\"crash\" OR outcome:\"loop\"")
        );
    }
}
