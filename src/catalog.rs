use std::path::Path;

use anyhow::{Context, Result, bail};
use rusqlite::{Connection, OpenFlags};

/// Answers whether a lesson is already materialized in the external store.
pub trait ExistenceCheck {
    fn exists(&self, title: &str) -> Result<bool>;
}

/// Read-only view of the lesson table written by generated scripts.
pub struct SqliteCatalog {
    connection: Connection,
    query: String,
}

impl SqliteCatalog {
    pub fn open(db_path: &Path, table: &str, title_column: &str) -> Result<Self> {
        let connection = Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("failed to open catalog {}", db_path.display()))?;
        Self::from_connection(connection, table, title_column)
    }

    pub fn from_connection(
        connection: Connection,
        table: &str,
        title_column: &str,
    ) -> Result<Self> {
        ensure_identifier(table)?;
        ensure_identifier(title_column)?;
        let query =
            format!("SELECT EXISTS(SELECT 1 FROM \"{table}\" WHERE \"{title_column}\" = ?1)");

        connection
            .prepare(&query)
            .with_context(|| format!("catalog has no usable {table}.{title_column}"))?;

        Ok(Self { connection, query })
    }

    pub fn count(&self, table: &str) -> Result<i64> {
        ensure_identifier(table)?;
        let count = self
            .connection
            .query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |row| row.get(0))?;
        Ok(count)
    }
}

impl ExistenceCheck for SqliteCatalog {
    fn exists(&self, title: &str) -> Result<bool> {
        let mut statement = self.connection.prepare_cached(&self.query)?;
        let exists: bool = statement
            .query_row([title], |row| row.get(0))
            .with_context(|| format!("failed to look up lesson '{title}'"))?;
        Ok(exists)
    }
}

fn ensure_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if !valid {
        bail!("invalid SQL identifier '{name}'");
    }
    Ok(())
}
