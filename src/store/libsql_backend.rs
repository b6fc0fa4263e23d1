//! libSQL result store, a local stand-in for a spreadsheet.
//!
//! Each destination is a named "sheet" of rows; cells are stored as a JSON
//! array so the row layout is free to change without a migration. Row 1 is
//! the header, exactly like the spreadsheet destination.

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, Database, params};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::pipeline::types::ROW_HEADER;
use crate::store::{ResultStore, RowRange};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS destinations (
        name TEXT PRIMARY KEY,
        created_at TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS sheet_rows (
        destination TEXT NOT NULL,
        row_index INTEGER NOT NULL,
        cells TEXT NOT NULL,
        written_at TEXT NOT NULL,
        PRIMARY KEY (destination, row_index)
    );
"#;

fn db_error(context: &str) -> impl Fn(libsql::Error) -> StoreError + '_ {
    move |e| StoreError::Database(format!("{context}: {e}"))
}

/// libSQL-backed [`ResultStore`].
pub struct LibSqlStore {
    _db: Database,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Database(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_error("Failed to open libSQL database"))?;
        let store = Self::from_database(db).await?;
        info!(path = %path.display(), "Result database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests and dry experiments).
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(db_error("Failed to create in-memory database"))?;
        Self::from_database(db).await
    }

    async fn from_database(db: Database) -> Result<Self, StoreError> {
        let conn = db
            .connect()
            .map_err(db_error("Failed to create connection"))?;
        conn.execute_batch(SCHEMA)
            .await
            .map_err(db_error("Failed to initialize schema"))?;
        Ok(Self { _db: db, conn })
    }

    /// All rows of a destination, header first.
    pub async fn read_rows(&self, destination: &str) -> Result<Vec<Vec<String>>, StoreError> {
        let mut rows = self
            .conn
            .query(
                "SELECT cells FROM sheet_rows WHERE destination = ?1 ORDER BY row_index ASC",
                params![destination],
            )
            .await
            .map_err(db_error("read_rows"))?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_error("read_rows next"))? {
            let cells: String = row.get(0).map_err(db_error("read_rows cells"))?;
            let parsed: Vec<String> = serde_json::from_str(&cells)
                .map_err(|e| StoreError::InvalidResponse(format!("corrupt row cells: {e}")))?;
            out.push(parsed);
        }
        Ok(out)
    }
}

#[async_trait]
impl ResultStore for LibSqlStore {
    async fn ensure_destination(&self, destination: &str) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        let header = serde_json::to_string(&ROW_HEADER)
            .map_err(|e| StoreError::Database(format!("header encoding: {e}")))?;

        self.conn
            .execute(
                "INSERT OR IGNORE INTO destinations (name, created_at) VALUES (?1, ?2)",
                params![destination, now.clone()],
            )
            .await
            .map_err(db_error("ensure_destination"))?;

        let inserted = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO sheet_rows (destination, row_index, cells, written_at)
                 VALUES (?1, 1, ?2, ?3)",
                params![destination, header, now],
            )
            .await
            .map_err(db_error("ensure_destination header"))?;

        if inserted > 0 {
            info!(destination, "Destination created with header row");
        } else {
            debug!(destination, "Destination already present");
        }
        Ok(())
    }

    async fn append_rows(
        &self,
        destination: &str,
        rows: &[Vec<String>],
    ) -> Result<RowRange, StoreError> {
        if rows.is_empty() {
            return Err(StoreError::EmptyAppend);
        }

        // Dropping the transaction without commit rolls it back.
        let tx = self
            .conn
            .transaction()
            .await
            .map_err(db_error("append_rows begin"))?;

        let known = tx
            .query(
                "SELECT 1 FROM destinations WHERE name = ?1",
                params![destination],
            )
            .await
            .map_err(db_error("append_rows lookup"))?
            .next()
            .await
            .map_err(db_error("append_rows lookup"))?
            .is_some();
        if !known {
            return Err(StoreError::UnknownDestination(destination.to_string()));
        }

        let last: i64 = match tx
            .query(
                "SELECT COALESCE(MAX(row_index), 0) FROM sheet_rows WHERE destination = ?1",
                params![destination],
            )
            .await
            .map_err(db_error("append_rows max"))?
            .next()
            .await
            .map_err(db_error("append_rows max"))?
        {
            Some(row) => row.get(0).map_err(db_error("append_rows max"))?,
            None => 0,
        };

        let now = Utc::now().to_rfc3339();
        let start = last + 1;
        for (offset, row) in (0_i64..).zip(rows) {
            let cells = serde_json::to_string(row)
                .map_err(|e| StoreError::Database(format!("row encoding: {e}")))?;
            tx.execute(
                "INSERT INTO sheet_rows (destination, row_index, cells, written_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![destination, start + offset, cells, now.clone()],
            )
            .await
            .map_err(db_error("append_rows insert"))?;
        }

        tx.commit().await.map_err(db_error("append_rows commit"))?;

        let to_row = |index: i64| {
            u32::try_from(index)
                .map_err(|_| StoreError::Database(format!("row index {index} out of range")))
        };
        let range = RowRange {
            start_row: to_row(start)?,
            end_row: to_row(last + rows.len() as i64)?,
        };
        debug!(destination, rows = rows.len(), range = %range, "Rows appended");
        Ok(range)
    }
}
