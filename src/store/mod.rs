//! Result stores: tabular destinations for classified messages.

pub mod libsql_backend;
pub mod sheets;

pub use libsql_backend::LibSqlStore;
pub use self::sheets::{SheetsConfig, SheetsStore};

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StoreError;

/// 1-based inclusive row range written by one append (row 1 is the header).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowRange {
    pub start_row: u32,
    pub end_row: u32,
}

impl RowRange {
    pub fn len(&self) -> u32 {
        (self.end_row + 1).saturating_sub(self.start_row)
    }

    pub fn is_empty(&self) -> bool {
        self.end_row < self.start_row
    }
}

impl std::fmt::Display for RowRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..={}", self.start_row, self.end_row)
    }
}

/// A tabular destination.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Create the destination and its header row if missing. Idempotent:
    /// an existing header is left alone and never duplicated.
    async fn ensure_destination(&self, destination: &str) -> Result<(), StoreError>;

    /// Append `rows` in one atomic write and return the rows they landed on.
    async fn append_rows(
        &self,
        destination: &str,
        rows: &[Vec<String>],
    ) -> Result<RowRange, StoreError>;
}

/// Which store backs a run.
#[derive(Debug, Clone)]
pub enum StoreConfig {
    Sheets(SheetsConfig),
    LibSql { path: PathBuf },
}

/// Open the configured store.
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn ResultStore>, StoreError> {
    match config {
        StoreConfig::Sheets(sheets) => Ok(Arc::new(SheetsStore::new(sheets.clone())?)),
        StoreConfig::LibSql { path } => Ok(Arc::new(LibSqlStore::new_local(path).await?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_range_len_and_display() {
        let range = RowRange {
            start_row: 2,
            end_row: 11,
        };
        assert_eq!(range.len(), 10);
        assert!(!range.is_empty());
        assert_eq!(range.to_string(), "2..=11");
    }

    #[tokio::test]
    async fn open_libsql_store_in_temp_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::LibSql {
            path: dir.path().join("nested").join("triage.db"),
        };
        let store = open_store(&config).await.unwrap();
        store.ensure_destination("Tickets").await.unwrap();
        assert!(dir.path().join("nested").join("triage.db").exists());
    }
}
