//! In-memory storage implementation for testing

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use crate::traits::*;
use crate::types::*;

#[derive(Debug, Default)]
struct Tables {
    rows: HashMap<RowId, Row>,
    /// Natural key -> internal identity lookup table
    index: HashMap<NaturalKey, RowId>,
}

/// In-memory storage implementation for testing and development
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    tables: Arc<RwLock<Tables>>,
    commit_latency: Option<Duration>,
}

impl MemoryStorage {
    /// Create a new memory storage instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every commit, to simulate a slow backend
    pub fn with_commit_latency(mut self, latency: Duration) -> Self {
        self.commit_latency = Some(latency);
        self
    }

    /// Clear all data (useful for testing)
    pub fn clear(&self) -> IngestResult<()> {
        let mut tables = self.write()?;
        tables.rows.clear();
        tables.index.clear();
        Ok(())
    }

    /// Number of rows stored for one table
    pub fn row_count(&self, kind: RecordKind) -> IngestResult<usize> {
        Ok(self
            .read()?
            .rows
            .values()
            .filter(|row| row.key.kind == kind)
            .count())
    }

    fn read(&self) -> IngestResult<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| IngestError::Storage("memory storage lock poisoned".to_string()))
    }

    fn write(&self) -> IngestResult<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| IngestError::Storage("memory storage lock poisoned".to_string()))
    }
}

#[async_trait]
impl WarehouseStorage for MemoryStorage {
    async fn find_row_id(&self, key: &NaturalKey) -> IngestResult<Option<RowId>> {
        Ok(self.read()?.index.get(key).copied())
    }

    async fn get_row(&self, row_id: &RowId) -> IngestResult<Option<Row>> {
        Ok(self.read()?.rows.get(row_id).cloned())
    }

    async fn list_rows(&self, kind: RecordKind) -> IngestResult<Vec<Row>> {
        let tables = self.read()?;
        let mut rows: Vec<Row> = tables
            .rows
            .values()
            .filter(|row| row.key.kind == kind)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(rows)
    }

    async fn ledger_details_for_group(&self, group_id: &str) -> IngestResult<Vec<LedgerDetail>> {
        let tables = self.read()?;
        Ok(tables
            .rows
            .values()
            .filter_map(|row| row.value.as_ledger_detail())
            .filter(|detail| detail.group_id == group_id)
            .cloned()
            .collect())
    }

    async fn commit(&self, changes: ChangeSet) -> IngestResult<()> {
        if let Some(latency) = self.commit_latency {
            tokio::time::sleep(latency).await;
        }

        let mut tables = self.write()?;

        // Check every row before touching anything so a failed commit leaves no trace
        for row in &changes.rows {
            match tables.index.get(&row.key) {
                Some(existing) if *existing != row.row_id => {
                    return Err(IngestError::Storage(format!(
                        "{} is already stored under row {}",
                        row.key, existing
                    )));
                }
                _ => {}
            }
        }

        for row in changes.rows {
            tables.index.insert(row.key.clone(), row.row_id);
            tables.rows.insert(row.row_id, row);
        }

        Ok(())
    }
}
