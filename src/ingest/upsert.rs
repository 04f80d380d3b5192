//! Natural-key upsert of staged records

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::ingest::IngestContext;
use crate::traits::*;
use crate::types::*;

/// Per-outcome counts of a planned or applied upsert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteSummary {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl WriteSummary {
    pub fn record(&mut self, outcome: WriteOutcome) {
        match outcome {
            WriteOutcome::Inserted => self.inserted += 1,
            WriteOutcome::Updated => self.updated += 1,
            WriteOutcome::Unchanged => self.unchanged += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.unchanged
    }
}

/// Rows to commit for one batch, with the outcome of each write
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertPlan {
    changes: ChangeSet,
    summary: WriteSummary,
}

impl UpsertPlan {
    pub fn new(batch_id: BatchId) -> Self {
        Self {
            changes: ChangeSet::new(batch_id),
            summary: WriteSummary::default(),
        }
    }

    pub fn push(&mut self, row: Row, outcome: WriteOutcome) {
        self.summary.record(outcome);
        self.changes.push(row);
    }

    pub fn summary(&self) -> WriteSummary {
        self.summary
    }

    pub fn changes(&self) -> &ChangeSet {
        &self.changes
    }
}

/// Merge an incoming value with the stored row sharing its natural key
///
/// Inserts get a fresh internal identity. Updates keep the identity and
/// `record_created`, take the incoming values (last batch wins) and move
/// `record_updated` forward. Committed ledger lines may only be replayed
/// unchanged.
pub fn merge_row(
    ctx: &IngestContext,
    index: usize,
    key: NaturalKey,
    value: RowValue,
    existing: Option<Row>,
) -> IngestResult<(Row, WriteOutcome)> {
    let Some(existing) = existing else {
        let row = Row {
            row_id: RowId::new(),
            key,
            batch_id: ctx.batch_id.clone(),
            value,
            record_created: ctx.started_at,
            record_updated: ctx.started_at,
        };
        return Ok((row, WriteOutcome::Inserted));
    };

    let outcome = if existing.value == value {
        WriteOutcome::Unchanged
    } else if matches!(existing.value, RowValue::LedgerDetail(_)) {
        return Err(IngestError::ImmutableRecord { index, key });
    } else {
        WriteOutcome::Updated
    };

    let row = Row {
        row_id: existing.row_id,
        key,
        batch_id: ctx.batch_id.clone(),
        value,
        record_created: existing.record_created,
        record_updated: ctx.started_at.max(existing.record_updated),
    };
    Ok((row, outcome))
}

/// Upsert engine that merges staged records into the store by natural key
pub struct UpsertEngine<S: WarehouseStorage> {
    storage: Arc<S>,
}

impl<S: WarehouseStorage> UpsertEngine<S> {
    /// Create a new upsert engine over a shared store
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    /// Look up the stored row for `key` and add the merged row to `plan`
    pub async fn stage(
        &self,
        ctx: &IngestContext,
        plan: &mut UpsertPlan,
        index: usize,
        key: NaturalKey,
        value: RowValue,
    ) -> IngestResult<WriteOutcome> {
        let existing = self.storage.find_row(&key).await?;
        let (row, outcome) = merge_row(ctx, index, key, value, existing)?;
        debug!(key = %row.key, row_id = %row.row_id, ?outcome, "staged upsert");
        plan.push(row, outcome);
        Ok(outcome)
    }

    /// Commit every planned row atomically
    pub async fn apply(&self, plan: UpsertPlan) -> IngestResult<WriteSummary> {
        let summary = plan.summary;
        self.storage.commit(plan.changes).await?;
        Ok(summary)
    }
}
