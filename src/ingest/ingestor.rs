//! Batch ingestor that coordinates staging, reconciliation and upserts

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::aging::{AgedEntry, AgingCalculator};
use crate::config::IngestConfig;
use crate::ingest::{KeyLocks, StagedBatch, UpsertEngine, UpsertPlan, WriteSummary};
use crate::reconciliation::{Reconciler, Reconciliation, ReconciliationDiscrepancy};
use crate::traits::*;
use crate::types::*;
use crate::utils::parse::RawRecord;

/// Per-batch parameters, passed explicitly through every ingestion call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestContext {
    pub batch_id: BatchId,
    /// Date aging entries are aged against
    pub reference_date: NaiveDate,
    /// Timestamp recorded on every row this batch writes
    pub started_at: NaiveDateTime,
}

impl IngestContext {
    /// Context for a batch starting now, aged as of today
    pub fn new(batch_id: BatchId) -> Self {
        let now = chrono::Utc::now().naive_utc();
        Self {
            batch_id,
            reference_date: now.date(),
            started_at: now,
        }
    }

    pub fn with_reference_date(mut self, reference_date: NaiveDate) -> Self {
        self.reference_date = reference_date;
        self
    }

    /// Pin the write timestamp
    pub fn at(mut self, started_at: NaiveDateTime) -> Self {
        self.started_at = started_at;
        self
    }
}

/// What a committed batch did to the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_id: BatchId,
    /// Distinct records staged after collapsing identical duplicates
    pub records: usize,
    pub writes: WriteSummary,
    pub reconciliations: Vec<Reconciliation>,
    pub aged_entries: usize,
}

impl BatchReport {
    pub fn discrepancies(&self) -> Vec<&ReconciliationDiscrepancy> {
        self.reconciliations
            .iter()
            .filter_map(|r| match r {
                Reconciliation::Discrepancy(d) => Some(d),
                Reconciliation::Balanced { .. } => None,
            })
            .collect()
    }

    pub fn is_fully_reconciled(&self) -> bool {
        self.reconciliations.iter().all(Reconciliation::is_balanced)
    }
}

/// Ledger group a batch touches, as the batch would leave it
struct TouchedGroup {
    stored: Option<Row>,
    effective: Option<LedgerGroup>,
}

/// Main ingestion engine that orchestrates all batch operations
pub struct Ingestor<S: WarehouseStorage> {
    storage: Arc<S>,
    upsert: UpsertEngine<S>,
    reconciler: Reconciler,
    aging: AgingCalculator,
    locks: KeyLocks,
    validator: Box<dyn RecordValidator>,
    config: IngestConfig,
}

impl<S: WarehouseStorage> Ingestor<S> {
    /// Create a new ingestor with default configuration
    pub fn new(storage: S) -> Self {
        Self::with_config(storage, IngestConfig::default())
    }

    /// Create a new ingestor with explicit configuration
    pub fn with_config(storage: S, config: IngestConfig) -> Self {
        Self::with_validator(storage, config, Box::new(DefaultRecordValidator))
    }

    /// Create a new ingestor with a custom record validator
    pub fn with_validator(
        storage: S,
        config: IngestConfig,
        validator: Box<dyn RecordValidator>,
    ) -> Self {
        let storage = Arc::new(storage);
        Self {
            upsert: UpsertEngine::new(storage.clone()),
            storage,
            reconciler: Reconciler::new(),
            aging: config.aging_calculator(),
            locks: KeyLocks::new(),
            validator,
            config,
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Ingest a batch of typed records
    ///
    /// The batch is validated as a whole before anything is written, then
    /// staged, reconciled and committed atomically under per-key locks.
    #[instrument(skip(self, records), fields(batch_id = %ctx.batch_id, records = records.len()))]
    pub async fn ingest(&self, ctx: &IngestContext, records: Vec<Record>) -> IngestResult<BatchReport> {
        let staged = StagedBatch::stage(records, self.validator.as_ref())?;
        self.ingest_staged(ctx, staged).await
    }

    /// Ingest a batch of raw upstream rows
    #[instrument(skip(self, raw), fields(batch_id = %ctx.batch_id, records = raw.len()))]
    pub async fn ingest_raw(&self, ctx: &IngestContext, raw: &[RawRecord]) -> IngestResult<BatchReport> {
        let staged = StagedBatch::from_raw(raw, self.validator.as_ref())?;
        self.ingest_staged(ctx, staged).await
    }

    /// Re-age every stored AR/AP entry against a new reference date
    ///
    /// Returns the number of rows whose computed columns changed.
    #[instrument(skip(self), fields(reference_date = %ctx.reference_date))]
    pub async fn refresh_aging(&self, ctx: &IngestContext) -> IngestResult<usize> {
        let refreshed = self.bounded(ctx, self.refresh_aging_locked(ctx)).await?;
        info!(refreshed, "aging entries refreshed");
        Ok(refreshed)
    }

    /// Reconcile a stored ledger group against its committed lines
    pub async fn reconcile_group(&self, group_id: &str) -> IngestResult<Option<Reconciliation>> {
        let key = NaturalKey::ledger_group(group_id);
        let _guards = self.locks.acquire(&BTreeSet::from([key.clone()])).await;

        let Some(row) = self.storage.find_row(&key).await? else {
            return Ok(None);
        };
        let Some(stored) = row.value.as_ledger_group() else {
            return Ok(None);
        };
        let details = self.storage.ledger_details_for_group(group_id).await?;
        Ok(Some(self.reconciler.reconcile(&stored.group, &details)))
    }

    async fn ingest_staged(&self, ctx: &IngestContext, staged: StagedBatch) -> IngestResult<BatchReport> {
        let aged = self.age_staged(ctx, &staged).await?;
        let report = self.bounded(ctx, self.persist(ctx, &staged, aged)).await?;

        info!(
            inserted = report.writes.inserted,
            updated = report.writes.updated,
            unchanged = report.writes.unchanged,
            discrepancies = report.discrepancies().len(),
            "batch committed"
        );
        Ok(report)
    }

    /// Run store work under the configured timeout; on expiry nothing is committed
    async fn bounded<T>(
        &self,
        ctx: &IngestContext,
        work: impl Future<Output = IngestResult<T>>,
    ) -> IngestResult<T> {
        let timeout = self.config.store_timeout();
        match tokio::time::timeout(timeout, work).await {
            Ok(result) => result,
            Err(_) => {
                warn!(batch_id = %ctx.batch_id, ?timeout, "storage timeout, batch rolled back");
                Err(IngestError::PersistenceTimeout {
                    batch_id: ctx.batch_id.clone(),
                    timeout,
                })
            }
        }
    }

    async fn age_staged(
        &self,
        ctx: &IngestContext,
        staged: &StagedBatch,
    ) -> IngestResult<HashMap<NaturalKey, AgedEntry>> {
        let (keys, entries): (Vec<NaturalKey>, Vec<AgingEntry>) = staged
            .records()
            .iter()
            .filter_map(|s| match &s.record {
                Record::Aging(entry) => Some((s.key.clone(), entry.clone())),
                _ => None,
            })
            .unzip();

        if entries.is_empty() {
            return Ok(HashMap::new());
        }
        let reference_date = ctx.reference_date;
        let aged = self
            .on_blocking_pool(move |aging| aging.calculate_all(entries, reference_date))
            .await?;
        Ok(keys.into_iter().zip(aged).collect())
    }

    /// Run rayon aging work on the blocking pool, off the async workers
    async fn on_blocking_pool<T, F>(&self, work: F) -> IngestResult<T>
    where
        F: FnOnce(AgingCalculator) -> T + Send + 'static,
        T: Send + 'static,
    {
        let aging = self.aging.clone();
        tokio::task::spawn_blocking(move || work(aging))
            .await
            .map_err(|e| IngestError::Background(format!("aging task: {}", e)))
    }

    async fn persist(
        &self,
        ctx: &IngestContext,
        staged: &StagedBatch,
        mut aged: HashMap<NaturalKey, AgedEntry>,
    ) -> IngestResult<BatchReport> {
        let _guards = self.locks.acquire(&staged.lock_keys()).await;

        let touched = self.load_touched_groups(staged).await?;
        self.check_group_references(staged, &touched)?;

        // Reconcile every touched group against the store overlaid with this batch
        let mut reconciliations = Vec::new();
        let mut statuses: HashMap<String, GroupStatus> = HashMap::new();
        for (group_id, group) in &touched {
            let Some(effective) = &group.effective else {
                debug!(group_id = %group_id, "group unknown, reconciliation skipped");
                continue;
            };

            let mut lines: HashMap<NaturalKey, LedgerDetail> = self
                .storage
                .ledger_details_for_group(group_id)
                .await?
                .into_iter()
                .map(|d| (NaturalKey::ledger_detail(&d.transaction_number, &d.account_id), d))
                .collect();
            for (_, detail) in staged.details().filter(|(_, d)| &d.group_id == group_id) {
                lines.insert(
                    NaturalKey::ledger_detail(&detail.transaction_number, &detail.account_id),
                    detail.clone(),
                );
            }

            let result = self.reconciler.reconcile(effective, lines.values());
            match &result {
                Reconciliation::Discrepancy(d) => warn!(
                    group_id = %d.group_id,
                    expected = %d.expected_closing_net,
                    actual = %d.actual_closing_net,
                    delta = %d.delta,
                    "ledger group failed reconciliation"
                ),
                Reconciliation::Balanced { .. } => debug!(group_id = %group_id, "ledger group balanced"),
            }
            statuses.insert(group_id.clone(), result.group_status());
            reconciliations.push(result);
        }

        let mut plan = UpsertPlan::new(ctx.batch_id.clone());
        for record in staged.records() {
            let value = match &record.record {
                Record::CreditNote(note) => RowValue::CreditNote(note.clone()),
                Record::VendorCredit(credit) => RowValue::VendorCredit(credit.clone()),
                Record::Aging(entry) => RowValue::Aging(
                    aged.remove(&record.key)
                        .unwrap_or_else(|| self.aging.calculate(entry.clone(), ctx.reference_date)),
                ),
                Record::LedgerGroup(group) => RowValue::LedgerGroup(StoredGroup {
                    group: group.clone(),
                    status: statuses.get(&group.group_id).copied().unwrap_or_default(),
                }),
                Record::LedgerDetail(detail) => RowValue::LedgerDetail(detail.clone()),
            };
            self.upsert
                .stage(ctx, &mut plan, record.index, record.key.clone(), value)
                .await?;
        }

        // Groups reached only through their lines still record the new status
        let staged_groups = staged.groups();
        for (group_id, group) in touched {
            if staged_groups.contains_key(group_id.as_str()) {
                continue;
            }
            let (Some(row), Some(status)) = (group.stored, statuses.get(&group_id)) else {
                continue;
            };
            if let Some(restated) = restate_group(ctx, row, *status) {
                plan.push(restated, WriteOutcome::Updated);
            }
        }

        let writes = self.upsert.apply(plan).await?;

        Ok(BatchReport {
            batch_id: ctx.batch_id.clone(),
            records: staged.len(),
            writes,
            reconciliations,
            aged_entries: staged
                .records()
                .iter()
                .filter(|s| matches!(s.record, Record::Aging(_)))
                .count(),
        })
    }

    async fn load_touched_groups(
        &self,
        staged: &StagedBatch,
    ) -> IngestResult<BTreeMap<String, TouchedGroup>> {
        let staged_groups = staged.groups();
        let mut touched = BTreeMap::new();

        for group_id in staged.touched_groups() {
            let stored = self
                .storage
                .find_row(&NaturalKey::ledger_group(&group_id))
                .await?;
            let effective = match staged_groups.get(group_id.as_str()) {
                Some(group) => Some((*group).clone()),
                None => stored
                    .as_ref()
                    .and_then(|row| row.value.as_ledger_group())
                    .map(|g| g.group.clone()),
            };
            touched.insert(group_id, TouchedGroup { stored, effective });
        }

        Ok(touched)
    }

    fn check_group_references(
        &self,
        staged: &StagedBatch,
        touched: &BTreeMap<String, TouchedGroup>,
    ) -> IngestResult<()> {
        if !self.config.enforce_referential_integrity {
            return Ok(());
        }

        for (index, detail) in staged.details() {
            let known = touched
                .get(&detail.group_id)
                .is_some_and(|g| g.effective.is_some());
            if !known {
                return Err(IngestError::ReferentialIntegrity {
                    index,
                    group_id: detail.group_id.clone(),
                });
            }
        }

        Ok(())
    }

    async fn refresh_aging_locked(&self, ctx: &IngestContext) -> IngestResult<usize> {
        let mut keys = BTreeSet::new();
        for kind in [RecordKind::ArAging, RecordKind::ApAging] {
            keys.extend(self.storage.list_rows(kind).await?.into_iter().map(|r| r.key));
        }
        let _guards = self.locks.acquire(&keys).await;

        // Re-read under the locks so no concurrent batch is overwritten
        let mut rows = Vec::with_capacity(keys.len());
        for key in &keys {
            if let Some(row) = self.storage.find_row(key).await? {
                rows.push(row);
            }
        }

        let previous: Vec<AgedEntry> = rows
            .iter()
            .filter_map(|row| row.value.as_aged_entry().cloned())
            .collect();
        let reference_date = ctx.reference_date;
        let refreshed = self
            .on_blocking_pool(move |aging| aging.refresh_all(previous, reference_date))
            .await?;

        let mut changes = ChangeSet::new(ctx.batch_id.clone());
        let aging_rows = rows.into_iter().filter(|row| row.value.as_aged_entry().is_some());
        for (row, aged) in aging_rows.zip(refreshed) {
            if row.value.as_aged_entry() == Some(&aged) {
                continue;
            }
            changes.push(Row {
                value: RowValue::Aging(aged),
                record_updated: ctx.started_at.max(row.record_updated),
                ..row
            });
        }

        let count = changes.len();
        if count > 0 {
            self.storage.commit(changes).await?;
        }
        Ok(count)
    }
}

/// Stored group row carrying a new reconciliation status, if it changed
fn restate_group(ctx: &IngestContext, row: Row, status: GroupStatus) -> Option<Row> {
    let stored = row.value.as_ledger_group()?;
    if stored.status == status {
        return None;
    }
    let value = RowValue::LedgerGroup(StoredGroup {
        group: stored.group.clone(),
        status,
    });
    Some(Row {
        batch_id: ctx.batch_id.clone(),
        value,
        record_updated: ctx.started_at.max(row.record_updated),
        ..row
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::memory_storage::MemoryStorage;
    use bigdecimal::BigDecimal;

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, d).unwrap()
    }

    fn group(id: &str, closing_debit: i64) -> Record {
        Record::LedgerGroup(LedgerGroup {
            group_id: id.to_string(),
            opening_debit: BigDecimal::from(100),
            opening_credit: BigDecimal::from(0),
            opening_date: date(4, 1),
            closing_debit: BigDecimal::from(closing_debit),
            closing_credit: BigDecimal::from(0),
            closing_date: date(4, 30),
        })
    }

    fn line(txn: &str, group_id: &str, debit: i64, credit: i64) -> Record {
        Record::LedgerDetail(LedgerDetail {
            transaction_number: txn.to_string(),
            account_id: "acc-1".to_string(),
            account_name: "Cash".to_string(),
            account_group: Some("Assets".to_string()),
            group_id: group_id.to_string(),
            date: date(4, 10),
            debit: BigDecimal::from(debit),
            credit: BigDecimal::from(credit),
            amount: BigDecimal::from(debit + credit),
            transaction_type: Some("journal".to_string()),
            branch_name: None,
            currency: Some("INR".to_string()),
            reverses: None,
        })
    }

    async fn group_status(ingestor: &Ingestor<MemoryStorage>, id: &str) -> GroupStatus {
        ingestor
            .storage()
            .find_row(&NaturalKey::ledger_group(id))
            .await
            .unwrap()
            .unwrap()
            .value
            .as_ledger_group()
            .unwrap()
            .status
    }

    #[tokio::test]
    async fn test_balanced_group_is_closed() {
        let ingestor = Ingestor::new(MemoryStorage::new());
        let ctx = IngestContext::new(BatchId::new("b1"));

        let report = ingestor
            .ingest(
                &ctx,
                vec![
                    group("Cash", 130),
                    line("JV-1", "Cash", 50, 0),
                    line("JV-2", "Cash", 0, 20),
                ],
            )
            .await
            .unwrap();

        assert!(report.is_fully_reconciled());
        assert_eq!(report.writes.inserted, 3);
        assert_eq!(group_status(&ingestor, "Cash").await, GroupStatus::Closed);
    }

    #[tokio::test]
    async fn test_lines_arriving_later_restate_the_group() {
        let ingestor = Ingestor::new(MemoryStorage::new());

        let first = ingestor
            .ingest(&IngestContext::new(BatchId::new("b1")), vec![group("Cash", 130)])
            .await
            .unwrap();
        assert!(!first.is_fully_reconciled());
        assert_eq!(group_status(&ingestor, "Cash").await, GroupStatus::Unreconciled);

        let second = ingestor
            .ingest(
                &IngestContext::new(BatchId::new("b2")),
                vec![line("JV-1", "Cash", 30, 0)],
            )
            .await
            .unwrap();
        assert!(second.is_fully_reconciled());
        assert_eq!(second.writes.updated, 1);
        assert_eq!(group_status(&ingestor, "Cash").await, GroupStatus::Closed);

        let check = ingestor.reconcile_group("Cash").await.unwrap().unwrap();
        assert!(check.is_balanced());
        assert!(ingestor.reconcile_group("Missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_group_is_rejected_when_enforced() {
        let ingestor = Ingestor::new(MemoryStorage::new());
        let err = ingestor
            .ingest(
                &IngestContext::new(BatchId::new("b1")),
                vec![group("Cash", 100), line("JV-1", "Bank", 10, 0)],
            )
            .await
            .unwrap_err();

        match err {
            IngestError::ReferentialIntegrity { index, group_id } => {
                assert_eq!(index, 1);
                assert_eq!(group_id, "Bank");
            }
            other => panic!("expected referential integrity error, got {:?}", other),
        }
        assert_eq!(ingestor.storage().row_count(RecordKind::LedgerGroup).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_group_is_accepted_when_advisory() {
        let config = IngestConfig::default().with_referential_integrity(false);
        let ingestor = Ingestor::with_config(MemoryStorage::new(), config);
        let report = ingestor
            .ingest(
                &IngestContext::new(BatchId::new("b1")),
                vec![line("JV-1", "Bank", 10, 0)],
            )
            .await
            .unwrap();

        assert!(report.reconciliations.is_empty());
        assert_eq!(report.writes.inserted, 1);
    }

    #[test]
    fn test_restate_group_only_on_change() {
        let ctx = IngestContext::new(BatchId::new("b2"));
        let row = Row {
            row_id: RowId::new(),
            key: NaturalKey::ledger_group("Cash"),
            batch_id: BatchId::new("b1"),
            value: RowValue::LedgerGroup(StoredGroup {
                group: match group("Cash", 100) {
                    Record::LedgerGroup(g) => g,
                    _ => unreachable!(),
                },
                status: GroupStatus::Closed,
            }),
            record_created: ctx.started_at,
            record_updated: ctx.started_at,
        };

        assert!(restate_group(&ctx, row.clone(), GroupStatus::Closed).is_none());
        let restated = restate_group(&ctx, row, GroupStatus::Unreconciled).unwrap();
        assert_eq!(restated.batch_id, BatchId::new("b2"));
        assert_eq!(
            restated.value.as_ledger_group().unwrap().status,
            GroupStatus::Unreconciled
        );
    }
}
