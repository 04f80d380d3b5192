//! Core types and data structures for the ingestion engine

use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::aging::AgedEntry;

/// Identifier shared by every record of one ingestion batch
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(String);

impl BatchId {
    /// Wrap an upstream batch identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive a batch identifier from a timestamp (`YYYYMMDDHHMMSS`)
    pub fn from_timestamp(at: NaiveDateTime) -> Self {
        Self(at.format("%Y%m%d%H%M%S").to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Internal identity of a stored row, independent of its business key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowId(Uuid);

impl RowId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RowId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The six warehouse tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RecordKind {
    #[serde(rename = "credit_note_details")]
    CreditNote,
    #[serde(rename = "vendor_credit_details")]
    VendorCredit,
    #[serde(rename = "ar_aging_details")]
    ArAging,
    #[serde(rename = "ap_aging_details")]
    ApAging,
    #[serde(rename = "general_ledger_groups")]
    LedgerGroup,
    #[serde(rename = "general_ledger_details")]
    LedgerDetail,
}

impl RecordKind {
    /// Name of the warehouse table holding this kind of record
    pub fn table_name(&self) -> &'static str {
        match self {
            RecordKind::CreditNote => "credit_note_details",
            RecordKind::VendorCredit => "vendor_credit_details",
            RecordKind::ArAging => "ar_aging_details",
            RecordKind::ApAging => "ap_aging_details",
            RecordKind::LedgerGroup => "general_ledger_groups",
            RecordKind::LedgerDetail => "general_ledger_details",
        }
    }
}

/// Business-meaningful key used to match incoming records against stored rows
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NaturalKey {
    pub kind: RecordKind,
    pub value: String,
}

impl NaturalKey {
    pub fn new(kind: RecordKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }

    pub fn credit_note(credit_note_id: &str) -> Self {
        Self::new(RecordKind::CreditNote, credit_note_id)
    }

    pub fn vendor_credit(vendor_credit_id: &str) -> Self {
        Self::new(RecordKind::VendorCredit, vendor_credit_id)
    }

    pub fn aging(kind: AgingKind, entry_id: &str) -> Self {
        Self::new(kind.record_kind(), entry_id)
    }

    pub fn ledger_group(group_id: &str) -> Self {
        Self::new(RecordKind::LedgerGroup, group_id)
    }

    /// Ledger lines are keyed by transaction number plus account
    pub fn ledger_detail(transaction_number: &str, account_id: &str) -> Self {
        Self::new(
            RecordKind::LedgerDetail,
            format!("{}/{}", transaction_number, account_id),
        )
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.table_name(), self.value)
    }
}

/// Lifecycle status of credit documents and aging entries; `Void` is a logical deletion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Draft,
    #[default]
    Open,
    Closed,
    Void,
}

/// Customer credit note (`credit_note_details`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditNote {
    pub credit_note_id: String,
    pub credit_note_number: String,
    pub customer_id: String,
    pub customer_name: String,
    pub credit_date: NaiveDate,
    /// Total credited amount in base currency
    pub amount: BigDecimal,
    /// Portion not yet applied; always within `0..=amount`
    pub balance_amount: BigDecimal,
    pub status: DocumentStatus,
}

/// Credit received from a vendor (`vendor_credit_details`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorCredit {
    pub vendor_credit_id: String,
    pub vendor_credit_number: String,
    pub vendor_id: String,
    pub vendor_name: String,
    pub vendor_credit_date: NaiveDate,
    pub amount: BigDecimal,
    /// Portion not yet applied; always within `0..=amount`
    pub balance_amount: BigDecimal,
    pub status: DocumentStatus,
}

/// Receivable or payable side of an aging entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgingKind {
    Receivable,
    Payable,
}

impl AgingKind {
    pub fn record_kind(&self) -> RecordKind {
        match self {
            AgingKind::Receivable => RecordKind::ArAging,
            AgingKind::Payable => RecordKind::ApAging,
        }
    }
}

/// Open invoice or bill as reported by the AR/AP aging export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgingEntry {
    pub kind: AgingKind,
    /// Upstream entity id (`entity_id` for AR, `ap_aging_id` for AP)
    pub entry_id: String,
    pub transaction_number: String,
    /// Customer for receivables, vendor for payables
    pub counterparty_id: String,
    pub counterparty_name: String,
    pub date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub amount: BigDecimal,
    pub balance_due: BigDecimal,
    pub currency_code: Option<String>,
    pub exchange_rate: Option<BigDecimal>,
    /// `Void` marks a logically deleted invoice or bill
    #[serde(default)]
    pub status: DocumentStatus,
}

impl AgingEntry {
    pub fn is_void(&self) -> bool {
        self.status == DocumentStatus::Void
    }
}

/// Opening/closing balances of one general ledger group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerGroup {
    pub group_id: String,
    pub opening_debit: BigDecimal,
    pub opening_credit: BigDecimal,
    pub opening_date: NaiveDate,
    pub closing_debit: BigDecimal,
    pub closing_credit: BigDecimal,
    pub closing_date: NaiveDate,
}

impl LedgerGroup {
    /// Opening debit minus opening credit
    pub fn opening_net(&self) -> BigDecimal {
        &self.opening_debit - &self.opening_credit
    }

    /// Closing debit minus closing credit
    pub fn closing_net(&self) -> BigDecimal {
        &self.closing_debit - &self.closing_credit
    }

    /// Whether a ledger line dated `date` falls inside this group's period
    pub fn covers(&self, date: NaiveDate) -> bool {
        date >= self.opening_date && date <= self.closing_date
    }
}

/// Single journal line (`general_ledger_details`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerDetail {
    pub transaction_number: String,
    pub account_id: String,
    pub account_name: String,
    pub account_group: Option<String>,
    pub group_id: String,
    pub date: NaiveDate,
    pub debit: BigDecimal,
    pub credit: BigDecimal,
    /// Unsigned line amount as reported upstream (`net_amount`)
    pub amount: BigDecimal,
    pub transaction_type: Option<String>,
    pub branch_name: Option<String>,
    pub currency: Option<String>,
    /// Transaction number this line reverses, for corrective entries
    pub reverses: Option<String>,
}

impl LedgerDetail {
    /// Signed movement of this line (debit minus credit)
    pub fn delta(&self) -> BigDecimal {
        &self.debit - &self.credit
    }
}

/// One incoming record of any warehouse table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "table", content = "record", rename_all = "snake_case")]
pub enum Record {
    CreditNote(CreditNote),
    VendorCredit(VendorCredit),
    Aging(AgingEntry),
    LedgerGroup(LedgerGroup),
    LedgerDetail(LedgerDetail),
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::CreditNote(_) => RecordKind::CreditNote,
            Record::VendorCredit(_) => RecordKind::VendorCredit,
            Record::Aging(entry) => entry.kind.record_kind(),
            Record::LedgerGroup(_) => RecordKind::LedgerGroup,
            Record::LedgerDetail(_) => RecordKind::LedgerDetail,
        }
    }

    /// Resolve the business key used for upsert matching
    pub fn natural_key(&self) -> NaturalKey {
        match self {
            Record::CreditNote(note) => NaturalKey::credit_note(&note.credit_note_id),
            Record::VendorCredit(credit) => NaturalKey::vendor_credit(&credit.vendor_credit_id),
            Record::Aging(entry) => NaturalKey::aging(entry.kind, &entry.entry_id),
            Record::LedgerGroup(group) => NaturalKey::ledger_group(&group.group_id),
            Record::LedgerDetail(detail) => {
                NaturalKey::ledger_detail(&detail.transaction_number, &detail.account_id)
            }
        }
    }
}

/// Reconciliation state persisted alongside a ledger group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    /// Never reconciled
    #[default]
    Pending,
    /// Balanced and closed
    Closed,
    /// Last reconciliation found a discrepancy
    Unreconciled,
}

/// Ledger group as persisted, with its reconciliation status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredGroup {
    pub group: LedgerGroup,
    pub status: GroupStatus,
}

/// Value column of a stored row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "table", content = "value", rename_all = "snake_case")]
pub enum RowValue {
    CreditNote(CreditNote),
    VendorCredit(VendorCredit),
    Aging(AgedEntry),
    LedgerGroup(StoredGroup),
    LedgerDetail(LedgerDetail),
}

impl RowValue {
    pub fn as_credit_note(&self) -> Option<&CreditNote> {
        match self {
            RowValue::CreditNote(note) => Some(note),
            _ => None,
        }
    }

    pub fn as_vendor_credit(&self) -> Option<&VendorCredit> {
        match self {
            RowValue::VendorCredit(credit) => Some(credit),
            _ => None,
        }
    }

    pub fn as_aged_entry(&self) -> Option<&AgedEntry> {
        match self {
            RowValue::Aging(entry) => Some(entry),
            _ => None,
        }
    }

    pub fn as_ledger_group(&self) -> Option<&StoredGroup> {
        match self {
            RowValue::LedgerGroup(group) => Some(group),
            _ => None,
        }
    }

    pub fn as_ledger_detail(&self) -> Option<&LedgerDetail> {
        match self {
            RowValue::LedgerDetail(detail) => Some(detail),
            _ => None,
        }
    }
}

/// Persisted row envelope shared by all tables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRow<T> {
    pub row_id: RowId,
    pub key: NaturalKey,
    /// Batch of the most recent write
    pub batch_id: BatchId,
    pub value: T,
    pub record_created: NaiveDateTime,
    pub record_updated: NaiveDateTime,
}

pub type Row = StoredRow<RowValue>;

/// Rows to be written atomically in one commit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub batch_id: BatchId,
    pub rows: Vec<Row>,
}

impl ChangeSet {
    pub fn new(batch_id: BatchId) -> Self {
        Self {
            batch_id,
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, row: Row) {
        self.rows.push(row);
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

/// How the upsert of one record affected the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteOutcome {
    Inserted,
    Updated,
    /// Values identical to the stored row; only the timestamp moved
    Unchanged,
}

/// Field-level validation failure, before the record index is known
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub reason: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Attach the position of the offending record within its batch
    pub fn at(self, index: usize) -> IngestError {
        IngestError::Validation {
            index,
            field: self.field,
            reason: self.reason,
        }
    }
}

/// Errors that can occur while ingesting a batch
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Validation error in record {index}, field '{field}': {reason}")]
    Validation {
        index: usize,
        field: String,
        reason: String,
    },
    #[error("Key conflict on {key}: records {first_index} and {second_index} carry different values")]
    KeyConflict {
        key: NaturalKey,
        first_index: usize,
        second_index: usize,
        first: Box<Record>,
        second: Box<Record>,
    },
    #[error("Record {index} references unknown ledger group '{group_id}'")]
    ReferentialIntegrity { index: usize, group_id: String },
    #[error("Record {index} would modify committed ledger line {key}; post a reversal instead")]
    ImmutableRecord { index: usize, key: NaturalKey },
    #[error("Batch {batch_id} exceeded the storage timeout of {timeout:?} and was rolled back")]
    PersistenceTimeout { batch_id: BatchId, timeout: Duration },
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Background task failed: {0}")]
    Background(String),
}

impl IngestError {
    /// Whether replaying the same batch may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IngestError::PersistenceTimeout { .. } | IngestError::Storage(_)
        )
    }
}

/// Result type for ingestion operations
pub type IngestResult<T> = Result<T, IngestError>;
