//! Traits for storage abstraction and extensibility

use async_trait::async_trait;

use crate::types::*;
use crate::utils::validation::*;

/// Storage abstraction for the warehouse tables
///
/// This trait allows the ingestion engine to work with any durable backend
/// (MySQL, PostgreSQL, in-memory, etc.) that can look rows up by natural key
/// and apply a set of writes atomically.
#[async_trait]
pub trait WarehouseStorage: Send + Sync {
    /// Resolve a natural key to the internal identity of its row
    async fn find_row_id(&self, key: &NaturalKey) -> IngestResult<Option<RowId>>;

    /// Get a row by internal identity
    async fn get_row(&self, row_id: &RowId) -> IngestResult<Option<Row>>;

    /// List every row of one table
    async fn list_rows(&self, kind: RecordKind) -> IngestResult<Vec<Row>>;

    /// All committed ledger lines referencing a group
    async fn ledger_details_for_group(&self, group_id: &str) -> IngestResult<Vec<LedgerDetail>>;

    /// Apply all rows of a change set, or none of them
    ///
    /// Rows whose `row_id` already exists are replaced; others are inserted
    /// and indexed under their natural key.
    async fn commit(&self, changes: ChangeSet) -> IngestResult<()>;

    /// Get a row by natural key
    async fn find_row(&self, key: &NaturalKey) -> IngestResult<Option<Row>> {
        match self.find_row_id(key).await? {
            Some(row_id) => self.get_row(&row_id).await,
            None => Ok(None),
        }
    }
}

/// Trait for implementing record validation rules applied before staging
pub trait RecordValidator: Send + Sync {
    /// Validate one record in isolation
    fn validate_record(&self, record: &Record) -> Result<(), FieldError>;
}

/// Default validator enforcing required keys and amount bounds
pub struct DefaultRecordValidator;

impl RecordValidator for DefaultRecordValidator {
    fn validate_record(&self, record: &Record) -> Result<(), FieldError> {
        match record {
            Record::CreditNote(note) => {
                require_key("credit_note_id", &note.credit_note_id)?;
                validate_non_negative("amount", &note.amount)?;
                validate_balance_within("balance_amount", &note.balance_amount, &note.amount)
            }
            Record::VendorCredit(credit) => {
                require_key("vendor_credit_id", &credit.vendor_credit_id)?;
                validate_non_negative("amount", &credit.amount)?;
                validate_balance_within("balance_amount", &credit.balance_amount, &credit.amount)
            }
            Record::Aging(entry) => {
                require_key("entry_id", &entry.entry_id)?;
                validate_non_negative("amount", &entry.amount)?;
                validate_balance_within("balance_due", &entry.balance_due, &entry.amount)
            }
            Record::LedgerGroup(group) => {
                require_key("group_id", &group.group_id)?;
                for (field, amount) in [
                    ("opening_debit", &group.opening_debit),
                    ("opening_credit", &group.opening_credit),
                    ("closing_debit", &group.closing_debit),
                    ("closing_credit", &group.closing_credit),
                ] {
                    validate_non_negative(field, amount)?;
                }
                if group.closing_date < group.opening_date {
                    return Err(FieldError::new(
                        "closing_date",
                        "closing date precedes opening date",
                    ));
                }
                Ok(())
            }
            Record::LedgerDetail(detail) => {
                require_key("transaction_number", &detail.transaction_number)?;
                require_key("account_id", &detail.account_id)?;
                require_key("group_id", &detail.group_id)?;
                validate_non_negative("amount", &detail.amount)?;
                validate_single_sided(&detail.debit, &detail.credit)
            }
        }
    }
}
