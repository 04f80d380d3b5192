//! Validation and staging of incoming batches

use std::collections::{BTreeSet, HashMap};

use crate::traits::*;
use crate::types::*;
use crate::utils::parse::RawRecord;

/// Validated record together with its position in the submitted batch
#[derive(Debug, Clone, PartialEq)]
pub struct StagedRecord {
    pub index: usize,
    pub key: NaturalKey,
    pub record: Record,
}

/// A batch that passed validation; nothing has been persisted yet
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StagedBatch {
    records: Vec<StagedRecord>,
}

impl StagedBatch {
    /// Parse raw upstream rows, then stage them
    ///
    /// The first unparseable row rejects the whole batch.
    pub fn from_raw(raw: &[RawRecord], validator: &dyn RecordValidator) -> IngestResult<Self> {
        let records = raw
            .iter()
            .enumerate()
            .map(|(index, row)| row.parse().map_err(|e| e.at(index)))
            .collect::<IngestResult<Vec<_>>>()?;
        Self::stage(records, validator)
    }

    /// Validate every record and resolve its natural key
    ///
    /// Identical records sharing a key collapse into the first one; records
    /// sharing a key with different values reject the batch.
    pub fn stage(records: Vec<Record>, validator: &dyn RecordValidator) -> IngestResult<Self> {
        let mut staged: Vec<StagedRecord> = Vec::with_capacity(records.len());
        let mut positions: HashMap<NaturalKey, usize> = HashMap::new();

        for (index, record) in records.into_iter().enumerate() {
            validator
                .validate_record(&record)
                .map_err(|e| e.at(index))?;

            let key = record.natural_key();
            if let Some(&position) = positions.get(&key) {
                let first = &staged[position];
                if first.record != record {
                    return Err(IngestError::KeyConflict {
                        key,
                        first_index: first.index,
                        second_index: index,
                        first: Box::new(first.record.clone()),
                        second: Box::new(record),
                    });
                }
                continue;
            }

            positions.insert(key.clone(), staged.len());
            staged.push(StagedRecord { index, key, record });
        }

        Ok(Self { records: staged })
    }

    pub fn records(&self) -> &[StagedRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Ledger groups carried by this batch, by group id
    pub fn groups(&self) -> HashMap<&str, &LedgerGroup> {
        self.records
            .iter()
            .filter_map(|s| match &s.record {
                Record::LedgerGroup(group) => Some((group.group_id.as_str(), group)),
                _ => None,
            })
            .collect()
    }

    /// Ledger lines carried by this batch, with their record index
    pub fn details(&self) -> impl Iterator<Item = (usize, &LedgerDetail)> {
        self.records.iter().filter_map(|s| match &s.record {
            Record::LedgerDetail(detail) => Some((s.index, detail)),
            _ => None,
        })
    }

    /// Group ids whose reconciliation may change because of this batch
    pub fn touched_groups(&self) -> BTreeSet<String> {
        let mut groups: BTreeSet<String> =
            self.groups().keys().map(|id| id.to_string()).collect();
        groups.extend(self.details().map(|(_, d)| d.group_id.clone()));
        groups
    }

    /// Keys to lock before touching the store, in acquisition order
    ///
    /// Besides every staged key this includes the key of each touched ledger
    /// group, so concurrent writers into one group serialize.
    pub fn lock_keys(&self) -> BTreeSet<NaturalKey> {
        let mut keys: BTreeSet<NaturalKey> = self.records.iter().map(|s| s.key.clone()).collect();
        keys.extend(
            self.touched_groups()
                .iter()
                .map(|group_id| NaturalKey::ledger_group(group_id)),
        );
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use chrono::NaiveDate;

    fn note(id: &str, balance: i64) -> Record {
        Record::CreditNote(CreditNote {
            credit_note_id: id.to_string(),
            credit_note_number: format!("CN-{}", id),
            customer_id: "cust-1".to_string(),
            customer_name: "Acme".to_string(),
            credit_date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            amount: BigDecimal::from(100),
            balance_amount: BigDecimal::from(balance),
            status: DocumentStatus::Open,
        })
    }

    fn detail(txn: &str, group_id: &str) -> Record {
        Record::LedgerDetail(LedgerDetail {
            transaction_number: txn.to_string(),
            account_id: "acc-1".to_string(),
            account_name: "Cash".to_string(),
            account_group: None,
            group_id: group_id.to_string(),
            date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            debit: BigDecimal::from(10),
            credit: BigDecimal::from(0),
            amount: BigDecimal::from(10),
            transaction_type: None,
            branch_name: None,
            currency: None,
            reverses: None,
        })
    }

    #[test]
    fn test_identical_duplicates_collapse() {
        let staged =
            StagedBatch::stage(vec![note("1", 50), note("1", 50)], &DefaultRecordValidator)
                .unwrap();
        assert_eq!(staged.len(), 1);
    }

    #[test]
    fn test_divergent_duplicates_conflict() {
        let err = StagedBatch::stage(
            vec![note("1", 50), note("2", 10), note("1", 40)],
            &DefaultRecordValidator,
        )
        .unwrap_err();

        match err {
            IngestError::KeyConflict {
                key,
                first_index,
                second_index,
                ..
            } => {
                assert_eq!(key, NaturalKey::credit_note("1"));
                assert_eq!(first_index, 0);
                assert_eq!(second_index, 2);
            }
            other => panic!("expected key conflict, got {:?}", other),
        }
    }

    #[test]
    fn test_validation_error_carries_index() {
        let err = StagedBatch::stage(vec![note("1", 50), note("2", 150)], &DefaultRecordValidator)
            .unwrap_err();
        match err {
            IngestError::Validation { index, field, .. } => {
                assert_eq!(index, 1);
                assert_eq!(field, "balance_amount");
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_raw_parse_failure_rejects_batch() {
        let raw = vec![
            RawRecord::new(RecordKind::LedgerGroup).field("group_id", "Cash"),
            RawRecord::new(RecordKind::CreditNote),
        ];
        let err = StagedBatch::from_raw(&raw, &DefaultRecordValidator).unwrap_err();
        assert!(matches!(err, IngestError::Validation { index: 0, .. }));
    }

    #[test]
    fn test_lock_keys_include_touched_groups() {
        let staged = StagedBatch::stage(
            vec![detail("JV-1", "Cash"), note("1", 0)],
            &DefaultRecordValidator,
        )
        .unwrap();

        let keys = staged.lock_keys();
        assert!(keys.contains(&NaturalKey::ledger_group("Cash")));
        assert!(keys.contains(&NaturalKey::ledger_detail("JV-1", "acc-1")));
        assert!(keys.contains(&NaturalKey::credit_note("1")));
        assert_eq!(staged.touched_groups().len(), 1);
    }
}
