//! Parsing of raw upstream rows into typed records
//!
//! The upstream report export delivers every column as a string: amounts may
//! carry thousands separators or a trailing currency code, blanks mean zero,
//! and ledger dates may be prefixed with `"As On "`.

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::types::*;

/// Untyped row as delivered by the upstream export
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    #[serde(rename = "table")]
    pub kind: RecordKind,
    pub fields: BTreeMap<String, String>,
}

impl RawRecord {
    pub fn new(kind: RecordKind) -> Self {
        Self {
            kind,
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field setter
    pub fn field(mut self, name: &str, value: impl Into<String>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    fn text(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, name: &str) -> Result<String, FieldError> {
        self.text(name)
            .map(str::to_string)
            .ok_or_else(|| FieldError::new(name, "required field is missing"))
    }

    fn optional(&self, name: &str) -> Option<String> {
        self.text(name).map(str::to_string)
    }

    fn date(&self, name: &str) -> Result<NaiveDate, FieldError> {
        let value = self.required(name)?;
        parse_date(&value).map_err(|reason| FieldError::new(name, reason))
    }

    fn optional_date(&self, name: &str) -> Result<Option<NaiveDate>, FieldError> {
        self.text(name)
            .map(|value| parse_date(value).map_err(|reason| FieldError::new(name, reason)))
            .transpose()
    }

    fn decimal(&self, name: &str) -> Result<BigDecimal, FieldError> {
        parse_decimal(self.fields.get(name).map(String::as_str).unwrap_or(""))
            .map_err(|reason| FieldError::new(name, reason))
    }

    fn optional_decimal(&self, name: &str) -> Result<Option<BigDecimal>, FieldError> {
        self.text(name)
            .map(|value| parse_decimal(value).map_err(|reason| FieldError::new(name, reason)))
            .transpose()
    }

    fn status(&self, name: &str) -> Result<DocumentStatus, FieldError> {
        match self.text(name) {
            None => Ok(DocumentStatus::default()),
            Some(value) => {
                parse_document_status(value).map_err(|reason| FieldError::new(name, reason))
            }
        }
    }

    fn aging_status(&self, name: &str) -> Result<DocumentStatus, FieldError> {
        Ok(self
            .text(name)
            .map(parse_aging_status)
            .unwrap_or_default())
    }

    /// Convert into a typed record
    pub fn parse(&self) -> Result<Record, FieldError> {
        match self.kind {
            RecordKind::CreditNote => Ok(Record::CreditNote(CreditNote {
                credit_note_id: self.required("credit_note_id")?,
                credit_note_number: self.optional("credit_note_number").unwrap_or_default(),
                customer_id: self.optional("customer_id").unwrap_or_default(),
                customer_name: self.optional("customer_name").unwrap_or_default(),
                credit_date: self.date("credit_date")?,
                amount: self.decimal("credit_note_amount")?,
                balance_amount: self.decimal("balance_amount")?,
                status: self.status("status")?,
            })),
            RecordKind::VendorCredit => Ok(Record::VendorCredit(VendorCredit {
                vendor_credit_id: self.required("vendor_credit_id")?,
                vendor_credit_number: self.optional("vendor_credit_number").unwrap_or_default(),
                vendor_id: self.optional("vendor_id").unwrap_or_default(),
                vendor_name: self.optional("vendor_name").unwrap_or_default(),
                vendor_credit_date: self.date("vendor_credit_date")?,
                amount: self.decimal("amount")?,
                balance_amount: self.decimal("balance_amount")?,
                status: self.status("status")?,
            })),
            RecordKind::ArAging => Ok(Record::Aging(AgingEntry {
                kind: AgingKind::Receivable,
                entry_id: self.required("entity_id")?,
                transaction_number: self.optional("transaction_number").unwrap_or_default(),
                counterparty_id: self.optional("customer_id").unwrap_or_default(),
                counterparty_name: self.optional("customer_name").unwrap_or_default(),
                date: self.date("date")?,
                due_date: self.optional_date("due_date")?,
                amount: self.decimal("amount")?,
                balance_due: self.decimal("balance_due")?,
                currency_code: self.optional("currency_code"),
                exchange_rate: self.optional_decimal("exchange_rate")?,
                status: self.aging_status("status")?,
            })),
            RecordKind::ApAging => Ok(Record::Aging(AgingEntry {
                kind: AgingKind::Payable,
                entry_id: self.required("ap_aging_id")?,
                transaction_number: self.optional("transaction_number").unwrap_or_default(),
                counterparty_id: self.optional("vendor_id").unwrap_or_default(),
                counterparty_name: self.optional("vendor_name").unwrap_or_default(),
                date: self.date("date")?,
                due_date: self.optional_date("due_date")?,
                amount: self.decimal("bill_amount")?,
                balance_due: self.decimal("balance_due")?,
                currency_code: self.optional("currency_code"),
                exchange_rate: self.optional_decimal("exchange_rate")?,
                status: self.aging_status("status")?,
            })),
            RecordKind::LedgerGroup => Ok(Record::LedgerGroup(LedgerGroup {
                group_id: self.required("group_id")?,
                opening_debit: self.decimal("opening_debit")?,
                opening_credit: self.decimal("opening_credit")?,
                opening_date: self.date("opening_date")?,
                closing_debit: self.decimal("closing_debit")?,
                closing_credit: self.decimal("closing_credit")?,
                closing_date: self.date("closing_date")?,
            })),
            RecordKind::LedgerDetail => {
                let debit = self.decimal("debit")?;
                let credit = self.decimal("credit")?;
                let (amount, currency) = match self.text("net_amount") {
                    Some(net) => {
                        let (amount, currency) = split_net_amount(net)
                            .map_err(|reason| FieldError::new("net_amount", reason))?;
                        (amount, currency.or_else(|| self.optional("currency")))
                    }
                    None => (&debit + &credit, self.optional("currency")),
                };
                Ok(Record::LedgerDetail(LedgerDetail {
                    transaction_number: self.required("transaction_number")?,
                    account_id: self.required("account_id")?,
                    account_name: self.optional("account").unwrap_or_default(),
                    account_group: self.optional("account_group"),
                    group_id: self.required("group_id")?,
                    date: self.date("date")?,
                    debit,
                    credit,
                    amount,
                    transaction_type: self.optional("transaction_type"),
                    branch_name: self.optional("branch_name"),
                    currency,
                    reverses: self.optional("reverses"),
                }))
            }
        }
    }
}

/// Parse an upstream date, accepting an `"As On "` prefix
pub fn parse_date(value: &str) -> Result<NaiveDate, String> {
    let trimmed = value.trim();
    let trimmed = trimmed.strip_prefix("As On").unwrap_or(trimmed).trim();

    let separator = if trimmed.contains('/') { '/' } else { '-' };
    let parts: Vec<&str> = trimmed.split(separator).collect();
    if parts.len() != 3 {
        return Err(format!("unrecognised date '{}'", value));
    }

    // chrono's %Y accepts short years, so pick the layout from the shape
    let format = match (separator, parts[0].len(), parts[2].len()) {
        ('-', 4, _) => "%Y-%m-%d",
        ('-', _, 4) => "%d-%m-%Y",
        ('-', _, _) => "%d-%m-%y",
        (_, 4, _) => "%Y/%m/%d",
        (_, _, 4) => "%d/%m/%Y",
        _ => "%y/%m/%d",
    };

    NaiveDate::parse_from_str(trimmed, format)
        .map_err(|_| format!("unrecognised date '{}'", value))
}

/// Parse an upstream amount; blanks are zero, separators and currency codes are dropped
pub fn parse_decimal(value: &str) -> Result<BigDecimal, String> {
    let number = value.split_whitespace().next().unwrap_or("").replace(',', "");

    if number.is_empty() {
        return Ok(BigDecimal::from(0));
    }

    BigDecimal::from_str(&number).map_err(|_| format!("invalid decimal '{}'", value))
}

/// Split an upstream `net_amount` such as `"10.00 INR"` into amount and currency
pub fn split_net_amount(value: &str) -> Result<(BigDecimal, Option<String>), String> {
    let mut tokens = value.split_whitespace();
    let amount = parse_decimal(tokens.next().unwrap_or(""))?;
    Ok((amount, tokens.next().map(str::to_string)))
}

/// Map an aging report status onto a document status
///
/// The aging exports report payment progress (`overdue`, `unpaid`,
/// `partially_paid`, ...) rather than a document lifecycle, so anything not
/// recognised is treated as open.
pub fn parse_aging_status(value: &str) -> DocumentStatus {
    match value.trim().to_lowercase().as_str() {
        "void" | "voided" => DocumentStatus::Void,
        "draft" => DocumentStatus::Draft,
        "closed" | "paid" => DocumentStatus::Closed,
        _ => DocumentStatus::Open,
    }
}

/// Parse a document status case-insensitively
pub fn parse_document_status(value: &str) -> Result<DocumentStatus, String> {
    match value.trim().to_lowercase().as_str() {
        "draft" => Ok(DocumentStatus::Draft),
        "open" => Ok(DocumentStatus::Open),
        "closed" => Ok(DocumentStatus::Closed),
        "void" => Ok(DocumentStatus::Void),
        other => Err(format!("unknown status '{}'", other)),
    }
}
