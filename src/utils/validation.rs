//! Validation utilities

use bigdecimal::BigDecimal;

use crate::types::*;

/// Validate that a business key is present
pub fn require_key(field: &str, value: &str) -> Result<(), FieldError> {
    if value.trim().is_empty() {
        return Err(FieldError::new(field, "required key is missing"));
    }

    Ok(())
}

/// Validate that an amount is zero or positive
pub fn validate_non_negative(field: &str, amount: &BigDecimal) -> Result<(), FieldError> {
    if *amount < BigDecimal::from(0) {
        Err(FieldError::new(
            field,
            format!("amount cannot be negative: {}", amount),
        ))
    } else {
        Ok(())
    }
}

/// Validate `0 <= balance <= amount`
pub fn validate_balance_within(
    field: &str,
    balance: &BigDecimal,
    amount: &BigDecimal,
) -> Result<(), FieldError> {
    validate_non_negative(field, balance)?;

    if balance > amount {
        return Err(FieldError::new(
            field,
            format!("balance {} exceeds amount {}", balance, amount),
        ));
    }

    Ok(())
}

/// Validate that a ledger line is either a debit or a credit, never both
pub fn validate_single_sided(debit: &BigDecimal, credit: &BigDecimal) -> Result<(), FieldError> {
    validate_non_negative("debit", debit)?;
    validate_non_negative("credit", credit)?;

    let zero = BigDecimal::from(0);
    if *debit != zero && *credit != zero {
        return Err(FieldError::new(
            "credit",
            "debit and credit cannot both be non-zero",
        ));
    }

    Ok(())
}
