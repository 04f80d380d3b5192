//! Reconciliation of general ledger groups against their detail lines
//!
//! A group is balanced when its closing net (debit minus credit) equals its
//! opening net plus the movement of every detail line dated inside the
//! group's period. Discrepancies are reported, never corrected.

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

use crate::types::*;

/// Numeric detail of a failed reconciliation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationDiscrepancy {
    pub group_id: String,
    /// Opening net plus the movement of the group's lines
    pub expected_closing_net: BigDecimal,
    /// Closing net as reported by the group
    pub actual_closing_net: BigDecimal,
    /// `actual_closing_net - expected_closing_net`
    pub delta: BigDecimal,
}

/// Outcome of reconciling one ledger group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Reconciliation {
    Balanced { group_id: String },
    Discrepancy(ReconciliationDiscrepancy),
}

impl Reconciliation {
    pub fn group_id(&self) -> &str {
        match self {
            Reconciliation::Balanced { group_id } => group_id,
            Reconciliation::Discrepancy(d) => &d.group_id,
        }
    }

    pub fn is_balanced(&self) -> bool {
        matches!(self, Reconciliation::Balanced { .. })
    }

    /// Status the group is left in after this reconciliation
    pub fn group_status(&self) -> GroupStatus {
        if self.is_balanced() {
            GroupStatus::Closed
        } else {
            GroupStatus::Unreconciled
        }
    }
}

/// Verifies the balance invariant of ledger groups
#[derive(Debug, Clone, Copy, Default)]
pub struct Reconciler;

impl Reconciler {
    pub fn new() -> Self {
        Self
    }

    /// Sum of `debit - credit` over the lines belonging to `group`
    ///
    /// Lines of other groups or dated outside the group's period are ignored.
    pub fn net_movement<'a, I>(&self, group: &LedgerGroup, details: I) -> BigDecimal
    where
        I: IntoIterator<Item = &'a LedgerDetail>,
    {
        details
            .into_iter()
            .filter(|d| d.group_id == group.group_id && group.covers(d.date))
            .map(|d| d.delta())
            .sum()
    }

    /// Check one group against its detail lines
    pub fn reconcile<'a, I>(&self, group: &LedgerGroup, details: I) -> Reconciliation
    where
        I: IntoIterator<Item = &'a LedgerDetail>,
    {
        let expected_closing_net = group.opening_net() + self.net_movement(group, details);
        let actual_closing_net = group.closing_net();

        if expected_closing_net == actual_closing_net {
            Reconciliation::Balanced {
                group_id: group.group_id.clone(),
            }
        } else {
            let delta = &actual_closing_net - &expected_closing_net;
            Reconciliation::Discrepancy(ReconciliationDiscrepancy {
                group_id: group.group_id.clone(),
                expected_closing_net,
                actual_closing_net,
                delta,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 4, d).unwrap()
    }

    fn group(closing_debit: i64, closing_credit: i64) -> LedgerGroup {
        LedgerGroup {
            group_id: "Sales".to_string(),
            opening_debit: BigDecimal::from(100),
            opening_credit: BigDecimal::from(0),
            opening_date: date(1),
            closing_debit: BigDecimal::from(closing_debit),
            closing_credit: BigDecimal::from(closing_credit),
            closing_date: date(30),
        }
    }

    fn line(txn: &str, group_id: &str, day: u32, debit: i64, credit: i64) -> LedgerDetail {
        LedgerDetail {
            transaction_number: txn.to_string(),
            account_id: "acc-1".to_string(),
            account_name: "Sales".to_string(),
            account_group: None,
            group_id: group_id.to_string(),
            date: date(day),
            debit: BigDecimal::from(debit),
            credit: BigDecimal::from(credit),
            amount: BigDecimal::from(debit + credit),
            transaction_type: None,
            branch_name: None,
            currency: None,
            reverses: None,
        }
    }

    #[test]
    fn test_opening_100_plus_50_minus_20_closes_at_130() {
        let details = vec![
            line("JV-1", "Sales", 5, 50, 0),
            line("JV-2", "Sales", 9, 0, 20),
        ];
        let reconciler = Reconciler::new();
        let g = group(130, 0);

        assert_eq!(
            g.opening_net() + reconciler.net_movement(&g, &details),
            BigDecimal::from(130)
        );
        let result = reconciler.reconcile(&g, &details);
        assert!(result.is_balanced());
        assert_eq!(result.group_status(), GroupStatus::Closed);
    }

    #[test]
    fn test_discrepancy_reports_delta_and_group() {
        let details = vec![line("JV-1", "Sales", 5, 50, 0)];
        let result = Reconciler::new().reconcile(&group(160, 0), &details);

        match result {
            Reconciliation::Discrepancy(d) => {
                assert_eq!(d.group_id, "Sales");
                assert_eq!(d.expected_closing_net, BigDecimal::from(150));
                assert_eq!(d.actual_closing_net, BigDecimal::from(160));
                assert_eq!(d.delta, BigDecimal::from(10));
            }
            other => panic!("expected discrepancy, got {:?}", other),
        }
    }

    #[test]
    fn test_lines_outside_group_or_period_are_ignored() {
        let mut late = line("JV-9", "Sales", 1, 999, 0);
        late.date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let details = vec![
            line("JV-1", "Sales", 30, 30, 0),
            line("JV-2", "Purchases", 5, 500, 0),
            late,
        ];
        let result = Reconciler::new().reconcile(&group(130, 0), &details);
        assert!(result.is_balanced());
    }

    #[test]
    fn test_credit_closing_balances() {
        let details = vec![line("JV-1", "Sales", 2, 0, 250)];
        let result = Reconciler::new().reconcile(&group(0, 150), &details);
        assert!(result.is_balanced());
    }
}
