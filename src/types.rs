use serde::{Deserialize, Serialize};
use std::fmt;

use crate::decimal::Money;

/// globally unique sub-loan identifier, allocated from a monotonically
/// increasing counter at loan taking and never reused
pub type SubLoanId = u64;

/// per-sub-loan operation sequence identifier, 1-based
pub type OperationId = u64;

/// lending program identifier
pub type ProgramId = u32;

/// small integer id assigned to an interned account address
pub type AccountId = u32;

/// externally-supplied account address
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountAddress(String);

impl AccountAddress {
    pub fn new(addr: impl Into<String>) -> Self {
        AccountAddress(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AccountAddress {
    fn from(s: &str) -> Self {
        AccountAddress::new(s)
    }
}

/// lending program status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgramStatus {
    /// accepting new loans
    Active,
    /// irreversibly closed to new loans; existing sub-loans keep operating
    Closed,
}

/// sub-loan status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubLoanStatus {
    /// debt outstanding, operations accepted
    Ongoing,
    /// every tracked component paid or discounted down to zero
    Repaid,
    /// unwound by a whole-loan revocation
    Revoked,
}

/// grace period status
///
/// while `Active`, the remuneratory rate is discounted by the sub-loan's
/// grace discount rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum GracePeriodStatus {
    #[default]
    None,
    Active,
}

/// operation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    Repayment,
    Discount,
    /// only recorded by the loan-level revoke path, never submittable
    Revocation,
    Freezing,
    Unfreezing,
    RemuneratoryRateSetting,
    MoratoryRateSetting,
    LateFeeRateSetting,
    GraceDiscountRateSetting,
    DurationSetting,
}

/// operation status state machine
///
/// `Pending -> {Applied, Dismissed}`, `Applied -> Revoked`; `Skipped` marks a
/// pending operation bypassed because it could no longer apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationStatus {
    Pending,
    Applied,
    Skipped,
    Dismissed,
    Revoked,
}

/// value carried by an operation, interpreted per kind
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum OperationValue {
    /// repayment or discount amount
    Amount(Money),
    /// replacement rate for the rate-setting kinds
    Rate(crate::decimal::Rate),
    /// replacement duration in whole days
    Days(u32),
    /// freezing and unfreezing carry no value
    None,
}

/// one amount per debt component: the shape of tracked, repaid and
/// discounted running totals
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct BalanceParts {
    pub principal: Money,
    pub remuneratory: Money,
    pub moratory: Money,
    pub late_fee: Money,
}

impl BalanceParts {
    pub const ZERO: BalanceParts = BalanceParts {
        principal: Money::ZERO,
        remuneratory: Money::ZERO,
        moratory: Money::ZERO,
        late_fee: Money::ZERO,
    };

    /// exact sum of the four components
    pub fn total(&self) -> Money {
        self.principal + self.remuneratory + self.moratory + self.late_fee
    }

    /// sum of the four components, each independently floored to the
    /// accuracy factor before aggregation
    pub fn floored_total(&self, accuracy: Money) -> Money {
        self.principal.floor_to(accuracy)
            + self.remuneratory.floor_to(accuracy)
            + self.moratory.floor_to(accuracy)
            + self.late_fee.floor_to(accuracy)
    }

    pub fn is_zero(&self) -> bool {
        self.principal.is_zero()
            && self.remuneratory.is_zero()
            && self.moratory.is_zero()
            && self.late_fee.is_zero()
    }
}
