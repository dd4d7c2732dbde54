use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::{Money, Rate};
use crate::types::{
    AccountId, BalanceParts, GracePeriodStatus, OperationId, ProgramId, ProgramStatus, SubLoanId,
    SubLoanStatus,
};

/// lending program record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LendingProgram {
    pub program_id: ProgramId,
    pub status: ProgramStatus,
    /// interned id of the liquidity pool's token account
    pub liquidity_pool_account: AccountId,
}

impl LendingProgram {
    pub fn is_active(&self) -> bool {
        self.status == ProgramStatus::Active
    }
}

/// immutable sub-loan terms, fixed at loan taking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubLoanInception {
    pub sub_loan_id: SubLoanId,
    pub program_id: ProgramId,
    pub borrower: AccountId,
    pub borrowed_amount: Money,
    pub addon_amount: Money,
    /// daily remuneratory interest rate at inception
    pub remuneratory_rate: Rate,
    /// daily moratory interest rate at inception
    pub moratory_rate: Rate,
    /// one-time late fee rate charged when the due day is crossed
    pub late_fee_rate: Rate,
    /// remuneratory discount applied while the grace period is active
    pub grace_discount_rate: Rate,
    /// initial duration in whole days
    pub initial_duration: u32,
    pub start_timestamp: DateTime<Utc>,
    /// position of this sub-loan within its loan, 0-based
    pub index_in_loan: u16,
    /// number of sub-loans in the owning loan
    pub sibling_count: u16,
    /// id of the loan's first sub-loan; the loan is the contiguous id run
    /// `first_sub_loan_id .. first_sub_loan_id + sibling_count`
    pub first_sub_loan_id: SubLoanId,
}

/// operation bookkeeping for one sub-loan
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SubLoanMetadata {
    /// bumped on every mutation of metadata or state
    pub update_index: u64,
    /// latest timestamp among still-pending operations, if any
    pub pending_timestamp: Option<DateTime<Utc>>,
    /// number of operations ever submitted for this sub-loan
    pub operation_count: u64,
    /// first operation in (timestamp, id) order
    pub earliest_operation_id: Option<OperationId>,
    /// most recently applied operation
    pub recent_operation_id: Option<OperationId>,
    /// last operation in (timestamp, id) order
    pub latest_operation_id: Option<OperationId>,
}

/// mutable sub-loan accounting state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubLoanState {
    pub status: SubLoanStatus,
    pub grace_period_status: GracePeriodStatus,
    /// current duration in whole days; the due day is the start day plus
    /// this value
    pub duration: u32,
    /// set while the sub-loan is frozen; accrual never reaches past it
    pub freeze_timestamp: Option<DateTime<Utc>>,
    /// accrual high-water mark
    pub tracked_timestamp: DateTime<Utc>,
    pub remuneratory_rate: Rate,
    pub moratory_rate: Rate,
    pub late_fee_rate: Rate,
    pub grace_discount_rate: Rate,
    /// outstanding debt per component
    pub tracked: BalanceParts,
    /// running repayment totals per component
    pub repaid: BalanceParts,
    /// running discount totals per component
    pub discounted: BalanceParts,
}

impl SubLoanState {
    /// initial state for a freshly taken sub-loan
    pub fn at_inception(inception: &SubLoanInception) -> Self {
        let grace = if inception.grace_discount_rate.is_zero() {
            GracePeriodStatus::None
        } else {
            GracePeriodStatus::Active
        };

        Self {
            status: SubLoanStatus::Ongoing,
            grace_period_status: grace,
            duration: inception.initial_duration,
            freeze_timestamp: None,
            tracked_timestamp: inception.start_timestamp,
            remuneratory_rate: inception.remuneratory_rate,
            moratory_rate: inception.moratory_rate,
            late_fee_rate: inception.late_fee_rate,
            grace_discount_rate: inception.grace_discount_rate,
            tracked: BalanceParts {
                principal: inception.borrowed_amount + inception.addon_amount,
                ..BalanceParts::ZERO
            },
            repaid: BalanceParts::ZERO,
            discounted: BalanceParts::ZERO,
        }
    }

    /// outstanding balance: each tracked component floored to the accuracy
    /// factor independently, then summed
    pub fn outstanding_balance(&self, accuracy: Money) -> Money {
        self.tracked.floored_total(accuracy)
    }

    pub fn is_ongoing(&self) -> bool {
        self.status == SubLoanStatus::Ongoing
    }

    pub fn is_frozen(&self) -> bool {
        self.freeze_timestamp.is_some()
    }

    /// full repayment or discount: flip to Repaid once nothing is tracked
    pub fn settle_status(&mut self) {
        if self.status == SubLoanStatus::Ongoing && self.tracked.is_zero() {
            self.status = SubLoanStatus::Repaid;
        }
    }
}
