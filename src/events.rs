use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::{Money, Rate};
use crate::state::SubLoanState;
use crate::types::{
    AccountAddress, BalanceParts, GracePeriodStatus, OperationId, OperationKind, OperationValue,
    ProgramId, SubLoanId, SubLoanStatus,
};

/// full post-state picture attached to every applied-operation event
///
/// the structured replacement for the on-chain packed words: one parameters
/// record plus the repaid, discount and tracked (before/after) part
/// quadruples, enough for off-chain reconstruction of the sub-loan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubLoanSnapshot {
    pub status: SubLoanStatus,
    pub grace_period_status: GracePeriodStatus,
    pub duration: u32,
    pub remuneratory_rate: Rate,
    pub moratory_rate: Rate,
    pub late_fee_rate: Rate,
    pub grace_discount_rate: Rate,
    pub tracked_timestamp: DateTime<Utc>,
    pub freeze_timestamp: Option<DateTime<Utc>>,
    pub pending_timestamp: Option<DateTime<Utc>>,
    pub repaid: BalanceParts,
    pub discounted: BalanceParts,
    pub tracked_before: BalanceParts,
    pub tracked_after: BalanceParts,
}

impl SubLoanSnapshot {
    /// capture a snapshot from the post-operation state and the tracked
    /// amounts observed before the operation ran
    pub fn capture(
        state: &SubLoanState,
        tracked_before: BalanceParts,
        pending_timestamp: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            status: state.status,
            grace_period_status: state.grace_period_status,
            duration: state.duration,
            remuneratory_rate: state.remuneratory_rate,
            moratory_rate: state.moratory_rate,
            late_fee_rate: state.late_fee_rate,
            grace_discount_rate: state.grace_discount_rate,
            tracked_timestamp: state.tracked_timestamp,
            freeze_timestamp: state.freeze_timestamp,
            pending_timestamp,
            repaid: state.repaid,
            discounted: state.discounted,
            tracked_before,
            tracked_after: state.tracked,
        }
    }
}

/// all events emitted by the market
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    // program lifecycle
    ProgramOpened {
        program_id: ProgramId,
        liquidity_pool: AccountAddress,
    },
    ProgramClosed {
        program_id: ProgramId,
    },

    // loan lifecycle
    LoanTaken {
        first_sub_loan_id: SubLoanId,
        program_id: ProgramId,
        borrower: AccountAddress,
        sub_loan_count: u16,
        total_borrowed: Money,
        total_addon: Money,
        timestamp: DateTime<Utc>,
    },
    SubLoanOpened {
        sub_loan_id: SubLoanId,
        index_in_loan: u16,
        borrowed_amount: Money,
        addon_amount: Money,
        duration: u32,
        start_timestamp: DateTime<Utc>,
    },
    LoanRevoked {
        first_sub_loan_id: SubLoanId,
        sub_loan_count: u16,
        principal_returned: Money,
        addon_returned: Money,
        timestamp: DateTime<Utc>,
    },
    SubLoanRevoked {
        sub_loan_id: SubLoanId,
        borrower_settlement: Money,
        timestamp: DateTime<Utc>,
    },

    // operation timeline
    OperationPending {
        sub_loan_id: SubLoanId,
        operation_id: OperationId,
        kind: OperationKind,
        timestamp: DateTime<Utc>,
        value: OperationValue,
    },
    OperationApplied {
        sub_loan_id: SubLoanId,
        operation_id: OperationId,
        kind: OperationKind,
        timestamp: DateTime<Utc>,
        value: OperationValue,
        snapshot: SubLoanSnapshot,
    },
    OperationDismissed {
        sub_loan_id: SubLoanId,
        operation_id: OperationId,
        timestamp: DateTime<Utc>,
    },
    OperationRevoked {
        sub_loan_id: SubLoanId,
        operation_id: OperationId,
        counterparty: AccountAddress,
        refunded: Money,
        snapshot: SubLoanSnapshot,
    },
    OperationSkipped {
        sub_loan_id: SubLoanId,
        operation_id: OperationId,
        reason: String,
    },
}

/// event store for collecting events during operations
#[derive(Debug, Default)]
pub struct EventStore {
    events: Vec<Event>,
}

impl EventStore {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn emit(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn extend(&mut self, events: Vec<Event>) {
        self.events.extend(events);
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}
