use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::address_book::AddressBook;
use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::interest::AccrualEngine;
use crate::operations::{apply_effect, Operation};
use crate::state::{SubLoanInception, SubLoanMetadata, SubLoanState};
use crate::types::{BalanceParts, OperationId, OperationStatus, SubLoanId, SubLoanStatus};

/// everything the ledger stores for one sub-loan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubLoanEntry {
    pub inception: SubLoanInception,
    pub metadata: SubLoanMetadata,
    pub state: SubLoanState,
    /// operations indexed by sequence id minus one
    operations: Vec<Operation>,
    /// operation ids sorted by (timestamp, id)
    order: Vec<OperationId>,
}

impl SubLoanEntry {
    pub fn new(inception: SubLoanInception) -> Self {
        let state = SubLoanState::at_inception(&inception);
        Self {
            inception,
            metadata: SubLoanMetadata::default(),
            state,
            operations: Vec::new(),
            order: Vec::new(),
        }
    }

    pub fn operation(&self, id: OperationId) -> Option<&Operation> {
        if id == 0 {
            return None;
        }
        self.operations.get(id as usize - 1)
    }

    pub fn operation_mut(&mut self, id: OperationId) -> Option<&mut Operation> {
        if id == 0 {
            return None;
        }
        self.operations.get_mut(id as usize - 1)
    }

    /// sequence id the next submitted operation will receive
    pub fn next_operation_id(&self) -> OperationId {
        self.operations.len() as OperationId + 1
    }

    /// operation ids in (timestamp, id) order
    pub fn ordered_operation_ids(&self) -> &[OperationId] {
        &self.order
    }

    /// record a new operation and keep the timeline index sorted
    pub fn insert_operation(&mut self, operation: Operation) -> OperationId {
        let id = operation.id;
        let key = operation.order_key();
        let at = self
            .order
            .partition_point(|&other| self.operations[other as usize - 1].order_key() <= key);
        self.operations.push(operation);
        self.order.insert(at, id);

        self.metadata.operation_count += 1;
        self.metadata.earliest_operation_id = self.order.first().copied();
        self.metadata.latest_operation_id = self.order.last().copied();
        self.metadata.update_index += 1;
        id
    }

    /// latest timestamp among still-pending operations
    pub fn recompute_pending_timestamp(&mut self) {
        self.metadata.pending_timestamp = self
            .operations
            .iter()
            .filter(|op| op.status == OperationStatus::Pending)
            .map(|op| op.timestamp)
            .max();
    }

    /// pending operations dated at or before `now`, in timeline order
    pub fn due_operation_ids(&self, now: DateTime<Utc>) -> Vec<OperationId> {
        self.order
            .iter()
            .copied()
            .filter(|&id| {
                let op = &self.operations[id as usize - 1];
                op.status == OperationStatus::Pending && op.timestamp <= now
            })
            .collect()
    }

    /// most recent applied operation in (timestamp, id) order
    pub fn last_applied_operation_id(&self) -> Option<OperationId> {
        self.order
            .iter()
            .rev()
            .copied()
            .find(|&id| self.operations[id as usize - 1].status == OperationStatus::Applied)
    }
}

/// read-only projection of one sub-loan as of a timestamp
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubLoanPreview {
    pub sub_loan_id: SubLoanId,
    pub as_of: DateTime<Utc>,
    pub status: SubLoanStatus,
    pub tracked: BalanceParts,
    pub repaid: BalanceParts,
    pub discounted: BalanceParts,
    /// per-component floored sum of the tracked amounts
    pub outstanding_balance: Money,
}

/// aggregate projection across every sub-loan of a loan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanPreview {
    pub first_sub_loan_id: SubLoanId,
    pub sub_loan_count: u16,
    pub total_outstanding: Money,
    pub total_tracked: BalanceParts,
    pub total_repaid: Money,
    pub total_discounted: Money,
    pub sub_loans: Vec<SubLoanPreview>,
}

/// owns every sub-loan's inception, metadata, state and operation timeline
#[derive(Debug, Serialize, Deserialize)]
pub struct SubLoanLedger {
    sub_loans: BTreeMap<SubLoanId, SubLoanEntry>,
    next_sub_loan_id: SubLoanId,
    pub address_book: AddressBook,
}

impl SubLoanLedger {
    pub fn new() -> Self {
        Self {
            sub_loans: BTreeMap::new(),
            next_sub_loan_id: 1,
            address_book: AddressBook::new(),
        }
    }

    /// id the next allocation will start at, without reserving it
    pub fn peek_next_id(&self) -> SubLoanId {
        self.next_sub_loan_id
    }

    /// reserve a contiguous run of sub-loan ids; ids are never reused
    pub fn allocate_ids(&mut self, count: u16) -> SubLoanId {
        let first = self.next_sub_loan_id;
        self.next_sub_loan_id += count as SubLoanId;
        first
    }

    pub fn insert(&mut self, entry: SubLoanEntry) {
        self.sub_loans.insert(entry.inception.sub_loan_id, entry);
    }

    pub fn contains(&self, sub_loan_id: SubLoanId) -> bool {
        self.sub_loans.contains_key(&sub_loan_id)
    }

    pub fn get(&self, sub_loan_id: SubLoanId) -> Result<&SubLoanEntry> {
        self.sub_loans
            .get(&sub_loan_id)
            .ok_or(LedgerError::SubLoanNonexistent { sub_loan_id })
    }

    pub fn get_mut(&mut self, sub_loan_id: SubLoanId) -> Result<&mut SubLoanEntry> {
        self.sub_loans
            .get_mut(&sub_loan_id)
            .ok_or(LedgerError::SubLoanNonexistent { sub_loan_id })
    }

    /// resolve the contiguous id run of the loan owning `sub_loan_id`
    pub fn loan_members(&self, sub_loan_id: SubLoanId) -> Result<Vec<SubLoanId>> {
        let entry = self.get(sub_loan_id)?;
        let first = entry.inception.first_sub_loan_id;
        let count = entry.inception.sibling_count as SubLoanId;
        Ok((first..first + count).collect())
    }

    pub fn sub_loan_count(&self) -> usize {
        self.sub_loans.len()
    }

    /// project one sub-loan's state as of `as_of` without mutating storage
    ///
    /// pending operations dated at or before `as_of` take effect in
    /// (timestamp, id) order; a pending operation whose effect can no
    /// longer apply is skipped, mirroring the write path. interest then
    /// accrues from the projected tracked timestamp to `as_of`.
    pub fn preview(
        &self,
        engine: &AccrualEngine,
        accuracy: Money,
        sub_loan_id: SubLoanId,
        as_of: DateTime<Utc>,
    ) -> Result<SubLoanPreview> {
        let entry = self.get(sub_loan_id)?;
        if as_of < entry.inception.start_timestamp {
            return Err(LedgerError::TimestampTooEarly {
                timestamp: as_of,
                earliest: entry.inception.start_timestamp,
            });
        }

        let mut state = entry.state.clone();
        for &op_id in &entry.order {
            let op = match entry.operation(op_id) {
                Some(op) => op,
                None => continue,
            };
            if op.status != OperationStatus::Pending || op.timestamp > as_of {
                continue;
            }
            let mut trial = state.clone();
            if apply_effect(
                engine,
                accuracy,
                &entry.inception,
                &mut trial,
                op.kind,
                op.timestamp,
                op.value,
                op.account,
            )
            .is_ok()
            {
                state = trial;
            }
        }
        engine.accrue(&entry.inception, &mut state, as_of);

        Ok(SubLoanPreview {
            sub_loan_id,
            as_of,
            status: state.status,
            tracked: state.tracked,
            repaid: state.repaid,
            discounted: state.discounted,
            outstanding_balance: state.outstanding_balance(accuracy),
        })
    }

    /// aggregate previews across every member of the owning loan
    ///
    /// `as_of = None` previews each member at its own tracked timestamp
    pub fn loan_preview(
        &self,
        engine: &AccrualEngine,
        accuracy: Money,
        sub_loan_id: SubLoanId,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<LoanPreview> {
        let members = self.loan_members(sub_loan_id)?;
        let first = members[0];
        let mut sub_loans = Vec::with_capacity(members.len());
        let mut total_outstanding = Money::ZERO;
        let mut total_tracked = BalanceParts::ZERO;
        let mut total_repaid = Money::ZERO;
        let mut total_discounted = Money::ZERO;

        for member in members {
            let member_as_of = match as_of {
                Some(ts) => ts,
                None => self.get(member)?.state.tracked_timestamp,
            };
            let preview = self.preview(engine, accuracy, member, member_as_of)?;
            total_outstanding += preview.outstanding_balance;
            total_tracked.principal += preview.tracked.principal;
            total_tracked.remuneratory += preview.tracked.remuneratory;
            total_tracked.moratory += preview.tracked.moratory;
            total_tracked.late_fee += preview.tracked.late_fee;
            total_repaid += preview.repaid.total();
            total_discounted += preview.discounted.total();
            sub_loans.push(preview);
        }

        Ok(LoanPreview {
            first_sub_loan_id: first,
            sub_loan_count: sub_loans.len() as u16,
            total_outstanding,
            total_tracked,
            total_repaid,
            total_discounted,
            sub_loans,
        })
    }
}
