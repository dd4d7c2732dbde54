use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use hourglass_rs::SafeTimeProvider;
use log::{debug, info, warn};

use crate::config::MarketConfig;
use crate::decimal::{Money, Rate};
use crate::errors::{LedgerError, Result};
use crate::events::{Event, EventStore, SubLoanSnapshot};
use crate::interest::AccrualEngine;
use crate::ledger::{LoanPreview, SubLoanEntry, SubLoanLedger, SubLoanPreview};
use crate::operations::{
    apply_effect, max_operation_timestamp, Operation, OperationRequest, OperationView,
    TokenMovement, TokenParty, VoidRequest,
};
use crate::ports::{CollaboratorKind, CreditLine, LiquidityPool, TokenGateway, TransferIntent};
use crate::state::{LendingProgram, SubLoanInception, SubLoanMetadata, SubLoanState};
use crate::types::{
    AccountAddress, BalanceParts, GracePeriodStatus, OperationId, OperationKind, OperationStatus,
    OperationValue, ProgramId, ProgramStatus, SubLoanId, SubLoanStatus,
};

/// terms of one sub-loan inside a take-loan request
#[derive(Debug, Clone)]
pub struct SubLoanRequest {
    pub borrowed_amount: Money,
    pub addon_amount: Money,
    /// duration in whole days; must ascend strictly across the request array
    pub duration: u32,
    pub remuneratory_rate: Rate,
    pub moratory_rate: Rate,
    pub late_fee_rate: Rate,
    pub grace_discount_rate: Rate,
}

/// moment a preview is taken at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewMoment {
    /// project state as of this timestamp
    AsOf(DateTime<Utc>),
    /// report the stored state at its accrual high-water mark
    Tracked,
}

struct ProgramEntry {
    record: LendingProgram,
    credit_line: Box<dyn CreditLine>,
    liquidity_pool: Box<dyn LiquidityPool>,
}

/// the market: programs, the sub-loan ledger, the operation timeline and
/// the collaborator ports, behind one facade
///
/// every entry point either fully applies or leaves the market untouched:
/// inputs are validated first, state changes are staged on working copies,
/// collaborator hooks and token transfers run, and only then is the staged
/// state committed and its events flushed
pub struct LendingMarket<T: TokenGateway> {
    config: MarketConfig,
    engine: AccrualEngine,
    programs: BTreeMap<ProgramId, ProgramEntry>,
    next_program_id: ProgramId,
    ledger: SubLoanLedger,
    tokens: T,
    events: EventStore,
}

impl<T: TokenGateway> LendingMarket<T> {
    pub fn new(config: MarketConfig, tokens: T) -> Self {
        let engine = AccrualEngine::new(config.day_boundary_offset_secs);
        Self {
            config,
            engine,
            programs: BTreeMap::new(),
            next_program_id: 1,
            ledger: SubLoanLedger::new(),
            tokens,
            events: EventStore::new(),
        }
    }

    pub fn config(&self) -> &MarketConfig {
        &self.config
    }

    /// the token gateway behind this market
    pub fn tokens(&self) -> &T {
        &self.tokens
    }

    pub fn tokens_mut(&mut self) -> &mut T {
        &mut self.tokens
    }

    // ---- program control ----

    /// register a lending program with its collaborator pair
    pub fn open_program(
        &mut self,
        credit_line: Box<dyn CreditLine>,
        liquidity_pool: Box<dyn LiquidityPool>,
    ) -> Result<ProgramId> {
        if credit_line.kind() != CollaboratorKind::CreditLine {
            return Err(LedgerError::InvalidCollaborator {
                expected: "credit line",
            });
        }
        if liquidity_pool.kind() != CollaboratorKind::LiquidityPool {
            return Err(LedgerError::InvalidCollaborator {
                expected: "liquidity pool",
            });
        }

        let pool_account = self.ledger.address_book.intern(liquidity_pool.account());
        let program_id = self.next_program_id;
        self.next_program_id += 1;

        let pool_address = liquidity_pool.account().clone();
        self.programs.insert(
            program_id,
            ProgramEntry {
                record: LendingProgram {
                    program_id,
                    status: ProgramStatus::Active,
                    liquidity_pool_account: pool_account,
                },
                credit_line,
                liquidity_pool,
            },
        );

        info!("program {} opened, pool account {}", program_id, pool_address);
        self.events.emit(Event::ProgramOpened {
            program_id,
            liquidity_pool: pool_address,
        });
        Ok(program_id)
    }

    /// irreversibly close a program to new loans
    pub fn close_program(&mut self, program_id: ProgramId) -> Result<()> {
        let entry = self
            .programs
            .get_mut(&program_id)
            .ok_or(LedgerError::ProgramNonexistent { program_id })?;
        if !entry.record.is_active() {
            return Err(LedgerError::ProgramNotActive {
                program_id,
                status: entry.record.status,
            });
        }
        entry.record.status = ProgramStatus::Closed;

        info!("program {} closed", program_id);
        self.events.emit(Event::ProgramClosed { program_id });
        Ok(())
    }

    pub fn get_program(&self, program_id: ProgramId) -> Result<&LendingProgram> {
        self.programs
            .get(&program_id)
            .map(|entry| &entry.record)
            .ok_or(LedgerError::ProgramNonexistent { program_id })
    }

    // ---- loan lifecycle ----

    /// take a loan of one or more sub-loans for `borrower`
    ///
    /// `start_timestamp = None` defaults to the current time; an explicit
    /// start must not lie in the future
    pub fn take_loan(
        &mut self,
        borrower: &AccountAddress,
        program_id: ProgramId,
        start_timestamp: Option<DateTime<Utc>>,
        requests: &[SubLoanRequest],
        time: &SafeTimeProvider,
    ) -> Result<SubLoanId> {
        let now = time.now();

        let program = self
            .programs
            .get(&program_id)
            .ok_or(LedgerError::ProgramNonexistent { program_id })?;
        if !program.record.is_active() {
            return Err(LedgerError::ProgramNotActive {
                program_id,
                status: program.record.status,
            });
        }

        if requests.is_empty() {
            return Err(LedgerError::EmptyBatch);
        }
        if requests.len() > self.config.max_sub_loans_per_loan {
            return Err(LedgerError::TooManySubLoans {
                requested: requests.len(),
                cap: self.config.max_sub_loans_per_loan,
            });
        }
        for window in requests.windows(2) {
            if window[1].duration <= window[0].duration {
                return Err(LedgerError::DurationsNotAscending);
            }
        }
        for request in requests {
            if request.duration == 0 {
                return Err(LedgerError::InvalidDuration {
                    duration: request.duration,
                });
            }
            if !request.borrowed_amount.is_positive() {
                return Err(LedgerError::InvalidAmount {
                    amount: request.borrowed_amount,
                });
            }
            if request.borrowed_amount > self.config.borrowed_amount_limit {
                return Err(LedgerError::AmountLimitExceeded {
                    amount: request.borrowed_amount,
                    limit: self.config.borrowed_amount_limit,
                });
            }
            if request.addon_amount.is_negative() {
                return Err(LedgerError::InvalidAmount {
                    amount: request.addon_amount,
                });
            }
            for rate in [
                request.remuneratory_rate,
                request.moratory_rate,
                request.late_fee_rate,
                request.grace_discount_rate,
            ] {
                if !rate.is_valid() {
                    return Err(LedgerError::InvalidRate { rate });
                }
            }
        }

        let start = match start_timestamp {
            None => now,
            Some(ts) if ts > now => {
                return Err(LedgerError::StartTimestampInFuture { timestamp: ts })
            }
            Some(ts) => ts,
        };

        let total_borrowed = requests
            .iter()
            .fold(Money::ZERO, |acc, r| acc + r.borrowed_amount);
        let total_addon = requests
            .iter()
            .fold(Money::ZERO, |acc, r| acc + r.addon_amount);
        let first_sub_loan_id = self.ledger.peek_next_id();
        let pool_address = program.liquidity_pool.account().clone();

        // collaborator hooks: failing hooks abort before any ledger write
        let program = self
            .programs
            .get_mut(&program_id)
            .expect("program checked above");
        for (index, request) in requests.iter().enumerate() {
            program
                .credit_line
                .on_before_loan_opened(
                    first_sub_loan_id + index as SubLoanId,
                    borrower,
                    request.borrowed_amount,
                )
                .map_err(|source| LedgerError::CollaboratorRejected {
                    collaborator: "credit line",
                    source,
                })?;
        }
        program
            .liquidity_pool
            .on_before_liquidity_out(total_borrowed)
            .map_err(|source| LedgerError::CollaboratorRejected {
                collaborator: "liquidity pool",
                source,
            })?;
        if total_addon.is_positive() {
            program
                .liquidity_pool
                .on_before_liquidity_out(total_addon)
                .map_err(|source| LedgerError::CollaboratorRejected {
                    collaborator: "liquidity pool",
                    source,
                })?;
        }

        // fund movement: principal to the borrower, addon to the treasury
        let mut intents = vec![TransferIntent {
            from: pool_address.clone(),
            to: borrower.clone(),
            amount: total_borrowed,
        }];
        if total_addon.is_positive() {
            intents.push(TransferIntent {
                from: pool_address,
                to: self.config.addon_treasury.clone(),
                amount: total_addon,
            });
        }
        self.tokens
            .transfer_batch(&intents)
            .map_err(|source| LedgerError::TransferFailed { source })?;

        // commit
        let allocated = self.ledger.allocate_ids(requests.len() as u16);
        debug_assert_eq!(allocated, first_sub_loan_id);
        let borrower_id = self.ledger.address_book.intern(borrower);

        for (index, request) in requests.iter().enumerate() {
            let sub_loan_id = first_sub_loan_id + index as SubLoanId;
            let inception = SubLoanInception {
                sub_loan_id,
                program_id,
                borrower: borrower_id,
                borrowed_amount: request.borrowed_amount,
                addon_amount: request.addon_amount,
                remuneratory_rate: request.remuneratory_rate,
                moratory_rate: request.moratory_rate,
                late_fee_rate: request.late_fee_rate,
                grace_discount_rate: request.grace_discount_rate,
                initial_duration: request.duration,
                start_timestamp: start,
                index_in_loan: index as u16,
                sibling_count: requests.len() as u16,
                first_sub_loan_id,
            };
            self.events.emit(Event::SubLoanOpened {
                sub_loan_id,
                index_in_loan: index as u16,
                borrowed_amount: request.borrowed_amount,
                addon_amount: request.addon_amount,
                duration: request.duration,
                start_timestamp: start,
            });
            self.ledger.insert(SubLoanEntry::new(inception));
        }

        info!(
            "loan taken: first sub-loan {}, {} sub-loans, borrower {}, total {}",
            first_sub_loan_id,
            requests.len(),
            borrower,
            total_borrowed + total_addon,
        );
        self.events.emit(Event::LoanTaken {
            first_sub_loan_id,
            program_id,
            borrower: borrower.clone(),
            sub_loan_count: requests.len() as u16,
            total_borrowed,
            total_addon,
            timestamp: now,
        });

        Ok(first_sub_loan_id)
    }

    /// revoke the whole loan owning `sub_loan_id`
    ///
    /// no accrual runs: tracked amounts jump straight to zero, each member
    /// records a Revocation operation, and funds are settled back to the
    /// liquidity pool (netted against what the borrower already repaid)
    pub fn revoke_loan(&mut self, sub_loan_id: SubLoanId, time: &SafeTimeProvider) -> Result<()> {
        let now = time.now();
        let members = self.ledger.loan_members(sub_loan_id)?;
        let anchor = self.ledger.get(sub_loan_id)?;
        if anchor.state.status == SubLoanStatus::Revoked {
            return Err(LedgerError::SubLoanRevoked { sub_loan_id });
        }
        let program_id = anchor.inception.program_id;
        let borrower_id = anchor.inception.borrower;
        let borrower = self
            .ledger
            .address_book
            .resolve(borrower_id)
            .cloned()
            .ok_or(LedgerError::SubLoanNonexistent { sub_loan_id })?;

        let mut total_borrowed = Money::ZERO;
        let mut total_addon = Money::ZERO;
        let mut borrower_net = Money::ZERO;
        for &member in &members {
            let entry = self.ledger.get(member)?;
            total_borrowed += entry.inception.borrowed_amount;
            total_addon += entry.inception.addon_amount;
            borrower_net += entry.inception.borrowed_amount - entry.state.repaid.total();
        }

        let program = self
            .programs
            .get_mut(&program_id)
            .ok_or(LedgerError::ProgramNonexistent { program_id })?;
        let pool_address = program.liquidity_pool.account().clone();

        // collaborator hooks
        for &member in &members {
            let amount = self.ledger.get(member)?.inception.borrowed_amount;
            program
                .credit_line
                .on_after_loan_closed(member, &borrower, amount)
                .map_err(|source| LedgerError::CollaboratorRejected {
                    collaborator: "credit line",
                    source,
                })?;
        }
        program
            .liquidity_pool
            .on_before_liquidity_in(total_borrowed)
            .map_err(|source| LedgerError::CollaboratorRejected {
                collaborator: "liquidity pool",
                source,
            })?;
        if total_addon.is_positive() {
            program
                .liquidity_pool
                .on_before_liquidity_in(total_addon)
                .map_err(|source| LedgerError::CollaboratorRejected {
                    collaborator: "liquidity pool",
                    source,
                })?;
        }

        // settlement: borrower covers borrowed minus already repaid, the
        // treasury returns the addon
        let mut intents = Vec::new();
        if borrower_net.is_positive() {
            intents.push(TransferIntent {
                from: borrower.clone(),
                to: pool_address.clone(),
                amount: borrower_net,
            });
        } else if borrower_net.is_negative() {
            intents.push(TransferIntent {
                from: pool_address.clone(),
                to: borrower.clone(),
                amount: Money::ZERO - borrower_net,
            });
        }
        if total_addon.is_positive() {
            intents.push(TransferIntent {
                from: self.config.addon_treasury.clone(),
                to: pool_address,
                amount: total_addon,
            });
        }
        self.tokens
            .transfer_batch(&intents)
            .map_err(|source| LedgerError::TransferFailed { source })?;

        // commit: zero every member, skip its pending operations, record
        // the Revocation operation
        let first = members[0];
        let count = members.len() as u16;
        for &member in &members {
            let entry = self.ledger.get_mut(member)?;
            let settlement = entry.inception.borrowed_amount - entry.state.repaid.total();

            for op_id in entry.due_operation_ids(max_operation_timestamp()) {
                if let Some(op) = entry.operation_mut(op_id) {
                    op.status = OperationStatus::Skipped;
                }
                self.events.emit(Event::OperationSkipped {
                    sub_loan_id: member,
                    operation_id: op_id,
                    reason: "loan revoked".to_string(),
                });
            }

            let pre_state = entry.state.clone();
            entry.state.status = SubLoanStatus::Revoked;
            entry.state.grace_period_status = GracePeriodStatus::None;
            entry.state.freeze_timestamp = None;
            entry.state.tracked = BalanceParts::ZERO;
            entry.state.tracked_timestamp = now;

            let operation_id = entry.next_operation_id();
            entry.insert_operation(Operation {
                id: operation_id,
                sub_loan_id: member,
                kind: OperationKind::Revocation,
                timestamp: now,
                value: OperationValue::None,
                account: borrower_id,
                status: OperationStatus::Applied,
                pre_state: Some(Box::new(pre_state)),
            });
            entry.metadata.recent_operation_id = Some(operation_id);
            entry.recompute_pending_timestamp();

            self.events.emit(Event::SubLoanRevoked {
                sub_loan_id: member,
                borrower_settlement: settlement,
                timestamp: now,
            });
        }

        info!(
            "loan revoked: first sub-loan {}, {} sub-loans, borrower settlement {}",
            first, count, borrower_net,
        );
        self.events.emit(Event::LoanRevoked {
            first_sub_loan_id: first,
            sub_loan_count: count,
            principal_returned: total_borrowed,
            addon_returned: total_addon,
            timestamp: now,
        });

        Ok(())
    }

    // ---- operation timeline ----

    /// submit a batch of operations
    ///
    /// the whole batch is validated before anything mutates; operations
    /// dated at or before now apply strictly in (timestamp, id) order —
    /// together with previously pending operations that have come due —
    /// and future-dated operations are queued as Pending
    pub fn submit_operations(
        &mut self,
        requests: &[OperationRequest],
        time: &SafeTimeProvider,
    ) -> Result<Vec<(SubLoanId, OperationId)>> {
        let now = time.now();
        if requests.is_empty() {
            return Err(LedgerError::EmptyBatch);
        }

        // validate the whole batch up front
        for request in requests {
            let entry = self.ledger.get(request.sub_loan_id)?;
            if entry.state.status == SubLoanStatus::Revoked {
                return Err(LedgerError::SubLoanRevoked {
                    sub_loan_id: request.sub_loan_id,
                });
            }
            if request.kind == OperationKind::Revocation {
                return Err(LedgerError::OperationKindNotSubmittable { kind: request.kind });
            }
            let timestamp = request.timestamp.unwrap_or(now);
            if timestamp < entry.inception.start_timestamp {
                return Err(LedgerError::TimestampTooEarly {
                    timestamp,
                    earliest: entry.inception.start_timestamp,
                });
            }
            if timestamp > max_operation_timestamp() {
                return Err(LedgerError::TimestampTooFar { timestamp });
            }
            validate_value(request.kind, request.value)?;
        }

        // stage on working copies
        let affected: BTreeSet<SubLoanId> = requests.iter().map(|r| r.sub_loan_id).collect();
        let mut staged: BTreeMap<SubLoanId, SubLoanEntry> = BTreeMap::new();
        for &id in &affected {
            staged.insert(id, self.ledger.get(id)?.clone());
        }

        let mut submitted: Vec<(SubLoanId, OperationId)> = Vec::with_capacity(requests.len());
        let mut batch_ids: BTreeSet<(SubLoanId, OperationId)> = BTreeSet::new();
        for request in requests {
            let entry = staged
                .get_mut(&request.sub_loan_id)
                .expect("staged above");
            let id = entry.next_operation_id();
            let account = self.ledger.address_book.intern(&request.account);
            entry.insert_operation(Operation {
                id,
                sub_loan_id: request.sub_loan_id,
                kind: request.kind,
                timestamp: request.timestamp.unwrap_or(now),
                value: request.value,
                account,
                status: OperationStatus::Pending,
                pre_state: None,
            });
            submitted.push((request.sub_loan_id, id));
            batch_ids.insert((request.sub_loan_id, id));
        }

        // apply everything that is due, in timeline order per sub-loan
        let mut staged_events: Vec<Event> = Vec::new();
        let mut movements: Vec<(ProgramId, TokenMovement)> = Vec::new();
        for (&sub_loan_id, entry) in staged.iter_mut() {
            for op_id in entry.due_operation_ids(now) {
                let op = entry
                    .operation(op_id)
                    .expect("due id always resolves")
                    .clone();
                let pre_state = entry.state.clone();
                let outcome = apply_effect(
                    &self.engine,
                    self.config.accuracy,
                    &entry.inception,
                    &mut entry.state,
                    op.kind,
                    op.timestamp,
                    op.value,
                    op.account,
                );
                match outcome {
                    Ok(movement) => {
                        let tracked_before = pre_state.tracked;
                        {
                            let stored = entry
                                .operation_mut(op_id)
                                .expect("due id always resolves");
                            stored.status = OperationStatus::Applied;
                            stored.pre_state = Some(Box::new(pre_state));
                        }
                        entry.metadata.recent_operation_id = Some(op_id);
                        entry.metadata.update_index += 1;
                        entry.recompute_pending_timestamp();
                        staged_events.push(Event::OperationApplied {
                            sub_loan_id,
                            operation_id: op_id,
                            kind: op.kind,
                            timestamp: op.timestamp,
                            value: op.value,
                            snapshot: SubLoanSnapshot::capture(
                                &entry.state,
                                tracked_before,
                                entry.metadata.pending_timestamp,
                            ),
                        });
                        if let Some(movement) = movement {
                            movements.push((entry.inception.program_id, movement));
                        }
                        debug!(
                            "operation {} applied on sub-loan {} ({:?})",
                            op_id, sub_loan_id, op.kind
                        );
                    }
                    Err(error) => {
                        // a new batch item failing aborts the whole batch;
                        // a previously pending operation that can no longer
                        // apply is skipped instead
                        entry.state = pre_state;
                        if batch_ids.contains(&(sub_loan_id, op_id)) {
                            return Err(error);
                        }
                        let stored = entry
                            .operation_mut(op_id)
                            .expect("due id always resolves");
                        stored.status = OperationStatus::Skipped;
                        entry.metadata.update_index += 1;
                        entry.recompute_pending_timestamp();
                        warn!(
                            "pending operation {} on sub-loan {} skipped: {}",
                            op_id, sub_loan_id, error
                        );
                        staged_events.push(Event::OperationSkipped {
                            sub_loan_id,
                            operation_id: op_id,
                            reason: error.to_string(),
                        });
                    }
                }
            }

            entry.recompute_pending_timestamp();
            for &(batch_sub_loan, op_id) in &batch_ids {
                if batch_sub_loan != sub_loan_id {
                    continue;
                }
                let op = entry.operation(op_id).expect("batch id always resolves");
                if op.status == OperationStatus::Pending {
                    staged_events.push(Event::OperationPending {
                        sub_loan_id,
                        operation_id: op_id,
                        kind: op.kind,
                        timestamp: op.timestamp,
                        value: op.value,
                    });
                }
            }
        }

        // external movement, then commit
        let intents = self.resolve_movements(&movements)?;
        self.tokens
            .transfer_batch(&intents)
            .map_err(|source| LedgerError::TransferFailed { source })?;

        for (_, entry) in staged {
            self.ledger.insert(entry);
        }
        self.events.extend(staged_events);

        Ok(submitted)
    }

    /// void a batch of operations: dismiss the pending ones, reverse the
    /// applied ones
    ///
    /// reversing an applied operation restores the sub-loan to its
    /// pre-operation state and is only allowed for the most recent applied
    /// operation on that sub-loan
    pub fn void_operations(
        &mut self,
        requests: &[VoidRequest],
        time: &SafeTimeProvider,
    ) -> Result<()> {
        let now = time.now();
        if requests.is_empty() {
            return Err(LedgerError::EmptyBatch);
        }

        let mut staged: BTreeMap<SubLoanId, SubLoanEntry> = BTreeMap::new();
        for request in requests {
            if !staged.contains_key(&request.sub_loan_id) {
                staged.insert(
                    request.sub_loan_id,
                    self.ledger.get(request.sub_loan_id)?.clone(),
                );
            }
        }

        let mut staged_events: Vec<Event> = Vec::new();
        let mut movements: Vec<(ProgramId, TokenMovement)> = Vec::new();
        for request in requests {
            let entry = staged
                .get_mut(&request.sub_loan_id)
                .expect("staged above");
            let op = entry
                .operation(request.operation_id)
                .ok_or(LedgerError::OperationNonexistent {
                    sub_loan_id: request.sub_loan_id,
                    operation_id: request.operation_id,
                })?
                .clone();

            match op.status {
                OperationStatus::Pending => {
                    let stored = entry
                        .operation_mut(request.operation_id)
                        .expect("checked above");
                    stored.status = OperationStatus::Dismissed;
                    entry.metadata.update_index += 1;
                    entry.recompute_pending_timestamp();
                    debug!(
                        "operation {} on sub-loan {} dismissed",
                        request.operation_id, request.sub_loan_id
                    );
                    staged_events.push(Event::OperationDismissed {
                        sub_loan_id: request.sub_loan_id,
                        operation_id: request.operation_id,
                        timestamp: now,
                    });
                }
                OperationStatus::Applied => {
                    if op.kind == OperationKind::Revocation {
                        return Err(LedgerError::OperationNotVoidable {
                            sub_loan_id: request.sub_loan_id,
                            operation_id: request.operation_id,
                            status: op.status,
                        });
                    }
                    if entry.last_applied_operation_id() != Some(request.operation_id) {
                        return Err(LedgerError::OperationNotReversible {
                            sub_loan_id: request.sub_loan_id,
                            operation_id: request.operation_id,
                        });
                    }
                    let pre_state = op
                        .pre_state
                        .clone()
                        .ok_or(LedgerError::OperationNotReversible {
                            sub_loan_id: request.sub_loan_id,
                            operation_id: request.operation_id,
                        })?;

                    let tracked_before = entry.state.tracked;
                    entry.state = *pre_state;
                    let stored = entry
                        .operation_mut(request.operation_id)
                        .expect("checked above");
                    stored.status = OperationStatus::Revoked;
                    entry.metadata.recent_operation_id = entry.last_applied_operation_id();
                    entry.metadata.update_index += 1;
                    entry.recompute_pending_timestamp();

                    // reverse the original token movement toward the given
                    // counterparty
                    let mut refunded = Money::ZERO;
                    if op.kind == OperationKind::Repayment {
                        if let OperationValue::Amount(amount) = op.value {
                            refunded = amount;
                            movements.push((
                                entry.inception.program_id,
                                TokenMovement {
                                    from: TokenParty::LiquidityPool,
                                    to: TokenParty::Address(request.counterparty.clone()),
                                    amount,
                                },
                            ));
                        }
                    }
                    info!(
                        "operation {} on sub-loan {} reversed, refunded {}",
                        request.operation_id, request.sub_loan_id, refunded
                    );
                    staged_events.push(Event::OperationRevoked {
                        sub_loan_id: request.sub_loan_id,
                        operation_id: request.operation_id,
                        counterparty: request.counterparty.clone(),
                        refunded,
                        snapshot: SubLoanSnapshot::capture(
                            &entry.state,
                            tracked_before,
                            entry.metadata.pending_timestamp,
                        ),
                    });
                }
                status => {
                    return Err(LedgerError::OperationNotVoidable {
                        sub_loan_id: request.sub_loan_id,
                        operation_id: request.operation_id,
                        status,
                    });
                }
            }
        }

        let intents = self.resolve_movements(&movements)?;
        self.tokens
            .transfer_batch(&intents)
            .map_err(|source| LedgerError::TransferFailed { source })?;

        for (_, entry) in staged {
            self.ledger.insert(entry);
        }
        self.events.extend(staged_events);

        Ok(())
    }

    // ---- read model ----

    pub fn get_sub_loan_inception(&self, sub_loan_id: SubLoanId) -> Result<&SubLoanInception> {
        Ok(&self.ledger.get(sub_loan_id)?.inception)
    }

    pub fn get_sub_loan_metadata(&self, sub_loan_id: SubLoanId) -> Result<&SubLoanMetadata> {
        Ok(&self.ledger.get(sub_loan_id)?.metadata)
    }

    pub fn get_sub_loan_state(&self, sub_loan_id: SubLoanId) -> Result<&SubLoanState> {
        Ok(&self.ledger.get(sub_loan_id)?.state)
    }

    /// operation ids of one sub-loan in (timestamp, id) order
    pub fn get_sub_loan_operation_ids(&self, sub_loan_id: SubLoanId) -> Result<Vec<OperationId>> {
        Ok(self
            .ledger
            .get(sub_loan_id)?
            .ordered_operation_ids()
            .to_vec())
    }

    /// one operation with its derived timeline neighbors
    pub fn get_sub_loan_operation(
        &self,
        sub_loan_id: SubLoanId,
        operation_id: OperationId,
    ) -> Result<OperationView> {
        let entry = self.ledger.get(sub_loan_id)?;
        let op = entry
            .operation(operation_id)
            .ok_or(LedgerError::OperationNonexistent {
                sub_loan_id,
                operation_id,
            })?;

        let order = entry.ordered_operation_ids();
        let position = order
            .iter()
            .position(|&id| id == operation_id)
            .expect("every stored operation is indexed");
        let earlier = position.checked_sub(1).map(|i| order[i]);
        let later = order.get(position + 1).copied();

        Ok(OperationView {
            id: op.id,
            sub_loan_id: op.sub_loan_id,
            kind: op.kind,
            timestamp: op.timestamp,
            value: op.value,
            account: self.ledger.address_book.resolve(op.account).cloned(),
            status: op.status,
            earlier_operation_id: earlier,
            later_operation_id: later,
        })
    }

    /// read-only projection of one sub-loan
    pub fn get_sub_loan_preview(
        &self,
        sub_loan_id: SubLoanId,
        moment: PreviewMoment,
    ) -> Result<SubLoanPreview> {
        let as_of = match moment {
            PreviewMoment::AsOf(ts) => ts,
            PreviewMoment::Tracked => self.ledger.get(sub_loan_id)?.state.tracked_timestamp,
        };
        self.ledger
            .preview(&self.engine, self.config.accuracy, sub_loan_id, as_of)
    }

    /// aggregate projection across the whole owning loan
    pub fn get_loan_preview(
        &self,
        sub_loan_id: SubLoanId,
        moment: PreviewMoment,
    ) -> Result<LoanPreview> {
        let as_of = match moment {
            PreviewMoment::AsOf(ts) => Some(ts),
            PreviewMoment::Tracked => None,
        };
        self.ledger
            .loan_preview(&self.engine, self.config.accuracy, sub_loan_id, as_of)
    }

    pub fn resolve_account(&self, id: crate::types::AccountId) -> Option<&AccountAddress> {
        self.ledger.address_book.resolve(id)
    }

    pub fn events(&self) -> &[Event] {
        self.events.events()
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        self.events.take_events()
    }

    // ---- helpers ----

    fn resolve_movements(
        &self,
        movements: &[(ProgramId, TokenMovement)],
    ) -> Result<Vec<TransferIntent>> {
        let mut intents = Vec::with_capacity(movements.len());
        for (program_id, movement) in movements {
            intents.push(TransferIntent {
                from: self.resolve_party(*program_id, &movement.from)?,
                to: self.resolve_party(*program_id, &movement.to)?,
                amount: movement.amount,
            });
        }
        Ok(intents)
    }

    fn resolve_party(&self, program_id: ProgramId, party: &TokenParty) -> Result<AccountAddress> {
        match party {
            TokenParty::Account(id) => self
                .ledger
                .address_book
                .resolve(*id)
                .cloned()
                .ok_or(LedgerError::ProgramNonexistent { program_id }),
            TokenParty::Address(address) => Ok(address.clone()),
            TokenParty::LiquidityPool => {
                let program = self
                    .programs
                    .get(&program_id)
                    .ok_or(LedgerError::ProgramNonexistent { program_id })?;
                Ok(program.liquidity_pool.account().clone())
            }
            TokenParty::AddonTreasury => Ok(self.config.addon_treasury.clone()),
        }
    }
}

fn validate_value(kind: OperationKind, value: OperationValue) -> Result<()> {
    match kind {
        OperationKind::Repayment | OperationKind::Discount => match value {
            OperationValue::Amount(amount) if amount.is_positive() => Ok(()),
            OperationValue::Amount(amount) => Err(LedgerError::InvalidAmount { amount }),
            _ => Err(LedgerError::InvalidOperationValue { kind }),
        },
        OperationKind::RemuneratoryRateSetting
        | OperationKind::MoratoryRateSetting
        | OperationKind::LateFeeRateSetting
        | OperationKind::GraceDiscountRateSetting => match value {
            OperationValue::Rate(rate) if rate.is_valid() => Ok(()),
            OperationValue::Rate(rate) => Err(LedgerError::InvalidRate { rate }),
            _ => Err(LedgerError::InvalidOperationValue { kind }),
        },
        OperationKind::DurationSetting => match value {
            OperationValue::Days(days) if days > 0 => Ok(()),
            OperationValue::Days(days) => Err(LedgerError::InvalidDuration { duration: days }),
            _ => Err(LedgerError::InvalidOperationValue { kind }),
        },
        OperationKind::Freezing | OperationKind::Unfreezing => match value {
            OperationValue::None => Ok(()),
            _ => Err(LedgerError::InvalidOperationValue { kind }),
        },
        OperationKind::Revocation => Err(LedgerError::OperationKindNotSubmittable { kind }),
    }
}
