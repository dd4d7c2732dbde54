use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::decimal::{Money, Rate};
use crate::types::{
    OperationId, OperationKind, OperationStatus, ProgramId, ProgramStatus, SubLoanId,
};

/// error wrapped around a failing collaborator hook or token transfer
pub type CollaboratorError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("program not found: {program_id}")]
    ProgramNonexistent { program_id: ProgramId },

    #[error("program {program_id} not active: current status is {status:?}")]
    ProgramNotActive {
        program_id: ProgramId,
        status: ProgramStatus,
    },

    #[error("collaborator does not conform: expected {expected}")]
    InvalidCollaborator { expected: &'static str },

    #[error("sub-loan not found: {sub_loan_id}")]
    SubLoanNonexistent { sub_loan_id: SubLoanId },

    #[error("sub-loan {sub_loan_id} already revoked")]
    SubLoanRevoked { sub_loan_id: SubLoanId },

    #[error("operation not found: {operation_id} on sub-loan {sub_loan_id}")]
    OperationNonexistent {
        sub_loan_id: SubLoanId,
        operation_id: OperationId,
    },

    #[error("operation {operation_id} on sub-loan {sub_loan_id} not voidable: status is {status:?}")]
    OperationNotVoidable {
        sub_loan_id: SubLoanId,
        operation_id: OperationId,
        status: OperationStatus,
    },

    #[error("operation {operation_id} on sub-loan {sub_loan_id} is not the most recent applied operation")]
    OperationNotReversible {
        sub_loan_id: SubLoanId,
        operation_id: OperationId,
    },

    #[error("operation kind {kind:?} cannot be submitted through the batch path")]
    OperationKindNotSubmittable { kind: OperationKind },

    #[error("operation value does not match kind {kind:?}")]
    InvalidOperationValue { kind: OperationKind },

    #[error("empty request batch")]
    EmptyBatch,

    #[error("too many sub-loans requested: {requested} exceeds cap {cap}")]
    TooManySubLoans { requested: usize, cap: usize },

    #[error("sub-loan durations must be strictly ascending")]
    DurationsNotAscending,

    #[error("invalid amount: {amount}")]
    InvalidAmount { amount: Money },

    #[error("amount exceeds limit: {amount} over {limit}")]
    AmountLimitExceeded { amount: Money, limit: Money },

    #[error("invalid rate: {rate}")]
    InvalidRate { rate: Rate },

    #[error("invalid duration: {duration}")]
    InvalidDuration { duration: u32 },

    #[error("timestamp {timestamp} is before the earliest allowed {earliest}")]
    TimestampTooEarly {
        timestamp: DateTime<Utc>,
        earliest: DateTime<Utc>,
    },

    #[error("timestamp {timestamp} exceeds the operation timestamp ceiling")]
    TimestampTooFar { timestamp: DateTime<Utc> },

    #[error("start timestamp {timestamp} is in the future")]
    StartTimestampInFuture { timestamp: DateTime<Utc> },

    #[error("insufficient outstanding debt: outstanding {outstanding}, requested {requested}")]
    InsufficientOutstandingDebt {
        outstanding: Money,
        requested: Money,
    },

    #[error("sub-loan {sub_loan_id} freeze state does not allow this: currently frozen = {frozen}")]
    FreezeStateInvalid { sub_loan_id: SubLoanId, frozen: bool },

    #[error("{collaborator} hook rejected the call: {source}")]
    CollaboratorRejected {
        collaborator: &'static str,
        #[source]
        source: CollaboratorError,
    },

    #[error("token transfer failed: {source}")]
    TransferFailed {
        #[source]
        source: CollaboratorError,
    },
}

pub type Result<T> = std::result::Result<T, LedgerError>;
