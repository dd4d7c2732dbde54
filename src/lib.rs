pub mod address_book;
pub mod config;
pub mod decimal;
pub mod errors;
pub mod events;
pub mod interest;
pub mod ledger;
pub mod market;
pub mod operations;
pub mod ports;
pub mod state;
pub mod types;

// re-export key types
pub use address_book::AddressBook;
pub use config::MarketConfig;
pub use decimal::{Money, Rate};
pub use errors::{CollaboratorError, LedgerError, Result};
pub use events::{Event, EventStore, SubLoanSnapshot};
pub use interest::AccrualEngine;
pub use ledger::{LoanPreview, SubLoanLedger, SubLoanPreview};
pub use market::{LendingMarket, PreviewMoment, SubLoanRequest};
pub use operations::{
    Operation, OperationRequest, OperationView, VoidRequest,
};
pub use ports::{
    CollaboratorKind, CreditLine, LiquidityPool, SimpleCreditLine, SimplePool, TokenGateway,
    TokenLedger, TransferIntent,
};
pub use state::{LendingProgram, SubLoanInception, SubLoanMetadata, SubLoanState};
pub use types::{
    AccountAddress, AccountId, BalanceParts, GracePeriodStatus, OperationId, OperationKind,
    OperationStatus, OperationValue, ProgramId, ProgramStatus, SubLoanId, SubLoanStatus,
};

// re-export external dependencies that users will need
pub use chrono;
pub use hourglass_rs::{SafeTimeProvider, TimeSource};
pub use rust_decimal::Decimal;
pub use uuid::Uuid;
