#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal_macros::dec;

use lending_ledger_rs::{
    AccountAddress, LendingMarket, MarketConfig, Money, ProgramId, Rate, SafeTimeProvider,
    SimpleCreditLine, SimplePool, SubLoanRequest, TimeSource, TokenLedger,
};

pub const POOL: &str = "pool";
pub const TREASURY: &str = "treasury";
pub const BORROWER: &str = "borrower";

pub fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn loan_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// controllable clock starting at the canonical loan start
pub fn test_time() -> SafeTimeProvider {
    SafeTimeProvider::new(TimeSource::Test(loan_start()))
}

pub fn pool_address() -> AccountAddress {
    AccountAddress::new(POOL)
}

pub fn treasury_address() -> AccountAddress {
    AccountAddress::new(TREASURY)
}

pub fn borrower_address() -> AccountAddress {
    AccountAddress::new(BORROWER)
}

/// market with one open program and a funded pool account
pub fn market_with_pool(liquidity: i64) -> (LendingMarket<TokenLedger>, ProgramId) {
    init_logs();
    let mut tokens = TokenLedger::new();
    tokens.mint(&pool_address(), Money::from_major(liquidity));

    let config = MarketConfig::standard(treasury_address());
    let mut market = LendingMarket::new(config, tokens);
    let program_id = market
        .open_program(
            Box::new(SimpleCreditLine::unlimited()),
            Box::new(SimplePool::new(pool_address(), Money::from_major(liquidity))),
        )
        .expect("collaborators conform");
    (market, program_id)
}

/// sub-loan request with the canonical daily rates
pub fn request(borrowed: i64, addon: i64, duration: u32) -> SubLoanRequest {
    SubLoanRequest {
        borrowed_amount: Money::from_major(borrowed),
        addon_amount: Money::from_major(addon),
        duration,
        remuneratory_rate: Rate::from_decimal(dec!(0.001)),
        moratory_rate: Rate::from_decimal(dec!(0.002)),
        late_fee_rate: Rate::ZERO,
        grace_discount_rate: Rate::ZERO,
    }
}
