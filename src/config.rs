use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::types::AccountAddress;

/// market-wide configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    /// rounding granularity used when distributing repayments and discounts
    /// across balance components and when reporting outstanding balances
    pub accuracy: Money,
    /// shift of the accrual day boundary off UTC midnight, in seconds
    pub day_boundary_offset_secs: i64,
    /// maximum number of sub-loans a single loan may carry
    pub max_sub_loans_per_loan: usize,
    /// upper bound on a single sub-loan's borrowed amount
    pub borrowed_amount_limit: Money,
    /// account receiving addon amounts at loan taking and returning them at
    /// revocation
    pub addon_treasury: AccountAddress,
}

impl MarketConfig {
    /// standard configuration: cent accuracy, UTC day boundary, ten
    /// sub-loans per loan
    pub fn standard(addon_treasury: AccountAddress) -> Self {
        Self {
            accuracy: Money::from_decimal(dec!(0.01)),
            day_boundary_offset_secs: 0,
            max_sub_loans_per_loan: 10,
            borrowed_amount_limit: Money::from_major(1_000_000_000),
            addon_treasury,
        }
    }

    /// shift the day boundary, e.g. to a local-midnight offset
    pub fn with_day_boundary_offset(mut self, secs: i64) -> Self {
        self.day_boundary_offset_secs = secs;
        self
    }

    /// replace the accuracy factor
    pub fn with_accuracy(mut self, accuracy: Money) -> Self {
        self.accuracy = accuracy;
        self
    }
}
