use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::interest::AccrualEngine;
use crate::state::{SubLoanInception, SubLoanState};
use crate::types::{
    AccountAddress, AccountId, OperationId, OperationKind, OperationStatus, OperationValue,
    SubLoanId,
};

/// a timestamped ledger event recorded against one sub-loan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,
    pub sub_loan_id: SubLoanId,
    pub kind: OperationKind,
    pub timestamp: DateTime<Utc>,
    pub value: OperationValue,
    pub account: AccountId,
    pub status: OperationStatus,
    /// state observed just before this operation applied, kept for reversal
    pub pre_state: Option<Box<SubLoanState>>,
}

impl Operation {
    /// ordering key among all operations of one sub-loan
    pub fn order_key(&self) -> (DateTime<Utc>, OperationId) {
        (self.timestamp, self.id)
    }
}

/// one item of a submission batch
#[derive(Debug, Clone)]
pub struct OperationRequest {
    pub sub_loan_id: SubLoanId,
    pub kind: OperationKind,
    /// `None` defaults to the current transaction time
    pub timestamp: Option<DateTime<Utc>>,
    pub value: OperationValue,
    /// account the operation is attributed to (the payer, for repayments)
    pub account: AccountAddress,
}

/// one item of a voiding batch
#[derive(Debug, Clone)]
pub struct VoidRequest {
    pub sub_loan_id: SubLoanId,
    pub operation_id: OperationId,
    /// account refunded (or charged) when reversing an applied operation
    pub counterparty: AccountAddress,
}

/// read-model view of an operation with its derived timeline neighbors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationView {
    pub id: OperationId,
    pub sub_loan_id: SubLoanId,
    pub kind: OperationKind,
    pub timestamp: DateTime<Utc>,
    pub value: OperationValue,
    pub account: Option<AccountAddress>,
    pub status: OperationStatus,
    /// previous operation in (timestamp, id) order, if any
    pub earlier_operation_id: Option<OperationId>,
    /// next operation in (timestamp, id) order, if any
    pub later_operation_id: Option<OperationId>,
}

/// a token movement owed to the outside world by an applied operation
#[derive(Debug, Clone, PartialEq)]
pub struct TokenMovement {
    pub from: TokenParty,
    pub to: TokenParty,
    pub amount: Money,
}

/// party of a token movement, resolved to a concrete account by the market
#[derive(Debug, Clone, PartialEq)]
pub enum TokenParty {
    Account(AccountId),
    Address(AccountAddress),
    LiquidityPool,
    AddonTreasury,
}

/// operation timestamps must fit the 32-bit unix-seconds ceiling
pub fn max_operation_timestamp() -> DateTime<Utc> {
    Utc.timestamp_opt(u32::MAX as i64, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// which running total a settled value lands in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SettleBucket {
    Repaid,
    Discounted,
}

/// apply one operation's effect to a sub-loan state
///
/// accrues interest to the operation's own timestamp first, then performs
/// the kind-specific mutation. returns the token movement the caller must
/// execute, if any. the caller is responsible for status bookkeeping.
pub(crate) fn apply_effect(
    engine: &AccrualEngine,
    accuracy: Money,
    inception: &SubLoanInception,
    state: &mut SubLoanState,
    kind: OperationKind,
    timestamp: DateTime<Utc>,
    value: OperationValue,
    account: AccountId,
) -> Result<Option<TokenMovement>> {
    engine.accrue(inception, state, timestamp);

    match kind {
        OperationKind::Repayment => {
            let amount = expect_amount(kind, value)?;
            settle_value(state, amount, accuracy, SettleBucket::Repaid)?;
            Ok(Some(TokenMovement {
                from: TokenParty::Account(account),
                to: TokenParty::LiquidityPool,
                amount,
            }))
        }
        OperationKind::Discount => {
            let amount = expect_amount(kind, value)?;
            settle_value(state, amount, accuracy, SettleBucket::Discounted)?;
            Ok(None)
        }
        OperationKind::RemuneratoryRateSetting => {
            state.remuneratory_rate = expect_rate(kind, value)?;
            Ok(None)
        }
        OperationKind::MoratoryRateSetting => {
            state.moratory_rate = expect_rate(kind, value)?;
            Ok(None)
        }
        OperationKind::LateFeeRateSetting => {
            state.late_fee_rate = expect_rate(kind, value)?;
            Ok(None)
        }
        OperationKind::GraceDiscountRateSetting => {
            state.grace_discount_rate = expect_rate(kind, value)?;
            Ok(None)
        }
        OperationKind::DurationSetting => {
            state.duration = expect_days(kind, value)?;
            Ok(None)
        }
        OperationKind::Freezing => {
            if state.is_frozen() {
                return Err(LedgerError::FreezeStateInvalid {
                    sub_loan_id: inception.sub_loan_id,
                    frozen: true,
                });
            }
            state.freeze_timestamp = Some(timestamp);
            Ok(None)
        }
        OperationKind::Unfreezing => {
            let frozen_at =
                state
                    .freeze_timestamp
                    .ok_or(LedgerError::FreezeStateInvalid {
                        sub_loan_id: inception.sub_loan_id,
                        frozen: false,
                    })?;
            // the frozen whole-day span shifts the due day out; no interest
            // accrued across the window (accrual was capped at the freeze)
            let span = engine.day_index(timestamp) - engine.day_index(frozen_at);
            state.duration += span.max(0) as u32;
            state.freeze_timestamp = None;
            Ok(None)
        }
        OperationKind::Revocation => Err(LedgerError::OperationKindNotSubmittable { kind }),
    }
}

/// distribute a repayment or discount value across the tracked components
///
/// waterfall order: late fee, moratory interest, remuneratory interest,
/// principal. each component is floored to the accuracy factor before
/// consumption; consuming a whole component zeroes it and writes the
/// sub-accuracy residue off into the discount bucket. a remainder beyond
/// the (floored) principal is rejected.
pub(crate) fn settle_value(
    state: &mut SubLoanState,
    value: Money,
    accuracy: Money,
    bucket: SettleBucket,
) -> Result<()> {
    let mut remaining = value;

    for component in [
        Component::LateFee,
        Component::Moratory,
        Component::Remuneratory,
    ] {
        let tracked = component.of(&state.tracked);
        let rounded = tracked.floor_to(accuracy);

        if remaining >= rounded {
            // full consumption: the component clears, the residue is
            // written off as a discount
            *component.of_mut(bucket_parts(state, bucket)) += rounded;
            *component.of_mut(&mut state.discounted) += tracked - rounded;
            *component.of_mut(&mut state.tracked) = Money::ZERO;
            remaining -= rounded;
        } else {
            *component.of_mut(&mut state.tracked) -= remaining;
            *component.of_mut(bucket_parts(state, bucket)) += remaining;
            remaining = Money::ZERO;
            break;
        }
    }

    if !remaining.is_zero() {
        let tracked = state.tracked.principal;
        let rounded = tracked.floor_to(accuracy);

        if remaining > rounded {
            return Err(LedgerError::InsufficientOutstandingDebt {
                outstanding: rounded,
                requested: remaining,
            });
        }
        if remaining == rounded {
            bucket_parts(state, bucket).principal += rounded;
            state.discounted.principal += tracked - rounded;
            state.tracked.principal = Money::ZERO;
        } else {
            state.tracked.principal -= remaining;
            bucket_parts(state, bucket).principal += remaining;
        }
    }

    state.settle_status();
    Ok(())
}

fn bucket_parts(state: &mut SubLoanState, bucket: SettleBucket) -> &mut crate::types::BalanceParts {
    match bucket {
        SettleBucket::Repaid => &mut state.repaid,
        SettleBucket::Discounted => &mut state.discounted,
    }
}

#[derive(Debug, Clone, Copy)]
enum Component {
    Remuneratory,
    Moratory,
    LateFee,
}

impl Component {
    fn of(self, parts: &crate::types::BalanceParts) -> Money {
        match self {
            Component::Remuneratory => parts.remuneratory,
            Component::Moratory => parts.moratory,
            Component::LateFee => parts.late_fee,
        }
    }

    fn of_mut(self, parts: &mut crate::types::BalanceParts) -> &mut Money {
        match self {
            Component::Remuneratory => &mut parts.remuneratory,
            Component::Moratory => &mut parts.moratory,
            Component::LateFee => &mut parts.late_fee,
        }
    }
}

fn expect_amount(kind: OperationKind, value: OperationValue) -> Result<Money> {
    match value {
        OperationValue::Amount(amount) => Ok(amount),
        _ => Err(LedgerError::InvalidOperationValue { kind }),
    }
}

fn expect_rate(kind: OperationKind, value: OperationValue) -> Result<crate::decimal::Rate> {
    match value {
        OperationValue::Rate(rate) => Ok(rate),
        _ => Err(LedgerError::InvalidOperationValue { kind }),
    }
}

fn expect_days(kind: OperationKind, value: OperationValue) -> Result<u32> {
    match value {
        OperationValue::Days(days) => Ok(days),
        _ => Err(LedgerError::InvalidOperationValue { kind }),
    }
}
