mod common;

use chrono::Duration;
use proptest::prelude::*;
use rust_decimal_macros::dec;

use common::*;
use lending_ledger_rs::{
    LendingMarket, Money, OperationKind, OperationRequest, OperationValue, PreviewMoment,
    ProgramId, Rate, SafeTimeProvider, SubLoanId, TokenLedger,
};

fn funded_loan(
    extra_borrower_funds: i64,
) -> (LendingMarket<TokenLedger>, ProgramId, SubLoanId, SafeTimeProvider) {
    let (mut market, program_id) = market_with_pool(100_000);
    let time = test_time();
    let mut req = request(1_000, 0, 30);
    req.late_fee_rate = Rate::from_decimal(dec!(0.05));
    let id = market
        .take_loan(&borrower_address(), program_id, None, &[req], &time)
        .unwrap();
    market
        .tokens_mut()
        .mint(&borrower_address(), Money::from_major(extra_borrower_funds));
    (market, program_id, id, time)
}

/// (day offset, repayment-vs-discount, amount)
fn arb_ops() -> impl Strategy<Value = Vec<(i64, bool, i64)>> {
    prop::collection::vec((1i64..60, any::<bool>(), 1i64..400), 1..10)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    // =======================================================================
    // INVARIANT 1: tracked components never go negative, repayment totals
    // reconcile exactly with the values the ledger accepted, and the token
    // book agrees with the accounting book.
    // =======================================================================
    #[test]
    fn tracked_amounts_stay_consistent(ops in arb_ops()) {
        let (mut market, _, id, time) = funded_loan(10_000);
        time.test_control().unwrap().advance(Duration::days(61));

        let mut accepted_repayments = Money::ZERO;
        let mut accepted_discounts = Money::ZERO;
        for (day, is_repayment, amount) in ops {
            let kind = if is_repayment {
                OperationKind::Repayment
            } else {
                OperationKind::Discount
            };
            let value = Money::from_major(amount);
            let result = market.submit_operations(
                &[OperationRequest {
                    sub_loan_id: id,
                    kind,
                    timestamp: Some(loan_start() + Duration::days(day)),
                    value: OperationValue::Amount(value),
                    account: borrower_address(),
                }],
                &time,
            );
            if result.is_ok() {
                if is_repayment {
                    accepted_repayments += value;
                } else {
                    accepted_discounts += value;
                }
            }
        }

        let state = market.get_sub_loan_state(id).unwrap();
        prop_assert!(!state.tracked.principal.is_negative());
        prop_assert!(!state.tracked.remuneratory.is_negative());
        prop_assert!(!state.tracked.moratory.is_negative());
        prop_assert!(!state.tracked.late_fee.is_negative());

        // every accepted repayment value is accounted for, exactly
        prop_assert_eq!(state.repaid.total(), accepted_repayments);
        // discounts can only grow through write-offs, never shrink
        prop_assert!(state.discounted.total() >= accepted_discounts);

        // the token book agrees: the borrower paid exactly what the
        // accounting book recorded as repaid
        prop_assert_eq!(
            market.tokens().balance(&borrower_address()),
            Money::from_major(11_000) - accepted_repayments
        );
    }

    // =======================================================================
    // INVARIANT 2: previewing twice at the same moment yields the same
    // amounts, and previewing at the tracked timestamp changes nothing.
    // =======================================================================
    #[test]
    fn preview_is_idempotent(day in 0i64..90) {
        let (market, _, id, _time) = funded_loan(0);
        let as_of = loan_start() + Duration::days(day);

        let first = market.get_sub_loan_preview(id, PreviewMoment::AsOf(as_of)).unwrap();
        let second = market.get_sub_loan_preview(id, PreviewMoment::AsOf(as_of)).unwrap();
        prop_assert_eq!(first.tracked, second.tracked);
        prop_assert_eq!(first.outstanding_balance, second.outstanding_balance);

        let tracked = market.get_sub_loan_preview(id, PreviewMoment::Tracked).unwrap();
        let state = market.get_sub_loan_state(id).unwrap();
        prop_assert_eq!(tracked.tracked, state.tracked);
    }

    // =======================================================================
    // INVARIANT 3: submission order within a batch never changes the final
    // accounting; only (timestamp, id) order does.
    // =======================================================================
    #[test]
    fn batch_order_never_changes_the_outcome(
        ops in prop::collection::vec((1i64..30, 1i64..100), 1..6)
    ) {
        let build = |items: &[(i64, i64)]| {
            let (mut market, _, id, time) = funded_loan(1_000);
            time.test_control().unwrap().advance(Duration::days(31));
            let requests: Vec<_> = items
                .iter()
                .map(|&(day, amount)| OperationRequest {
                    sub_loan_id: id,
                    kind: OperationKind::Repayment,
                    timestamp: Some(loan_start() + Duration::days(day)),
                    value: OperationValue::Amount(Money::from_major(amount)),
                    account: borrower_address(),
                })
                .collect();
            market.submit_operations(&requests, &time).unwrap();
            let state = market.get_sub_loan_state(id).unwrap().clone();
            state
        };

        let as_given = build(&ops);
        let mut sorted = ops.clone();
        sorted.sort_by_key(|&(day, _)| day);
        let pre_sorted = build(&sorted);

        prop_assert_eq!(as_given.tracked, pre_sorted.tracked);
        prop_assert_eq!(as_given.repaid, pre_sorted.repaid);
        prop_assert_eq!(as_given.discounted, pre_sorted.discounted);
    }

    // =======================================================================
    // INVARIANT 4: the outstanding balance is the sum of the four tracked
    // components, each floored to the accuracy factor before aggregation —
    // including once moratory interest and the late fee kick in.
    // =======================================================================
    #[test]
    fn outstanding_balance_floors_per_component(day in 0i64..200) {
        let (market, _, id, _time) = funded_loan(0);
        let accuracy = market.config().accuracy;

        let preview = market
            .get_sub_loan_preview(id, PreviewMoment::AsOf(loan_start() + Duration::days(day)))
            .unwrap();

        let expected = preview.tracked.principal.floor_to(accuracy)
            + preview.tracked.remuneratory.floor_to(accuracy)
            + preview.tracked.moratory.floor_to(accuracy)
            + preview.tracked.late_fee.floor_to(accuracy);
        prop_assert_eq!(preview.outstanding_balance, expected);

        // far past the due day, all four components carry value
        if day > 40 {
            prop_assert!(preview.tracked.moratory.is_positive());
            prop_assert!(preview.tracked.late_fee.is_positive());
        }
    }
}
