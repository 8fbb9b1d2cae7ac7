//! Property-based tests for money conservation.
//!
//! For any stake, commission rate and final outcome, the wallets of both parties plus the
//! house wallet hold exactly what was deposited, and the stored balances match a replay of
//! the transaction log.

mod common;

use common::{HOUSE, assert_reconciles, deposit, env_with, roomy_ledger};
use proptest::prelude::*;
use rust_decimal::Decimal;
use std::sync::Arc;
use wager_ledger::betting::{
    BetOutcome, BetType, CreateBetRequest, PayoutTerms, ResolveBetRequest,
};
use wager_ledger::config::BettingConfig;
use wager_ledger::db::MemoryRepository;
use wager_ledger::money::{CommissionRate, Money};

#[derive(Debug, Clone, Copy)]
enum Ending {
    Resolve(BetOutcome),
    Cancel,
    DisputeRefund,
    DisputeResolve(BetOutcome),
}

fn outcome() -> impl Strategy<Value = BetOutcome> {
    prop_oneof![
        Just(BetOutcome::WinnerA),
        Just(BetOutcome::WinnerB),
        Just(BetOutcome::Tie),
        Just(BetOutcome::Cancelled),
    ]
}

fn ending() -> impl Strategy<Value = Ending> {
    prop_oneof![
        outcome().prop_map(Ending::Resolve),
        Just(Ending::Cancel),
        Just(Ending::DisputeRefund),
        outcome().prop_map(Ending::DisputeResolve),
    ]
}

fn total(repo: &MemoryRepository) -> Money {
    repo.all_wallets()
        .iter()
        .map(|w| w.available_balance + w.locked_balance)
        .sum()
}

async fn run_bet(stake_cents: i64, rate_bp: i64, ending: Ending) -> (Money, Money, Money) {
    let repo = Arc::new(MemoryRepository::new());
    let betting = BettingConfig {
        commission_rate: CommissionRate::new(Decimal::new(rate_bp, 4)).unwrap(),
        ..BettingConfig::default()
    };
    let env = env_with(repo.clone(), roomy_ledger(), betting);
    deposit(&env.wallets, 1, 200).await;
    deposit(&env.wallets, 2, 200).await;
    let before = total(&repo);

    let stake = Money::from_cents(stake_cents);
    let request = CreateBetRequest::new(1, "Race to five", BetType::Prediction, stake);
    let bet = env.engine.create_bet(request).await.unwrap();
    env.engine.accept_bet(bet.id, 2).await.unwrap();

    match ending {
        Ending::Resolve(outcome) => {
            env.engine
                .resolve_bet(ResolveBetRequest::manual(bet.id, outcome, 1))
                .await
                .unwrap();
        }
        Ending::Cancel => {
            env.engine.cancel_bet(bet.id, 1, None).await.unwrap();
        }
        Ending::DisputeRefund => {
            env.engine.dispute_bet(bet.id, 2, None).await.unwrap();
            env.engine.refund_bet(bet.id, 1, None).await.unwrap();
        }
        Ending::DisputeResolve(outcome) => {
            env.engine.dispute_bet(bet.id, 1, None).await.unwrap();
            env.engine
                .resolve_bet(ResolveBetRequest::manual(bet.id, outcome, 1))
                .await
                .unwrap();
        }
    }

    assert_reconciles(&repo);
    for wallet in repo.all_wallets() {
        assert_eq!(wallet.locked_balance, Money::ZERO);
    }
    let house = env.wallets.get_balance(HOUSE).await.unwrap().available;
    (before, total(&repo), house)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_money_is_conserved(
        stake_cents in 100i64..=20_000,
        rate_bp in 0i64..2_000,
        ending in ending(),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let (before, after, house) = runtime.block_on(run_bet(stake_cents, rate_bp, ending));
        prop_assert_eq!(before, after);

        let rate = CommissionRate::new(Decimal::new(rate_bp, 4)).unwrap();
        let commission = PayoutTerms::compute(Money::from_cents(stake_cents), rate).commission_amount;
        let decisive = matches!(
            ending,
            Ending::Resolve(BetOutcome::WinnerA | BetOutcome::WinnerB)
                | Ending::DisputeResolve(BetOutcome::WinnerA | BetOutcome::WinnerB)
        );
        prop_assert_eq!(house, if decisive { commission } else { Money::ZERO });
    }

    #[test]
    fn prop_pot_is_stake_plus_commission(cents in 1i64..=1_000_000, rate_bp in 0i64..10_000) {
        let rate = CommissionRate::new(Decimal::new(rate_bp, 4)).unwrap();
        let amount = Money::from_cents(cents);
        let terms = PayoutTerms::compute(amount, rate);
        prop_assert_eq!(terms.total_pot, amount + terms.commission_amount);
        prop_assert_eq!(terms.winner_payout + terms.commission_amount, amount + amount);
        prop_assert!(terms.commission_amount <= amount);
        prop_assert!(!terms.commission_amount.is_negative());
    }

    #[test]
    fn prop_commission_matches_half_up_rounding(cents in 1i64..=1_000_000, rate_bp in 0i64..10_000) {
        let rate = CommissionRate::new(Decimal::new(rate_bp, 4)).unwrap();
        let commission = Money::from_cents(cents).apply_rate(rate);
        // cents * bp / 10_000, rounded half up in integer arithmetic
        let scaled = cents * rate_bp;
        let expected = (scaled + 5_000) / 10_000;
        prop_assert_eq!(commission, Money::from_cents(expected));
    }
}
