//! Integration tests for the bet lifecycle engine against the in-memory store.
//!
//! Covers the full create/accept/resolve path, commission rounding, cancellation refunds,
//! disputes, expiry and the read-side queries.

mod common;

use chrono::Duration;
use common::{HOUSE, accepted_bet, assert_reconciles, balance, deposit, friend_bet, memory_env};
use wager_ledger::audit::AuditAction;
use wager_ledger::betting::{
    BetError, BetOutcome, BetQuery, BetStatus, ResolutionData, ResolutionMethod,
    ResolveBetRequest,
};
use wager_ledger::db::WalletRepository;
use wager_ledger::money::Money;
use wager_ledger::wallet::{TransactionStatus, TransactionType};

#[tokio::test]
async fn test_end_to_end_winner_a() {
    let (env, repo) = memory_env();
    deposit(&env.wallets, 1, 1000).await;
    deposit(&env.wallets, 2, 1000).await;

    let bet = env.engine.create_bet(friend_bet(1, 100)).await.unwrap();
    assert_eq!(bet.status, BetStatus::Pending);
    assert_eq!(balance(&env.wallets, 1).await, (Money::from_units(1000), Money::ZERO));

    env.engine.accept_bet(bet.id, 2).await.unwrap();
    for user in [1, 2] {
        assert_eq!(
            balance(&env.wallets, user).await,
            (Money::from_units(900), Money::from_units(100))
        );
    }

    let resolved = env
        .engine
        .resolve_bet(ResolveBetRequest::manual(bet.id, BetOutcome::WinnerA, 1))
        .await
        .unwrap();
    assert_eq!(resolved.status, BetStatus::Resolved);
    assert_eq!(resolved.outcome, BetOutcome::WinnerA);
    assert!(resolved.resolved_at.is_some());

    assert_eq!(balance(&env.wallets, 1).await, (Money::from_units(1095), Money::ZERO));
    assert_eq!(balance(&env.wallets, 2).await, (Money::from_units(900), Money::ZERO));
    assert_eq!(balance(&env.wallets, HOUSE).await, (Money::from_units(5), Money::ZERO));

    let creator = resolved.participant(1).unwrap();
    let acceptor = resolved.participant(2).unwrap();
    assert_eq!(creator.actual_winnings, Some(Money::from_units(195)));
    assert_eq!(acceptor.actual_winnings, Some(Money::ZERO));

    let winner_wallet = env.wallets.get_or_create_wallet(1).await.unwrap();
    assert_eq!(winner_wallet.total_wagered, Money::from_units(100));
    assert_eq!(winner_wallet.total_won, Money::from_units(95));

    assert_reconciles(&repo);
}

#[tokio::test]
async fn test_commission_rounding_has_no_drift() {
    let (env, repo) = memory_env();
    deposit(&env.wallets, 1, 100).await;
    deposit(&env.wallets, 2, 100).await;

    let bet = accepted_bet(&env, 1, 2, Money::from_cents(3333)).await;
    assert_eq!(bet.commission_amount, Money::from_cents(167));
    assert_eq!(bet.total_pot, bet.amount + bet.commission_amount);
    assert_eq!(bet.total_pot, Money::from_cents(3500));
    assert_eq!(bet.winner_payout, Money::from_cents(6499));

    env.engine
        .resolve_bet(ResolveBetRequest::manual(bet.id, BetOutcome::WinnerB, 2))
        .await
        .unwrap();

    // 100.00 - 33.33 + 33.33 + 31.66
    assert_eq!(balance(&env.wallets, 2).await, (Money::from_cents(13166), Money::ZERO));
    assert_eq!(balance(&env.wallets, 1).await, (Money::from_cents(6667), Money::ZERO));
    assert_eq!(balance(&env.wallets, HOUSE).await.0, Money::from_cents(167));

    let total: Money = [1, 2, HOUSE]
        .iter()
        .map(|u| {
            repo.all_wallets()
                .into_iter()
                .find(|w| w.user_id == *u)
                .map(|w| w.available_balance + w.locked_balance)
                .unwrap_or_default()
        })
        .sum();
    assert_eq!(total, Money::from_units(200));
}

#[tokio::test]
async fn test_cancel_accepted_bet_refunds_both() {
    let (env, repo) = memory_env();
    deposit(&env.wallets, 1, 500).await;
    deposit(&env.wallets, 2, 300).await;

    let bet = accepted_bet(&env, 1, 2, Money::from_units(100)).await;
    let cancelled = env
        .engine
        .cancel_bet(bet.id, 1, Some("rained out".to_string()))
        .await
        .unwrap();

    assert_eq!(cancelled.status, BetStatus::Cancelled);
    assert_eq!(cancelled.outcome, BetOutcome::Cancelled);
    assert_eq!(balance(&env.wallets, 1).await, (Money::from_units(500), Money::ZERO));
    assert_eq!(balance(&env.wallets, 2).await, (Money::from_units(300), Money::ZERO));
    for participant in &cancelled.participants {
        assert_eq!(participant.actual_winnings, Some(Money::from_units(100)));
    }

    let trail = env.engine.get_audit_trail(bet.id).await.unwrap();
    let last = trail.last().unwrap();
    assert_eq!(last.action, AuditAction::BetCancelled);
    assert_eq!(last.reason.as_deref(), Some("rained out"));
    assert_reconciles(&repo);
}

#[tokio::test]
async fn test_cancel_after_activation_is_rejected() {
    let (env, _repo) = memory_env();
    deposit(&env.wallets, 1, 100).await;
    deposit(&env.wallets, 2, 100).await;

    let bet = accepted_bet(&env, 1, 2, Money::from_units(10)).await;
    env.engine.activate_bet(bet.id, 2).await.unwrap();
    let err = env.engine.cancel_bet(bet.id, 1, None).await.unwrap_err();
    assert!(err.to_string().contains("current status: active"), "{err}");
    assert_eq!(
        balance(&env.wallets, 1).await,
        (Money::from_units(90), Money::from_units(10))
    );
}

#[tokio::test]
async fn test_second_resolution_is_rejected() {
    let (env, repo) = memory_env();
    deposit(&env.wallets, 1, 200).await;
    deposit(&env.wallets, 2, 200).await;

    let bet = accepted_bet(&env, 1, 2, Money::from_units(50)).await;
    env.engine
        .resolve_bet(ResolveBetRequest::manual(bet.id, BetOutcome::WinnerA, 9))
        .await
        .unwrap();
    let before = (
        balance(&env.wallets, 1).await,
        balance(&env.wallets, 2).await,
        repo.all_transactions().len(),
    );

    let err = env
        .engine
        .resolve_bet(ResolveBetRequest::manual(bet.id, BetOutcome::WinnerB, 9))
        .await
        .unwrap_err();
    assert!(matches!(err, BetError::AlreadyResolved(_)));
    assert_eq!(err.to_string(), "Bet has already been resolved");

    let after = (
        balance(&env.wallets, 1).await,
        balance(&env.wallets, 2).await,
        repo.all_transactions().len(),
    );
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_tie_returns_stakes_without_commission() {
    let (env, repo) = memory_env();
    deposit(&env.wallets, 1, 100).await;
    deposit(&env.wallets, 2, 100).await;

    let bet = accepted_bet(&env, 1, 2, Money::from_units(40)).await;
    env.engine
        .resolve_bet(ResolveBetRequest::manual(bet.id, BetOutcome::Tie, 1))
        .await
        .unwrap();

    assert_eq!(balance(&env.wallets, 1).await, (Money::from_units(100), Money::ZERO));
    assert_eq!(balance(&env.wallets, 2).await, (Money::from_units(100), Money::ZERO));
    assert!(
        !repo
            .all_transactions()
            .iter()
            .any(|tx| tx.transaction_type == TransactionType::Fee)
    );
}

#[tokio::test]
async fn test_resolution_record_and_fund_history() {
    let (env, repo) = memory_env();
    deposit(&env.wallets, 1, 100).await;
    deposit(&env.wallets, 2, 100).await;

    let bet = accepted_bet(&env, 1, 2, Money::from_units(20)).await;
    env.engine.activate_bet(bet.id, 1).await.unwrap();
    env.engine.complete_bet(bet.id, 1).await.unwrap();
    let data = ResolutionData::new()
        .with("score", "7-5")
        .with("video_url", "https://example.com/replay/42");
    env.engine
        .resolve_bet(
            ResolveBetRequest::manual(bet.id, BetOutcome::WinnerB, 77)
                .with_method(ResolutionMethod::Judge)
                .with_data(data.clone()),
        )
        .await
        .unwrap();

    let resolution = env.engine.get_resolution(bet.id).await.unwrap().unwrap();
    assert_eq!(resolution.method, ResolutionMethod::Judge);
    assert_eq!(resolution.resolved_by, 77);
    assert_eq!(resolution.outcome, BetOutcome::WinnerB);
    assert_eq!(resolution.data, data);

    let actions: Vec<AuditAction> = env
        .engine
        .get_audit_trail(bet.id)
        .await
        .unwrap()
        .into_iter()
        .map(|entry| entry.action)
        .collect();
    assert_eq!(
        actions,
        vec![
            AuditAction::BetCreated,
            AuditAction::FundsLocked,
            AuditAction::FundsLocked,
            AuditAction::BetAccepted,
            AuditAction::BetActivated,
            AuditAction::BetCompleted,
            AuditAction::FundsUnlocked,
            AuditAction::FundsDebited,
            AuditAction::FundsCredited,
            AuditAction::CommissionCollected,
            AuditAction::BetResolved,
        ]
    );

    let bet_transactions = repo.transactions_for_bet(bet.id).await.unwrap();
    assert_eq!(bet_transactions.len(), 6);
    assert!(
        bet_transactions
            .iter()
            .all(|tx| tx.status == TransactionStatus::Completed)
    );
}

#[tokio::test]
async fn test_dispute_then_refund() {
    let (env, repo) = memory_env();
    deposit(&env.wallets, 1, 100).await;
    deposit(&env.wallets, 2, 100).await;

    let bet = accepted_bet(&env, 1, 2, Money::from_units(25)).await;
    env.engine.activate_bet(bet.id, 1).await.unwrap();
    env.engine
        .dispute_bet(bet.id, 2, Some("foot fault".to_string()))
        .await
        .unwrap();
    assert_eq!(
        balance(&env.wallets, 2).await,
        (Money::from_units(75), Money::from_units(25))
    );

    let refunded = env.engine.refund_bet(bet.id, 99, None).await.unwrap();
    assert_eq!(refunded.status, BetStatus::Refunded);
    assert_eq!(balance(&env.wallets, 1).await, (Money::from_units(100), Money::ZERO));
    assert_eq!(balance(&env.wallets, 2).await, (Money::from_units(100), Money::ZERO));

    // Terminal
    assert!(matches!(
        env.engine
            .resolve_bet(ResolveBetRequest::manual(bet.id, BetOutcome::WinnerA, 99))
            .await,
        Err(BetError::AlreadyResolved(_))
    ));
    assert_reconciles(&repo);
}

#[tokio::test]
async fn test_disputed_bet_can_still_be_resolved() {
    let (env, _repo) = memory_env();
    deposit(&env.wallets, 1, 100).await;
    deposit(&env.wallets, 2, 100).await;

    let bet = accepted_bet(&env, 1, 2, Money::from_units(100)).await;
    env.engine.dispute_bet(bet.id, 1, None).await.unwrap();
    let resolved = env
        .engine
        .resolve_bet(
            ResolveBetRequest::manual(bet.id, BetOutcome::WinnerA, 50)
                .with_method(ResolutionMethod::Consensus),
        )
        .await
        .unwrap();
    assert_eq!(resolved.status, BetStatus::Resolved);
    assert_eq!(balance(&env.wallets, 1).await, (Money::from_units(195), Money::ZERO));
}

#[tokio::test]
async fn test_refund_requires_dispute() {
    let (env, _repo) = memory_env();
    deposit(&env.wallets, 1, 100).await;
    deposit(&env.wallets, 2, 100).await;

    let bet = accepted_bet(&env, 1, 2, Money::from_units(10)).await;
    assert!(matches!(
        env.engine.refund_bet(bet.id, 1, None).await,
        Err(BetError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn test_expired_bet_cannot_be_accepted() {
    let (env, _repo) = memory_env();
    deposit(&env.wallets, 1, 100).await;
    deposit(&env.wallets, 2, 100).await;

    let bet = env
        .engine
        .create_bet(friend_bet(1, 10).expires_in_hours(2))
        .await
        .unwrap();
    env.clock.advance(Duration::hours(3));

    let err = env.engine.accept_bet(bet.id, 2).await.unwrap_err();
    assert!(matches!(err, BetError::Expired(_)), "{err}");
    assert_eq!(balance(&env.wallets, 1).await, (Money::from_units(100), Money::ZERO));
    assert_eq!(balance(&env.wallets, 2).await, (Money::from_units(100), Money::ZERO));

    let bet = env.engine.get_bet(bet.id).await.unwrap();
    assert_eq!(bet.status, BetStatus::Expired);
    let trail = env.engine.get_audit_trail(bet.id).await.unwrap();
    let expired = trail
        .iter()
        .find(|e| e.action == AuditAction::BetExpired)
        .unwrap();
    assert_eq!(expired.user_id, None);

    // Already expired on the second try as well
    assert!(matches!(
        env.engine.accept_bet(bet.id, 2).await,
        Err(BetError::Expired(_))
    ));
}

#[tokio::test]
async fn test_named_acceptor() {
    let (env, _repo) = memory_env();
    for user in [1, 2, 3] {
        deposit(&env.wallets, user, 100).await;
    }

    let bet = env
        .engine
        .create_bet(friend_bet(1, 10).with_acceptor(3))
        .await
        .unwrap();
    assert_eq!(bet.participants.len(), 2);
    assert!(!bet.participants[1].is_active);

    assert!(matches!(
        env.engine.accept_bet(bet.id, 2).await,
        Err(BetError::Security(_))
    ));
    assert_eq!(balance(&env.wallets, 1).await.1, Money::ZERO);

    let accepted = env.engine.accept_bet(bet.id, 3).await.unwrap();
    assert!(accepted.is_party(3));
    assert_eq!(balance(&env.wallets, 3).await.1, Money::from_units(10));
}

#[tokio::test]
async fn test_creator_cannot_accept_own_bet() {
    let (env, _repo) = memory_env();
    deposit(&env.wallets, 1, 100).await;
    let bet = env.engine.create_bet(friend_bet(1, 10)).await.unwrap();
    assert!(matches!(
        env.engine.accept_bet(bet.id, 1).await,
        Err(BetError::BusinessLogic(_))
    ));
}

#[tokio::test]
async fn test_queries_and_statistics() {
    let (env, _repo) = memory_env();
    for user in [1, 2, 3] {
        deposit(&env.wallets, user, 500).await;
    }

    let won = accepted_bet(&env, 1, 2, Money::from_units(100)).await;
    env.engine
        .resolve_bet(ResolveBetRequest::manual(won.id, BetOutcome::WinnerA, 1))
        .await
        .unwrap();
    let live = accepted_bet(&env, 1, 3, Money::from_units(50)).await;
    let open = env.engine.create_bet(friend_bet(1, 20)).await.unwrap();

    let all = env.engine.get_user_bets(1, BetQuery::default()).await.unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all[0].id, open.id);

    let pending = env
        .engine
        .get_user_bets(
            1,
            BetQuery {
                status: Some(BetStatus::Pending),
                ..BetQuery::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);

    let paged = env
        .engine
        .get_user_bets(
            1,
            BetQuery {
                limit: 1,
                offset: 1,
                ..BetQuery::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(paged.len(), 1);
    assert_eq!(paged[0].id, live.id);

    let active = env.engine.get_active_bets(10, 0).await.unwrap();
    assert_eq!(active.iter().map(|b| b.id).collect::<Vec<_>>(), vec![live.id]);

    let creator = env.engine.get_statistics(1).await.unwrap();
    assert_eq!(creator.total_bet_amount, Money::from_units(170));
    assert_eq!(creator.total_winnings, Money::from_units(195));
    assert_eq!(creator.net_profit, Money::from_units(95));
    assert_eq!(creator.status_counts.get(&BetStatus::Resolved), Some(&1));
    assert_eq!(creator.status_counts.get(&BetStatus::Pending), Some(&1));

    let loser = env.engine.get_statistics(2).await.unwrap();
    assert_eq!(loser.total_winnings, Money::ZERO);
    assert_eq!(loser.net_profit, Money::from_units(-100));
}

#[tokio::test]
async fn test_user_bets_apply_lazy_expiry() {
    let (env, _repo) = memory_env();
    deposit(&env.wallets, 1, 100).await;
    env.engine
        .create_bet(friend_bet(1, 10).expires_in_hours(1))
        .await
        .unwrap();
    env.clock.advance(Duration::hours(2));

    let bets = env.engine.get_user_bets(1, BetQuery::default()).await.unwrap();
    assert_eq!(bets[0].status, BetStatus::Expired);
}
