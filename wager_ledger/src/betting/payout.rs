//! Commission, pot and settlement arithmetic.
//!
//! Decisive outcome on a bet of `amount` per side with commission `c`:
//!
//! | wallet | movement                                  | net            |
//! |--------|-------------------------------------------|----------------|
//! | winner | unlock `amount`, credit `amount - c`      | `+amount - c`  |
//! | loser  | debit `amount` from locked                | `-amount`      |
//! | house  | credit `c`                                | `+c`           |
//!
//! Tie, cancellation and refund unlock both stakes and collect nothing.

use super::errors::{BetError, BetResult};
use super::models::{Bet, BetOutcome, ParticipantRole};
use crate::money::{CommissionRate, Money};
use std::collections::BTreeMap;

/// Amounts fixed when a bet is created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayoutTerms {
    pub commission_amount: Money,
    pub total_pot: Money,
    /// Both stakes minus commission
    pub winner_payout: Money,
}

impl PayoutTerms {
    pub fn compute(amount: Money, rate: CommissionRate) -> Self {
        let commission_amount = amount.apply_rate(rate);
        Self {
            commission_amount,
            total_pot: amount + commission_amount,
            winner_payout: amount + amount - commission_amount,
        }
    }
}

/// One ledger call made on behalf of a bet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerStep {
    Lock { user_id: i64, amount: Money },
    Unlock { user_id: i64, amount: Money },
    DebitLoss { user_id: i64, amount: Money },
    CreditWin { user_id: i64, amount: Money },
    Commission { amount: Money },
}

/// Ledger calls and final `actual_winnings` for one settlement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementPlan {
    pub steps: Vec<LedgerStep>,
    pub winnings: BTreeMap<i64, Money>,
    pub commission: Money,
}

impl SettlementPlan {
    /// Net change of every wallet touched, the house included under `house_user_id`.
    pub fn net_effect(&self, house_user_id: i64) -> BTreeMap<i64, Money> {
        let mut net: BTreeMap<i64, Money> = BTreeMap::new();
        for step in &self.steps {
            match *step {
                // Between available and locked inside one wallet
                LedgerStep::Lock { user_id, .. } | LedgerStep::Unlock { user_id, .. } => {
                    net.entry(user_id).or_default();
                }
                LedgerStep::DebitLoss { user_id, amount } => {
                    *net.entry(user_id).or_default() -= amount;
                }
                LedgerStep::CreditWin { user_id, amount } => {
                    *net.entry(user_id).or_default() += amount;
                }
                LedgerStep::Commission { amount } => {
                    *net.entry(house_user_id).or_default() += amount;
                }
            }
        }
        net
    }
}

/// Plan the fund movements for settling `bet` with `outcome`.
///
/// Both the creator and an active acceptor must be present.
pub fn settlement_plan(bet: &Bet, outcome: BetOutcome) -> BetResult<SettlementPlan> {
    let creator = bet
        .participant_with_role(ParticipantRole::Creator)
        .ok_or_else(|| BetError::BusinessLogic(format!("Bet {} has no creator", bet.id)))?;
    let acceptor = bet
        .participant_with_role(ParticipantRole::Acceptor)
        .filter(|p| p.is_active)
        .ok_or_else(|| BetError::BusinessLogic(format!("Bet {} has no acceptor", bet.id)))?;

    let (winner, loser) = match outcome {
        BetOutcome::WinnerA => (creator.user_id, acceptor.user_id),
        BetOutcome::WinnerB => (acceptor.user_id, creator.user_id),
        BetOutcome::Tie | BetOutcome::Cancelled => {
            let steps = vec![
                LedgerStep::Unlock {
                    user_id: creator.user_id,
                    amount: creator.stake_amount,
                },
                LedgerStep::Unlock {
                    user_id: acceptor.user_id,
                    amount: acceptor.stake_amount,
                },
            ];
            let winnings = BTreeMap::from([
                (creator.user_id, creator.stake_amount),
                (acceptor.user_id, acceptor.stake_amount),
            ]);
            return Ok(SettlementPlan {
                steps,
                winnings,
                commission: Money::ZERO,
            });
        }
        BetOutcome::Pending | BetOutcome::Disputed => {
            return Err(BetError::Validation(format!(
                "Outcome {outcome} does not settle a bet"
            )));
        }
    };

    let commission = bet.commission_amount;
    let winner_credit = bet.amount - commission;
    let mut steps = vec![
        LedgerStep::Unlock {
            user_id: winner,
            amount: bet.amount,
        },
        LedgerStep::DebitLoss {
            user_id: loser,
            amount: bet.amount,
        },
    ];
    if winner_credit.is_positive() {
        steps.push(LedgerStep::CreditWin {
            user_id: winner,
            amount: winner_credit,
        });
    }
    if commission.is_positive() {
        steps.push(LedgerStep::Commission { amount: commission });
    }

    Ok(SettlementPlan {
        steps,
        winnings: BTreeMap::from([(winner, bet.winner_payout), (loser, Money::ZERO)]),
        commission,
    })
}
