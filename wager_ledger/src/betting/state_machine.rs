//! Bet status transitions.
//!
//! ```text
//! PENDING -> ACCEPTED -> ACTIVE -> COMPLETED -> RESOLVED
//! PENDING | ACCEPTED -> CANCELLED
//! PENDING -> EXPIRED
//! ACCEPTED | ACTIVE | COMPLETED -> DISPUTED -> RESOLVED | REFUNDED
//! ACCEPTED | ACTIVE -> RESOLVED
//! ```
//!
//! Every method here mutates the in-memory aggregate only and bumps `version`; the engine
//! persists the result with a version guard.

use super::errors::{BetError, BetResult};
use super::models::{
    Bet, BetOutcome, BetParticipant, BetStatus, ParticipantRole, ResolutionData,
    ResolutionMethod,
};
use super::payout::{SettlementPlan, settlement_plan};
use chrono::{DateTime, Utc};
use uuid::Uuid;

impl BetStatus {
    pub fn can_transition_to(self, next: BetStatus) -> bool {
        use BetStatus::*;
        matches!(
            (self, next),
            (Pending, Accepted | Cancelled | Expired)
                | (Accepted, Active | Cancelled | Disputed | Resolved)
                | (Active, Completed | Disputed | Resolved)
                | (Completed, Disputed | Resolved)
                | (Disputed, Resolved | Refunded)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BetStatus::Resolved | BetStatus::Cancelled | BetStatus::Expired | BetStatus::Refunded
        )
    }

    /// Both stakes are locked in this status
    pub fn holds_funds(self) -> bool {
        matches!(
            self,
            BetStatus::Accepted | BetStatus::Active | BetStatus::Completed | BetStatus::Disputed
        )
    }
}

impl Bet {
    pub fn participant(&self, user_id: i64) -> Option<&BetParticipant> {
        self.participants.iter().find(|p| p.user_id == user_id)
    }

    pub fn participant_with_role(&self, role: ParticipantRole) -> Option<&BetParticipant> {
        self.participants.iter().find(|p| p.role == role)
    }

    /// Creator or an acceptor who has accepted
    pub fn is_party(&self, user_id: i64) -> bool {
        self.participant(user_id).is_some_and(|p| {
            p.is_active && matches!(p.role, ParticipantRole::Creator | ParticipantRole::Acceptor)
        })
    }

    /// Still pending past its expiry
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == BetStatus::Pending && now > self.expires_at
    }

    fn transition(
        &mut self,
        to: BetStatus,
        actor: Option<i64>,
        now: DateTime<Utc>,
    ) -> BetResult<()> {
        if !self.status.can_transition_to(to) {
            return Err(BetError::InvalidTransition {
                bet_id: self.id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.version += 1;
        self.write_id = Uuid::new_v4();
        self.updated_at = now;
        self.updated_by = actor;
        Ok(())
    }

    fn require_party(&self, user_id: i64, action: &str) -> BetResult<()> {
        if self.is_party(user_id) {
            Ok(())
        } else {
            Err(BetError::Security(format!(
                "Only bet participants can {action} this bet"
            )))
        }
    }

    /// Take the open side of a pending bet.
    ///
    /// A bet created for a named opponent can only be accepted by that user.
    pub fn accept(&mut self, acceptor_id: i64, now: DateTime<Utc>) -> BetResult<()> {
        if self.status != BetStatus::Pending {
            return Err(BetError::BusinessLogic(format!(
                "Bet cannot be accepted, current status: {}",
                self.status
            )));
        }
        if self.is_expired(now) {
            return Err(BetError::Expired(self.id));
        }
        if acceptor_id == self.created_by {
            return Err(BetError::BusinessLogic(
                "Cannot accept your own bet".to_string(),
            ));
        }

        let amount = self.amount;
        let winner_payout = self.winner_payout;
        let invited = self
            .participants
            .iter_mut()
            .find(|p| p.role == ParticipantRole::Acceptor);
        match invited {
            Some(slot) if slot.user_id != acceptor_id => {
                return Err(BetError::Security(
                    "This bet is reserved for another user".to_string(),
                ));
            }
            Some(slot) if slot.is_active => {
                return Err(BetError::BusinessLogic(
                    "User is already a participant in this bet".to_string(),
                ));
            }
            Some(slot) => {
                slot.is_active = true;
                slot.joined_at = now;
            }
            None => {
                if self.participant(acceptor_id).is_some() {
                    return Err(BetError::BusinessLogic(
                        "User is already a participant in this bet".to_string(),
                    ));
                }
                self.participants.push(BetParticipant {
                    id: 0,
                    bet_id: self.id,
                    user_id: acceptor_id,
                    role: ParticipantRole::Acceptor,
                    stake_amount: amount,
                    potential_winnings: winner_payout,
                    actual_winnings: None,
                    is_active: true,
                    joined_at: now,
                });
            }
        }

        self.accepted_at = Some(now);
        self.transition(BetStatus::Accepted, Some(acceptor_id), now)
    }

    /// Event under way
    pub fn activate(&mut self, actor: i64, now: DateTime<Utc>) -> BetResult<()> {
        self.require_party(actor, "activate")?;
        self.transition(BetStatus::Active, Some(actor), now)
    }

    /// Event over, awaiting an outcome
    pub fn complete(&mut self, actor: i64, now: DateTime<Utc>) -> BetResult<()> {
        self.require_party(actor, "complete")?;
        self.transition(BetStatus::Completed, Some(actor), now)
    }

    /// Contest the bet. Funds stay locked and the outcome stays pending.
    pub fn dispute(&mut self, actor: i64, now: DateTime<Utc>) -> BetResult<()> {
        self.require_party(actor, "dispute")?;
        self.transition(BetStatus::Disputed, Some(actor), now)
    }

    /// Mark a pending bet past its expiry as expired. No funds were locked.
    pub fn expire(&mut self, now: DateTime<Utc>) -> BetResult<()> {
        if !self.is_expired(now) {
            return Err(BetError::BusinessLogic(format!(
                "Bet {} has not expired",
                self.id
            )));
        }
        self.transition(BetStatus::Expired, None, now)
    }

    /// Creator withdraws the bet. Returns the refund plan when stakes were locked.
    pub fn cancel(&mut self, actor: i64, now: DateTime<Utc>) -> BetResult<Option<SettlementPlan>> {
        if actor != self.created_by {
            return Err(BetError::Security(
                "Only the bet creator can cancel this bet".to_string(),
            ));
        }
        if !matches!(self.status, BetStatus::Pending | BetStatus::Accepted) {
            return Err(BetError::BusinessLogic(format!(
                "Bet cannot be cancelled, current status: {}",
                self.status
            )));
        }
        let plan = if self.status == BetStatus::Accepted {
            Some(self.settle(BetOutcome::Cancelled)?)
        } else {
            self.outcome = BetOutcome::Cancelled;
            None
        };
        self.transition(BetStatus::Cancelled, Some(actor), now)?;
        Ok(plan)
    }

    /// Record the outcome and return the fund movements that go with it.
    pub fn resolve(
        &mut self,
        outcome: BetOutcome,
        method: ResolutionMethod,
        data: ResolutionData,
        actor: i64,
        now: DateTime<Utc>,
    ) -> BetResult<SettlementPlan> {
        if self.status == BetStatus::Resolved || self.outcome != BetOutcome::Pending {
            return Err(BetError::AlreadyResolved(self.id));
        }
        if !self.status.can_transition_to(BetStatus::Resolved) {
            return Err(BetError::InvalidTransition {
                bet_id: self.id,
                from: self.status,
                to: BetStatus::Resolved,
            });
        }
        let plan = self.settle(outcome)?;
        self.resolved_at = Some(now);
        self.resolution_method = Some(method);
        self.resolution_data = Some(data);
        self.transition(BetStatus::Resolved, Some(actor), now)?;
        Ok(plan)
    }

    /// Close a dispute by handing both stakes back
    pub fn refund(&mut self, actor: i64, now: DateTime<Utc>) -> BetResult<SettlementPlan> {
        if self.status != BetStatus::Disputed {
            return Err(BetError::InvalidTransition {
                bet_id: self.id,
                from: self.status,
                to: BetStatus::Refunded,
            });
        }
        let plan = self.settle(BetOutcome::Cancelled)?;
        self.resolved_at = Some(now);
        self.transition(BetStatus::Refunded, Some(actor), now)?;
        Ok(plan)
    }

    fn settle(&mut self, outcome: BetOutcome) -> BetResult<SettlementPlan> {
        let plan = settlement_plan(self, outcome)?;
        for participant in &mut self.participants {
            if let Some(won) = plan.winnings.get(&participant.user_id) {
                participant.actual_winnings = Some(*won);
            }
        }
        self.outcome = outcome;
        Ok(plan)
    }
}
