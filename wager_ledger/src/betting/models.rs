//! Bet aggregate data models.

use crate::macros::text_enum;
use crate::money::{CommissionRate, Money};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Bet ID type
pub type BetId = i64;

text_enum! {
    /// Kind of wager
    pub enum BetType {
        FriendBet => "friend_bet",
        TrickShot => "trick_shot",
        LiveEvent => "live_event",
        Prediction => "prediction",
        Challenge => "challenge",
        Tournament => "tournament",
    }
}

text_enum! {
    /// Bet lifecycle status
    pub enum BetStatus {
        /// Waiting for an acceptor, no funds locked
        Pending => "pending",
        /// Both stakes locked
        Accepted => "accepted",
        /// Event under way
        Active => "active",
        /// Event over, waiting for an outcome
        Completed => "completed",
        /// Outcome decided, funds distributed
        Resolved => "resolved",
        Cancelled => "cancelled",
        Expired => "expired",
        /// Outcome contested, funds stay locked
        Disputed => "disputed",
        /// Dispute closed by returning both stakes
        Refunded => "refunded",
    }
}

text_enum! {
    /// Bet outcome
    pub enum BetOutcome {
        Pending => "pending",
        /// Creator wins
        WinnerA => "winner_a",
        /// Acceptor wins
        WinnerB => "winner_b",
        Tie => "tie",
        Cancelled => "cancelled",
        Disputed => "disputed",
    }
}

text_enum! {
    /// Role of a user within a bet
    pub enum ParticipantRole {
        Creator => "creator",
        Acceptor => "acceptor",
        Observer => "observer",
        Judge => "judge",
    }
}

text_enum! {
    /// How an outcome was decided
    pub enum ResolutionMethod {
        Manual => "manual",
        Consensus => "consensus",
        Judge => "judge",
        Automatic => "automatic",
    }
}

/// Evidence attached to a resolution (score, judge note, video reference...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResolutionData(BTreeMap<String, String>);

impl ResolutionData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn entries(&self) -> &BTreeMap<String, String> {
        &self.0
    }
}

/// A user's stake in a bet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BetParticipant {
    /// Zero until persisted
    pub id: i64,
    pub bet_id: BetId,
    pub user_id: i64,
    pub role: ParticipantRole,
    pub stake_amount: Money,
    pub potential_winnings: Money,
    /// Set on resolution, cancellation or refund of an accepted bet
    pub actual_winnings: Option<Money>,
    /// False for a named acceptor who has not accepted yet
    pub is_active: bool,
    pub joined_at: DateTime<Utc>,
}

/// The wager aggregate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bet {
    /// Zero until persisted
    pub id: BetId,
    pub uuid: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub bet_type: BetType,
    pub status: BetStatus,
    pub outcome: BetOutcome,
    /// Stake per side
    pub amount: Money,
    pub commission_rate: CommissionRate,
    pub commission_amount: Money,
    /// `amount + commission_amount`
    pub total_pot: Money,
    /// What the winner is credited on a decisive outcome: both stakes minus commission
    pub winner_payout: Money,
    pub created_by: i64,
    pub updated_by: Option<i64>,
    pub expires_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_method: Option<ResolutionMethod>,
    pub resolution_data: Option<ResolutionData>,
    /// Incremented on every mutation
    pub version: i64,
    /// Fresh for every mutation, so a writer can tell its own committed write from a
    /// rival's identical transition
    #[serde(skip)]
    pub write_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub participants: Vec<BetParticipant>,
}

/// Record of how and by whom a bet was resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BetResolution {
    pub id: i64,
    pub bet_id: BetId,
    pub method: ResolutionMethod,
    pub data: ResolutionData,
    pub outcome: BetOutcome,
    pub resolved_by: i64,
    pub created_at: DateTime<Utc>,
}

/// Input to [`crate::betting::BetEngine::create_bet`]
#[derive(Debug, Clone)]
pub struct CreateBetRequest {
    pub creator_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub bet_type: BetType,
    pub amount: Money,
    /// Invite a specific opponent; only they may accept
    pub acceptor_id: Option<i64>,
    /// Falls back to the configured default
    pub expires_in_hours: Option<i64>,
}

impl CreateBetRequest {
    pub fn new(creator_id: i64, title: impl Into<String>, bet_type: BetType, amount: Money) -> Self {
        Self {
            creator_id,
            title: title.into(),
            description: None,
            bet_type,
            amount,
            acceptor_id: None,
            expires_in_hours: None,
        }
    }

    pub fn with_acceptor(mut self, acceptor_id: i64) -> Self {
        self.acceptor_id = Some(acceptor_id);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn expires_in_hours(mut self, hours: i64) -> Self {
        self.expires_in_hours = Some(hours);
        self
    }
}

/// Input to [`crate::betting::BetEngine::resolve_bet`]
#[derive(Debug, Clone)]
pub struct ResolveBetRequest {
    pub bet_id: BetId,
    pub outcome: BetOutcome,
    pub resolved_by: i64,
    pub method: ResolutionMethod,
    pub data: ResolutionData,
}

impl ResolveBetRequest {
    pub fn manual(bet_id: BetId, outcome: BetOutcome, resolved_by: i64) -> Self {
        Self {
            bet_id,
            outcome,
            resolved_by,
            method: ResolutionMethod::Manual,
            data: ResolutionData::default(),
        }
    }

    pub fn with_method(mut self, method: ResolutionMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_data(mut self, data: ResolutionData) -> Self {
        self.data = data;
        self
    }
}

/// Filter for listing a user's bets
#[derive(Debug, Clone, Copy)]
pub struct BetQuery {
    pub status: Option<BetStatus>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for BetQuery {
    fn default() -> Self {
        Self {
            status: None,
            limit: 50,
            offset: 0,
        }
    }
}

/// Betting statistics for one user
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BetStatistics {
    pub status_counts: BTreeMap<BetStatus, i64>,
    /// Sum of stakes across every bet the user takes part in
    pub total_bet_amount: Money,
    /// Sum of `actual_winnings` on the user's participant rows
    pub total_winnings: Money,
    pub net_profit: Money,
}
