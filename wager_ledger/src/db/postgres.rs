//! PostgreSQL implementation of the repository traits.
//!
//! Balance changes use a single conditional `UPDATE ... WHERE available_balance + $1 >= 0
//! AND locked_balance + $2 >= 0`, so two processes sharing the database can never drive a
//! wallet negative. Multi-statement writes run in one storage transaction.

use super::errors::{StoreError, StoreResult};
use super::repository::{AuditRepository, BetRepository, LimitRepository, WalletRepository};
use super::timeouts::{with_default_timeout, with_transaction_timeout};
use crate::audit::{AuditEntry, NewAuditEntry};
use crate::betting::{
    Bet, BetId, BetLimit, BetParticipant, BetResolution, BetStatistics, BetStatus, ResolutionData,
    WindowUsage,
};
use crate::money::{CommissionRate, Money};
use crate::wallet::{
    BalanceMovement, LedgerMetadata, NewTransaction, StatusChange, Transaction, TransactionStatus,
    TransactionType, Wallet,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row};
use std::collections::HashMap;
use std::str::FromStr;

const WALLET_COLUMNS: &str = "id, user_id, available_balance, locked_balance, total_deposited, \
     total_withdrawn, total_wagered, total_won, created_at, updated_at";

const TRANSACTION_COLUMNS: &str = "id, user_id, wallet_id, transaction_type, amount, status, \
     bet_id, description, metadata, created_at, completed_at";

const BET_COLUMNS: &str = "id, uuid, title, description, bet_type, status, outcome, amount, \
     commission_rate, commission_amount, total_pot, winner_payout, created_by, updated_by, \
     expires_at, accepted_at, resolved_at, resolution_method, resolution_data, version, \
     write_id, created_at, updated_at";

const PARTICIPANT_COLUMNS: &str = "id, bet_id, user_id, role, stake_amount, potential_winnings, \
     actual_winnings, is_active, joined_at";

const AUDIT_COLUMNS: &str =
    "id, bet_id, user_id, action, old_value, new_value, reason, created_at";

/// Parse a text column into one of the model enums
fn parse_text<T>(row: &PgRow, column: &str) -> StoreResult<T>
where
    T: FromStr<Err = String>,
{
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(StoreError::Decode)
}

fn parse_optional_text<T>(row: &PgRow, column: &str) -> StoreResult<Option<T>>
where
    T: FromStr<Err = String>,
{
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|value| value.parse().map_err(StoreError::Decode))
        .transpose()
}

fn money(row: &PgRow, column: &str) -> StoreResult<Money> {
    Ok(Money::from_cents(row.try_get(column)?))
}

fn optional_money(row: &PgRow, column: &str) -> StoreResult<Option<Money>> {
    let cents: Option<i64> = row.try_get(column)?;
    Ok(cents.map(Money::from_cents))
}

fn wallet_from_row(row: &PgRow) -> StoreResult<Wallet> {
    Ok(Wallet {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        available_balance: money(row, "available_balance")?,
        locked_balance: money(row, "locked_balance")?,
        total_deposited: money(row, "total_deposited")?,
        total_withdrawn: money(row, "total_withdrawn")?,
        total_wagered: money(row, "total_wagered")?,
        total_won: money(row, "total_won")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn transaction_from_row(row: &PgRow) -> StoreResult<Transaction> {
    let metadata: Json<LedgerMetadata> = row.try_get("metadata")?;
    Ok(Transaction {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        wallet_id: row.try_get("wallet_id")?,
        transaction_type: parse_text(row, "transaction_type")?,
        amount: money(row, "amount")?,
        status: parse_text(row, "status")?,
        bet_id: row.try_get("bet_id")?,
        description: row.try_get("description")?,
        metadata: metadata.0,
        created_at: row.try_get("created_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn participant_from_row(row: &PgRow) -> StoreResult<BetParticipant> {
    Ok(BetParticipant {
        id: row.try_get("id")?,
        bet_id: row.try_get("bet_id")?,
        user_id: row.try_get("user_id")?,
        role: parse_text(row, "role")?,
        stake_amount: money(row, "stake_amount")?,
        potential_winnings: money(row, "potential_winnings")?,
        actual_winnings: optional_money(row, "actual_winnings")?,
        is_active: row.try_get("is_active")?,
        joined_at: row.try_get("joined_at")?,
    })
}

/// Map a bet row; participants are attached by the caller
fn bet_from_row(row: &PgRow) -> StoreResult<Bet> {
    let rate: Decimal = row.try_get("commission_rate")?;
    let resolution_data: Option<Json<ResolutionData>> = row.try_get("resolution_data")?;
    Ok(Bet {
        id: row.try_get("id")?,
        uuid: row.try_get("uuid")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        bet_type: parse_text(row, "bet_type")?,
        status: parse_text(row, "status")?,
        outcome: parse_text(row, "outcome")?,
        amount: money(row, "amount")?,
        commission_rate: CommissionRate::new(rate)
            .map_err(|e| StoreError::Decode(e.to_string()))?,
        commission_amount: money(row, "commission_amount")?,
        total_pot: money(row, "total_pot")?,
        winner_payout: money(row, "winner_payout")?,
        created_by: row.try_get("created_by")?,
        updated_by: row.try_get("updated_by")?,
        expires_at: row.try_get("expires_at")?,
        accepted_at: row.try_get("accepted_at")?,
        resolved_at: row.try_get("resolved_at")?,
        resolution_method: parse_optional_text(row, "resolution_method")?,
        resolution_data: resolution_data.map(|data| data.0),
        version: row.try_get("version")?,
        write_id: row.try_get("write_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        participants: Vec::new(),
    })
}

fn resolution_from_row(row: &PgRow) -> StoreResult<BetResolution> {
    let data: Json<ResolutionData> = row.try_get("data")?;
    Ok(BetResolution {
        id: row.try_get("id")?,
        bet_id: row.try_get("bet_id")?,
        method: parse_text(row, "method")?,
        data: data.0,
        outcome: parse_text(row, "outcome")?,
        resolved_by: row.try_get("resolved_by")?,
        created_at: row.try_get("created_at")?,
    })
}

fn window_from_row(row: &PgRow, prefix: &str) -> StoreResult<WindowUsage> {
    Ok(WindowUsage {
        amount_limit: money(row, &format!("{prefix}_amount_limit"))?,
        count_limit: row.try_get(format!("{prefix}_count_limit").as_str())?,
        amount: money(row, &format!("{prefix}_amount"))?,
        count: row.try_get(format!("{prefix}_count").as_str())?,
        reset_at: row.try_get(format!("{prefix}_reset_at").as_str())?,
    })
}

fn limit_from_row(row: &PgRow) -> StoreResult<BetLimit> {
    Ok(BetLimit {
        user_id: row.try_get("user_id")?,
        min_single_bet: money(row, "min_single_bet")?,
        max_single_bet: money(row, "max_single_bet")?,
        daily: window_from_row(row, "daily")?,
        weekly: window_from_row(row, "weekly")?,
        monthly: window_from_row(row, "monthly")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn audit_from_row(row: &PgRow) -> StoreResult<AuditEntry> {
    Ok(AuditEntry {
        id: row.try_get("id")?,
        bet_id: row.try_get("bet_id")?,
        user_id: row.try_get("user_id")?,
        action: parse_text(row, "action")?,
        old_value: row.try_get("old_value")?,
        new_value: row.try_get("new_value")?,
        reason: row.try_get("reason")?,
        created_at: row.try_get("created_at")?,
    })
}

fn status_texts(statuses: &[impl ToString]) -> Vec<String> {
    statuses.iter().map(ToString::to_string).collect()
}

fn completed_at(change: StatusChange, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    (change.to == TransactionStatus::Completed).then_some(at)
}

async fn upsert_participant<'c, E>(executor: E, participant: &BetParticipant, bet_id: BetId) -> StoreResult<i64>
where
    E: sqlx::Executor<'c, Database = Postgres>,
{
    let row = sqlx::query(
        "INSERT INTO bet_participants
             (bet_id, user_id, role, stake_amount, potential_winnings, actual_winnings, is_active, joined_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         ON CONFLICT (bet_id, user_id) DO UPDATE SET
             role = EXCLUDED.role,
             stake_amount = EXCLUDED.stake_amount,
             potential_winnings = EXCLUDED.potential_winnings,
             actual_winnings = EXCLUDED.actual_winnings,
             is_active = EXCLUDED.is_active
         RETURNING id",
    )
    .bind(bet_id)
    .bind(participant.user_id)
    .bind(participant.role.as_str())
    .bind(participant.stake_amount.cents())
    .bind(participant.potential_winnings.cents())
    .bind(participant.actual_winnings.map(Money::cents))
    .bind(participant.is_active)
    .bind(participant.joined_at)
    .fetch_one(executor)
    .await?;
    Ok(row.try_get("id")?)
}

/// Insert a `pending` transaction, or return the row already stored under its key.
///
/// The no-op update makes RETURNING yield the existing row on conflict; `inserted` is true
/// only for a fresh row.
async fn insert_transaction_row<'c, E>(executor: E, new: &NewTransaction) -> Result<PgRow, sqlx::Error>
where
    E: sqlx::Executor<'c, Database = Postgres>,
{
    sqlx::query(&format!(
        "INSERT INTO transactions
             (idempotency_key, user_id, wallet_id, transaction_type, amount, status, bet_id,
              description, metadata, created_at)
         VALUES ($1, $2, $3, $4, $5, 'pending', $6, $7, $8, $9)
         ON CONFLICT (idempotency_key) DO UPDATE SET idempotency_key = EXCLUDED.idempotency_key
         RETURNING {TRANSACTION_COLUMNS}, (xmax = 0) AS inserted"
    ))
    .bind(new.idempotency_key)
    .bind(new.user_id)
    .bind(new.wallet_id)
    .bind(new.transaction_type.as_str())
    .bind(new.amount.cents())
    .bind(new.bet_id)
    .bind(&new.description)
    .bind(Json(&new.metadata))
    .bind(new.created_at)
    .fetch_one(executor)
    .await
}

/// Default PostgreSQL implementation of every repository trait
#[derive(Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn apply_movement_in_tx(&self, movement: &BalanceMovement) -> StoreResult<Option<Wallet>> {
        let mut tx = self.pool.begin().await?;

        if let Some(change) = movement.settle {
            let settled = sqlx::query(
                "UPDATE transactions
                 SET status = $1, completed_at = COALESCE($2, completed_at)
                 WHERE id = $3 AND status = $4",
            )
            .bind(change.to.as_str())
            .bind(completed_at(change, movement.at))
            .bind(movement.transaction_id)
            .bind(change.from.as_str())
            .execute(&mut *tx)
            .await?;
            if settled.rows_affected() == 0 {
                tx.rollback().await?;
                return Ok(None);
            }
        }

        let counters = movement.counters;
        let row = sqlx::query(&format!(
            "UPDATE wallets
             SET available_balance = available_balance + $1,
                 locked_balance = locked_balance + $2,
                 total_deposited = total_deposited + $3,
                 total_withdrawn = total_withdrawn + $4,
                 total_wagered = total_wagered + $5,
                 total_won = total_won + $6,
                 updated_at = $7
             WHERE user_id = $8
               AND available_balance + $1 >= 0
               AND locked_balance + $2 >= 0
             RETURNING {WALLET_COLUMNS}"
        ))
        .bind(movement.available_delta.cents())
        .bind(movement.locked_delta.cents())
        .bind(counters.deposited.cents())
        .bind(counters.withdrawn.cents())
        .bind(counters.wagered.cents())
        .bind(counters.won.cents())
        .bind(movement.at)
        .bind(movement.user_id)
        .fetch_optional(&mut *tx)
        .await?;

        match row {
            Some(row) => {
                let wallet = wallet_from_row(&row)?;
                tx.commit().await?;
                Ok(Some(wallet))
            }
            None => {
                tx.rollback().await?;
                Ok(None)
            }
        }
    }

    async fn insert_held_withdrawal_in_tx(
        &self,
        new: &NewTransaction,
    ) -> StoreResult<(Transaction, Option<Wallet>)> {
        let mut tx = self.pool.begin().await?;
        let row = insert_transaction_row(&mut *tx, new).await?;
        let mut transaction = transaction_from_row(&row)?;
        let inserted: bool = row.try_get("inserted")?;
        if !inserted {
            tx.rollback().await?;
            let wallet = match transaction.status {
                TransactionStatus::Failed => None,
                _ => self.find_wallet(new.user_id).await?,
            };
            return Ok((transaction, wallet));
        }

        let held = sqlx::query(&format!(
            "UPDATE wallets
             SET available_balance = available_balance - $1,
                 locked_balance = locked_balance + $1,
                 updated_at = $2
             WHERE user_id = $3 AND available_balance - $1 >= 0
             RETURNING {WALLET_COLUMNS}"
        ))
        .bind(new.amount.cents())
        .bind(new.created_at)
        .bind(new.user_id)
        .fetch_optional(&mut *tx)
        .await?;

        let wallet = match held {
            Some(row) => Some(wallet_from_row(&row)?),
            None => {
                sqlx::query("UPDATE transactions SET status = $1 WHERE id = $2")
                    .bind(TransactionStatus::Failed.as_str())
                    .bind(transaction.id)
                    .execute(&mut *tx)
                    .await?;
                transaction.status = TransactionStatus::Failed;
                None
            }
        };
        tx.commit().await?;
        Ok((transaction, wallet))
    }

    async fn insert_bet_in_tx(&self, bet: &Bet) -> StoreResult<Bet> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            "INSERT INTO bets
                 (uuid, title, description, bet_type, status, outcome, amount, commission_rate,
                  commission_amount, total_pot, winner_payout, created_by, updated_by, expires_at,
                  accepted_at, resolved_at, resolution_method, resolution_data, version,
                  write_id, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                     $18, $19, $20, $21, $22)
             RETURNING id",
        )
        .bind(bet.uuid)
        .bind(&bet.title)
        .bind(&bet.description)
        .bind(bet.bet_type.as_str())
        .bind(bet.status.as_str())
        .bind(bet.outcome.as_str())
        .bind(bet.amount.cents())
        .bind(bet.commission_rate.as_decimal())
        .bind(bet.commission_amount.cents())
        .bind(bet.total_pot.cents())
        .bind(bet.winner_payout.cents())
        .bind(bet.created_by)
        .bind(bet.updated_by)
        .bind(bet.expires_at)
        .bind(bet.accepted_at)
        .bind(bet.resolved_at)
        .bind(bet.resolution_method.map(|m| m.as_str()))
        .bind(bet.resolution_data.as_ref().map(Json))
        .bind(bet.version)
        .bind(bet.write_id)
        .bind(bet.created_at)
        .bind(bet.updated_at)
        .fetch_one(&mut *tx)
        .await?;

        let mut stored = bet.clone();
        stored.id = row.try_get("id")?;
        for participant in &mut stored.participants {
            participant.bet_id = stored.id;
            participant.id = upsert_participant(&mut *tx, participant, stored.id).await?;
        }
        tx.commit().await?;
        Ok(stored)
    }

    async fn update_bet_in_tx(&self, bet: &Bet, expected_version: i64) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(
            "UPDATE bets SET
                 title = $1, description = $2, status = $3, outcome = $4,
                 commission_amount = $5, total_pot = $6, winner_payout = $7, updated_by = $8,
                 expires_at = $9, accepted_at = $10, resolved_at = $11, resolution_method = $12,
                 resolution_data = $13, version = $14, write_id = $15, updated_at = $16
             WHERE id = $17 AND version = $18",
        )
        .bind(&bet.title)
        .bind(&bet.description)
        .bind(bet.status.as_str())
        .bind(bet.outcome.as_str())
        .bind(bet.commission_amount.cents())
        .bind(bet.total_pot.cents())
        .bind(bet.winner_payout.cents())
        .bind(bet.updated_by)
        .bind(bet.expires_at)
        .bind(bet.accepted_at)
        .bind(bet.resolved_at)
        .bind(bet.resolution_method.map(|m| m.as_str()))
        .bind(bet.resolution_data.as_ref().map(Json))
        .bind(bet.version)
        .bind(bet.write_id)
        .bind(bet.updated_at)
        .bind(bet.id)
        .bind(expected_version)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }
        for participant in &bet.participants {
            upsert_participant(&mut *tx, participant, bet.id).await?;
        }
        tx.commit().await?;
        Ok(true)
    }

    /// Attach participant rows to already loaded bets
    async fn with_participants(&self, mut bets: Vec<Bet>) -> StoreResult<Vec<Bet>> {
        if bets.is_empty() {
            return Ok(bets);
        }
        let ids: Vec<BetId> = bets.iter().map(|bet| bet.id).collect();
        let rows = with_default_timeout(
            sqlx::query(&format!(
                "SELECT {PARTICIPANT_COLUMNS} FROM bet_participants WHERE bet_id = ANY($1) ORDER BY id"
            ))
            .bind(&ids)
            .fetch_all(&self.pool),
        )
        .await?;

        let mut by_bet: HashMap<BetId, Vec<BetParticipant>> = HashMap::new();
        for row in &rows {
            let participant = participant_from_row(row)?;
            by_bet.entry(participant.bet_id).or_default().push(participant);
        }
        for bet in &mut bets {
            bet.participants = by_bet.remove(&bet.id).unwrap_or_default();
        }
        Ok(bets)
    }
}

#[async_trait]
impl WalletRepository for PgRepository {
    async fn find_wallet(&self, user_id: i64) -> StoreResult<Option<Wallet>> {
        let row = with_default_timeout(
            sqlx::query(&format!("SELECT {WALLET_COLUMNS} FROM wallets WHERE user_id = $1"))
                .bind(user_id)
                .fetch_optional(&self.pool),
        )
        .await?;
        row.as_ref().map(wallet_from_row).transpose()
    }

    async fn get_or_create_wallet(&self, user_id: i64) -> StoreResult<Wallet> {
        // The no-op update makes RETURNING yield the existing row on conflict.
        let row = with_default_timeout(
            sqlx::query(&format!(
                "INSERT INTO wallets (user_id) VALUES ($1)
                 ON CONFLICT (user_id) DO UPDATE SET user_id = EXCLUDED.user_id
                 RETURNING {WALLET_COLUMNS}"
            ))
            .bind(user_id)
            .fetch_one(&self.pool),
        )
        .await?;
        wallet_from_row(&row)
    }

    async fn insert_transaction(&self, new: &NewTransaction) -> StoreResult<Transaction> {
        let row = with_default_timeout(insert_transaction_row(&self.pool, new)).await?;
        transaction_from_row(&row)
    }

    async fn insert_held_withdrawal(
        &self,
        new: &NewTransaction,
    ) -> StoreResult<(Transaction, Option<Wallet>)> {
        with_transaction_timeout(self.insert_held_withdrawal_in_tx(new)).await
    }

    async fn apply_movement(&self, movement: &BalanceMovement) -> StoreResult<Option<Wallet>> {
        with_transaction_timeout(self.apply_movement_in_tx(movement)).await
    }

    async fn transition_transaction(
        &self,
        transaction_id: i64,
        change: StatusChange,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = with_default_timeout(
            sqlx::query(
                "UPDATE transactions
                 SET status = $1, completed_at = COALESCE($2, completed_at)
                 WHERE id = $3 AND status = $4",
            )
            .bind(change.to.as_str())
            .bind(completed_at(change, at))
            .bind(transaction_id)
            .bind(change.from.as_str())
            .execute(&self.pool),
        )
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn find_transaction(&self, transaction_id: i64) -> StoreResult<Option<Transaction>> {
        let row = with_default_timeout(
            sqlx::query(&format!(
                "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = $1"
            ))
            .bind(transaction_id)
            .fetch_optional(&self.pool),
        )
        .await?;
        row.as_ref().map(transaction_from_row).transpose()
    }

    async fn list_transactions(
        &self,
        user_id: i64,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Transaction>> {
        let rows = with_default_timeout(
            sqlx::query(&format!(
                "SELECT {TRANSACTION_COLUMNS} FROM transactions
                 WHERE user_id = $1
                 ORDER BY created_at DESC, id DESC
                 LIMIT $2 OFFSET $3"
            ))
            .bind(user_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool),
        )
        .await?;
        rows.iter().map(transaction_from_row).collect()
    }

    async fn transactions_for_bet(&self, bet_id: BetId) -> StoreResult<Vec<Transaction>> {
        let rows = with_default_timeout(
            sqlx::query(&format!(
                "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE bet_id = $1 ORDER BY id"
            ))
            .bind(bet_id)
            .fetch_all(&self.pool),
        )
        .await?;
        rows.iter().map(transaction_from_row).collect()
    }

    async fn transactions_since(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Transaction>> {
        let rows = with_default_timeout(
            sqlx::query(&format!(
                "SELECT {TRANSACTION_COLUMNS} FROM transactions
                 WHERE created_at >= $1
                 ORDER BY created_at, id
                 LIMIT $2"
            ))
            .bind(since)
            .bind(limit)
            .fetch_all(&self.pool),
        )
        .await?;
        rows.iter().map(transaction_from_row).collect()
    }

    async fn sum_transactions_since(
        &self,
        user_id: i64,
        transaction_type: TransactionType,
        statuses: &[TransactionStatus],
        since: DateTime<Utc>,
    ) -> StoreResult<Money> {
        let row = with_default_timeout(
            sqlx::query(
                "SELECT COALESCE(SUM(amount), 0)::BIGINT AS total FROM transactions
                 WHERE user_id = $1 AND transaction_type = $2 AND status = ANY($3) AND created_at >= $4",
            )
            .bind(user_id)
            .bind(transaction_type.as_str())
            .bind(status_texts(statuses))
            .bind(since)
            .fetch_one(&self.pool),
        )
        .await?;
        money(&row, "total")
    }
}

#[async_trait]
impl BetRepository for PgRepository {
    async fn insert_bet(&self, bet: &Bet) -> StoreResult<Bet> {
        with_transaction_timeout(self.insert_bet_in_tx(bet)).await
    }

    async fn find_bet(&self, bet_id: BetId) -> StoreResult<Option<Bet>> {
        let row = with_default_timeout(
            sqlx::query(&format!("SELECT {BET_COLUMNS} FROM bets WHERE id = $1"))
                .bind(bet_id)
                .fetch_optional(&self.pool),
        )
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let bet = bet_from_row(&row)?;
        Ok(self.with_participants(vec![bet]).await?.pop())
    }

    async fn update_bet(&self, bet: &Bet, expected_version: i64) -> StoreResult<bool> {
        with_transaction_timeout(self.update_bet_in_tx(bet, expected_version))
            .await
    }

    async fn insert_resolution(&self, resolution: &BetResolution) -> StoreResult<BetResolution> {
        let row = with_default_timeout(
            sqlx::query(
                "INSERT INTO bet_resolutions (bet_id, method, data, outcome, resolved_by, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 RETURNING id",
            )
            .bind(resolution.bet_id)
            .bind(resolution.method.as_str())
            .bind(Json(&resolution.data))
            .bind(resolution.outcome.as_str())
            .bind(resolution.resolved_by)
            .bind(resolution.created_at)
            .fetch_one(&self.pool),
        )
        .await?;
        let mut stored = resolution.clone();
        stored.id = row.try_get("id")?;
        Ok(stored)
    }

    async fn find_resolution(&self, bet_id: BetId) -> StoreResult<Option<BetResolution>> {
        let row = with_default_timeout(
            sqlx::query(
                "SELECT id, bet_id, method, data, outcome, resolved_by, created_at
                 FROM bet_resolutions WHERE bet_id = $1",
            )
            .bind(bet_id)
            .fetch_optional(&self.pool),
        )
        .await?;
        row.as_ref().map(resolution_from_row).transpose()
    }

    async fn list_user_bets(
        &self,
        user_id: i64,
        status: Option<BetStatus>,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Bet>> {
        let rows = with_default_timeout(
            sqlx::query(&format!(
                "SELECT {BET_COLUMNS} FROM bets b
                 WHERE (b.created_by = $1 OR EXISTS (
                         SELECT 1 FROM bet_participants p WHERE p.bet_id = b.id AND p.user_id = $1))
                   AND ($2::TEXT IS NULL OR b.status = $2)
                 ORDER BY b.created_at DESC, b.id DESC
                 LIMIT $3 OFFSET $4"
            ))
            .bind(user_id)
            .bind(status.map(|s| s.as_str()))
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool),
        )
        .await?;
        let bets = rows.iter().map(bet_from_row).collect::<StoreResult<Vec<_>>>()?;
        self.with_participants(bets).await
    }

    async fn list_bets_by_status(
        &self,
        statuses: &[BetStatus],
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Bet>> {
        let rows = with_default_timeout(
            sqlx::query(&format!(
                "SELECT {BET_COLUMNS} FROM bets
                 WHERE status = ANY($1)
                 ORDER BY created_at DESC, id DESC
                 LIMIT $2 OFFSET $3"
            ))
            .bind(status_texts(statuses))
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool),
        )
        .await?;
        let bets = rows.iter().map(bet_from_row).collect::<StoreResult<Vec<_>>>()?;
        self.with_participants(bets).await
    }

    async fn list_expired_pending(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<BetId>> {
        let rows = with_default_timeout(
            sqlx::query(
                "SELECT id FROM bets
                 WHERE status = 'pending' AND expires_at < $1
                 ORDER BY expires_at, id
                 LIMIT $2",
            )
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool),
        )
        .await?;
        rows.iter()
            .map(|row| row.try_get("id").map_err(StoreError::from))
            .collect()
    }

    async fn user_statistics(&self, user_id: i64) -> StoreResult<BetStatistics> {
        let rows = with_default_timeout(
            sqlx::query(
                "SELECT b.status,
                        COUNT(*) AS bets,
                        COALESCE(SUM(p.stake_amount), 0)::BIGINT AS staked,
                        COALESCE(SUM(p.actual_winnings), 0)::BIGINT AS won,
                        COALESCE(SUM(p.stake_amount) FILTER (WHERE p.actual_winnings IS NOT NULL), 0)::BIGINT AS settled
                 FROM bet_participants p
                 JOIN bets b ON b.id = p.bet_id
                 WHERE p.user_id = $1 AND p.is_active
                 GROUP BY b.status",
            )
            .bind(user_id)
            .fetch_all(&self.pool),
        )
        .await?;

        let mut stats = BetStatistics::default();
        let mut settled = Money::ZERO;
        for row in &rows {
            let status: BetStatus = parse_text(row, "status")?;
            stats.status_counts.insert(status, row.try_get("bets")?);
            stats.total_bet_amount += money(row, "staked")?;
            stats.total_winnings += money(row, "won")?;
            settled += money(row, "settled")?;
        }
        stats.net_profit = stats.total_winnings - settled;
        Ok(stats)
    }
}

#[async_trait]
impl LimitRepository for PgRepository {
    async fn find_limit(&self, user_id: i64) -> StoreResult<Option<BetLimit>> {
        let row = with_default_timeout(
            sqlx::query("SELECT * FROM bet_limits WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool),
        )
        .await?;
        row.as_ref().map(limit_from_row).transpose()
    }

    async fn save_limit(&self, limit: &BetLimit) -> StoreResult<()> {
        with_default_timeout(
            sqlx::query(
                "INSERT INTO bet_limits (
                     user_id, min_single_bet, max_single_bet,
                     daily_amount_limit, daily_count_limit, daily_amount, daily_count, daily_reset_at,
                     weekly_amount_limit, weekly_count_limit, weekly_amount, weekly_count, weekly_reset_at,
                     monthly_amount_limit, monthly_count_limit, monthly_amount, monthly_count, monthly_reset_at,
                     updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
                 ON CONFLICT (user_id) DO UPDATE SET
                     min_single_bet = EXCLUDED.min_single_bet,
                     max_single_bet = EXCLUDED.max_single_bet,
                     daily_amount_limit = EXCLUDED.daily_amount_limit,
                     daily_count_limit = EXCLUDED.daily_count_limit,
                     daily_amount = EXCLUDED.daily_amount,
                     daily_count = EXCLUDED.daily_count,
                     daily_reset_at = EXCLUDED.daily_reset_at,
                     weekly_amount_limit = EXCLUDED.weekly_amount_limit,
                     weekly_count_limit = EXCLUDED.weekly_count_limit,
                     weekly_amount = EXCLUDED.weekly_amount,
                     weekly_count = EXCLUDED.weekly_count,
                     weekly_reset_at = EXCLUDED.weekly_reset_at,
                     monthly_amount_limit = EXCLUDED.monthly_amount_limit,
                     monthly_count_limit = EXCLUDED.monthly_count_limit,
                     monthly_amount = EXCLUDED.monthly_amount,
                     monthly_count = EXCLUDED.monthly_count,
                     monthly_reset_at = EXCLUDED.monthly_reset_at,
                     updated_at = EXCLUDED.updated_at",
            )
            .bind(limit.user_id)
            .bind(limit.min_single_bet.cents())
            .bind(limit.max_single_bet.cents())
            .bind(limit.daily.amount_limit.cents())
            .bind(limit.daily.count_limit)
            .bind(limit.daily.amount.cents())
            .bind(limit.daily.count)
            .bind(limit.daily.reset_at)
            .bind(limit.weekly.amount_limit.cents())
            .bind(limit.weekly.count_limit)
            .bind(limit.weekly.amount.cents())
            .bind(limit.weekly.count)
            .bind(limit.weekly.reset_at)
            .bind(limit.monthly.amount_limit.cents())
            .bind(limit.monthly.count_limit)
            .bind(limit.monthly.amount.cents())
            .bind(limit.monthly.count)
            .bind(limit.monthly.reset_at)
            .bind(limit.updated_at)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl AuditRepository for PgRepository {
    async fn append_audit(&self, entry: &NewAuditEntry) -> StoreResult<AuditEntry> {
        let inserted = with_default_timeout(
            sqlx::query(&format!(
                "INSERT INTO bet_audit_logs
                     (idempotency_key, bet_id, user_id, action, old_value, new_value, reason, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                 ON CONFLICT (idempotency_key) DO NOTHING
                 RETURNING {AUDIT_COLUMNS}"
            ))
            .bind(entry.idempotency_key)
            .bind(entry.bet_id)
            .bind(entry.user_id)
            .bind(entry.action.as_str())
            .bind(&entry.old_value)
            .bind(&entry.new_value)
            .bind(&entry.reason)
            .bind(entry.created_at)
            .fetch_optional(&self.pool),
        )
        .await?;
        let row = match inserted {
            Some(row) => row,
            // Stored by an earlier attempt
            None => {
                with_default_timeout(
                    sqlx::query(&format!(
                        "SELECT {AUDIT_COLUMNS} FROM bet_audit_logs WHERE idempotency_key = $1"
                    ))
                    .bind(entry.idempotency_key)
                    .fetch_one(&self.pool),
                )
                .await?
            }
        };
        audit_from_row(&row)
    }

    async fn audit_for_bet(&self, bet_id: BetId) -> StoreResult<Vec<AuditEntry>> {
        let rows = with_default_timeout(
            sqlx::query(&format!(
                "SELECT {AUDIT_COLUMNS} FROM bet_audit_logs WHERE bet_id = $1 ORDER BY id"
            ))
            .bind(bet_id)
            .fetch_all(&self.pool),
        )
        .await?;
        rows.iter().map(audit_from_row).collect()
    }

    async fn audit_since(&self, since: DateTime<Utc>, limit: i64) -> StoreResult<Vec<AuditEntry>> {
        let rows = with_default_timeout(
            sqlx::query(&format!(
                "SELECT {AUDIT_COLUMNS} FROM bet_audit_logs
                 WHERE created_at >= $1
                 ORDER BY created_at, id
                 LIMIT $2"
            ))
            .bind(since)
            .bind(limit)
            .fetch_all(&self.pool),
        )
        .await?;
        rows.iter().map(audit_from_row).collect()
    }
}
