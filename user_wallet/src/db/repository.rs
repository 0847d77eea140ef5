//! Ledger storage trait and its PostgreSQL implementation.
//!
//! The ledger never writes piecemeal. Every mutation is described by a single
//! [`Commit`] that a store applies atomically: the account row moves from
//! `expected_version` to `expected_version + 1`, at most one entry is appended
//! and at most one reservation row changes. If any part of that cannot be
//! applied the store reports [`CommitStatus::Conflict`] and nothing lands.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};

use super::timeouts::{DEFAULT_TRANSACTION_TIMEOUT, with_default_timeout};
use crate::wallet::{
    Account, AccountStatus, Amount, EntryKind, LedgerEntry, Reservation, ReservationState,
    UserId, WalletError, WalletResult,
};

/// Entry to append as part of a commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    pub amount: Amount,
    pub kind: EntryKind,
    pub order_reference: Option<String>,
    pub description: Option<String>,
}

/// Reservation change carried by a commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReservationWrite {
    /// Create a reservation keyed by the commit's (purchase) entry
    Open {
        order_reference: String,
        amount: Amount,
    },
    /// Move a reservation between states. A commit that also appends an
    /// entry records it as the release entry.
    Transition {
        reservation_id: i64,
        from: ReservationState,
        to: ReservationState,
    },
}

/// Atomic unit of change for one account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub user_id: UserId,
    pub expected_version: i64,
    pub balance: Amount,
    pub status: AccountStatus,
    pub entry: Option<NewEntry>,
    pub reservation: Option<ReservationWrite>,
}

/// What a successful commit produced
#[derive(Debug, Clone)]
pub struct CommitReceipt {
    pub account: Account,
    pub entry: Option<LedgerEntry>,
    pub reservation: Option<Reservation>,
}

/// Commit outcome
#[derive(Debug, Clone)]
pub enum CommitStatus {
    Committed(CommitReceipt),
    /// Version moved, or a uniqueness rule rejected the write. Nothing was applied.
    Conflict,
}

/// Trait for ledger storage operations
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Load the committed account, if it was ever persisted
    async fn load_account(&self, user_id: UserId) -> WalletResult<Option<Account>>;

    /// Find the reservation for an order reference
    async fn find_reservation(
        &self,
        user_id: UserId,
        order_reference: &str,
    ) -> WalletResult<Option<Reservation>>;

    /// Find the entry recorded for `(user_id, order_reference, kind)`
    async fn find_entry(
        &self,
        user_id: UserId,
        order_reference: &str,
        kind: EntryKind,
    ) -> WalletResult<Option<LedgerEntry>>;

    /// Newest-first entries for a user
    async fn list_entries(&self, user_id: UserId, limit: i64) -> WalletResult<Vec<LedgerEntry>>;

    /// Sum of every entry amount for a user
    async fn entry_sum(&self, user_id: UserId) -> WalletResult<Amount>;

    /// Apply a commit atomically
    async fn commit(&self, commit: Commit) -> WalletResult<CommitStatus>;
}

const ACCOUNT_COLUMNS: &str = "user_id, balance, version, status, created_at, updated_at";
const ENTRY_COLUMNS: &str =
    "entry_id, user_id, amount, balance_after, kind, order_reference, description, created_at";
const RESERVATION_COLUMNS: &str = "reservation_id, user_id, order_reference, amount, state, release_entry_id, created_at, updated_at";

/// PostgreSQL implementation of `LedgerStore`
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn commit_tx(&self, commit: &Commit) -> WalletResult<CommitStatus> {
        let mut tx = self.pool.begin().await?;

        // Version CAS. Version 0 means the account row does not exist yet.
        let account_row = if commit.expected_version == 0 {
            sqlx::query(&format!(
                "INSERT INTO wallet_accounts (user_id, balance, version, status)
                 VALUES ($1, $2, 1, $3)
                 ON CONFLICT (user_id) DO NOTHING
                 RETURNING {ACCOUNT_COLUMNS}"
            ))
            .bind(commit.user_id)
            .bind(commit.balance)
            .bind(commit.status.to_string())
            .fetch_optional(&mut *tx)
            .await?
        } else {
            sqlx::query(&format!(
                "UPDATE wallet_accounts
                 SET balance = $2, status = $3, version = version + 1, updated_at = NOW()
                 WHERE user_id = $1 AND version = $4
                 RETURNING {ACCOUNT_COLUMNS}"
            ))
            .bind(commit.user_id)
            .bind(commit.balance)
            .bind(commit.status.to_string())
            .bind(commit.expected_version)
            .fetch_optional(&mut *tx)
            .await?
        };

        let Some(account_row) = account_row else {
            tx.rollback().await?;
            return Ok(CommitStatus::Conflict);
        };
        let account = account_from_row(&account_row)?;

        let entry = match &commit.entry {
            Some(new_entry) => {
                match insert_entry(&mut tx, commit.user_id, commit.balance, new_entry).await {
                    Ok(entry) => Some(entry),
                    Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                        tx.rollback().await?;
                        return Ok(CommitStatus::Conflict);
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            None => None,
        };

        let reservation = match &commit.reservation {
            Some(ReservationWrite::Open {
                order_reference,
                amount,
            }) => {
                let Some(entry) = entry.as_ref() else {
                    return Err(WalletError::Storage(
                        "reservation opened without a purchase entry".to_string(),
                    ));
                };
                let result = sqlx::query(&format!(
                    "INSERT INTO wallet_reservations (reservation_id, user_id, order_reference, amount, state)
                     VALUES ($1, $2, $3, $4, $5)
                     RETURNING {RESERVATION_COLUMNS}"
                ))
                .bind(entry.entry_id)
                .bind(commit.user_id)
                .bind(order_reference)
                .bind(amount)
                .bind(ReservationState::Reserved.to_string())
                .fetch_one(&mut *tx)
                .await;

                match result {
                    Ok(row) => Some(reservation_from_row(&row)?),
                    Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                        tx.rollback().await?;
                        return Ok(CommitStatus::Conflict);
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Some(ReservationWrite::Transition {
                reservation_id,
                from,
                to,
            }) => {
                let row = sqlx::query(&format!(
                    "UPDATE wallet_reservations
                     SET state = $3,
                         release_entry_id = COALESCE($4, release_entry_id),
                         updated_at = NOW()
                     WHERE reservation_id = $1 AND user_id = $5 AND state = $2
                     RETURNING {RESERVATION_COLUMNS}"
                ))
                .bind(reservation_id)
                .bind(from.to_string())
                .bind(to.to_string())
                .bind(entry.as_ref().map(|e| e.entry_id))
                .bind(commit.user_id)
                .fetch_optional(&mut *tx)
                .await?;

                match row {
                    Some(row) => Some(reservation_from_row(&row)?),
                    None => {
                        tx.rollback().await?;
                        return Ok(CommitStatus::Conflict);
                    }
                }
            }
            None => None,
        };

        tx.commit().await?;

        Ok(CommitStatus::Committed(CommitReceipt {
            account,
            entry,
            reservation,
        }))
    }
}

async fn insert_entry(
    tx: &mut Transaction<'_, Postgres>,
    user_id: UserId,
    balance_after: Amount,
    entry: &NewEntry,
) -> Result<LedgerEntry, sqlx::Error> {
    let row = sqlx::query(
        r#"
        INSERT INTO ledger_entries (user_id, amount, balance_after, kind, order_reference, description)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING entry_id, created_at
        "#,
    )
    .bind(user_id)
    .bind(entry.amount)
    .bind(balance_after)
    .bind(entry.kind.to_string())
    .bind(&entry.order_reference)
    .bind(&entry.description)
    .fetch_one(&mut **tx)
    .await?;

    Ok(LedgerEntry {
        entry_id: row.get("entry_id"),
        user_id,
        amount: entry.amount,
        balance_after,
        kind: entry.kind,
        order_reference: entry.order_reference.clone(),
        description: entry.description.clone(),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
    })
}

fn account_from_row(row: &PgRow) -> WalletResult<Account> {
    Ok(Account {
        user_id: row.try_get("user_id")?,
        balance: row.try_get("balance")?,
        version: row.try_get("version")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn entry_from_row(row: &PgRow) -> WalletResult<LedgerEntry> {
    Ok(LedgerEntry {
        entry_id: row.try_get("entry_id")?,
        user_id: row.try_get("user_id")?,
        amount: row.try_get("amount")?,
        balance_after: row.try_get("balance_after")?,
        kind: row.try_get::<String, _>("kind")?.parse()?,
        order_reference: row.try_get("order_reference")?,
        description: row.try_get("description")?,
        created_at: row.try_get("created_at")?,
    })
}

fn reservation_from_row(row: &PgRow) -> WalletResult<Reservation> {
    Ok(Reservation {
        reservation_id: row.try_get("reservation_id")?,
        user_id: row.try_get("user_id")?,
        order_reference: row.try_get("order_reference")?,
        amount: row.try_get("amount")?,
        state: row.try_get::<String, _>("state")?.parse()?,
        release_entry_id: row.try_get("release_entry_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn load_account(&self, user_id: UserId) -> WalletResult<Option<Account>> {
        let query = format!("SELECT {ACCOUNT_COLUMNS} FROM wallet_accounts WHERE user_id = $1");
        let row = with_default_timeout(
            sqlx::query(&query)
                .bind(user_id)
                .fetch_optional(&self.pool),
        )
        .await?;

        row.as_ref().map(account_from_row).transpose()
    }

    async fn find_reservation(
        &self,
        user_id: UserId,
        order_reference: &str,
    ) -> WalletResult<Option<Reservation>> {
        let query = format!(
            "SELECT {RESERVATION_COLUMNS} FROM wallet_reservations
             WHERE user_id = $1 AND order_reference = $2"
        );
        let row = with_default_timeout(
            sqlx::query(&query)
                .bind(user_id)
                .bind(order_reference)
                .fetch_optional(&self.pool),
        )
        .await?;

        row.as_ref().map(reservation_from_row).transpose()
    }

    async fn find_entry(
        &self,
        user_id: UserId,
        order_reference: &str,
        kind: EntryKind,
    ) -> WalletResult<Option<LedgerEntry>> {
        let query = format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries
             WHERE user_id = $1 AND order_reference = $2 AND kind = $3"
        );
        let row = with_default_timeout(
            sqlx::query(&query)
                .bind(user_id)
                .bind(order_reference)
                .bind(kind.to_string())
                .fetch_optional(&self.pool),
        )
        .await?;

        row.as_ref().map(entry_from_row).transpose()
    }

    async fn list_entries(&self, user_id: UserId, limit: i64) -> WalletResult<Vec<LedgerEntry>> {
        let query = format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries
             WHERE user_id = $1
             ORDER BY entry_id DESC
             LIMIT $2"
        );
        let rows = with_default_timeout(
            sqlx::query(&query)
                .bind(user_id)
                .bind(limit)
                .fetch_all(&self.pool),
        )
        .await?;

        rows.iter().map(entry_from_row).collect()
    }

    async fn entry_sum(&self, user_id: UserId) -> WalletResult<Amount> {
        let row = with_default_timeout(
            sqlx::query(
                "SELECT COALESCE(SUM(amount), 0)::BIGINT AS total FROM ledger_entries WHERE user_id = $1",
            )
            .bind(user_id)
            .fetch_one(&self.pool),
        )
        .await?;

        Ok(row.try_get("total")?)
    }

    async fn commit(&self, commit: Commit) -> WalletResult<CommitStatus> {
        match tokio::time::timeout(DEFAULT_TRANSACTION_TIMEOUT, self.commit_tx(&commit)).await {
            Ok(result) => result,
            // Dropping the in-flight transaction rolls it back
            Err(_) => Err(WalletError::Timeout(DEFAULT_TRANSACTION_TIMEOUT)),
        }
    }
}
