//! Postgres backend over sqlx.
//!
//! Queries are plain SQL (no compile-time verification) so the crate builds
//! without a live database. The whitelist check inside `add_block` and the
//! cursor monotonicity guard are single statements, so they hold under
//! concurrent writers without explicit transactions.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::info;

use symmsync_core::{BlockDirection, Did, SyncError};

use crate::models::{AccountRow, BlockRow, ModListRow, NewBlock, StoredSession, UnsyncedBlock};
use crate::{BlockStore, SessionStore};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS accounts (
        id BIGSERIAL PRIMARY KEY,
        handle TEXT UNIQUE NOT NULL,
        did TEXT UNIQUE NOT NULL,
        is_primary BOOLEAN NOT NULL DEFAULT FALSE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS accounts_single_primary_idx
        ON accounts (is_primary) WHERE is_primary",
    "CREATE TABLE IF NOT EXISTS blocked_accounts (
        id BIGSERIAL PRIMARY KEY,
        did TEXT NOT NULL,
        handle TEXT,
        reason TEXT,
        source_account_id BIGINT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
        block_type TEXT NOT NULL,
        first_seen TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
        last_seen TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
        is_synced BOOLEAN NOT NULL DEFAULT FALSE,
        UNIQUE(did, source_account_id, block_type)
    )",
    "CREATE INDEX IF NOT EXISTS blocked_accounts_source_type_idx
        ON blocked_accounts (source_account_id, block_type)",
    "CREATE TABLE IF NOT EXISTS mod_lists (
        id BIGSERIAL PRIMARY KEY,
        list_uri TEXT UNIQUE NOT NULL,
        list_cid TEXT NOT NULL,
        owner_did TEXT NOT NULL,
        name TEXT NOT NULL,
        description TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE TABLE IF NOT EXISTS firehose_cursors (
        did TEXT PRIMARY KEY,
        seq BIGINT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS sessions (
        handle TEXT PRIMARY KEY,
        did TEXT NOT NULL,
        access_jwt TEXT NOT NULL,
        refresh_jwt TEXT NOT NULL,
        access_date TIMESTAMPTZ NOT NULL,
        refresh_date TIMESTAMPTZ NOT NULL
    )",
];

/// Postgres-backed [`BlockStore`] + [`SessionStore`].
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, SyncError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(storage)?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn storage(e: sqlx::Error) -> SyncError {
    SyncError::Storage(e.to_string())
}

fn account_from_row(row: &PgRow) -> Result<AccountRow, SyncError> {
    Ok(AccountRow {
        id: row.try_get("id").map_err(storage)?,
        handle: row.try_get("handle").map_err(storage)?,
        did: Did::new(row.try_get::<String, _>("did").map_err(storage)?),
        is_primary: row.try_get("is_primary").map_err(storage)?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at").map_err(storage)?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at").map_err(storage)?,
    })
}

fn block_from_row(row: &PgRow) -> Result<BlockRow, SyncError> {
    let direction: String = row.try_get("block_type").map_err(storage)?;
    Ok(BlockRow {
        id: row.try_get("id").map_err(storage)?,
        did: Did::new(row.try_get::<String, _>("did").map_err(storage)?),
        handle: row.try_get("handle").map_err(storage)?,
        reason: row.try_get("reason").map_err(storage)?,
        source_account_id: row.try_get("source_account_id").map_err(storage)?,
        direction: direction.parse()?,
        first_seen: row.try_get::<DateTime<Utc>, _>("first_seen").map_err(storage)?,
        last_seen: row.try_get::<DateTime<Utc>, _>("last_seen").map_err(storage)?,
        synced_by_primary: row.try_get("is_synced").map_err(storage)?,
    })
}

fn mod_list_from_row(row: &PgRow) -> Result<ModListRow, SyncError> {
    Ok(ModListRow {
        id: row.try_get("id").map_err(storage)?,
        uri: row.try_get("list_uri").map_err(storage)?,
        cid: row.try_get("list_cid").map_err(storage)?,
        owner_did: Did::new(row.try_get::<String, _>("owner_did").map_err(storage)?),
        name: row.try_get("name").map_err(storage)?,
        description: row.try_get("description").map_err(storage)?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at").map_err(storage)?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at").map_err(storage)?,
    })
}

#[async_trait]
impl BlockStore for PgStore {
    async fn ensure_schema(&self) -> Result<(), SyncError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await.map_err(storage)?;
        }
        info!("database schema ensured");
        Ok(())
    }

    async fn register_account(
        &self,
        handle: &str,
        did: &Did,
        is_primary: bool,
    ) -> Result<i64, SyncError> {
        let row = sqlx::query(
            "INSERT INTO accounts (handle, did, is_primary) VALUES ($1, $2, $3)
             ON CONFLICT (handle) DO UPDATE SET
                 did = CASE
                     WHEN starts_with(accounts.did, 'placeholder_')
                          AND NOT starts_with(EXCLUDED.did, 'placeholder_')
                     THEN EXCLUDED.did
                     ELSE accounts.did
                 END,
                 is_primary = EXCLUDED.is_primary,
                 updated_at = CURRENT_TIMESTAMP
             RETURNING id",
        )
        .bind(handle)
        .bind(did.as_str())
        .bind(is_primary)
        .fetch_one(&self.pool)
        .await
        .map_err(storage)?;
        row.try_get("id").map_err(storage)
    }

    async fn get_account_by_handle(&self, handle: &str) -> Result<Option<AccountRow>, SyncError> {
        let row = sqlx::query("SELECT * FROM accounts WHERE handle = $1")
            .bind(handle)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn get_primary_account(&self) -> Result<Option<AccountRow>, SyncError> {
        let row = sqlx::query("SELECT * FROM accounts WHERE is_primary = TRUE LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn get_accounts(&self) -> Result<Vec<AccountRow>, SyncError> {
        let rows = sqlx::query("SELECT * FROM accounts ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;
        rows.iter().map(account_from_row).collect()
    }

    async fn add_block(&self, block: NewBlock) -> Result<(), SyncError> {
        // The NOT EXISTS guard and the upsert run in one statement, so the
        // whitelist holds across every ingest path without a transaction.
        sqlx::query(
            "INSERT INTO blocked_accounts (did, handle, reason, source_account_id, block_type)
             SELECT $1, $2, $3, $4, $5
             WHERE NOT EXISTS (SELECT 1 FROM accounts WHERE accounts.did = $1)
             ON CONFLICT (did, source_account_id, block_type) DO UPDATE SET
                 handle = COALESCE(EXCLUDED.handle, blocked_accounts.handle),
                 reason = COALESCE(EXCLUDED.reason, blocked_accounts.reason),
                 last_seen = CURRENT_TIMESTAMP",
        )
        .bind(block.did.as_str())
        .bind(block.handle)
        .bind(block.reason)
        .bind(block.source_account_id)
        .bind(block.direction.as_str())
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn list_blocks(
        &self,
        source_account_id: i64,
        direction: BlockDirection,
    ) -> Result<Vec<BlockRow>, SyncError> {
        let rows = sqlx::query(
            "SELECT * FROM blocked_accounts
             WHERE source_account_id = $1 AND block_type = $2
             ORDER BY id",
        )
        .bind(source_account_id)
        .bind(direction.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;
        rows.iter().map(block_from_row).collect()
    }

    async fn remove_stale_blocks(
        &self,
        source_account_id: i64,
        direction: BlockDirection,
        current: &HashSet<Did>,
    ) -> Result<u64, SyncError> {
        let keep: Vec<String> = current.iter().map(|d| d.as_str().to_string()).collect();
        let result = sqlx::query(
            "DELETE FROM blocked_accounts
             WHERE source_account_id = $1
               AND block_type = $2
               AND NOT (did = ANY($3))",
        )
        .bind(source_account_id)
        .bind(direction.as_str())
        .bind(&keep)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(result.rows_affected())
    }

    async fn get_unsynced_for_primary(
        &self,
        primary_account_id: i64,
    ) -> Result<Vec<UnsyncedBlock>, SyncError> {
        let rows = sqlx::query(
            "SELECT b.id, b.did, b.handle, a.handle AS source_handle,
                    EXISTS (
                        SELECT 1 FROM blocked_accounts p
                        WHERE p.did = b.did
                          AND p.source_account_id = $1
                          AND p.block_type = 'blocking'
                    ) AS already_blocked_by_primary
             FROM blocked_accounts b
             JOIN accounts a ON a.id = b.source_account_id
             WHERE b.block_type = 'blocking'
               AND b.source_account_id <> $1
               AND b.is_synced = FALSE
             ORDER BY b.id",
        )
        .bind(primary_account_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.iter()
            .map(|row| {
                Ok(UnsyncedBlock {
                    id: row.try_get("id").map_err(storage)?,
                    did: Did::new(row.try_get::<String, _>("did").map_err(storage)?),
                    handle: row.try_get("handle").map_err(storage)?,
                    source_handle: row.try_get("source_handle").map_err(storage)?,
                    already_blocked_by_primary: row
                        .try_get("already_blocked_by_primary")
                        .map_err(storage)?,
                })
            })
            .collect()
    }

    async fn mark_synced_by_primary(&self, block_id: i64) -> Result<(), SyncError> {
        sqlx::query("UPDATE blocked_accounts SET is_synced = TRUE WHERE id = $1")
            .bind(block_id)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(())
    }

    async fn get_desired_list_dids(&self) -> Result<HashSet<Did>, SyncError> {
        let rows = sqlx::query(
            "SELECT DISTINCT did FROM blocked_accounts
             WHERE did NOT IN (SELECT did FROM accounts)",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;
        rows.iter()
            .map(|row| Ok(Did::new(row.try_get::<String, _>("did").map_err(storage)?)))
            .collect()
    }

    async fn register_mod_list(
        &self,
        uri: &str,
        cid: &str,
        owner_did: &Did,
        name: &str,
    ) -> Result<i64, SyncError> {
        let row = sqlx::query(
            "INSERT INTO mod_lists (list_uri, list_cid, owner_did, name)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (list_uri) DO UPDATE SET
                 list_cid = EXCLUDED.list_cid,
                 updated_at = CURRENT_TIMESTAMP
             RETURNING id",
        )
        .bind(uri)
        .bind(cid)
        .bind(owner_did.as_str())
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(storage)?;
        row.try_get("id").map_err(storage)
    }

    async fn get_mod_list_for_owner(&self, owner: &Did) -> Result<Option<ModListRow>, SyncError> {
        let row = sqlx::query(
            "SELECT * FROM mod_lists WHERE owner_did = $1 ORDER BY created_at LIMIT 1",
        )
        .bind(owner.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;
        row.as_ref().map(mod_list_from_row).transpose()
    }

    async fn update_mod_list_meta(
        &self,
        uri: &str,
        name: &str,
        description: &str,
    ) -> Result<(), SyncError> {
        sqlx::query(
            "UPDATE mod_lists
             SET name = $2, description = $3, updated_at = CURRENT_TIMESTAMP
             WHERE list_uri = $1",
        )
        .bind(uri)
        .bind(name)
        .bind(description)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn delete_mod_list(&self, uri: &str) -> Result<(), SyncError> {
        sqlx::query("DELETE FROM mod_lists WHERE list_uri = $1")
            .bind(uri)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(())
    }

    async fn save_cursor(&self, did: &Did, seq: i64) -> Result<(), SyncError> {
        sqlx::query(
            "INSERT INTO firehose_cursors (did, seq) VALUES ($1, $2)
             ON CONFLICT (did) DO UPDATE SET
                 seq = GREATEST(firehose_cursors.seq, EXCLUDED.seq)",
        )
        .bind(did.as_str())
        .bind(seq)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn load_cursor(&self, did: &Did) -> Result<Option<i64>, SyncError> {
        let row = sqlx::query("SELECT seq FROM firehose_cursors WHERE did = $1")
            .bind(did.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        row.map(|r| r.try_get("seq").map_err(storage)).transpose()
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn load(&self, handle: &str) -> Result<Option<StoredSession>, SyncError> {
        let row = sqlx::query("SELECT * FROM sessions WHERE handle = $1")
            .bind(handle)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        row.map(|r| {
            Ok(StoredSession {
                handle: r.try_get("handle").map_err(storage)?,
                did: Did::new(r.try_get::<String, _>("did").map_err(storage)?),
                access_jwt: r.try_get("access_jwt").map_err(storage)?,
                refresh_jwt: r.try_get("refresh_jwt").map_err(storage)?,
                access_date: r.try_get::<DateTime<Utc>, _>("access_date").map_err(storage)?,
                refresh_date: r.try_get::<DateTime<Utc>, _>("refresh_date").map_err(storage)?,
            })
        })
        .transpose()
    }

    async fn save(&self, session: &StoredSession) -> Result<(), SyncError> {
        sqlx::query(
            "INSERT INTO sessions (handle, did, access_jwt, refresh_jwt, access_date, refresh_date)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (handle) DO UPDATE SET
                 did = EXCLUDED.did,
                 access_jwt = EXCLUDED.access_jwt,
                 refresh_jwt = EXCLUDED.refresh_jwt,
                 access_date = EXCLUDED.access_date,
                 refresh_date = EXCLUDED.refresh_date",
        )
        .bind(&session.handle)
        .bind(session.did.as_str())
        .bind(&session.access_jwt)
        .bind(&session.refresh_jwt)
        .bind(session.access_date)
        .bind(session.refresh_date)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn update_access(&self, handle: &str, access_jwt: &str) -> Result<(), SyncError> {
        sqlx::query(
            "UPDATE sessions SET access_jwt = $2, access_date = CURRENT_TIMESTAMP
             WHERE handle = $1",
        )
        .bind(handle)
        .bind(access_jwt)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }
}
