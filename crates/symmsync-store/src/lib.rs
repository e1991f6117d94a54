//! symmsync-store — persistence for managed accounts, block records,
//! moderation-list metadata, firehose cursors and sessions.
//!
//! Components depend on the narrow [`BlockStore`] / [`SessionStore`] traits,
//! never on a concrete backend. Backends:
//!   `PgStore`          — Postgres via sqlx (production)
//!   `MemStore`         — in-memory, drives component tests
//!   `FileSessionStore` — per-handle JSON session files (local development)

pub mod memory;
pub mod models;
pub mod postgres;
pub mod session;

use std::collections::HashSet;

use async_trait::async_trait;

use symmsync_core::{BlockDirection, Did, SyncError};

pub use memory::MemStore;
pub use models::{AccountRow, BlockRow, ModListRow, NewBlock, StoredSession, UnsyncedBlock};
pub use postgres::PgStore;
pub use session::FileSessionStore;

/// Store of record for accounts, blocks, lists and cursors.
///
/// All operations are idempotent unless noted; callers retry freely.
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Create tables if they do not exist. No-op for in-memory backends.
    async fn ensure_schema(&self) -> Result<(), SyncError>;

    /// Upsert by handle, returning the account id. A stored placeholder DID
    /// is replaced when the caller supplies a real one.
    async fn register_account(
        &self,
        handle: &str,
        did: &Did,
        is_primary: bool,
    ) -> Result<i64, SyncError>;

    async fn get_account_by_handle(&self, handle: &str) -> Result<Option<AccountRow>, SyncError>;

    async fn get_primary_account(&self) -> Result<Option<AccountRow>, SyncError>;

    async fn get_accounts(&self) -> Result<Vec<AccountRow>, SyncError>;

    /// Record an observed block. The subject is checked against the managed
    /// accounts table in the same logical operation: a managed DID is never
    /// inserted (the row is silently skipped). Re-observation refreshes
    /// `last_seen` and leaves exactly one row per `(did, source, direction)`.
    async fn add_block(&self, block: NewBlock) -> Result<(), SyncError>;

    async fn list_blocks(
        &self,
        source_account_id: i64,
        direction: BlockDirection,
    ) -> Result<Vec<BlockRow>, SyncError>;

    /// Delete rows with this `(source, direction)` whose subject is absent
    /// from `current`. Returns the number of rows removed.
    async fn remove_stale_blocks(
        &self,
        source_account_id: i64,
        direction: BlockDirection,
        current: &HashSet<Did>,
    ) -> Result<u64, SyncError>;

    /// `blocking` rows from non-primary sources not yet mirrored by the
    /// primary, each annotated with whether the primary already blocks the
    /// subject.
    async fn get_unsynced_for_primary(
        &self,
        primary_account_id: i64,
    ) -> Result<Vec<UnsyncedBlock>, SyncError>;

    async fn mark_synced_by_primary(&self, block_id: i64) -> Result<(), SyncError>;

    /// Union of every `blocking` and `blocked_by` subject across all managed
    /// accounts, minus the managed DIDs themselves.
    async fn get_desired_list_dids(&self) -> Result<HashSet<Did>, SyncError>;

    /// Upsert by list URI, returning the row id.
    async fn register_mod_list(
        &self,
        uri: &str,
        cid: &str,
        owner_did: &Did,
        name: &str,
    ) -> Result<i64, SyncError>;

    async fn get_mod_list_for_owner(&self, owner: &Did) -> Result<Option<ModListRow>, SyncError>;

    async fn update_mod_list_meta(
        &self,
        uri: &str,
        name: &str,
        description: &str,
    ) -> Result<(), SyncError>;

    async fn delete_mod_list(&self, uri: &str) -> Result<(), SyncError>;

    /// Advance the firehose checkpoint. Never moves backwards.
    async fn save_cursor(&self, did: &Did, seq: i64) -> Result<(), SyncError>;

    async fn load_cursor(&self, did: &Did) -> Result<Option<i64>, SyncError>;
}

/// Persisted login sessions, keyed by handle.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, handle: &str) -> Result<Option<StoredSession>, SyncError>;

    /// Full upsert; both token dates are set to now by the caller.
    async fn save(&self, session: &StoredSession) -> Result<(), SyncError>;

    /// Narrow update of the access token and its date only, so the refresh
    /// date does not drift on routine refreshes.
    async fn update_access(&self, handle: &str, access_jwt: &str) -> Result<(), SyncError>;
}
