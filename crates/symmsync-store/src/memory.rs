//! In-memory backend. Mirrors the Postgres semantics closely enough that
//! component tests exercising it are meaningful for production behavior:
//! whitelist guard, upsert-by-key, monotonic cursors, stale pruning.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use symmsync_core::{BlockDirection, Did, SyncError};

use crate::models::{AccountRow, BlockRow, ModListRow, NewBlock, StoredSession, UnsyncedBlock};
use crate::{BlockStore, SessionStore};

#[derive(Default)]
struct Inner {
    accounts: Vec<AccountRow>,
    blocks: Vec<BlockRow>,
    mod_lists: Vec<ModListRow>,
    cursors: HashMap<Did, i64>,
    sessions: HashMap<String, StoredSession>,
    next_account_id: i64,
    next_block_id: i64,
    next_list_id: i64,
}

/// In-memory [`BlockStore`] + [`SessionStore`].
#[derive(Default)]
pub struct MemStore {
    inner: Mutex<Inner>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Lock poisoning only happens after a panic in a test thread.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl BlockStore for MemStore {
    async fn ensure_schema(&self) -> Result<(), SyncError> {
        Ok(())
    }

    async fn register_account(
        &self,
        handle: &str,
        did: &Did,
        is_primary: bool,
    ) -> Result<i64, SyncError> {
        let mut inner = self.lock();
        let now = Utc::now();
        if let Some(row) = inner.accounts.iter_mut().find(|a| a.handle == handle) {
            if row.did.is_placeholder() && !did.is_placeholder() {
                row.did = did.clone();
            }
            row.is_primary = is_primary;
            row.updated_at = now;
            return Ok(row.id);
        }
        inner.next_account_id += 1;
        let id = inner.next_account_id;
        inner.accounts.push(AccountRow {
            id,
            handle: handle.to_string(),
            did: did.clone(),
            is_primary,
            created_at: now,
            updated_at: now,
        });
        Ok(id)
    }

    async fn get_account_by_handle(&self, handle: &str) -> Result<Option<AccountRow>, SyncError> {
        Ok(self.lock().accounts.iter().find(|a| a.handle == handle).cloned())
    }

    async fn get_primary_account(&self) -> Result<Option<AccountRow>, SyncError> {
        Ok(self.lock().accounts.iter().find(|a| a.is_primary).cloned())
    }

    async fn get_accounts(&self) -> Result<Vec<AccountRow>, SyncError> {
        Ok(self.lock().accounts.clone())
    }

    async fn add_block(&self, block: NewBlock) -> Result<(), SyncError> {
        let mut inner = self.lock();
        // Whitelist guard: never log a managed DID as blocked.
        if inner.accounts.iter().any(|a| a.did == block.did) {
            debug!(did = %block.did, "skipping block row for managed account");
            return Ok(());
        }
        let now = Utc::now();
        if let Some(row) = inner.blocks.iter_mut().find(|b| {
            b.did == block.did
                && b.source_account_id == block.source_account_id
                && b.direction == block.direction
        }) {
            if block.handle.is_some() {
                row.handle = block.handle;
            }
            row.reason = block.reason.or(row.reason.take());
            row.last_seen = now;
            return Ok(());
        }
        inner.next_block_id += 1;
        let id = inner.next_block_id;
        inner.blocks.push(BlockRow {
            id,
            did: block.did,
            handle: block.handle,
            reason: block.reason,
            source_account_id: block.source_account_id,
            direction: block.direction,
            first_seen: now,
            last_seen: now,
            synced_by_primary: false,
        });
        Ok(())
    }

    async fn list_blocks(
        &self,
        source_account_id: i64,
        direction: BlockDirection,
    ) -> Result<Vec<BlockRow>, SyncError> {
        Ok(self
            .lock()
            .blocks
            .iter()
            .filter(|b| b.source_account_id == source_account_id && b.direction == direction)
            .cloned()
            .collect())
    }

    async fn remove_stale_blocks(
        &self,
        source_account_id: i64,
        direction: BlockDirection,
        current: &HashSet<Did>,
    ) -> Result<u64, SyncError> {
        let mut inner = self.lock();
        let before = inner.blocks.len();
        inner.blocks.retain(|b| {
            b.source_account_id != source_account_id
                || b.direction != direction
                || current.contains(&b.did)
        });
        Ok((before - inner.blocks.len()) as u64)
    }

    async fn get_unsynced_for_primary(
        &self,
        primary_account_id: i64,
    ) -> Result<Vec<UnsyncedBlock>, SyncError> {
        let inner = self.lock();
        let primary_blocks: HashSet<&Did> = inner
            .blocks
            .iter()
            .filter(|b| {
                b.source_account_id == primary_account_id
                    && b.direction == BlockDirection::Blocking
            })
            .map(|b| &b.did)
            .collect();
        Ok(inner
            .blocks
            .iter()
            .filter(|b| {
                b.direction == BlockDirection::Blocking
                    && b.source_account_id != primary_account_id
                    && !b.synced_by_primary
            })
            .map(|b| UnsyncedBlock {
                id: b.id,
                did: b.did.clone(),
                handle: b.handle.clone(),
                source_handle: inner
                    .accounts
                    .iter()
                    .find(|a| a.id == b.source_account_id)
                    .map(|a| a.handle.clone())
                    .unwrap_or_default(),
                already_blocked_by_primary: primary_blocks.contains(&b.did),
            })
            .collect())
    }

    async fn mark_synced_by_primary(&self, block_id: i64) -> Result<(), SyncError> {
        let mut inner = self.lock();
        if let Some(row) = inner.blocks.iter_mut().find(|b| b.id == block_id) {
            row.synced_by_primary = true;
        }
        Ok(())
    }

    async fn get_desired_list_dids(&self) -> Result<HashSet<Did>, SyncError> {
        let inner = self.lock();
        let managed: HashSet<&Did> = inner.accounts.iter().map(|a| &a.did).collect();
        Ok(inner
            .blocks
            .iter()
            .filter(|b| !managed.contains(&b.did))
            .map(|b| b.did.clone())
            .collect())
    }

    async fn register_mod_list(
        &self,
        uri: &str,
        cid: &str,
        owner_did: &Did,
        name: &str,
    ) -> Result<i64, SyncError> {
        let mut inner = self.lock();
        let now = Utc::now();
        if let Some(row) = inner.mod_lists.iter_mut().find(|l| l.uri == uri) {
            row.cid = cid.to_string();
            row.updated_at = now;
            return Ok(row.id);
        }
        inner.next_list_id += 1;
        let id = inner.next_list_id;
        inner.mod_lists.push(ModListRow {
            id,
            uri: uri.to_string(),
            cid: cid.to_string(),
            owner_did: owner_did.clone(),
            name: name.to_string(),
            description: None,
            created_at: now,
            updated_at: now,
        });
        Ok(id)
    }

    async fn get_mod_list_for_owner(&self, owner: &Did) -> Result<Option<ModListRow>, SyncError> {
        Ok(self.lock().mod_lists.iter().find(|l| &l.owner_did == owner).cloned())
    }

    async fn update_mod_list_meta(
        &self,
        uri: &str,
        name: &str,
        description: &str,
    ) -> Result<(), SyncError> {
        let mut inner = self.lock();
        if let Some(row) = inner.mod_lists.iter_mut().find(|l| l.uri == uri) {
            row.name = name.to_string();
            row.description = Some(description.to_string());
            row.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn delete_mod_list(&self, uri: &str) -> Result<(), SyncError> {
        self.lock().mod_lists.retain(|l| l.uri != uri);
        Ok(())
    }

    async fn save_cursor(&self, did: &Did, seq: i64) -> Result<(), SyncError> {
        let mut inner = self.lock();
        let entry = inner.cursors.entry(did.clone()).or_insert(seq);
        if seq > *entry {
            *entry = seq;
        }
        Ok(())
    }

    async fn load_cursor(&self, did: &Did) -> Result<Option<i64>, SyncError> {
        Ok(self.lock().cursors.get(did).copied())
    }
}

#[async_trait]
impl SessionStore for MemStore {
    async fn load(&self, handle: &str) -> Result<Option<StoredSession>, SyncError> {
        Ok(self.lock().sessions.get(handle).cloned())
    }

    async fn save(&self, session: &StoredSession) -> Result<(), SyncError> {
        self.lock().sessions.insert(session.handle.clone(), session.clone());
        Ok(())
    }

    async fn update_access(&self, handle: &str, access_jwt: &str) -> Result<(), SyncError> {
        let mut inner = self.lock();
        if let Some(s) = inner.sessions.get_mut(handle) {
            s.access_jwt = access_jwt.to_string();
            s.access_date = Utc::now();
        }
        Ok(())
    }
}
