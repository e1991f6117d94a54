//! Reconciler: periodic convergence of the store against the two
//! authoritative enumerations.
//!
//! Fast pass — page through the network's `get_blocks` for this account,
//! upsert everything seen, prune rows the network no longer lists.
//! Directory pass (every full interval) — same dance against the external
//! directory's "who blocks me" pages.
//! Primary pass — mirror unsynced secondary blocks onto the primary account
//! and its moderation list, then run the publisher.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tokio::time::{sleep, Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use symmsync_atproto::records;
use symmsync_core::constants::{
    BLOCK_COLLECTION, DIRECTORY_PAGE_SIZE, GRAPH_PAGE_LIMIT, LIST_ITEM_COLLECTION,
};
use symmsync_core::config::{PublisherConfig, ReconcilerConfig};
use symmsync_core::{BlockDirection, Did, SyncError};
use symmsync_store::NewBlock;

use crate::publisher::ListPublisher;
use crate::{modlist, AgentContext};

/// Transient-fault retries for a `get_blocks` page.
const PAGE_RETRIES: u32 = 3;
const PAGE_RETRY_BASE: Duration = Duration::from_secs(1);
/// Pause between `get_blocks` pages.
const BLOCK_PAGE_DELAY: Duration = Duration::from_millis(200);

/// 429 handling for directory pages.
const DIRECTORY_RETRIES: u32 = 5;
const DIRECTORY_RETRY_BASE: Duration = Duration::from_secs(2);
const DIRECTORY_RETRY_MAX: Duration = Duration::from_secs(60);
/// Pause between directory pages.
const DIRECTORY_PAGE_DELAY: Duration = Duration::from_millis(500);
/// Hard page ceiling, matching the directory's own pagination bound.
const DIRECTORY_MAX_PAGES: u32 = 500;

/// Pause after a failed cycle before the next attempt.
const CYCLE_ERROR_DELAY: Duration = Duration::from_secs(60);

pub struct Reconciler {
    ctx: Arc<AgentContext>,
    cfg: ReconcilerConfig,
    publisher_cfg: PublisherConfig,
    stop: CancellationToken,
}

impl Reconciler {
    pub fn new(
        ctx: Arc<AgentContext>,
        cfg: ReconcilerConfig,
        publisher_cfg: PublisherConfig,
        stop: CancellationToken,
    ) -> Self {
        Self { ctx, cfg, publisher_cfg, stop }
    }

    /// Periodic loop: an initial full cycle, then fast cycles on the
    /// role-based interval with the directory pass folded in every full
    /// interval. The wait is a timed wait on the stop token, so shutdown is
    /// immediate.
    pub async fn run(self) {
        let fast_interval = if self.ctx.is_primary {
            self.cfg.fast_interval_primary
        } else {
            self.cfg.fast_interval_secondary
        };
        info!(handle = %self.ctx.handle,
              fast_secs = fast_interval.as_secs(),
              full_secs = self.cfg.full_interval.as_secs(),
              "reconciler started");

        let mut last_full: Option<Instant> = None;
        loop {
            if self.stop.is_cancelled() {
                break;
            }
            let include_directory =
                last_full.map_or(true, |at| at.elapsed() >= self.cfg.full_interval);

            match self.sync_cycle(include_directory).await {
                Ok(()) => {
                    if include_directory {
                        last_full = Some(Instant::now());
                    }
                }
                Err(e) => {
                    error!(handle = %self.ctx.handle, error = %e, "sync cycle failed");
                    if self.wait(CYCLE_ERROR_DELAY).await {
                        break;
                    }
                    continue;
                }
            }

            if self.wait(fast_interval).await {
                break;
            }
        }
        debug!(handle = %self.ctx.handle, "reconciler stopped");
    }

    /// One reconciliation cycle.
    pub async fn sync_cycle(&self, include_directory: bool) -> Result<(), SyncError> {
        info!(handle = %self.ctx.handle, include_directory, "sync cycle starting");
        self.fast_pass().await?;
        if include_directory {
            self.directory_pass().await?;
        }
        if self.ctx.is_primary {
            if self.ctx.list_uri().is_none() {
                match modlist::ensure_mod_list(&self.ctx).await {
                    Ok(uri) => self.ctx.set_list_uri(uri),
                    Err(e) => warn!(handle = %self.ctx.handle, error = %e,
                                    "moderation list still unavailable"),
                }
            }
            self.propagate_secondary_blocks().await?;
            let publisher = ListPublisher::new(Arc::clone(&self.ctx), self.publisher_cfg.clone());
            publisher.run_once().await?;
        }
        info!(handle = %self.ctx.handle, "sync cycle complete");
        Ok(())
    }

    /// Page through the network's authoritative own-blocks enumeration.
    pub async fn fast_pass(&self) -> Result<(), SyncError> {
        let mut current: HashSet<Did> = HashSet::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0u32;

        loop {
            let page = self.get_blocks_page(cursor.clone()).await?;
            pages += 1;
            for view in &page.blocks {
                current.insert(view.did.clone());
                self.ctx
                    .store
                    .add_block(NewBlock {
                        did: view.did.clone(),
                        handle: Some(view.handle.clone()),
                        source_account_id: self.ctx.account_id,
                        direction: BlockDirection::Blocking,
                        reason: Some("api enumeration".to_string()),
                    })
                    .await?;
            }
            match page.cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
            sleep(BLOCK_PAGE_DELAY).await;
        }

        let removed = self
            .ctx
            .store
            .remove_stale_blocks(self.ctx.account_id, BlockDirection::Blocking, &current)
            .await?;
        info!(handle = %self.ctx.handle, blocks = current.len(), pages, removed,
              "fast pass complete");
        Ok(())
    }

    async fn get_blocks_page(
        &self,
        cursor: Option<String>,
    ) -> Result<symmsync_atproto::BlocksPage, SyncError> {
        let mut delay = PAGE_RETRY_BASE;
        let mut attempt = 0u32;
        loop {
            match self.ctx.client.get_blocks(GRAPH_PAGE_LIMIT, cursor.clone()).await {
                Ok(page) => return Ok(page),
                Err(e) if e.is_retryable() && attempt + 1 < PAGE_RETRIES => {
                    attempt += 1;
                    warn!(handle = %self.ctx.handle, error = %e, attempt,
                          "get_blocks page failed, retrying");
                    sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Page through the directory's "who blocks me" enumeration.
    pub async fn directory_pass(&self) -> Result<(), SyncError> {
        let subject = self.ctx.did.as_str();
        let Some(total) = self.ctx.directory.total_blocked_by(subject).await? else {
            warn!(handle = %self.ctx.handle, "directory has no blocked-by count, skipping pass");
            return Ok(());
        };
        if total == 0 {
            debug!(handle = %self.ctx.handle, "directory reports no blockers");
            return Ok(());
        }

        let expected_pages = total.div_ceil(DIRECTORY_PAGE_SIZE);
        info!(handle = %self.ctx.handle, total, expected_pages, "directory pass starting");

        let mut current: HashSet<Did> = HashSet::new();
        let mut fetched = 0u64;
        let mut page = 1u32;
        loop {
            let rows = match self.directory_page(subject, page).await? {
                Some(rows) => rows,
                None => break,
            };
            if rows.is_empty() {
                break;
            }
            let row_count = rows.len();
            fetched += row_count as u64;
            for record in rows {
                if current.insert(record.did.clone()) {
                    self.ctx
                        .store
                        .add_block(NewBlock {
                            did: record.did,
                            handle: None,
                            source_account_id: self.ctx.account_id,
                            direction: BlockDirection::BlockedBy,
                            reason: None,
                        })
                        .await?;
                }
            }
            if (row_count as u64) < DIRECTORY_PAGE_SIZE {
                break;
            }
            page += 1;
            if page > DIRECTORY_MAX_PAGES {
                warn!(handle = %self.ctx.handle, "directory pagination ceiling reached");
                break;
            }
            sleep(DIRECTORY_PAGE_DELAY).await;
        }

        if fetched != total {
            warn!(handle = %self.ctx.handle, total, fetched, "directory count mismatch");
        }

        let removed = self
            .ctx
            .store
            .remove_stale_blocks(self.ctx.account_id, BlockDirection::BlockedBy, &current)
            .await?;
        info!(handle = %self.ctx.handle, blockers = current.len(), removed,
              "directory pass complete");
        Ok(())
    }

    async fn directory_page(
        &self,
        subject: &str,
        page: u32,
    ) -> Result<Option<Vec<symmsync_directory::BlockerRecord>>, SyncError> {
        let mut delay = DIRECTORY_RETRY_BASE;
        let mut attempt = 0u32;
        loop {
            match self.ctx.directory.blocked_by_page(subject, page).await {
                Err(e) if e.is_rate_limited() && attempt < DIRECTORY_RETRIES => {
                    attempt += 1;
                    warn!(handle = %self.ctx.handle, page, attempt,
                          delay_secs = delay.as_secs(), "directory rate limit, backing off");
                    sleep(delay).await;
                    delay = (delay * 2).min(DIRECTORY_RETRY_MAX);
                }
                other => return other,
            }
        }
    }

    /// Secondary Block Propagation: mirror unsynced secondary blocks onto the
    /// primary account and its list, then mark the originating rows synced.
    pub async fn propagate_secondary_blocks(&self) -> Result<(), SyncError> {
        let unsynced = self.ctx.store.get_unsynced_for_primary(self.ctx.account_id).await?;
        if unsynced.is_empty() {
            debug!(handle = %self.ctx.handle, "no unsynced secondary blocks");
            return Ok(());
        }
        info!(handle = %self.ctx.handle, count = unsynced.len(),
              "propagating secondary blocks");

        let list_uri = self.ctx.list_uri();
        for entry in unsynced {
            if !entry.already_blocked_by_primary {
                let subject = entry.did.clone();
                let client = Arc::clone(&self.ctx.client);
                let result = self
                    .ctx
                    .governor
                    .execute("create_block", || {
                        let record = records::block_record(&subject, Utc::now());
                        let client = Arc::clone(&client);
                        async move { client.create_record(BLOCK_COLLECTION, record).await }
                    })
                    .await;
                match result {
                    Ok(_) => {
                        info!(handle = %self.ctx.handle, subject = %entry.did,
                              source = %entry.source_handle, "mirrored block on network");
                    }
                    Err(e) if e.is_conflict() => {
                        debug!(handle = %self.ctx.handle, subject = %entry.did,
                               "block record already exists");
                    }
                    Err(e) => {
                        error!(handle = %self.ctx.handle, subject = %entry.did, error = %e,
                               "failed to mirror block, leaving row unsynced");
                        continue;
                    }
                }
                self.ctx
                    .store
                    .add_block(NewBlock {
                        did: entry.did.clone(),
                        handle: entry.handle.clone(),
                        source_account_id: self.ctx.account_id,
                        direction: BlockDirection::Blocking,
                        reason: Some(format!("synced from {}", entry.source_handle)),
                    })
                    .await?;
            }

            if let Some(list_uri) = &list_uri {
                let subject = entry.did.clone();
                let uri = list_uri.clone();
                let client = Arc::clone(&self.ctx.client);
                let result = self
                    .ctx
                    .governor
                    .execute("create_list_item", || {
                        let record = records::list_item_record(&subject, &uri, Utc::now());
                        let client = Arc::clone(&client);
                        async move { client.create_record(LIST_ITEM_COLLECTION, record).await }
                    })
                    .await;
                match result {
                    Ok(_) | Err(SyncError::Conflict(_)) => {}
                    // Membership converges on the next publisher pass.
                    Err(e) => error!(handle = %self.ctx.handle, subject = %entry.did, error = %e,
                                     "failed to ensure list membership"),
                }
            }

            self.ctx.store.mark_synced_by_primary(entry.id).await?;
        }
        Ok(())
    }

    async fn wait(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.stop.cancelled() => true,
            _ = sleep(duration) => false,
        }
    }
}
