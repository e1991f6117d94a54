//! List Publisher: project the desired DID set onto the live moderation
//! list.
//!
//! Fully idempotent — no checkpointing. Both the desired set and the live
//! membership are snapshots per run; writes racing the snapshot produce
//! transient ghosts that the next pass cleans up. Additions are batched with
//! pauses so large deltas stay inside the daily write budget even though
//! every individual call already goes through the governor.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use symmsync_atproto::records;
use symmsync_core::constants::{GRAPH_PAGE_LIMIT, LIST_ITEM_COLLECTION};
use symmsync_core::config::PublisherConfig;
use symmsync_core::{AtUri, Did, SyncError};

use crate::AgentContext;

/// Per-run outcome counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PublishStats {
    pub added: usize,
    /// Creations that hit an existing record.
    pub skipped: usize,
    pub removed: usize,
    pub errors: usize,
}

pub struct ListPublisher {
    ctx: Arc<AgentContext>,
    cfg: PublisherConfig,
}

impl ListPublisher {
    pub fn new(ctx: Arc<AgentContext>, cfg: PublisherConfig) -> Self {
        Self { ctx, cfg }
    }

    /// One publishing pass: snapshot both sides, drive the symmetric
    /// difference to zero. Per-item failures are counted, never fatal.
    pub async fn run_once(&self) -> Result<PublishStats, SyncError> {
        let Some(list_uri) = self.ctx.list_uri() else {
            warn!(handle = %self.ctx.handle, "no moderation list to publish to");
            return Ok(PublishStats::default());
        };

        let desired = self.ctx.store.get_desired_list_dids().await?;
        let live = self.fetch_live_membership(&list_uri).await?;

        let live_dids: HashSet<Did> = live.keys().cloned().collect();
        let to_add: Vec<Did> = desired.difference(&live_dids).cloned().collect();
        let to_remove: Vec<Did> = live_dids.difference(&desired).cloned().collect();
        info!(handle = %self.ctx.handle, desired = desired.len(), live = live_dids.len(),
              to_add = to_add.len(), to_remove = to_remove.len(), "list diff computed");

        let mut stats = PublishStats::default();
        self.add_phase(&list_uri, &to_add, &mut stats).await;
        if self.cfg.additive_only {
            if !to_remove.is_empty() {
                debug!(handle = %self.ctx.handle, held = to_remove.len(),
                       "additive-only mode, leaving removals in place");
            }
        } else {
            self.remove_phase(&live, &to_remove, &mut stats).await;
        }

        info!(handle = %self.ctx.handle, added = stats.added, skipped = stats.skipped,
              removed = stats.removed, errors = stats.errors, "publish pass complete");
        Ok(stats)
    }

    /// Snapshot the live list: members plus their list-item URIs (needed to
    /// derive delete rkeys).
    async fn fetch_live_membership(
        &self,
        list_uri: &str,
    ) -> Result<HashMap<Did, String>, SyncError> {
        let mut members = HashMap::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .ctx
                .client
                .get_list(list_uri, GRAPH_PAGE_LIMIT, cursor.clone())
                .await?;
            for item in page.items {
                members.insert(item.subject.did, item.uri);
            }
            match page.cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
            sleep(self.cfg.page_delay).await;
        }
        Ok(members)
    }

    async fn add_phase(&self, list_uri: &str, to_add: &[Did], stats: &mut PublishStats) {
        if to_add.is_empty() {
            return;
        }
        let total_batches = to_add.len().div_ceil(self.cfg.batch_size.max(1));
        for (index, batch) in to_add.chunks(self.cfg.batch_size.max(1)).enumerate() {
            debug!(handle = %self.ctx.handle, batch = index + 1, total_batches,
                   size = batch.len(), "add batch starting");
            for did in batch {
                match self.create_list_item(list_uri, did).await {
                    Ok(()) => stats.added += 1,
                    Err(e) if e.is_conflict() => stats.skipped += 1,
                    Err(e) => {
                        stats.errors += 1;
                        error!(handle = %self.ctx.handle, subject = %did, error = %e,
                               "failed to add subject to list");
                    }
                }
            }
            if index + 1 < total_batches {
                sleep(self.cfg.batch_delay).await;
            }
        }
    }

    async fn create_list_item(&self, list_uri: &str, subject: &Did) -> Result<(), SyncError> {
        let client = Arc::clone(&self.ctx.client);
        self.ctx
            .governor
            .execute("list_item_create", || {
                let record = records::list_item_record(subject, list_uri, Utc::now());
                let client = Arc::clone(&client);
                async move { client.create_record(LIST_ITEM_COLLECTION, record).await }
            })
            .await
            .map(|_| ())
    }

    async fn remove_phase(
        &self,
        live: &HashMap<Did, String>,
        to_remove: &[Did],
        stats: &mut PublishStats,
    ) {
        for did in to_remove {
            let Some(item_uri) = live.get(did) else {
                // Cannot happen for a DID drawn from the live snapshot.
                continue;
            };
            let rkey = match AtUri::rkey_of(item_uri) {
                Ok(rkey) => rkey,
                Err(e) => {
                    stats.errors += 1;
                    warn!(handle = %self.ctx.handle, uri = %item_uri, error = %e,
                          "unparseable list-item URI, skipping removal");
                    continue;
                }
            };
            let client = Arc::clone(&self.ctx.client);
            let result = self
                .ctx
                .governor
                .execute("list_item_delete", || {
                    let rkey = rkey.clone();
                    let client = Arc::clone(&client);
                    async move { client.delete_record(LIST_ITEM_COLLECTION, &rkey).await }
                })
                .await;
            match result {
                Ok(()) => {
                    stats.removed += 1;
                    debug!(handle = %self.ctx.handle, subject = %did, "removed from list");
                }
                Err(e) => {
                    stats.errors += 1;
                    error!(handle = %self.ctx.handle, subject = %did, error = %e,
                           "failed to remove subject from list");
                }
            }
        }
    }
}
