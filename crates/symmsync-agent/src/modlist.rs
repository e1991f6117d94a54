//! Moderation-list lifecycle for the primary account.
//!
//! Startup reconciliation, separate from publishing:
//!   1. A stored list row that still resolves on the network wins; push
//!      name/description updates if the configured values changed.
//!   2. Otherwise discover lists owned by the primary, filtered to the
//!      moderation purpose: adopt a single match, dedup multiple matches by
//!      keeping the oldest and deleting the rest, or create a fresh list.

use chrono::Utc;

use tracing::{info, warn};

use symmsync_atproto::records;
use symmsync_atproto::ListView;
use symmsync_core::constants::{LIST_COLLECTION, MOD_LIST_PURPOSE};
use symmsync_core::{AtUri, SyncError};

use crate::AgentContext;

/// Resolve the canonical moderation list, registering it in the store.
/// Returns its URI.
pub async fn ensure_mod_list(ctx: &AgentContext) -> Result<String, SyncError> {
    if !ctx.is_primary {
        return Err(SyncError::Permanent(
            "only the primary account owns a moderation list".into(),
        ));
    }

    // Step 1: a stored row that the network still confirms.
    if let Some(row) = ctx.store.get_mod_list_for_owner(&ctx.did).await? {
        match ctx.client.get_list(&row.uri, 1, None).await {
            Ok(page) => {
                if let Some(view) = page.list {
                    update_meta_if_changed(ctx, &view).await?;
                }
                ctx.store
                    .register_mod_list(&row.uri, &row.cid, &ctx.did, &ctx.list_name)
                    .await?;
                info!(handle = %ctx.handle, uri = %row.uri, "using stored moderation list");
                return Ok(row.uri);
            }
            Err(e) => {
                warn!(handle = %ctx.handle, uri = %row.uri, error = %e,
                      "stored list did not resolve, rediscovering");
            }
        }
    }

    // Step 2: discovery.
    let mut lists: Vec<ListView> = ctx
        .client
        .get_lists(&ctx.did)
        .await?
        .into_iter()
        .filter(|l| l.purpose == MOD_LIST_PURPOSE)
        .collect();

    let canonical = match lists.len() {
        0 => {
            // Step 5: create.
            let record = records::list_record(&ctx.list_name, &ctx.list_description, Utc::now());
            let created = ctx.client.create_record(LIST_COLLECTION, record).await?;
            info!(handle = %ctx.handle, uri = %created.uri, "created moderation list");
            register(ctx, &created.uri, &created.cid).await?;
            return Ok(created.uri);
        }
        1 => {
            let list = lists.remove(0);
            info!(handle = %ctx.handle, uri = %list.uri, "adopting existing moderation list");
            list
        }
        n => {
            // Step 4: dedup — oldest by indexed-at is canonical.
            warn!(handle = %ctx.handle, count = n, "multiple moderation lists found, deduplicating");
            lists.sort_by_key(|l| l.indexed_at);
            let canonical = lists.remove(0);
            for duplicate in &lists {
                let rkey = AtUri::rkey_of(&duplicate.uri)?;
                match ctx.client.delete_record(LIST_COLLECTION, &rkey).await {
                    Ok(()) => info!(handle = %ctx.handle, uri = %duplicate.uri,
                                    "deleted duplicate moderation list"),
                    Err(e) => warn!(handle = %ctx.handle, uri = %duplicate.uri, error = %e,
                                    "failed to delete duplicate moderation list"),
                }
                ctx.store.delete_mod_list(&duplicate.uri).await?;
            }
            canonical
        }
    };

    update_meta_if_changed(ctx, &canonical).await?;
    register(ctx, &canonical.uri, &canonical.cid).await?;
    Ok(canonical.uri)
}

/// Push configured name/description to the network when they differ.
async fn update_meta_if_changed(ctx: &AgentContext, view: &ListView) -> Result<(), SyncError> {
    let description_current = view.description.as_deref() == Some(ctx.list_description.as_str());
    if view.name == ctx.list_name && description_current {
        return Ok(());
    }
    info!(handle = %ctx.handle, uri = %view.uri, "updating moderation list name/description");
    let rkey = AtUri::rkey_of(&view.uri)?;
    // Keep the original creation time; only the metadata changes.
    let record = records::list_record(&ctx.list_name, &ctx.list_description, view.indexed_at);
    match ctx.client.put_record(LIST_COLLECTION, &rkey, record).await {
        Ok(_) => {
            ctx.store
                .update_mod_list_meta(&view.uri, &ctx.list_name, &ctx.list_description)
                .await?;
        }
        Err(e) => {
            warn!(handle = %ctx.handle, uri = %view.uri, error = %e,
                  "failed to update list metadata");
        }
    }
    Ok(())
}

async fn register(ctx: &AgentContext, uri: &str, cid: &str) -> Result<(), SyncError> {
    ctx.store.register_mod_list(uri, cid, &ctx.did, &ctx.list_name).await?;
    ctx.store
        .update_mod_list_meta(uri, &ctx.list_name, &ctx.list_description)
        .await?;
    Ok(())
}
