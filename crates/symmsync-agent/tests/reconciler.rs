//! Reconciler behavior: fast-pass paging and retries, directory-pass
//! boundaries, and secondary block propagation edge cases.

mod support;

use tokio_util::sync::CancellationToken;

use support::make_env;
use symmsync_agent::Reconciler;
use symmsync_core::config::{PublisherConfig, ReconcilerConfig};
use symmsync_core::{BlockDirection, Did};
use symmsync_store::{BlockStore, NewBlock};

fn reconciler_for(env: &support::TestEnv) -> Reconciler {
    Reconciler::new(
        env.ctx.clone(),
        ReconcilerConfig::default(),
        PublisherConfig {
            batch_delay: std::time::Duration::ZERO,
            page_delay: std::time::Duration::ZERO,
            ..PublisherConfig::default()
        },
        CancellationToken::new(),
    )
}

async fn preload_blocking(env: &support::TestEnv, subject: &str) {
    env.store
        .add_block(NewBlock {
            did: Did::new(subject),
            handle: None,
            source_account_id: env.account_id,
            direction: BlockDirection::Blocking,
            reason: None,
        })
        .await
        .unwrap();
}

async fn preload_blocked_by(env: &support::TestEnv, subject: &str) {
    env.store
        .add_block(NewBlock {
            did: Did::new(subject),
            handle: None,
            source_account_id: env.account_id,
            direction: BlockDirection::BlockedBy,
            reason: None,
        })
        .await
        .unwrap();
}

// ── Fast pass ────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn fast_pass_follows_cursors_across_pages() {
    let env = make_env("a.example", "did:plc:aaaa", false).await;
    env.client.push_blocks_page(&["did:plc:x1", "did:plc:x2"], Some("page2"));
    env.client.push_blocks_page(&["did:plc:x3"], None);

    reconciler_for(&env).fast_pass().await.unwrap();

    let rows = env.store.list_blocks(env.account_id, BlockDirection::Blocking).await.unwrap();
    assert_eq!(rows.len(), 3);
    // Handles from the enumeration are persisted alongside the DIDs.
    assert!(rows.iter().all(|r| r.handle.is_some()));
    assert!(rows.iter().all(|r| r.reason.as_deref() == Some("api enumeration")));
}

#[tokio::test(start_paused = true)]
async fn fast_pass_retries_transient_page_faults() {
    let env = make_env("a.example", "did:plc:aaaa", false).await;
    *env.client.blocks_failures.lock().unwrap() = 2;
    env.client.push_blocks_page(&["did:plc:x1"], None);

    reconciler_for(&env).fast_pass().await.unwrap();

    let rows = env.store.list_blocks(env.account_id, BlockDirection::Blocking).await.unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn fast_pass_aborts_without_pruning_on_persistent_faults() {
    let env = make_env("a.example", "did:plc:aaaa", false).await;
    preload_blocking(&env, "did:plc:keep").await;
    *env.client.blocks_failures.lock().unwrap() = 10;

    assert!(reconciler_for(&env).fast_pass().await.is_err());

    // A failed enumeration must not delete rows it never saw.
    let rows = env.store.list_blocks(env.account_id, BlockDirection::Blocking).await.unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn fast_pass_with_no_blocks_prunes_everything() {
    let env = make_env("a.example", "did:plc:aaaa", false).await;
    preload_blocking(&env, "did:plc:gone").await;
    // Scripted network returns an empty enumeration.

    reconciler_for(&env).fast_pass().await.unwrap();
    assert!(env.store.list_blocks(env.account_id, BlockDirection::Blocking).await.unwrap().is_empty());
}

// ── Directory pass ───────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn directory_total_zero_makes_no_writes_and_no_deletions() {
    let env = make_env("a.example", "did:plc:aaaa", false).await;
    preload_blocked_by(&env, "did:plc:old").await;
    env.directory.set_total(Some(0));

    reconciler_for(&env).directory_pass().await.unwrap();

    let rows = env.store.list_blocks(env.account_id, BlockDirection::BlockedBy).await.unwrap();
    assert_eq!(rows.len(), 1, "zero total completes without touching existing rows");
}

#[tokio::test(start_paused = true)]
async fn directory_missing_total_skips_the_pass() {
    let env = make_env("a.example", "did:plc:aaaa", false).await;
    preload_blocked_by(&env, "did:plc:old").await;
    env.directory.set_total(None);
    env.directory.set_page(1, &["did:plc:new"]);

    reconciler_for(&env).directory_pass().await.unwrap();

    let rows = env.store.list_blocks(env.account_id, BlockDirection::BlockedBy).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].did, Did::new("did:plc:old"));
}

#[tokio::test(start_paused = true)]
async fn directory_pass_ingests_and_prunes() {
    let env = make_env("a.example", "did:plc:aaaa", false).await;
    preload_blocked_by(&env, "did:plc:stale").await;
    env.directory.set_total(Some(2));
    env.directory.set_page(1, &["did:plc:b1", "did:plc:b2"]);

    reconciler_for(&env).directory_pass().await.unwrap();

    let mut rows: Vec<Did> = env
        .store
        .list_blocks(env.account_id, BlockDirection::BlockedBy)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.did)
        .collect();
    rows.sort();
    assert_eq!(rows, [Did::new("did:plc:b1"), Did::new("did:plc:b2")]);
}

#[tokio::test(start_paused = true)]
async fn directory_pass_backs_off_on_rate_limits() {
    let env = make_env("a.example", "did:plc:aaaa", false).await;
    env.directory.set_total(Some(1));
    env.directory.set_page(1, &["did:plc:b1"]);
    env.directory.rate_limit_hits.lock().unwrap().insert(1, 2);

    reconciler_for(&env).directory_pass().await.unwrap();

    let rows = env.store.list_blocks(env.account_id, BlockDirection::BlockedBy).await.unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn directory_short_page_terminates_pagination() {
    let env = make_env("a.example", "did:plc:aaaa", false).await;
    // Total claims two pages, but page 1 comes back short: the loop must
    // stop (count mismatch is a warning, not a failure).
    env.directory.set_total(Some(150));
    env.directory.set_page(1, &["did:plc:b1", "did:plc:b2"]);
    env.directory.set_page(2, &["did:plc:never"]);

    reconciler_for(&env).directory_pass().await.unwrap();

    let rows = env.store.list_blocks(env.account_id, BlockDirection::BlockedBy).await.unwrap();
    assert_eq!(rows.len(), 2, "short page ends the walk before page 2");
}

// ── Secondary block propagation ──────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn propagation_skips_block_create_when_primary_already_blocks() {
    let env = make_env("p.example", "did:plc:pppp", true).await;
    let secondary_id = env
        .store
        .register_account("s.example", &Did::new("did:plc:ssss"), false)
        .await
        .unwrap();
    env.ctx.set_list_uri("at://did:plc:pppp/app.bsky.graph.list/main".to_string());

    // The primary already blocks Q.
    preload_blocking(&env, "did:plc:qqqq").await;
    env.store
        .add_block(NewBlock {
            did: Did::new("did:plc:qqqq"),
            handle: None,
            source_account_id: secondary_id,
            direction: BlockDirection::Blocking,
            reason: None,
        })
        .await
        .unwrap();

    reconciler_for(&env).propagate_secondary_blocks().await.unwrap();

    assert!(env.client.created("app.bsky.graph.block").is_empty(),
            "no redundant block record for an already-blocked subject");
    assert_eq!(env.client.created("app.bsky.graph.listitem").len(), 1,
               "list membership is still ensured");
    let rows = env.store.list_blocks(secondary_id, BlockDirection::Blocking).await.unwrap();
    assert!(rows[0].synced_by_primary);
}

#[tokio::test(start_paused = true)]
async fn propagation_treats_conflict_as_success() {
    let env = make_env("p.example", "did:plc:pppp", true).await;
    let secondary_id = env
        .store
        .register_account("s.example", &Did::new("did:plc:ssss"), false)
        .await
        .unwrap();
    env.store
        .add_block(NewBlock {
            did: Did::new("did:plc:qqqq"),
            handle: None,
            source_account_id: secondary_id,
            direction: BlockDirection::Blocking,
            reason: None,
        })
        .await
        .unwrap();
    // The network says the block record already exists.
    env.client.conflict_subjects.lock().unwrap().insert("did:plc:qqqq".to_string());

    reconciler_for(&env).propagate_secondary_blocks().await.unwrap();

    // The mirror row is inserted anyway and the original marked synced.
    let primary_rows =
        env.store.list_blocks(env.account_id, BlockDirection::Blocking).await.unwrap();
    assert_eq!(primary_rows.len(), 1);
    let secondary_rows =
        env.store.list_blocks(secondary_id, BlockDirection::Blocking).await.unwrap();
    assert!(secondary_rows[0].synced_by_primary);
}

#[tokio::test(start_paused = true)]
async fn propagation_leaves_row_unsynced_on_hard_failure() {
    let env = make_env("p.example", "did:plc:pppp", true).await;
    let secondary_id = env
        .store
        .register_account("s.example", &Did::new("did:plc:ssss"), false)
        .await
        .unwrap();
    env.store
        .add_block(NewBlock {
            did: Did::new("did:plc:qqqq"),
            handle: None,
            source_account_id: secondary_id,
            direction: BlockDirection::Blocking,
            reason: None,
        })
        .await
        .unwrap();
    env.client.fail_subjects.lock().unwrap().insert("did:plc:qqqq".to_string());

    reconciler_for(&env).propagate_secondary_blocks().await.unwrap();

    assert!(env.store.list_blocks(env.account_id, BlockDirection::Blocking).await.unwrap().is_empty());
    let rows = env.store.list_blocks(secondary_id, BlockDirection::Blocking).await.unwrap();
    assert!(!rows[0].synced_by_primary, "failed mirror must retry next cycle");
    assert_eq!(env.store.get_unsynced_for_primary(env.account_id).await.unwrap().len(), 1);
}
