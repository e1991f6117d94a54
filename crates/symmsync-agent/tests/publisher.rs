//! List Publisher behavior: symmetric diff, conflict classification, batch
//! partitioning and the additive-only flag.

mod support;

use support::make_env;
use symmsync_agent::ListPublisher;
use symmsync_core::config::PublisherConfig;
use symmsync_core::{BlockDirection, Did};
use symmsync_store::{BlockStore, NewBlock};

const LIST_URI: &str = "at://did:plc:pppp/app.bsky.graph.list/main";

fn publisher_cfg() -> PublisherConfig {
    PublisherConfig {
        batch_size: 50,
        batch_delay: std::time::Duration::ZERO,
        page_delay: std::time::Duration::ZERO,
        additive_only: false,
    }
}

async fn desire(env: &support::TestEnv, subject: &str) {
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

fn item_uri(n: u32) -> String {
    format!("at://did:plc:pppp/app.bsky.graph.listitem/3kitem{n:03}")
}

#[tokio::test]
async fn desired_equals_live_means_zero_writes() {
    let env = make_env("p.example", "did:plc:pppp", true).await;
    env.ctx.set_list_uri(LIST_URI.to_string());
    desire(&env, "did:plc:x1").await;
    env.client.push_list_page(&[("did:plc:x1", &item_uri(1))], None);

    let stats = ListPublisher::new(env.ctx.clone(), publisher_cfg()).run_once().await.unwrap();

    assert_eq!(stats.added, 0);
    assert_eq!(stats.removed, 0);
    assert_eq!(stats.errors, 0);
    assert_eq!(env.client.total_calls(), 0, "a converged list costs no network writes");
}

#[tokio::test]
async fn adds_and_removes_drive_the_difference_to_zero() {
    let env = make_env("p.example", "did:plc:pppp", true).await;
    env.ctx.set_list_uri(LIST_URI.to_string());
    desire(&env, "did:plc:x1").await;
    desire(&env, "did:plc:x2").await;
    // Live list has x2 (kept) and x3 (stale).
    env.client.push_list_page(
        &[("did:plc:x2", &item_uri(2)), ("did:plc:x3", &item_uri(3))],
        None,
    );

    let stats = ListPublisher::new(env.ctx.clone(), publisher_cfg()).run_once().await.unwrap();

    assert_eq!(stats.added, 1);
    assert_eq!(stats.removed, 1);
    assert_eq!(stats.errors, 0);

    let created = env.client.created("app.bsky.graph.listitem");
    assert_eq!(created.len(), 1);
    assert_eq!(created[0]["subject"], "did:plc:x1");
    assert_eq!(created[0]["list"], LIST_URI);

    let deletes = env.client.deletes();
    assert_eq!(deletes.len(), 1);
    assert_eq!(deletes[0].0, "app.bsky.graph.listitem");
    assert_eq!(deletes[0].1, "3kitem003", "rkey derives from the live item URI");
}

#[tokio::test]
async fn conflicts_count_as_skipped() {
    let env = make_env("p.example", "did:plc:pppp", true).await;
    env.ctx.set_list_uri(LIST_URI.to_string());
    desire(&env, "did:plc:x1").await;
    desire(&env, "did:plc:x2").await;
    env.client.conflict_subjects.lock().unwrap().insert("did:plc:x1".to_string());

    let stats = ListPublisher::new(env.ctx.clone(), publisher_cfg()).run_once().await.unwrap();

    assert_eq!(stats.added, 1);
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.errors, 0);
}

#[tokio::test]
async fn per_item_errors_do_not_abort_the_batch() {
    let env = make_env("p.example", "did:plc:pppp", true).await;
    env.ctx.set_list_uri(LIST_URI.to_string());
    desire(&env, "did:plc:x1").await;
    desire(&env, "did:plc:x2").await;
    env.client.fail_subjects.lock().unwrap().insert("did:plc:x1".to_string());

    let stats = ListPublisher::new(env.ctx.clone(), publisher_cfg()).run_once().await.unwrap();

    assert_eq!(stats.added, 1, "the healthy item still lands");
    assert_eq!(stats.errors, 1);
}

#[tokio::test]
async fn additive_only_suppresses_the_remove_phase() {
    let env = make_env("p.example", "did:plc:pppp", true).await;
    env.ctx.set_list_uri(LIST_URI.to_string());
    // Nothing desired; live list has one stale member.
    env.client.push_list_page(&[("did:plc:x3", &item_uri(3))], None);

    let cfg = PublisherConfig { additive_only: true, ..publisher_cfg() };
    let stats = ListPublisher::new(env.ctx.clone(), cfg).run_once().await.unwrap();

    assert_eq!(stats.removed, 0);
    assert!(env.client.deletes().is_empty());
}

#[tokio::test]
async fn live_membership_pages_are_walked_to_exhaustion() {
    let env = make_env("p.example", "did:plc:pppp", true).await;
    env.ctx.set_list_uri(LIST_URI.to_string());
    desire(&env, "did:plc:x1").await;
    env.client.push_list_page(&[("did:plc:x1", &item_uri(1))], Some("more"));
    env.client.push_list_page(&[("did:plc:x2", &item_uri(2))], None);

    let stats = ListPublisher::new(env.ctx.clone(), publisher_cfg()).run_once().await.unwrap();

    // x1 is already live (page 1); x2 (page 2) is stale and removed.
    assert_eq!(stats.added, 0);
    assert_eq!(stats.removed, 1);
}

#[tokio::test]
async fn small_batches_cover_the_whole_add_set() {
    let env = make_env("p.example", "did:plc:pppp", true).await;
    env.ctx.set_list_uri(LIST_URI.to_string());
    for n in 0..5 {
        desire(&env, &format!("did:plc:add{n}")).await;
    }

    let cfg = PublisherConfig { batch_size: 2, ..publisher_cfg() };
    let stats = ListPublisher::new(env.ctx.clone(), cfg).run_once().await.unwrap();

    assert_eq!(stats.added, 5);
    assert_eq!(env.client.created("app.bsky.graph.listitem").len(), 5);
}

#[tokio::test]
async fn missing_list_uri_is_a_noop() {
    let env = make_env("p.example", "did:plc:pppp", true).await;
    desire(&env, "did:plc:x1").await;

    let stats = ListPublisher::new(env.ctx.clone(), publisher_cfg()).run_once().await.unwrap();

    assert_eq!(stats, symmsync_agent::PublishStats::default());
    assert_eq!(env.client.total_calls(), 0);
}
