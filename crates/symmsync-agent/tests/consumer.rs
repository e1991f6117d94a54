//! Commit Consumer boundary behavior: cursor checkpointing, skip rules, and
//! the primary's list-item side effect.

mod support;

use tokio_util::sync::CancellationToken;

use support::make_env;
use symmsync_agent::consumer::{CommitConsumer, Flow};
use symmsync_core::{BlockDirection, Did};
use symmsync_firehose::frames::decode_frame;
use symmsync_firehose::{testing, FirehoseClient, FirehoseMessage};
use symmsync_store::BlockStore;

fn consumer_with_token(env: &support::TestEnv, stop: CancellationToken) -> CommitConsumer {
    CommitConsumer::new(env.ctx.clone(), FirehoseClient::new("wss://unused.example"), stop)
}

fn consumer(env: &support::TestEnv) -> CommitConsumer {
    consumer_with_token(env, CancellationToken::new())
}

fn decode(frame: &[u8]) -> FirehoseMessage {
    decode_frame(frame).expect("synthetic frame decodes")
}

#[tokio::test]
async fn op_cid_missing_from_bundle_advances_cursor_without_rows() {
    let env = make_env("a.example", "did:plc:aaaa", false).await;
    let referenced = testing::fake_cid(b"referenced");
    let other = testing::fake_cid(b"other");
    // The bundle holds a different block than the op references.
    let car = testing::build_car(
        vec![],
        vec![(other, testing::block_record_bytes("did:plc:xxxx"))],
    );
    let frame = testing::commit_frame(
        7,
        "did:plc:aaaa",
        &[("create", "app.bsky.graph.block/3kabc", Some(&referenced))],
        &car,
    );

    let flow = consumer(&env).handle_message(&decode(&frame)).await.unwrap();
    assert_eq!(flow, Flow::Continue);
    assert!(env.store.list_blocks(env.account_id, BlockDirection::Blocking).await.unwrap().is_empty());
    assert_eq!(env.store.load_cursor(&Did::new("did:plc:aaaa")).await.unwrap(), Some(7));
}

#[tokio::test]
async fn op_without_cid_is_skipped() {
    let env = make_env("a.example", "did:plc:aaaa", false).await;
    let frame = testing::commit_frame(
        8,
        "did:plc:aaaa",
        &[("create", "app.bsky.graph.block/3kabc", None)],
        &testing::build_car(vec![], vec![]),
    );

    consumer(&env).handle_message(&decode(&frame)).await.unwrap();
    assert!(env.store.list_blocks(env.account_id, BlockDirection::Blocking).await.unwrap().is_empty());
    assert_eq!(env.store.load_cursor(&Did::new("did:plc:aaaa")).await.unwrap(), Some(8));
}

#[tokio::test]
async fn foreign_repo_commit_only_checkpoints() {
    let env = make_env("a.example", "did:plc:aaaa", false).await;
    let cid = testing::fake_cid(b"foreign");
    let car = testing::build_car(
        vec![],
        vec![(cid.clone(), testing::block_record_bytes("did:plc:xxxx"))],
    );
    let frame = testing::commit_frame(
        9,
        "did:plc:other",
        &[("create", "app.bsky.graph.block/3kabc", Some(&cid))],
        &car,
    );

    consumer(&env).handle_message(&decode(&frame)).await.unwrap();
    assert!(env.store.list_blocks(env.account_id, BlockDirection::Blocking).await.unwrap().is_empty());
    assert_eq!(env.store.load_cursor(&Did::new("did:plc:aaaa")).await.unwrap(), Some(9));
}

#[tokio::test]
async fn garbage_bundle_skips_commit_but_checkpoints() {
    let env = make_env("a.example", "did:plc:aaaa", false).await;
    let cid = testing::fake_cid(b"x");
    let frame = testing::commit_frame(
        10,
        "did:plc:aaaa",
        &[("create", "app.bsky.graph.block/3kabc", Some(&cid))],
        b"this is not a CAR file",
    );

    let flow = consumer(&env).handle_message(&decode(&frame)).await.unwrap();
    assert_eq!(flow, Flow::Continue, "a poisoned commit must not stall the stream");
    assert!(env.store.list_blocks(env.account_id, BlockDirection::Blocking).await.unwrap().is_empty());
    assert_eq!(env.store.load_cursor(&Did::new("did:plc:aaaa")).await.unwrap(), Some(10));
}

#[tokio::test]
async fn non_commit_kinds_checkpoint_their_seq() {
    let env = make_env("a.example", "did:plc:aaaa", false).await;
    let c = consumer(&env);

    c.handle_message(&decode(&testing::labeled_frame("#identity", Some(11)))).await.unwrap();
    assert_eq!(env.store.load_cursor(&Did::new("did:plc:aaaa")).await.unwrap(), Some(11));

    // Info frames carry no seq; the cursor stays put.
    c.handle_message(&decode(&testing::info_frame("OutdatedCursor"))).await.unwrap();
    assert_eq!(env.store.load_cursor(&Did::new("did:plc:aaaa")).await.unwrap(), Some(11));

    // Error frames do not halt the handler.
    let flow = c.handle_message(&decode(&testing::error_frame("ConsumerTooSlow"))).await.unwrap();
    assert_eq!(flow, Flow::Continue);
}

#[tokio::test]
async fn stop_signal_halts_before_processing() {
    let env = make_env("a.example", "did:plc:aaaa", false).await;
    let stop = CancellationToken::new();
    stop.cancel();
    let c = consumer_with_token(&env, stop);

    let cid = testing::fake_cid(b"halt");
    let car = testing::build_car(
        vec![],
        vec![(cid.clone(), testing::block_record_bytes("did:plc:xxxx"))],
    );
    let frame = testing::commit_frame(
        12,
        "did:plc:aaaa",
        &[("create", "app.bsky.graph.block/3kabc", Some(&cid))],
        &car,
    );

    let flow = c.handle_message(&decode(&frame)).await.unwrap();
    assert_eq!(flow, Flow::Halt);
    assert!(env.store.list_blocks(env.account_id, BlockDirection::Blocking).await.unwrap().is_empty());
    assert_eq!(env.store.load_cursor(&Did::new("did:plc:aaaa")).await.unwrap(), None);
}

#[tokio::test]
async fn primary_consumer_adds_to_list_and_tolerates_conflicts() {
    let env = make_env("p.example", "did:plc:pppp", true).await;
    env.ctx.set_list_uri("at://did:plc:pppp/app.bsky.graph.list/main".to_string());
    // The subject is already on the list.
    env.client.conflict_subjects.lock().unwrap().insert("did:plc:xxxx".to_string());

    let cid = testing::fake_cid(b"primary");
    let car = testing::build_car(
        vec![],
        vec![(cid.clone(), testing::block_record_bytes("did:plc:xxxx"))],
    );
    let frame = testing::commit_frame(
        13,
        "did:plc:pppp",
        &[("create", "app.bsky.graph.block/3kabc", Some(&cid))],
        &car,
    );

    consumer(&env).handle_message(&decode(&frame)).await.unwrap();

    // The row lands despite the list conflict.
    let rows = env.store.list_blocks(env.account_id, BlockDirection::Blocking).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(env.store.load_cursor(&Did::new("did:plc:pppp")).await.unwrap(), Some(13));
}

#[tokio::test]
async fn primary_consumer_creates_list_items() {
    let env = make_env("p.example", "did:plc:pppp", true).await;
    let list_uri = "at://did:plc:pppp/app.bsky.graph.list/main";
    env.ctx.set_list_uri(list_uri.to_string());

    let cid = testing::fake_cid(b"listadd");
    let car = testing::build_car(
        vec![],
        vec![(cid.clone(), testing::block_record_bytes("did:plc:xxxx"))],
    );
    let frame = testing::commit_frame(
        14,
        "did:plc:pppp",
        &[("create", "app.bsky.graph.block/3kabc", Some(&cid))],
        &car,
    );

    consumer(&env).handle_message(&decode(&frame)).await.unwrap();

    let items = env.client.created("app.bsky.graph.listitem");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["subject"], "did:plc:xxxx");
    assert_eq!(items[0]["list"], list_uri);
}
