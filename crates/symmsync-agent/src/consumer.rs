//! Commit Consumer: real-time ingest of the agent's own block creations from
//! the repository commit stream.
//!
//! The supervising loop moves `disconnected → connecting → streaming`,
//! reconnecting with backoff on transport faults. Message handling is a pure
//! function of the decoded frame: decode failures skip the offending commit
//! but still advance the checkpoint (a poisoned commit must not stall the
//! stream), while store failures propagate to the supervisor, which waits
//! and restarts. Reprocessing after a lost checkpoint is safe because
//! `add_block` is idempotent.

use std::sync::Arc;

use chrono::Utc;
use ciborium::value::Value;
use rand::Rng;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use symmsync_atproto::records;
use symmsync_core::constants::{BLOCK_COLLECTION, LIST_ITEM_COLLECTION};
use symmsync_core::{BlockDirection, Did, SyncError};
use symmsync_firehose::{CarFile, CommitEvent, FirehoseClient, FirehoseMessage};
use symmsync_store::NewBlock;

use crate::AgentContext;

/// Handler verdict: keep reading or stop the stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Halt,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ConsumerState {
    Disconnected,
    Connecting,
    Streaming,
}

const INITIAL_RECONNECT_DELAY: Duration = Duration::from_secs(5);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(300);
const STORE_ERROR_DELAY: Duration = Duration::from_secs(60);

pub struct CommitConsumer {
    ctx: Arc<AgentContext>,
    firehose: FirehoseClient,
    stop: CancellationToken,
}

impl CommitConsumer {
    pub fn new(ctx: Arc<AgentContext>, firehose: FirehoseClient, stop: CancellationToken) -> Self {
        Self { ctx, firehose, stop }
    }

    /// Supervising loop; returns only on cancellation or handler halt.
    pub async fn run(self) {
        let mut reconnect_delay = INITIAL_RECONNECT_DELAY;

        'supervisor: while !self.stop.is_cancelled() {
            let cursor = match self.ctx.store.load_cursor(&self.ctx.did).await {
                // A missing checkpoint means "join at the live edge".
                Ok(cursor) => cursor,
                Err(e) => {
                    error!(handle = %self.ctx.handle, error = %e, "failed to load firehose cursor");
                    if self.wait(STORE_ERROR_DELAY).await {
                        break;
                    }
                    continue;
                }
            };
            info!(handle = %self.ctx.handle, ?cursor, state = ?ConsumerState::Connecting,
                  "firehose connecting");

            let connect = tokio::select! {
                _ = self.stop.cancelled() => break,
                result = self.firehose.connect(cursor) => result,
            };
            let mut stream = match connect {
                Ok(stream) => stream,
                Err(e) => {
                    let delay = with_jitter(reconnect_delay);
                    warn!(handle = %self.ctx.handle, error = %e,
                          delay_secs = delay.as_secs(), "firehose connect failed, backing off");
                    if self.wait(delay).await {
                        break;
                    }
                    reconnect_delay = (reconnect_delay * 2).min(MAX_RECONNECT_DELAY);
                    continue;
                }
            };

            reconnect_delay = INITIAL_RECONNECT_DELAY;
            info!(handle = %self.ctx.handle, state = ?ConsumerState::Streaming,
                  "firehose streaming");

            loop {
                let next = tokio::select! {
                    _ = self.stop.cancelled() => break 'supervisor,
                    message = stream.next_message() => message,
                };
                match next {
                    Ok(Some(message)) => match self.handle_message(&message).await {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Halt) => break 'supervisor,
                        Err(e) => {
                            error!(handle = %self.ctx.handle, error = %e,
                                   "store error in firehose handler, restarting after pause");
                            if self.wait(STORE_ERROR_DELAY).await {
                                break 'supervisor;
                            }
                            break;
                        }
                    },
                    Ok(None) => {
                        info!(handle = %self.ctx.handle, "firehose stream ended, reconnecting");
                        break;
                    }
                    Err(e) if matches!(e, SyncError::Decode(_)) => {
                        // Undecodable frame: skip it, keep the stream.
                        warn!(handle = %self.ctx.handle, error = %e, "skipping undecodable frame");
                    }
                    Err(e) => {
                        warn!(handle = %self.ctx.handle, error = %e, "firehose read error, reconnecting");
                        break;
                    }
                }
            }
            debug!(handle = %self.ctx.handle, state = ?ConsumerState::Disconnected,
                   "firehose disconnected");
        }

        debug!(handle = %self.ctx.handle, "commit consumer stopped");
    }

    /// Process one decoded stream message. Store errors propagate; everything
    /// else is handled locally so the stream keeps flowing.
    pub async fn handle_message(&self, message: &FirehoseMessage) -> Result<Flow, SyncError> {
        if self.stop.is_cancelled() {
            return Ok(Flow::Halt);
        }

        match message {
            FirehoseMessage::Commit(commit) => self.handle_commit(commit).await,
            FirehoseMessage::Info { name, message } => {
                info!(handle = %self.ctx.handle, name, ?message, "firehose info");
                Ok(Flow::Continue)
            }
            FirehoseMessage::Error { name, message } => {
                error!(handle = %self.ctx.handle, name, ?message, "firehose error frame");
                Ok(Flow::Continue)
            }
            FirehoseMessage::Other { kind, seq } => {
                debug!(handle = %self.ctx.handle, kind, ?seq, "skipping non-commit message");
                if let Some(seq) = seq {
                    self.checkpoint(*seq).await;
                }
                Ok(Flow::Continue)
            }
        }
    }

    async fn handle_commit(&self, commit: &CommitEvent) -> Result<Flow, SyncError> {
        if commit.repo != self.ctx.did.as_str() {
            self.checkpoint(commit.seq).await;
            return Ok(Flow::Continue);
        }

        debug!(handle = %self.ctx.handle, seq = commit.seq, ops = commit.ops.len(),
               "processing own commit");

        let car = match CarFile::decode(&commit.blocks) {
            Ok(car) => Some(car),
            Err(e) => {
                warn!(handle = %self.ctx.handle, seq = commit.seq, error = %e,
                      "undecodable block bundle, skipping commit");
                None
            }
        };

        if let Some(car) = car {
            for op in &commit.ops {
                if op.action != "create" || op.collection() != BLOCK_COLLECTION {
                    continue;
                }
                let Some(cid) = &op.cid else {
                    warn!(handle = %self.ctx.handle, path = %op.path,
                          "block create op without CID, skipping");
                    continue;
                };
                let Some(record_bytes) = car.get(cid) else {
                    warn!(handle = %self.ctx.handle, cid = %cid,
                          "op CID missing from bundle, skipping");
                    continue;
                };
                let subject = match block_subject(record_bytes) {
                    Ok(subject) => subject,
                    Err(e) => {
                        warn!(handle = %self.ctx.handle, cid = %cid, error = %e,
                              "undecodable block record, skipping");
                        continue;
                    }
                };

                info!(handle = %self.ctx.handle, subject = %subject, seq = commit.seq,
                      "block creation observed on firehose");
                // The store's whitelist guard filters self-blocks.
                self.ctx
                    .store
                    .add_block(NewBlock {
                        did: subject.clone(),
                        handle: None,
                        source_account_id: self.ctx.account_id,
                        direction: BlockDirection::Blocking,
                        reason: Some(format!("firehose seq {}", commit.seq)),
                    })
                    .await?;

                if self.ctx.is_primary {
                    self.add_to_list(&subject).await;
                }
            }
        }

        self.checkpoint(commit.seq).await;
        Ok(Flow::Continue)
    }

    /// Best-effort list-item creation for the primary; conflicts mean the
    /// subject is already listed.
    async fn add_to_list(&self, subject: &Did) {
        let Some(list_uri) = self.ctx.list_uri() else {
            warn!(handle = %self.ctx.handle, subject = %subject,
                  "primary has no moderation list yet, skipping list add");
            return;
        };
        let record = records::list_item_record(subject, &list_uri, Utc::now());
        match self.ctx.client.create_record(LIST_ITEM_COLLECTION, record).await {
            Ok(_) => {
                info!(handle = %self.ctx.handle, subject = %subject, "added to moderation list")
            }
            Err(e) if e.is_conflict() => {
                debug!(handle = %self.ctx.handle, subject = %subject, "already on moderation list")
            }
            Err(e) => {
                // The publisher converges membership on its next pass.
                error!(handle = %self.ctx.handle, subject = %subject, error = %e,
                       "failed to add subject to moderation list")
            }
        }
    }

    /// Best-effort checkpoint; on loss, reprocessing is idempotent.
    async fn checkpoint(&self, seq: i64) {
        if let Err(e) = self.ctx.store.save_cursor(&self.ctx.did, seq).await {
            warn!(handle = %self.ctx.handle, seq, error = %e, "failed to save firehose cursor");
        }
    }

    /// Timed wait on the stop token; returns `true` when cancelled.
    async fn wait(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.stop.cancelled() => true,
            _ = sleep(duration) => false,
        }
    }
}

/// Extract the blocked DID from a DAG-CBOR block record.
fn block_subject(record_bytes: &[u8]) -> Result<Did, SyncError> {
    let value: Value = ciborium::de::from_reader(record_bytes)
        .map_err(|e| SyncError::Decode(format!("block record: {e}")))?;
    let Value::Map(entries) = value else {
        return Err(SyncError::Decode("block record is not a map".into()));
    };
    let subject = entries
        .iter()
        .find(|(k, _)| matches!(k, Value::Text(t) if t == "subject"))
        .and_then(|(_, v)| match v {
            Value::Text(t) => Some(t.as_str()),
            _ => None,
        })
        .ok_or_else(|| SyncError::Decode("block record missing subject".into()))?;
    Did::parse(subject)
}

fn with_jitter(base: Duration) -> Duration {
    base + Duration::from_millis(rand::thread_rng().gen_range(0..1000))
}
