//! symmsync-agent — one agent per managed account.
//!
//! An agent composes the store, the network client, the directory client and
//! the rate governor, and runs two long-lived tasks:
//!   Commit Consumer — real-time ingest of the account's own block creations
//!   Reconciler      — periodic convergence against the authoritative
//!                     enumerations (and, for the primary, secondary-block
//!                     propagation plus the list publisher)

pub mod consumer;
pub mod modlist;
pub mod publisher;
pub mod reconciler;

use std::sync::{Arc, RwLock};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use symmsync_atproto::{AtpClient, RateGovernor};
use symmsync_core::config::{PublisherConfig, ReconcilerConfig, ServiceConfig};
use symmsync_core::{Did, SyncError};
use symmsync_directory::Directory;
use symmsync_firehose::FirehoseClient;
use symmsync_store::BlockStore;

pub use consumer::CommitConsumer;
pub use publisher::{ListPublisher, PublishStats};
pub use reconciler::Reconciler;

/// Shared state of one managed account, handed to every task the agent runs.
pub struct AgentContext {
    pub handle: String,
    pub did: Did,
    pub account_id: i64,
    pub is_primary: bool,
    pub store: Arc<dyn BlockStore>,
    pub client: Arc<dyn AtpClient>,
    pub directory: Arc<dyn Directory>,
    pub governor: Arc<RateGovernor>,
    pub list_name: String,
    pub list_description: String,
    /// The primary's canonical moderation-list URI, once resolved.
    list_uri: RwLock<Option<String>>,
}

impl AgentContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        handle: impl Into<String>,
        did: Did,
        account_id: i64,
        is_primary: bool,
        store: Arc<dyn BlockStore>,
        client: Arc<dyn AtpClient>,
        directory: Arc<dyn Directory>,
        governor: Arc<RateGovernor>,
        list_name: impl Into<String>,
        list_description: impl Into<String>,
    ) -> Self {
        Self {
            handle: handle.into(),
            did,
            account_id,
            is_primary,
            store,
            client,
            directory,
            governor,
            list_name: list_name.into(),
            list_description: list_description.into(),
            list_uri: RwLock::new(None),
        }
    }

    pub fn list_uri(&self) -> Option<String> {
        self.list_uri.read().ok().and_then(|g| g.clone())
    }

    pub fn set_list_uri(&self, uri: String) {
        if let Ok(mut guard) = self.list_uri.write() {
            *guard = Some(uri);
        }
    }
}

/// Handles to an agent's running tasks.
pub struct AgentTasks {
    pub consumer: JoinHandle<()>,
    pub reconciler: JoinHandle<()>,
}

/// One managed account's composition root.
pub struct AccountAgent {
    ctx: Arc<AgentContext>,
    firehose: FirehoseClient,
    reconciler_cfg: ReconcilerConfig,
    publisher_cfg: PublisherConfig,
    consumer_stop: CancellationToken,
    reconciler_stop: CancellationToken,
}

impl AccountAgent {
    /// Build the agent after a successful login: register the account row
    /// (resolving any placeholder DID) and, for the primary, reconcile the
    /// moderation list before any task starts.
    #[allow(clippy::too_many_arguments)]
    pub async fn initialize(
        handle: String,
        is_primary: bool,
        store: Arc<dyn BlockStore>,
        client: Arc<dyn AtpClient>,
        directory: Arc<dyn Directory>,
        governor: Arc<RateGovernor>,
        service: &ServiceConfig,
        reconciler_cfg: ReconcilerConfig,
        publisher_cfg: PublisherConfig,
    ) -> Result<Self, SyncError> {
        let did = client.did();
        let account_id = store.register_account(&handle, &did, is_primary).await?;
        info!(handle = %handle, did = %did, account_id, is_primary, "account registered");

        let ctx = Arc::new(AgentContext {
            handle,
            did,
            account_id,
            is_primary,
            store,
            client,
            directory,
            governor,
            list_name: service.list_name.clone(),
            list_description: service.list_description.clone(),
            list_uri: RwLock::new(None),
        });

        if is_primary {
            match modlist::ensure_mod_list(&ctx).await {
                Ok(uri) => ctx.set_list_uri(uri),
                // The reconciler retries on every cycle; the consumer just
                // skips list writes until a list exists.
                Err(e) => error!(handle = %ctx.handle, error = %e,
                                 "moderation-list reconciliation failed, continuing without list"),
            }
        }

        Ok(Self {
            ctx,
            firehose: FirehoseClient::new(service.firehose_url.clone()),
            reconciler_cfg,
            publisher_cfg,
            consumer_stop: CancellationToken::new(),
            reconciler_stop: CancellationToken::new(),
        })
    }

    pub fn context(&self) -> Arc<AgentContext> {
        Arc::clone(&self.ctx)
    }

    pub fn handle(&self) -> &str {
        &self.ctx.handle
    }

    /// Launch the Commit Consumer and Reconciler tasks.
    pub fn start(&self) -> AgentTasks {
        let consumer = CommitConsumer::new(
            Arc::clone(&self.ctx),
            self.firehose.clone(),
            self.consumer_stop.clone(),
        );
        let reconciler = Reconciler::new(
            Arc::clone(&self.ctx),
            self.reconciler_cfg.clone(),
            self.publisher_cfg.clone(),
            self.reconciler_stop.clone(),
        );
        AgentTasks {
            consumer: tokio::spawn(consumer.run()),
            reconciler: tokio::spawn(reconciler.run()),
        }
    }

    /// Signal both tasks to stop; the orchestrator bounds the joins.
    pub fn stop(&self) {
        self.consumer_stop.cancel();
        self.reconciler_stop.cancel();
    }
}
