//! Orchestrator: construct the shared infrastructure, bring up one agent per
//! configured account, and supervise shutdown.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use symmsync_agent::{AccountAgent, AgentTasks, Reconciler};
use symmsync_atproto::api::AtpSessionClient;
use symmsync_atproto::{establish_session, AtpClient, RateGovernor};
use symmsync_core::config::Config;
use symmsync_core::Credentials;
use symmsync_directory::{ClearskyClient, Directory};
use symmsync_store::{BlockStore, FileSessionStore, PgStore, SessionStore};

/// Graceful-join budgets from the shutdown path.
const CONSUMER_JOIN_TIMEOUT: Duration = Duration::from_secs(10);
const RECONCILER_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn run(config: Config, once: bool, session_dir: PathBuf) -> anyhow::Result<()> {
    // ── Shared infrastructure ─────────────────────────────────────────────────
    let store = Arc::new(
        PgStore::connect(&config.database_url)
            .await
            .context("connecting to database")?,
    );
    store.ensure_schema().await.context("ensuring database schema")?;
    let block_store: Arc<dyn BlockStore> = store.clone();

    let session_store: Arc<dyn SessionStore> = if config.session.file_backend {
        info!(dir = %session_dir.display(), "using file-backed sessions");
        Arc::new(FileSessionStore::new(session_dir))
    } else {
        store.clone()
    };

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(60))
        .build()
        .context("building HTTP client")?;

    let directory: Arc<dyn Directory> =
        Arc::new(ClearskyClient::new(config.service.directory_url.clone(), http.clone()));

    // ── Logins, serialized with spacing ───────────────────────────────────────
    let mut roster: Vec<(Credentials, bool)> = vec![(config.primary.clone(), true)];
    roster.extend(config.secondaries.iter().cloned().map(|c| (c, false)));

    let mut agents: Vec<AccountAgent> = Vec::new();
    for (index, (creds, is_primary)) in roster.into_iter().enumerate() {
        if index > 0 {
            sleep(config.login_spacing).await;
        }
        let client = match establish_session(
            &config.service.pds_url,
            http.clone(),
            &creds,
            Arc::clone(&session_store),
            &config.session,
        )
        .await
        {
            Ok(client) => client,
            Err(e) if e.is_rate_limited() => {
                warn!(handle = %creds.handle,
                      "login rate limited (~10/day budget), skipping account for this run");
                continue;
            }
            Err(e) if is_primary => {
                return Err(e).context(format!("logging in primary account {}", creds.handle));
            }
            Err(e) => {
                warn!(handle = %creds.handle, error = %e, "login failed, skipping account");
                continue;
            }
        };

        let client: Arc<dyn AtpClient> = Arc::new(AtpSessionClient::new(client).await);
        let governor = Arc::new(RateGovernor::new(config.governor.clone()));
        let agent = AccountAgent::initialize(
            creds.handle.clone(),
            is_primary,
            Arc::clone(&block_store),
            client,
            Arc::clone(&directory),
            governor,
            &config.service,
            config.reconciler.clone(),
            config.publisher.clone(),
        )
        .await
        .with_context(|| format!("initializing agent for {}", creds.handle))?;
        agents.push(agent);
    }

    if agents.is_empty() {
        bail!("no agents could be initialized");
    }
    info!(count = agents.len(), "agents initialized");

    if once {
        return run_once(&agents, &config).await;
    }

    // ── Long-running tasks ────────────────────────────────────────────────────
    let mut tasks: Vec<(String, AgentTasks)> = agents
        .iter()
        .map(|agent| (agent.handle().to_string(), agent.start()))
        .collect();
    info!("all agents started; press CTRL+C to exit");

    shutdown_signal().await.context("installing signal handlers")?;
    info!("shutdown initiated");

    for agent in &agents {
        agent.stop();
    }
    for (handle, tasks) in tasks.drain(..) {
        join_with_timeout(&handle, "consumer", tasks.consumer, CONSUMER_JOIN_TIMEOUT).await;
        join_with_timeout(&handle, "reconciler", tasks.reconciler, RECONCILER_JOIN_TIMEOUT).await;
    }

    info!("shutdown complete");
    Ok(())
}

/// One full synchronization cycle per agent, then exit (operator tooling).
async fn run_once(agents: &[AccountAgent], config: &Config) -> anyhow::Result<()> {
    for agent in agents {
        let reconciler = Reconciler::new(
            agent.context(),
            config.reconciler.clone(),
            config.publisher.clone(),
            CancellationToken::new(),
        );
        if let Err(e) = reconciler.sync_cycle(true).await {
            error!(handle = %agent.handle(), error = %e, "one-shot sync failed");
        }
    }
    info!("one-shot sync complete");
    Ok(())
}

async fn join_with_timeout(handle: &str, task: &str, mut join: JoinHandle<()>, budget: Duration) {
    match timeout(budget, &mut join).await {
        Ok(Ok(())) => info!(handle, task, "task stopped gracefully"),
        Ok(Err(e)) => warn!(handle, task, error = %e, "task panicked during shutdown"),
        Err(_) => {
            warn!(handle, task, timeout_secs = budget.as_secs(),
                  "task did not stop in time, aborting");
            join.abort();
        }
    }
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        let mut term =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .context("installing SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.context("waiting for CTRL+C")?,
            _ = term.recv() => {}
        }
        Ok(())
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.context("waiting for CTRL+C")
    }
}
