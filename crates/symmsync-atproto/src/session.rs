//! Session establishment: load a persisted session, decide between resume /
//! refresh / full login by token age, execute the decision, persist results.
//!
//! The PDS budgets roughly 10 full logins per account per day, so the policy
//! is tuned to make them rare (once per refresh-token lifetime) and refreshes
//! cheap.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use symmsync_core::config::SessionConfig;
use symmsync_core::{Credentials, SyncError};
use symmsync_store::{SessionStore, StoredSession};

use crate::xrpc::{SessionTokens, XrpcClient};

/// What to do with a persisted session at startup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPlan {
    /// No usable session (absent, or refresh token too old): log in fresh.
    FullLogin,
    /// Access token stale but refresh token young: exchange tokens.
    Refresh,
    /// Both tokens young: construct the client from the persisted pair.
    Resume,
}

/// Pure decision function over token ages (§ refresh policy).
pub fn plan_session(
    session: Option<&StoredSession>,
    now: DateTime<Utc>,
    cfg: &SessionConfig,
) -> SessionPlan {
    let Some(session) = session else {
        return SessionPlan::FullLogin;
    };
    let refresh_age = (now - session.refresh_date).to_std().unwrap_or_default();
    if refresh_age > cfg.refresh_ttl {
        return SessionPlan::FullLogin;
    }
    let access_age = (now - session.access_date).to_std().unwrap_or_default();
    if access_age > cfg.access_ttl {
        return SessionPlan::Refresh;
    }
    SessionPlan::Resume
}

/// Establish a working client for `creds`, going through the persisted
/// session when possible. A failed refresh falls back to a full login; a
/// rate-limited login surfaces as `RateLimited` so the orchestrator can skip
/// the account for this run.
pub async fn establish_session(
    base: &str,
    http: reqwest::Client,
    creds: &Credentials,
    sessions: Arc<dyn SessionStore>,
    cfg: &SessionConfig,
) -> Result<XrpcClient, SyncError> {
    let stored = sessions.load(&creds.handle).await?;
    let plan = plan_session(stored.as_ref(), Utc::now(), cfg);

    if let Some(stored) = stored {
        let tokens = SessionTokens {
            did: stored.did.clone(),
            handle: stored.handle.clone(),
            access_jwt: stored.access_jwt.clone(),
            refresh_jwt: stored.refresh_jwt.clone(),
        };
        match plan {
            SessionPlan::Resume => {
                info!(handle = %creds.handle, "resuming persisted session");
                return Ok(XrpcClient::resume(base, http, tokens)
                    .with_session_store(sessions));
            }
            SessionPlan::Refresh => {
                info!(handle = %creds.handle, "access token stale, refreshing session");
                let client = XrpcClient::resume(base, http.clone(), tokens);
                match client.refresh().await {
                    Ok(refreshed) => {
                        sessions.update_access(&creds.handle, &refreshed.access_jwt).await?;
                        return Ok(client.with_session_store(sessions));
                    }
                    Err(e) => {
                        warn!(handle = %creds.handle, error = %e,
                              "session refresh failed, falling back to full login");
                    }
                }
            }
            SessionPlan::FullLogin => {
                info!(handle = %creds.handle, "refresh token expired, performing full login");
            }
        }
    } else {
        info!(handle = %creds.handle, "no persisted session, performing full login");
    }

    full_login(base, http, creds, sessions).await
}

async fn full_login(
    base: &str,
    http: reqwest::Client,
    creds: &Credentials,
    sessions: Arc<dyn SessionStore>,
) -> Result<XrpcClient, SyncError> {
    let (client, tokens) =
        XrpcClient::login(base, http, &creds.handle, &creds.password).await?;
    let now = Utc::now();
    let session = StoredSession {
        handle: tokens.handle.clone(),
        did: tokens.did.clone(),
        access_jwt: tokens.access_jwt.clone(),
        refresh_jwt: tokens.refresh_jwt.clone(),
        access_date: now,
        refresh_date: now,
    };
    if let Err(e) = sessions.save(&session).await {
        // The login itself succeeded; losing the session row only costs a
        // login charge on the next restart.
        warn!(handle = %creds.handle, error = %e, "failed to persist new session");
    }
    info!(handle = %tokens.handle, did = %tokens.did, "full login successful");
    Ok(client.with_session_store(sessions))
}
