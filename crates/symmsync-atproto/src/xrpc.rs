//! XRPC client over reqwest.
//!
//! Error classification into the `SyncError` taxonomy happens here, once, at
//! the boundary: downstream code switches on the variant and never inspects
//! message strings. Authenticated calls retry exactly once after an
//! `ExpiredToken` rejection, going through `refreshSession` in between.

use std::sync::Arc;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use symmsync_core::{Did, RecordRef, SyncError};
use symmsync_store::SessionStore;

/// The token pair plus the identity it belongs to.
#[derive(Clone, Debug)]
pub struct SessionTokens {
    pub did: Did,
    pub handle: String,
    pub access_jwt: String,
    pub refresh_jwt: String,
}

#[derive(Deserialize)]
struct SessionResponse {
    did: String,
    handle: String,
    #[serde(rename = "accessJwt")]
    access_jwt: String,
    #[serde(rename = "refreshJwt")]
    refresh_jwt: String,
}

#[derive(Deserialize, Default)]
struct XrpcErrorBody {
    error: Option<String>,
    message: Option<String>,
}

/// Authenticated XRPC client for one account.
pub struct XrpcClient {
    http: reqwest::Client,
    base: String,
    tokens: RwLock<SessionTokens>,
    /// Written through on mid-run token refreshes; startup persistence is the
    /// session manager's job.
    session_store: Option<Arc<dyn SessionStore>>,
}

impl XrpcClient {
    /// Perform a full login (`com.atproto.server.createSession`).
    pub async fn login(
        base: &str,
        http: reqwest::Client,
        identifier: &str,
        password: &str,
    ) -> Result<(Self, SessionTokens), SyncError> {
        let url = format!("{base}/xrpc/com.atproto.server.createSession");
        let response = http
            .post(&url)
            .json(&serde_json::json!({ "identifier": identifier, "password": password }))
            .send()
            .await
            .map_err(transport)?;
        let session: SessionResponse = decode_response(response).await?;
        let tokens = SessionTokens {
            did: Did::new(session.did),
            handle: session.handle,
            access_jwt: session.access_jwt,
            refresh_jwt: session.refresh_jwt,
        };
        let client = Self {
            http,
            base: base.to_string(),
            tokens: RwLock::new(tokens.clone()),
            session_store: None,
        };
        Ok((client, tokens))
    }

    /// Construct from persisted tokens without touching the network.
    pub fn resume(base: &str, http: reqwest::Client, tokens: SessionTokens) -> Self {
        Self {
            http,
            base: base.to_string(),
            tokens: RwLock::new(tokens),
            session_store: None,
        }
    }

    /// Persist access-token updates from mid-run refreshes to this store.
    pub fn with_session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.session_store = Some(store);
        self
    }

    pub async fn tokens(&self) -> SessionTokens {
        self.tokens.read().await.clone()
    }

    pub async fn did(&self) -> Did {
        self.tokens.read().await.did.clone()
    }

    pub async fn handle(&self) -> String {
        self.tokens.read().await.handle.clone()
    }

    /// Exchange the refresh token for a new token pair
    /// (`com.atproto.server.refreshSession`). The rotated pair replaces the
    /// in-memory tokens; the persisted row gets the narrow access update.
    pub async fn refresh(&self) -> Result<SessionTokens, SyncError> {
        let refresh_jwt = self.tokens.read().await.refresh_jwt.clone();
        let url = format!("{}/xrpc/com.atproto.server.refreshSession", self.base);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&refresh_jwt)
            .send()
            .await
            .map_err(transport)?;
        let session: SessionResponse = decode_response(response).await?;

        let mut tokens = self.tokens.write().await;
        tokens.did = Did::new(session.did);
        tokens.handle = session.handle;
        tokens.access_jwt = session.access_jwt;
        tokens.refresh_jwt = session.refresh_jwt;
        let updated = tokens.clone();
        drop(tokens);

        if let Some(store) = &self.session_store {
            if let Err(e) = store.update_access(&updated.handle, &updated.access_jwt).await {
                warn!(handle = %updated.handle, error = %e, "failed to persist refreshed access token");
            }
        }
        Ok(updated)
    }

    // ── Repo record operations ───────────────────────────────────────────────

    pub async fn create_record(
        &self,
        collection: &str,
        record: serde_json::Value,
    ) -> Result<RecordRef, SyncError> {
        let repo = self.did().await;
        self.procedure(
            "com.atproto.repo.createRecord",
            serde_json::json!({
                "repo": repo.as_str(),
                "collection": collection,
                "record": record,
            }),
        )
        .await
    }

    pub async fn put_record(
        &self,
        collection: &str,
        rkey: &str,
        record: serde_json::Value,
    ) -> Result<RecordRef, SyncError> {
        let repo = self.did().await;
        self.procedure(
            "com.atproto.repo.putRecord",
            serde_json::json!({
                "repo": repo.as_str(),
                "collection": collection,
                "rkey": rkey,
                "record": record,
            }),
        )
        .await
    }

    pub async fn delete_record(&self, collection: &str, rkey: &str) -> Result<(), SyncError> {
        let repo = self.did().await;
        let _: serde_json::Value = self
            .procedure(
                "com.atproto.repo.deleteRecord",
                serde_json::json!({
                    "repo": repo.as_str(),
                    "collection": collection,
                    "rkey": rkey,
                }),
            )
            .await?;
        Ok(())
    }

    // ── Request plumbing ─────────────────────────────────────────────────────

    /// Authenticated POST; retries once through a refresh on expired tokens.
    pub(crate) async fn procedure<T: DeserializeOwned>(
        &self,
        nsid: &str,
        body: serde_json::Value,
    ) -> Result<T, SyncError> {
        match self.procedure_once(nsid, &body).await {
            Err(e) if e.is_auth_expired() => {
                debug!(nsid, "access token expired mid-run, refreshing");
                self.refresh().await?;
                self.procedure_once(nsid, &body).await
            }
            other => other,
        }
    }

    async fn procedure_once<T: DeserializeOwned>(
        &self,
        nsid: &str,
        body: &serde_json::Value,
    ) -> Result<T, SyncError> {
        let access = self.tokens.read().await.access_jwt.clone();
        let url = format!("{}/xrpc/{nsid}", self.base);
        let response = self
            .http
            .post(&url)
            .bearer_auth(access)
            .json(body)
            .send()
            .await
            .map_err(transport)?;
        decode_response(response).await
    }

    /// Authenticated GET; retries once through a refresh on expired tokens.
    pub(crate) async fn query<T: DeserializeOwned>(
        &self,
        nsid: &str,
        params: &[(&str, String)],
    ) -> Result<T, SyncError> {
        match self.query_once(nsid, params).await {
            Err(e) if e.is_auth_expired() => {
                debug!(nsid, "access token expired mid-run, refreshing");
                self.refresh().await?;
                self.query_once(nsid, params).await
            }
            other => other,
        }
    }

    async fn query_once<T: DeserializeOwned>(
        &self,
        nsid: &str,
        params: &[(&str, String)],
    ) -> Result<T, SyncError> {
        let access = self.tokens.read().await.access_jwt.clone();
        let url = format!("{}/xrpc/{nsid}", self.base);
        let response = self
            .http
            .get(&url)
            .bearer_auth(access)
            .query(params)
            .send()
            .await
            .map_err(transport)?;
        decode_response(response).await
    }
}

fn transport(e: reqwest::Error) -> SyncError {
    // Connect faults, resets and timeouts are all worth retrying.
    SyncError::Transient(e.to_string())
}

async fn decode_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, SyncError> {
    let status = response.status();
    if status.is_success() {
        return response
            .json()
            .await
            .map_err(|e| SyncError::Decode(format!("response body: {e}")));
    }
    let body: XrpcErrorBody = response.json().await.unwrap_or_default();
    Err(classify(status, &body))
}

/// Map an XRPC failure onto the error taxonomy.
fn classify(status: StatusCode, body: &XrpcErrorBody) -> SyncError {
    let name = body.error.as_deref().unwrap_or("");
    let message = body.message.as_deref().unwrap_or("");
    let detail = if message.is_empty() {
        format!("{status} {name}")
    } else {
        format!("{status} {name}: {message}")
    };

    if status == StatusCode::TOO_MANY_REQUESTS || name == "RateLimitExceeded" {
        return SyncError::RateLimited(detail);
    }
    if status == StatusCode::UNAUTHORIZED
        || matches!(name, "ExpiredToken" | "InvalidToken" | "AuthenticationRequired")
    {
        return SyncError::AuthExpired(detail);
    }
    if status == StatusCode::CONFLICT
        || name.contains("Conflict")
        || message.to_lowercase().contains("already exists")
    {
        return SyncError::Conflict(detail);
    }
    if status.is_server_error() {
        return SyncError::Transient(detail);
    }
    SyncError::Permanent(detail)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(error: &str, message: &str) -> XrpcErrorBody {
        XrpcErrorBody {
            error: Some(error.to_string()),
            message: Some(message.to_string()),
        }
    }

    #[test]
    fn classifies_rate_limits() {
        let e = classify(StatusCode::TOO_MANY_REQUESTS, &XrpcErrorBody::default());
        assert!(e.is_rate_limited());
        let e = classify(StatusCode::BAD_REQUEST, &body("RateLimitExceeded", "slow down"));
        assert!(e.is_rate_limited());
    }

    #[test]
    fn classifies_auth_failures() {
        assert!(classify(StatusCode::UNAUTHORIZED, &XrpcErrorBody::default()).is_auth_expired());
        assert!(classify(StatusCode::BAD_REQUEST, &body("ExpiredToken", "")).is_auth_expired());
        assert!(classify(StatusCode::BAD_REQUEST, &body("InvalidToken", "")).is_auth_expired());
    }

    #[test]
    fn classifies_conflicts() {
        assert!(classify(StatusCode::CONFLICT, &XrpcErrorBody::default()).is_conflict());
        let e = classify(StatusCode::BAD_REQUEST, &body("InvalidSwap", "Record already exists"));
        assert!(e.is_conflict());
    }

    #[test]
    fn server_errors_are_transient_and_the_rest_permanent() {
        assert!(classify(StatusCode::BAD_GATEWAY, &XrpcErrorBody::default()).is_transient());
        let e = classify(StatusCode::BAD_REQUEST, &body("InvalidRequest", "bad cursor"));
        assert!(matches!(e, SyncError::Permanent(_)));
    }
}
