//! symmsync-directory — client for the external "who blocks me" directory.
//!
//! The directory serves 100-record pages; an absent page, an empty blocklist
//! or a 404 all mean "end of list". 429 responses surface as `RateLimited`
//! so the reconciler can back off and retry the same page.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use symmsync_core::{Did, SyncError};

/// One directory row: who blocks the queried account, and since when.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockerRecord {
    pub did: Did,
    pub blocked_date: String,
}

/// Directory operations the reconciler consumes.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Total number of accounts blocking `subject`, if the directory knows it.
    async fn total_blocked_by(&self, subject: &str) -> Result<Option<u64>, SyncError>;

    /// One page (1-based) of blockers. `None` means past the end of the list.
    /// Rows missing required fields have already been dropped.
    async fn blocked_by_page(
        &self,
        subject: &str,
        page: u32,
    ) -> Result<Option<Vec<BlockerRecord>>, SyncError>;
}

// ── Wire shapes ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct TotalResponse {
    data: Option<TotalData>,
}

#[derive(Deserialize)]
struct TotalData {
    count: Option<u64>,
}

#[derive(Deserialize)]
struct PageResponse {
    data: Option<PageData>,
}

#[derive(Deserialize)]
struct PageData {
    blocklist: Option<Vec<RawBlocker>>,
}

#[derive(Deserialize)]
struct RawBlocker {
    did: Option<String>,
    blocked_date: Option<String>,
}

#[derive(Deserialize)]
struct HandleResponse {
    data: Option<HandleData>,
}

#[derive(Deserialize)]
struct HandleData {
    handle_identifier: Option<String>,
    did_identifier: Option<String>,
}

/// HTTP client against a ClearSky-compatible directory.
pub struct ClearskyClient {
    http: reqwest::Client,
    base: String,
}

impl ClearskyClient {
    pub fn new(base: impl Into<String>, http: reqwest::Client) -> Self {
        Self { http, base: base.into() }
    }

    /// GET a directory endpoint; `Ok(None)` on 404.
    async fn fetch<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<Option<T>, SyncError> {
        let url = format!("{}{path}", self.base);
        debug!(url = %url, "directory fetch");
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| SyncError::Transient(format!("directory request: {e}")))?;

        match response.status().as_u16() {
            404 => Ok(None),
            429 => Err(SyncError::RateLimited(format!("directory 429 for {url}"))),
            status if (500..600).contains(&status) => {
                Err(SyncError::Transient(format!("directory {status} for {url}")))
            }
            status if !(200..300).contains(&status) => {
                Err(SyncError::Permanent(format!("directory {status} for {url}")))
            }
            _ => response
                .json()
                .await
                .map(Some)
                .map_err(|e| SyncError::Decode(format!("directory body: {e}"))),
        }
    }

    /// Resolve the handle currently attached to a DID.
    pub async fn resolve_handle(&self, did: &Did) -> Result<Option<String>, SyncError> {
        let response: Option<HandleResponse> = self.fetch(&format!("/get-handle/{did}")).await?;
        Ok(response.and_then(|r| r.data).and_then(|d| d.handle_identifier))
    }

    /// Resolve a handle to its DID.
    pub async fn resolve_did(&self, handle: &str) -> Result<Option<Did>, SyncError> {
        let response: Option<HandleResponse> = self.fetch(&format!("/get-did/{handle}")).await?;
        Ok(response
            .and_then(|r| r.data)
            .and_then(|d| d.did_identifier)
            .map(Did::new))
    }
}

#[async_trait]
impl Directory for ClearskyClient {
    async fn total_blocked_by(&self, subject: &str) -> Result<Option<u64>, SyncError> {
        let response: Option<TotalResponse> =
            self.fetch(&format!("/single-blocklist/total/{subject}")).await?;
        Ok(response.and_then(|r| r.data).and_then(|d| d.count))
    }

    async fn blocked_by_page(
        &self,
        subject: &str,
        page: u32,
    ) -> Result<Option<Vec<BlockerRecord>>, SyncError> {
        let path = if page <= 1 {
            format!("/single-blocklist/{subject}")
        } else {
            format!("/single-blocklist/{subject}/{page}")
        };
        let Some(response) = self.fetch::<PageResponse>(&path).await? else {
            return Ok(None);
        };
        let Some(rows) = response.data.and_then(|d| d.blocklist) else {
            return Ok(None);
        };

        let mut valid = Vec::with_capacity(rows.len());
        let mut dropped = 0usize;
        for row in rows {
            match (row.did, row.blocked_date) {
                (Some(did), Some(blocked_date)) if did.starts_with("did:") => {
                    valid.push(BlockerRecord { did: Did::new(did), blocked_date });
                }
                _ => dropped += 1,
            }
        }
        if dropped > 0 {
            warn!(subject, page, dropped, "directory rows missing required fields");
        }
        Ok(Some(valid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Wire-shape decoding; the HTTP paths themselves are exercised against
    // the live service by operators, not unit tests.

    #[test]
    fn total_response_decodes() {
        let parsed: TotalResponse =
            serde_json::from_str(r#"{"data": {"count": 1234}}"#).unwrap();
        assert_eq!(parsed.data.and_then(|d| d.count), Some(1234));

        let empty: TotalResponse = serde_json::from_str(r#"{"data": {}}"#).unwrap();
        assert_eq!(empty.data.and_then(|d| d.count), None);
    }

    #[test]
    fn page_response_decodes_and_tolerates_partial_rows() {
        let parsed: PageResponse = serde_json::from_str(
            r#"{"data": {"blocklist": [
                {"did": "did:plc:x", "blocked_date": "2025-01-01"},
                {"did": "did:plc:y"}
            ]}}"#,
        )
        .unwrap();
        let rows = parsed.data.and_then(|d| d.blocklist).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].did.as_deref(), Some("did:plc:x"));
        assert!(rows[1].blocked_date.is_none());
    }

    #[test]
    fn missing_blocklist_means_end() {
        let parsed: PageResponse = serde_json::from_str(r#"{"data": {}}"#).unwrap();
        assert!(parsed.data.and_then(|d| d.blocklist).is_none());
    }
}
