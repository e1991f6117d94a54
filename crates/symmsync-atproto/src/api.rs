//! The graph API surface the agents consume, as an object-safe trait so
//! component tests can script the network.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use symmsync_core::constants::GRAPH_PAGE_LIMIT;
use symmsync_core::{Did, RecordRef, SyncError};

use crate::xrpc::XrpcClient;

// ── View objects ─────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Deserialize)]
pub struct ProfileViewBasic {
    pub did: Did,
    pub handle: String,
}

/// One page of `app.bsky.graph.getBlocks`.
#[derive(Clone, Debug, Deserialize)]
pub struct BlocksPage {
    pub blocks: Vec<ProfileViewBasic>,
    pub cursor: Option<String>,
}

/// List metadata from `app.bsky.graph.getLists` / `getList`.
#[derive(Clone, Debug, Deserialize)]
pub struct ListView {
    pub uri: String,
    pub cid: String,
    pub name: String,
    pub purpose: String,
    pub description: Option<String>,
    #[serde(rename = "indexedAt")]
    pub indexed_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ListItemView {
    pub uri: String,
    pub subject: ProfileViewBasic,
}

/// One page of `app.bsky.graph.getList`: the list's own metadata plus a
/// membership slice.
#[derive(Clone, Debug, Deserialize)]
pub struct ListPage {
    #[serde(default)]
    pub list: Option<ListView>,
    pub items: Vec<ListItemView>,
    pub cursor: Option<String>,
}

#[derive(Deserialize)]
struct GetListsResponse {
    lists: Vec<ListView>,
    cursor: Option<String>,
}

// ── Client trait ─────────────────────────────────────────────────────────────

/// Network operations one agent needs. Implemented by [`XrpcClient`] and by
/// scripted mocks in tests.
#[async_trait]
pub trait AtpClient: Send + Sync {
    /// The authenticated account's identity.
    fn did(&self) -> Did;

    async fn create_record(
        &self,
        collection: &str,
        record: serde_json::Value,
    ) -> Result<RecordRef, SyncError>;

    async fn put_record(
        &self,
        collection: &str,
        rkey: &str,
        record: serde_json::Value,
    ) -> Result<RecordRef, SyncError>;

    async fn delete_record(&self, collection: &str, rkey: &str) -> Result<(), SyncError>;

    /// One page of the authoritative own-blocks enumeration.
    async fn get_blocks(
        &self,
        limit: u32,
        cursor: Option<String>,
    ) -> Result<BlocksPage, SyncError>;

    /// Every list owned by `actor` (pagination handled internally).
    async fn get_lists(&self, actor: &Did) -> Result<Vec<ListView>, SyncError>;

    /// One page of a list's membership.
    async fn get_list(
        &self,
        list_uri: &str,
        limit: u32,
        cursor: Option<String>,
    ) -> Result<ListPage, SyncError>;
}

/// Wraps [`XrpcClient`] so trait consumers get a synchronous `did()`.
///
/// The DID is pinned at construction; it never changes for the lifetime of a
/// session, so there is no need to take the token lock per call.
pub struct AtpSessionClient {
    inner: XrpcClient,
    did: Did,
}

impl AtpSessionClient {
    pub async fn new(inner: XrpcClient) -> Self {
        let did = inner.did().await;
        Self { inner, did }
    }

    pub fn xrpc(&self) -> &XrpcClient {
        &self.inner
    }
}

#[async_trait]
impl AtpClient for AtpSessionClient {
    fn did(&self) -> Did {
        self.did.clone()
    }

    async fn create_record(
        &self,
        collection: &str,
        record: serde_json::Value,
    ) -> Result<RecordRef, SyncError> {
        self.inner.create_record(collection, record).await
    }

    async fn put_record(
        &self,
        collection: &str,
        rkey: &str,
        record: serde_json::Value,
    ) -> Result<RecordRef, SyncError> {
        self.inner.put_record(collection, rkey, record).await
    }

    async fn delete_record(&self, collection: &str, rkey: &str) -> Result<(), SyncError> {
        self.inner.delete_record(collection, rkey).await
    }

    async fn get_blocks(
        &self,
        limit: u32,
        cursor: Option<String>,
    ) -> Result<BlocksPage, SyncError> {
        let mut params = vec![("limit", limit.to_string())];
        if let Some(cursor) = cursor {
            params.push(("cursor", cursor));
        }
        self.inner.query("app.bsky.graph.getBlocks", &params).await
    }

    async fn get_lists(&self, actor: &Did) -> Result<Vec<ListView>, SyncError> {
        let mut lists = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut params = vec![
                ("actor", actor.as_str().to_string()),
                ("limit", GRAPH_PAGE_LIMIT.to_string()),
            ];
            if let Some(cursor) = cursor.take() {
                params.push(("cursor", cursor));
            }
            let page: GetListsResponse =
                self.inner.query("app.bsky.graph.getLists", &params).await?;
            lists.extend(page.lists);
            match page.cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        Ok(lists)
    }

    async fn get_list(
        &self,
        list_uri: &str,
        limit: u32,
        cursor: Option<String>,
    ) -> Result<ListPage, SyncError> {
        let mut params = vec![("list", list_uri.to_string()), ("limit", limit.to_string())];
        if let Some(cursor) = cursor {
            params.push(("cursor", cursor));
        }
        self.inner.query("app.bsky.graph.getList", &params).await
    }
}
