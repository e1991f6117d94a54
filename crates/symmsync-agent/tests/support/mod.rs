//! Shared fixtures for the agent test suites: a scripted network client, a
//! scripted directory, and a ready-made agent context over the in-memory
//! store.

// Each test binary compiles this module separately and uses a different
// subset of it.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use symmsync_agent::AgentContext;
use symmsync_atproto::{AtpClient, BlocksPage, ListPage, ListView, ProfileViewBasic, RateGovernor};
use symmsync_core::config::GovernorConfig;
use symmsync_core::{Did, RecordRef, SyncError};
use symmsync_directory::{BlockerRecord, Directory};
use symmsync_store::{BlockStore, MemStore};

// ── Scripted network client ──────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Create { collection: String, record: Value },
    Put { collection: String, rkey: String, record: Value },
    Delete { collection: String, rkey: String },
}

#[derive(Default)]
pub struct MockClient {
    did: String,
    pub calls: Mutex<Vec<Call>>,
    pub blocks_pages: Mutex<VecDeque<BlocksPage>>,
    /// Transient failures injected before `get_blocks` succeeds.
    pub blocks_failures: Mutex<u32>,
    pub lists: Mutex<Vec<ListView>>,
    pub list_pages: Mutex<VecDeque<ListPage>>,
    /// Subjects whose record creation reports "already exists".
    pub conflict_subjects: Mutex<HashSet<String>>,
    /// Subjects whose record creation fails permanently.
    pub fail_subjects: Mutex<HashSet<String>>,
    next_rkey: Mutex<u64>,
}

impl MockClient {
    pub fn new(did: &str) -> Self {
        Self { did: did.to_string(), ..Self::default() }
    }

    pub fn push_blocks_page(&self, dids: &[&str], cursor: Option<&str>) {
        let blocks = dids
            .iter()
            .map(|did| ProfileViewBasic {
                did: Did::new(*did),
                handle: format!("{}.example", did.rsplit(':').next().unwrap_or("x")),
            })
            .collect();
        self.blocks_pages
            .lock()
            .unwrap()
            .push_back(BlocksPage { blocks, cursor: cursor.map(String::from) });
    }

    pub fn push_list_page(&self, items: &[(&str, &str)], cursor: Option<&str>) {
        let items = items
            .iter()
            .map(|(did, item_uri)| symmsync_atproto::ListItemView {
                uri: item_uri.to_string(),
                subject: ProfileViewBasic {
                    did: Did::new(*did),
                    handle: format!("{}.example", did.rsplit(':').next().unwrap_or("x")),
                },
            })
            .collect();
        self.list_pages.lock().unwrap().push_back(ListPage {
            list: None,
            items,
            cursor: cursor.map(String::from),
        });
    }

    /// Records created in `collection`, in call order.
    pub fn created(&self, collection: &str) -> Vec<Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|call| match call {
                Call::Create { collection: c, record } if c == collection => Some(record.clone()),
                _ => None,
            })
            .collect()
    }

    /// `(collection, rkey)` pairs of delete calls, in call order.
    pub fn deletes(&self) -> Vec<(String, String)> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|call| match call {
                Call::Delete { collection, rkey } => Some((collection.clone(), rkey.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn next_ref(&self, collection: &str) -> RecordRef {
        let mut counter = self.next_rkey.lock().unwrap();
        *counter += 1;
        RecordRef {
            uri: format!("at://{}/{}/3k{:04}", self.did, collection, *counter),
            cid: format!("bafymock{:04}", *counter),
        }
    }
}

#[async_trait]
impl AtpClient for MockClient {
    fn did(&self) -> Did {
        Did::new(&self.did)
    }

    async fn create_record(
        &self,
        collection: &str,
        record: Value,
    ) -> Result<RecordRef, SyncError> {
        let subject = record["subject"].as_str().unwrap_or_default().to_string();
        if self.fail_subjects.lock().unwrap().contains(&subject) {
            return Err(SyncError::Permanent(format!("injected failure for {subject}")));
        }
        if self.conflict_subjects.lock().unwrap().contains(&subject) {
            return Err(SyncError::Conflict(format!("record exists for {subject}")));
        }
        self.calls
            .lock()
            .unwrap()
            .push(Call::Create { collection: collection.to_string(), record });
        Ok(self.next_ref(collection))
    }

    async fn put_record(
        &self,
        collection: &str,
        rkey: &str,
        record: Value,
    ) -> Result<RecordRef, SyncError> {
        self.calls.lock().unwrap().push(Call::Put {
            collection: collection.to_string(),
            rkey: rkey.to_string(),
            record,
        });
        Ok(self.next_ref(collection))
    }

    async fn delete_record(&self, collection: &str, rkey: &str) -> Result<(), SyncError> {
        self.calls.lock().unwrap().push(Call::Delete {
            collection: collection.to_string(),
            rkey: rkey.to_string(),
        });
        Ok(())
    }

    async fn get_blocks(
        &self,
        _limit: u32,
        _cursor: Option<String>,
    ) -> Result<BlocksPage, SyncError> {
        {
            let mut failures = self.blocks_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(SyncError::Transient("injected fault".into()));
            }
        }
        Ok(self
            .blocks_pages
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(BlocksPage { blocks: Vec::new(), cursor: None }))
    }

    async fn get_lists(&self, _actor: &Did) -> Result<Vec<ListView>, SyncError> {
        Ok(self.lists.lock().unwrap().clone())
    }

    async fn get_list(
        &self,
        _list_uri: &str,
        _limit: u32,
        _cursor: Option<String>,
    ) -> Result<ListPage, SyncError> {
        Ok(self
            .list_pages
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ListPage { list: None, items: Vec::new(), cursor: None }))
    }
}

// ── Scripted directory ───────────────────────────────────────────────────────

#[derive(Default)]
pub struct MockDirectory {
    pub total: Mutex<Option<u64>>,
    pub pages: Mutex<HashMap<u32, Vec<BlockerRecord>>>,
    /// Remaining 429 responses to serve per page before succeeding.
    pub rate_limit_hits: Mutex<HashMap<u32, u32>>,
}

impl MockDirectory {
    pub fn set_total(&self, total: Option<u64>) {
        *self.total.lock().unwrap() = total;
    }

    pub fn set_page(&self, page: u32, dids: &[&str]) {
        let rows = dids
            .iter()
            .map(|did| BlockerRecord {
                did: Did::new(*did),
                blocked_date: "2025-01-01T00:00:00Z".to_string(),
            })
            .collect();
        self.pages.lock().unwrap().insert(page, rows);
    }
}

#[async_trait]
impl Directory for MockDirectory {
    async fn total_blocked_by(&self, _subject: &str) -> Result<Option<u64>, SyncError> {
        Ok(*self.total.lock().unwrap())
    }

    async fn blocked_by_page(
        &self,
        _subject: &str,
        page: u32,
    ) -> Result<Option<Vec<BlockerRecord>>, SyncError> {
        {
            let mut hits = self.rate_limit_hits.lock().unwrap();
            if let Some(remaining) = hits.get_mut(&page) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(SyncError::RateLimited(format!("429 on page {page}")));
                }
            }
        }
        Ok(self.pages.lock().unwrap().get(&page).cloned())
    }
}

// ── Context assembly ─────────────────────────────────────────────────────────

pub struct TestEnv {
    pub store: Arc<MemStore>,
    pub client: Arc<MockClient>,
    pub directory: Arc<MockDirectory>,
    pub ctx: Arc<AgentContext>,
    pub account_id: i64,
}

/// A governor with no pacing and no retries, so tests observe raw outcomes.
pub fn instant_governor() -> Arc<RateGovernor> {
    Arc::new(RateGovernor::new(GovernorConfig {
        request_interval: std::time::Duration::ZERO,
        window: std::time::Duration::from_secs(300),
        window_cap: u32::MAX,
        max_retries: 0,
        retry_base: std::time::Duration::from_millis(1),
    }))
}

pub async fn make_env(handle: &str, did: &str, is_primary: bool) -> TestEnv {
    let store = Arc::new(MemStore::new());
    let account_id = store
        .register_account(handle, &Did::new(did), is_primary)
        .await
        .expect("register test account");
    let client = Arc::new(MockClient::new(did));
    let directory = Arc::new(MockDirectory::default());
    let ctx = Arc::new(AgentContext::new(
        handle,
        Did::new(did),
        account_id,
        is_primary,
        Arc::clone(&store) as Arc<dyn BlockStore>,
        Arc::clone(&client) as Arc<dyn AtpClient>,
        Arc::clone(&directory) as Arc<dyn Directory>,
        instant_governor(),
        "Synchronized Blocks",
        "This list contains accounts that are blocked by any of our managed accounts",
    ));
    TestEnv { store, client, directory, ctx, account_id }
}

pub fn list_view(
    uri: &str,
    name: &str,
    purpose: &str,
    description: Option<&str>,
    indexed_at: DateTime<Utc>,
) -> ListView {
    ListView {
        uri: uri.to_string(),
        cid: format!("bafy{}", uri.rsplit('/').next().unwrap_or("cid")),
        name: name.to_string(),
        purpose: purpose.to_string(),
        description: description.map(String::from),
        indexed_at,
    }
}

pub fn ts(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 5, 1, hour, 0, 0).unwrap()
}
