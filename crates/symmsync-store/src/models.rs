use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use symmsync_core::{BlockDirection, Did};

/// Row in `accounts`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountRow {
    pub id: i64,
    pub handle: String,
    pub did: Did,
    pub is_primary: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input to [`crate::BlockStore::add_block`].
#[derive(Clone, Debug)]
pub struct NewBlock {
    pub did: Did,
    pub handle: Option<String>,
    pub source_account_id: i64,
    pub direction: BlockDirection,
    pub reason: Option<String>,
}

/// Row in `blocked_accounts`.
#[derive(Clone, Debug)]
pub struct BlockRow {
    pub id: i64,
    pub did: Did,
    pub handle: Option<String>,
    pub reason: Option<String>,
    pub source_account_id: i64,
    pub direction: BlockDirection,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub synced_by_primary: bool,
}

/// A secondary's `blocking` row awaiting mirroring by the primary.
#[derive(Clone, Debug)]
pub struct UnsyncedBlock {
    pub id: i64,
    pub did: Did,
    pub handle: Option<String>,
    pub source_handle: String,
    /// The primary already holds its own `blocking` row for this subject.
    pub already_blocked_by_primary: bool,
}

/// Row in `mod_lists`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModListRow {
    pub id: i64,
    pub uri: String,
    pub cid: String,
    pub owner_did: Did,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Persisted login session. Serialized as-is into the per-handle JSON files
/// of the development backend, so field names mirror the wire names.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSession {
    pub handle: String,
    pub did: Did,
    #[serde(rename = "accessJwt")]
    pub access_jwt: String,
    #[serde(rename = "refreshJwt")]
    pub refresh_jwt: String,
    #[serde(rename = "accessDate")]
    pub access_date: DateTime<Utc>,
    #[serde(rename = "refreshDate")]
    pub refresh_date: DateTime<Utc>,
}
