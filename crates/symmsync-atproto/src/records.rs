//! Builders for the record types the service writes.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};

use symmsync_core::constants::{
    BLOCK_COLLECTION, LIST_COLLECTION, LIST_ITEM_COLLECTION, MOD_LIST_PURPOSE,
};
use symmsync_core::Did;

fn iso(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// `app.bsky.graph.block` — the author blocks `subject`.
pub fn block_record(subject: &Did, created_at: DateTime<Utc>) -> Value {
    json!({
        "$type": BLOCK_COLLECTION,
        "subject": subject.as_str(),
        "createdAt": iso(created_at),
    })
}

/// `app.bsky.graph.list` with moderation-list purpose.
pub fn list_record(name: &str, description: &str, created_at: DateTime<Utc>) -> Value {
    json!({
        "$type": LIST_COLLECTION,
        "purpose": MOD_LIST_PURPOSE,
        "name": name,
        "description": description,
        "createdAt": iso(created_at),
    })
}

/// `app.bsky.graph.listitem` — membership of `subject` in `list_uri`.
pub fn list_item_record(subject: &Did, list_uri: &str, created_at: DateTime<Utc>) -> Value {
    json!({
        "$type": LIST_ITEM_COLLECTION,
        "subject": subject.as_str(),
        "list": list_uri,
        "createdAt": iso(created_at),
    })
}
