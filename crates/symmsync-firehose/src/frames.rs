//! Stream frame decoding.
//!
//! Each WebSocket binary payload carries two concatenated DAG-CBOR values: a
//! header `{op, t}` and a body. `op = 1` is a labeled message (`t` names the
//! kind), `op = -1` is an error frame. Only `#commit` bodies carry record
//! operations; every other kind matters solely for its sequence number, which
//! still advances the checkpoint.

use ciborium::value::Value;

use symmsync_core::SyncError;

use crate::car::Cid;

/// One record operation within a commit.
#[derive(Clone, Debug)]
pub struct RepoOp {
    pub action: String,
    /// `<collection>/<rkey>`.
    pub path: String,
    pub cid: Option<Cid>,
}

impl RepoOp {
    /// Collection NSID — the first path segment.
    pub fn collection(&self) -> &str {
        self.path.split('/').next().unwrap_or(&self.path)
    }
}

/// A `#commit` message: ordered operations plus the CAR bundle that holds the
/// referenced records.
#[derive(Clone, Debug)]
pub struct CommitEvent {
    pub seq: i64,
    pub repo: String,
    pub ops: Vec<RepoOp>,
    pub blocks: Vec<u8>,
}

/// A decoded stream message.
#[derive(Clone, Debug)]
pub enum FirehoseMessage {
    Commit(CommitEvent),
    Info { name: String, message: Option<String> },
    Error { name: String, message: Option<String> },
    /// Any other labeled kind (`#identity`, `#account`, ...). Only the
    /// sequence number is retained.
    Other { kind: String, seq: Option<i64> },
}

impl FirehoseMessage {
    pub fn seq(&self) -> Option<i64> {
        match self {
            FirehoseMessage::Commit(commit) => Some(commit.seq),
            FirehoseMessage::Other { seq, .. } => *seq,
            _ => None,
        }
    }
}

/// Decode one WebSocket payload into a message.
pub fn decode_frame(payload: &[u8]) -> Result<FirehoseMessage, SyncError> {
    let mut cursor = payload;
    let header: Value = ciborium::de::from_reader(&mut cursor)
        .map_err(|e| SyncError::Decode(format!("frame header: {e}")))?;
    let body: Value = ciborium::de::from_reader(&mut cursor)
        .map_err(|e| SyncError::Decode(format!("frame body: {e}")))?;

    let op = get_i64(&header, "op")
        .ok_or_else(|| SyncError::Decode("frame header missing op".into()))?;

    if op == -1 {
        return Ok(FirehoseMessage::Error {
            name: get_str(&body, "error").unwrap_or_else(|| "unknown".into()),
            message: get_str(&body, "message"),
        });
    }

    let kind = get_str(&header, "t")
        .ok_or_else(|| SyncError::Decode("frame header missing type".into()))?;

    match kind.as_str() {
        "#commit" => Ok(FirehoseMessage::Commit(decode_commit(&body)?)),
        "#info" => Ok(FirehoseMessage::Info {
            name: get_str(&body, "name").unwrap_or_else(|| "unknown".into()),
            message: get_str(&body, "message"),
        }),
        "#error" => Ok(FirehoseMessage::Error {
            name: get_str(&body, "error").unwrap_or_else(|| "unknown".into()),
            message: get_str(&body, "message"),
        }),
        _ => Ok(FirehoseMessage::Other { kind, seq: get_i64(&body, "seq") }),
    }
}

fn decode_commit(body: &Value) -> Result<CommitEvent, SyncError> {
    let seq = get_i64(body, "seq")
        .ok_or_else(|| SyncError::Decode("commit missing seq".into()))?;
    let repo = get_str(body, "repo")
        .ok_or_else(|| SyncError::Decode("commit missing repo".into()))?;
    let blocks = match get(body, "blocks") {
        Some(Value::Bytes(bytes)) => bytes.clone(),
        _ => Vec::new(),
    };

    let mut ops = Vec::new();
    if let Some(Value::Array(entries)) = get(body, "ops") {
        for entry in entries {
            let action = get_str(entry, "action")
                .ok_or_else(|| SyncError::Decode("op missing action".into()))?;
            let path = get_str(entry, "path")
                .ok_or_else(|| SyncError::Decode("op missing path".into()))?;
            let cid = match get(entry, "cid") {
                Some(Value::Tag(42, inner)) => match inner.as_ref() {
                    Value::Bytes(bytes) => Some(Cid::from_tagged(bytes)?),
                    _ => return Err(SyncError::Decode("op cid tag without bytes".into())),
                },
                Some(Value::Null) | None => None,
                Some(_) => return Err(SyncError::Decode("op cid has unexpected shape".into())),
            };
            ops.push(RepoOp { action, path, cid });
        }
    }

    Ok(CommitEvent { seq, repo, ops, blocks })
}

// ── Value helpers ────────────────────────────────────────────────────────────

fn get<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    match value {
        Value::Map(entries) => entries
            .iter()
            .find(|(k, _)| matches!(k, Value::Text(t) if t == key))
            .map(|(_, v)| v),
        _ => None,
    }
}

fn get_i64(value: &Value, key: &str) -> Option<i64> {
    match get(value, key) {
        Some(Value::Integer(i)) => i64::try_from(*i).ok(),
        _ => None,
    }
}

fn get_str(value: &Value, key: &str) -> Option<String> {
    match get(value, key) {
        Some(Value::Text(t)) => Some(t.clone()),
        _ => None,
    }
}
