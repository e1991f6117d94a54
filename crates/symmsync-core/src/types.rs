use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SyncError;

// ── Did ──────────────────────────────────────────────────────────────────────

/// Decentralized identifier — the stable identity of an AT Protocol account
/// (e.g. `did:plc:z4xsud6kzq5ve3cqkvaynwgy`).
///
/// Accounts whose DID is not yet known are stored with a `placeholder_`
/// prefix until the first successful login resolves the real one.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Did(String);

impl Did {
    /// Wrap a string without validation. Use for values that are already
    /// known to be DIDs (database rows, network responses).
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Parse a DID string, rejecting anything that is not `did:method:...`.
    pub fn parse(s: &str) -> Result<Self, SyncError> {
        let mut parts = s.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some("did"), Some(method), Some(id)) if !method.is_empty() && !id.is_empty() => {
                Ok(Self(s.to_string()))
            }
            _ => Err(SyncError::Decode(format!("invalid DID: {s}"))),
        }
    }

    /// Stand-in identity for an account that has never logged in.
    pub fn placeholder(handle: &str) -> Self {
        Self(format!("placeholder_{}", handle.replace('.', "_")))
    }

    pub fn is_placeholder(&self) -> bool {
        self.0.starts_with("placeholder_")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Did({})", self.0)
    }
}

impl From<String> for Did {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Did {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ── BlockDirection ───────────────────────────────────────────────────────────

/// Direction of a block relationship relative to a managed account.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum BlockDirection {
    /// The managed account actively blocks the subject.
    Blocking,
    /// The external directory reports that the subject blocks the managed
    /// account.
    BlockedBy,
}

impl BlockDirection {
    /// Column value used in the `block_type` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockDirection::Blocking => "blocking",
            BlockDirection::BlockedBy => "blocked_by",
        }
    }
}

impl FromStr for BlockDirection {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "blocking" => Ok(BlockDirection::Blocking),
            "blocked_by" => Ok(BlockDirection::BlockedBy),
            other => Err(SyncError::Decode(format!("unknown block direction: {other}"))),
        }
    }
}

impl fmt::Display for BlockDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── RecordRef ────────────────────────────────────────────────────────────────

/// Reference to a record after a successful write: its AT-URI and CID.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct RecordRef {
    pub uri: String,
    pub cid: String,
}

// ── AtUri ────────────────────────────────────────────────────────────────────

/// Parsed `at://` URI: `at://<authority>/<collection>/<rkey>`.
///
/// Only the three-segment record form is supported; that is the only shape
/// the service ever needs to take apart (deriving delete rkeys from list-item
/// URIs).
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct AtUri {
    pub authority: String,
    pub collection: String,
    pub rkey: String,
}

impl AtUri {
    pub fn parse(uri: &str) -> Result<Self, SyncError> {
        let rest = uri
            .strip_prefix("at://")
            .ok_or_else(|| SyncError::Decode(format!("not an at:// URI: {uri}")))?;
        let mut parts = rest.splitn(3, '/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(authority), Some(collection), Some(rkey))
                if !authority.is_empty() && !collection.is_empty() && !rkey.is_empty() =>
            {
                Ok(Self {
                    authority: authority.to_string(),
                    collection: collection.to_string(),
                    rkey: rkey.to_string(),
                })
            }
            _ => Err(SyncError::Decode(format!("malformed at:// URI: {uri}"))),
        }
    }

    /// Record key of a record URI — the last path segment.
    pub fn rkey_of(uri: &str) -> Result<String, SyncError> {
        Ok(Self::parse(uri)?.rkey)
    }
}

impl fmt::Display for AtUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at://{}/{}/{}", self.authority, self.collection, self.rkey)
    }
}

// ── Credentials ──────────────────────────────────────────────────────────────

/// Login credentials for one managed account.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub handle: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never let the password reach logs.
        write!(f, "Credentials({})", self.handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn did_parse_accepts_plc_and_web() {
        assert!(Did::parse("did:plc:z4xsud6kzq5ve3cqkvaynwgy").is_ok());
        assert!(Did::parse("did:web:example.com").is_ok());
    }

    #[test]
    fn did_parse_rejects_garbage() {
        assert!(Did::parse("alice.example").is_err());
        assert!(Did::parse("did:").is_err());
        assert!(Did::parse("did:plc:").is_err());
    }

    #[test]
    fn placeholder_round_trip() {
        let did = Did::placeholder("alice.bsky.social");
        assert!(did.is_placeholder());
        assert_eq!(did.as_str(), "placeholder_alice_bsky_social");
        assert!(!Did::new("did:plc:abc").is_placeholder());
    }

    #[test]
    fn direction_column_values() {
        assert_eq!(BlockDirection::Blocking.as_str(), "blocking");
        assert_eq!(BlockDirection::BlockedBy.as_str(), "blocked_by");
        assert_eq!("blocking".parse::<BlockDirection>().unwrap(), BlockDirection::Blocking);
        assert!("sideways".parse::<BlockDirection>().is_err());
    }

    #[test]
    fn at_uri_parse_and_rkey() {
        let uri = AtUri::parse("at://did:plc:abc/app.bsky.graph.listitem/3kxyz").unwrap();
        assert_eq!(uri.authority, "did:plc:abc");
        assert_eq!(uri.collection, "app.bsky.graph.listitem");
        assert_eq!(uri.rkey, "3kxyz");
        assert_eq!(
            AtUri::rkey_of("at://did:plc:abc/app.bsky.graph.listitem/3kxyz").unwrap(),
            "3kxyz"
        );
        assert!(AtUri::parse("https://example.com/x").is_err());
        assert!(AtUri::parse("at://did:plc:abc").is_err());
    }

    #[test]
    fn credentials_debug_hides_password() {
        let c = Credentials { handle: "a.example".into(), password: "hunter2".into() };
        assert!(!format!("{c:?}").contains("hunter2"));
    }
}
