use thiserror::Error;

/// Error taxonomy for the synchronization service.
///
/// Classification happens once, at the boundary that produced the error (the
/// XRPC client, the directory client, the store). Downstream code switches on
/// the variant rather than matching message strings.
#[derive(Debug, Error)]
pub enum SyncError {
    // ── External-service outcomes ────────────────────────────────────────────
    /// The service rejected the call for exceeding a rate budget (HTTP 429 or
    /// a `RateLimitExceeded` XRPC error). Retryable after backoff.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// A create collided with an existing record. Idempotent writers treat
    /// this as success.
    #[error("record conflict: {0}")]
    Conflict(String),

    /// Access or refresh token rejected. The session must be re-established.
    #[error("authentication expired: {0}")]
    AuthExpired(String),

    /// Connection reset, timeout, or 5xx. Retryable.
    #[error("transient network error: {0}")]
    Transient(String),

    // ── Local failures ───────────────────────────────────────────────────────
    #[error("storage error: {0}")]
    Storage(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// Anything the caller should not retry.
    #[error("{0}")]
    Permanent(String),
}

impl SyncError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, SyncError::RateLimited(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, SyncError::Conflict(_))
    }

    pub fn is_auth_expired(&self) -> bool {
        matches!(self, SyncError::AuthExpired(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Transient(_))
    }

    /// Worth retrying after a delay (transient fault or rate budget).
    pub fn is_retryable(&self) -> bool {
        self.is_transient() || self.is_rate_limited()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicates_match_variants() {
        assert!(SyncError::RateLimited("429".into()).is_rate_limited());
        assert!(SyncError::RateLimited("429".into()).is_retryable());
        assert!(SyncError::Transient("reset".into()).is_retryable());
        assert!(SyncError::Conflict("exists".into()).is_conflict());
        assert!(!SyncError::Permanent("no".into()).is_retryable());
        assert!(SyncError::AuthExpired("token".into()).is_auth_expired());
    }
}
