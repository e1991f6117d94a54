//! Environment-driven configuration.
//!
//! Every tunable is read from the process environment with a documented
//! default; `Config::from_env` is called once by the binary. Parsing goes
//! through `from_lookup` so tests can feed a plain map instead of mutating
//! process globals.

use std::collections::HashMap;
use std::time::Duration;

use tracing::warn;

use crate::constants::LOGIN_SPACING_SECS_DEFAULT;
use crate::error::SyncError;
use crate::types::Credentials;

/// Endpoints and list metadata.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Base URL of the PDS handling XRPC calls (`https://bsky.social`).
    pub pds_url: String,
    /// WebSocket base of the relay serving `subscribeRepos`.
    pub firehose_url: String,
    /// Base URL of the external block directory.
    pub directory_url: String,
    pub list_name: String,
    pub list_description: String,
}

/// Rate-governor budgets (§ outbound call shaping).
#[derive(Debug, Clone)]
pub struct GovernorConfig {
    /// Minimum interval between consecutive calls.
    pub request_interval: Duration,
    /// Rolling window length.
    pub window: Duration,
    /// Maximum calls per window.
    pub window_cap: u32,
    /// Retries after a rate-limit rejection.
    pub max_retries: u32,
    /// First retry delay; doubles on each subsequent retry.
    pub retry_base: Duration,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            request_interval: Duration::from_millis(1000),
            window: Duration::from_secs(300),
            window_cap: 2000,
            max_retries: 3,
            retry_base: Duration::from_secs(30),
        }
    }
}

/// Session token lifetimes and backend selection.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Refresh the access token once it is older than this.
    pub access_ttl: Duration,
    /// Discard the whole session once the refresh token is older than this.
    pub refresh_ttl: Duration,
    /// `true` ⇒ per-handle JSON files (local development); `false` ⇒ database.
    pub file_backend: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            // Access tokens live 2 h, refresh tokens 2 months; renew ahead of
            // both deadlines.
            access_ttl: Duration::from_secs(115 * 60),
            refresh_ttl: Duration::from_secs(55 * 24 * 3600),
            file_backend: false,
        }
    }
}

/// Reconciler cadence.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub fast_interval_primary: Duration,
    pub fast_interval_secondary: Duration,
    /// Directory pass cadence.
    pub full_interval: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            fast_interval_primary: Duration::from_secs(15 * 60),
            fast_interval_secondary: Duration::from_secs(60 * 60),
            full_interval: Duration::from_secs(24 * 3600),
        }
    }
}

/// List-publisher pacing.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub batch_size: usize,
    pub batch_delay: Duration,
    /// Pause between live-list pages while snapshotting membership.
    pub page_delay: Duration,
    /// Suppress the remove phase entirely (operator opt-in).
    pub additive_only: bool,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            batch_delay: Duration::from_secs(10),
            page_delay: Duration::from_millis(100),
            additive_only: false,
        }
    }
}

/// Full service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub primary: Credentials,
    pub secondaries: Vec<Credentials>,
    pub database_url: String,
    pub service: ServiceConfig,
    pub governor: GovernorConfig,
    pub session: SessionConfig,
    pub reconciler: ReconcilerConfig,
    pub publisher: PublisherConfig,
    /// Spacing between initial logins across accounts.
    pub login_spacing: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, SyncError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, SyncError> {
        let primary = Credentials {
            handle: require(&get, "PRIMARY_BLUESKY_HANDLE")?,
            password: require(&get, "PRIMARY_BLUESKY_PASSWORD")?,
        };

        let secondaries = parse_secondaries(&get("SECONDARY_ACCOUNTS").unwrap_or_default());

        let database_url = match get("DATABASE_URL") {
            Some(url) if !url.is_empty() => url,
            _ => compose_database_url(&get),
        };

        let service = ServiceConfig {
            pds_url: str_or(&get, "PDS_URL", "https://bsky.social"),
            firehose_url: str_or(&get, "FIREHOSE_URL", "wss://bsky.network"),
            directory_url: str_or(
                &get,
                "CLEARSKY_API_URL",
                "https://api.clearsky.services/api/v1/anon",
            ),
            list_name: str_or(&get, "MOD_LIST_NAME", "Synchronized Blocks"),
            list_description: str_or(
                &get,
                "MOD_LIST_DESCRIPTION",
                "This list contains accounts that are blocked by any of our managed accounts",
            ),
        };

        let governor = GovernorConfig {
            request_interval: Duration::from_millis(num_or(&get, "API_REQUEST_INTERVAL_MS", 1000)),
            window: Duration::from_secs(num_or(&get, "API_RATE_WINDOW_SECS", 300)),
            window_cap: num_or(&get, "API_REQUESTS_PER_WINDOW", 2000) as u32,
            max_retries: num_or(&get, "API_RATE_MAX_RETRIES", 3) as u32,
            retry_base: Duration::from_secs(num_or(&get, "API_RATE_RETRY_BASE_SECS", 30)),
        };

        let session = SessionConfig {
            access_ttl: Duration::from_secs(num_or(&get, "ACCESS_TOKEN_TTL_MINUTES", 115) * 60),
            refresh_ttl: Duration::from_secs(num_or(&get, "REFRESH_TOKEN_TTL_DAYS", 55) * 24 * 3600),
            file_backend: bool_or(&get, "LOCAL_TEST", false),
        };

        let reconciler = ReconcilerConfig {
            fast_interval_primary: Duration::from_secs(
                num_or(&get, "SYNC_INTERVAL_PRIMARY_MINUTES", 15) * 60,
            ),
            fast_interval_secondary: Duration::from_secs(
                num_or(&get, "SYNC_INTERVAL_SECONDARY_MINUTES", 60) * 60,
            ),
            full_interval: Duration::from_secs(num_or(&get, "FULL_SYNC_INTERVAL_HOURS", 24) * 3600),
        };

        let publisher = PublisherConfig {
            batch_size: num_or(&get, "LIST_SYNC_BATCH_SIZE", 50) as usize,
            batch_delay: Duration::from_secs(num_or(&get, "LIST_SYNC_BATCH_DELAY_SECS", 10)),
            page_delay: Duration::from_millis(num_or(&get, "LIST_PAGE_DELAY_MS", 100)),
            additive_only: bool_or(&get, "LIST_SYNC_ADDITIVE_ONLY", false),
        };

        Ok(Self {
            primary,
            secondaries,
            database_url,
            service,
            governor,
            session,
            reconciler,
            publisher,
            login_spacing: Duration::from_secs(num_or(
                &get,
                "LOGIN_SPACING_SECS",
                LOGIN_SPACING_SECS_DEFAULT,
            )),
        })
    }

    /// Convenience for tests: build from a literal key/value map.
    pub fn from_map(map: &HashMap<&str, &str>) -> Result<Self, SyncError> {
        Self::from_lookup(|key| map.get(key).map(|v| v.to_string()))
    }
}

/// Parse `handle:password;handle:password;...`, skipping malformed entries.
fn parse_secondaries(raw: &str) -> Vec<Credentials> {
    raw.split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| match entry.split_once(':') {
            Some((handle, password)) if !handle.is_empty() && !password.is_empty() => {
                Some(Credentials {
                    handle: handle.trim().to_string(),
                    password: password.to_string(),
                })
            }
            _ => {
                warn!(entry, "skipping malformed SECONDARY_ACCOUNTS entry");
                None
            }
        })
        .collect()
}

fn compose_database_url(get: &impl Fn(&str) -> Option<String>) -> String {
    let host = str_or(get, "DB_HOST", "localhost");
    let port = str_or(get, "DB_PORT", "5432");
    let name = str_or(get, "DB_NAME", "symm_blocks");
    let user = str_or(get, "DB_USER", "postgres");
    let password = str_or(get, "DB_PASSWORD", "");
    if password.is_empty() {
        format!("postgres://{user}@{host}:{port}/{name}")
    } else {
        format!("postgres://{user}:{password}@{host}:{port}/{name}")
    }
}

fn require(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String, SyncError> {
    match get(key) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(SyncError::Config(format!("missing required environment variable {key}"))),
    }
}

fn str_or(get: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> String {
    match get(key) {
        Some(v) if !v.is_empty() => v,
        _ => default.to_string(),
    }
}

fn num_or(get: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> u64 {
    match get(key) {
        Some(v) if !v.is_empty() => v.parse().unwrap_or_else(|_| {
            warn!(key, value = %v, "unparseable numeric setting, using default");
            default
        }),
        _ => default,
    }
}

fn bool_or(get: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    match get(key) {
        Some(v) if !v.is_empty() => matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"),
        _ => default,
    }
}
