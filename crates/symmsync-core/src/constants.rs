//! ─── Protocol constants ──────────────────────────────────────────────────────
//!
//! Collection NSIDs and fixed page sizes for the AT Protocol surfaces the
//! service touches. Tunables with operator-facing knobs live in `config`.

// ── Record collections ───────────────────────────────────────────────────────

/// Block records: `{subject, createdAt}`.
pub const BLOCK_COLLECTION: &str = "app.bsky.graph.block";

/// List records: `{purpose, name, description, createdAt}`.
pub const LIST_COLLECTION: &str = "app.bsky.graph.list";

/// List-item records: `{subject, list, createdAt}`.
pub const LIST_ITEM_COLLECTION: &str = "app.bsky.graph.listitem";

/// Purpose value marking a list as a moderation list.
pub const MOD_LIST_PURPOSE: &str = "app.bsky.graph.defs#modlist";

// ── Pagination ───────────────────────────────────────────────────────────────

/// Page size for `get_blocks` and `get_list` enumeration.
pub const GRAPH_PAGE_LIMIT: u32 = 100;

/// The directory serves exactly 100 records per page.
pub const DIRECTORY_PAGE_SIZE: u64 = 100;

// ── Login budget ─────────────────────────────────────────────────────────────

/// The PDS allows roughly 10 full logins per account per day; session reuse
/// keeps us far under this, and initial logins are spaced out besides.
pub const LOGIN_SPACING_SECS_DEFAULT: u64 = 30;
