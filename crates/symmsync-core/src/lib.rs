//! symmsync-core — shared types, error taxonomy, constants and configuration
//! for the block-synchronization service.

pub mod config;
pub mod constants;
pub mod error;
pub mod types;

pub use error::SyncError;
pub use types::{AtUri, BlockDirection, Credentials, Did, RecordRef};
