//! symmsync-firehose — client for the network's repository commit stream.
//!
//! The relay pushes framed DAG-CBOR messages over a WebSocket; this crate
//! reifies that as a pull iterator of decoded [`FirehoseMessage`]s so the
//! consumer loop (and its tests) never touch the wire format:
//!   1. Connect with the last checkpointed cursor
//!   2. `next_message()` until the stream ends or the handler stops
//!   3. Commits carry a CAR bundle; records are looked up by operation CID

pub mod car;
pub mod client;
pub mod frames;
pub mod testing;

pub use car::{Cid, CarFile};
pub use client::{FirehoseClient, FirehoseStream};
pub use frames::{CommitEvent, FirehoseMessage, RepoOp};
