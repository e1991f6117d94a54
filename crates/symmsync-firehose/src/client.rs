//! WebSocket client for `com.atproto.sync.subscribeRepos`.
//!
//! Cursor semantics: `Some(0)` replays from the earliest data the relay still
//! holds, `Some(n)` resumes after sequence `n`, `None` joins at the live
//! edge.

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

use symmsync_core::SyncError;

use crate::frames::{decode_frame, FirehoseMessage};

/// Connection factory for the commit stream.
#[derive(Clone)]
pub struct FirehoseClient {
    ws_base: String,
}

impl FirehoseClient {
    /// `ws_base` is the relay origin, e.g. `wss://bsky.network`.
    pub fn new(ws_base: impl Into<String>) -> Self {
        Self { ws_base: ws_base.into() }
    }

    pub async fn connect(&self, cursor: Option<i64>) -> Result<FirehoseStream, SyncError> {
        let mut url = format!("{}/xrpc/com.atproto.sync.subscribeRepos", self.ws_base);
        if let Some(cursor) = cursor {
            url.push_str(&format!("?cursor={cursor}"));
        }
        info!(url = %url, "connecting to commit stream");
        let (ws, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| SyncError::Transient(format!("firehose connect: {e}")))?;
        Ok(FirehoseStream { inner: ws })
    }
}

/// An open stream, consumed as a pull iterator of decoded messages.
pub struct FirehoseStream {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl FirehoseStream {
    /// Next decoded message; `Ok(None)` when the server closes the stream.
    /// Transport faults surface as `Transient`, undecodable payloads as
    /// `Decode` (the caller skips those and keeps reading).
    pub async fn next_message(&mut self) -> Result<Option<FirehoseMessage>, SyncError> {
        loop {
            match self.inner.next().await {
                None => return Ok(None),
                Some(Err(e)) => return Err(SyncError::Transient(format!("firehose read: {e}"))),
                Some(Ok(Message::Binary(payload))) => return decode_frame(&payload).map(Some),
                Some(Ok(Message::Ping(payload))) => {
                    // tungstenite queues the pong; sending keeps it flushed.
                    let _ = self.inner.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Close(_))) => {
                    debug!("commit stream closed by server");
                    return Ok(None);
                }
                Some(Ok(_)) => continue,
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.inner.close(None).await;
    }
}
