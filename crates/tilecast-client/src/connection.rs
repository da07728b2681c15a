// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! One QUIC connection, pipelined over a single bidirectional stream: every
//! request the driver submits rides the same stream, and a background
//! reader dispatches each response to whichever caller is waiting on it,
//! matched by `(segment, tile)` since responses may complete out of order.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tilecast::model::TileKey;
use tilecast::transport::{Connection as QuicConnection, TransportConfig};
use tilecast::{framing, RequestFrame, ResponseFrame};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::sync::{oneshot, Mutex as AsyncMutex};

/// A pipelined client connection: one send half shared by every submitted
/// request, one background task reading responses off the matching recv
/// half and routing them back by `(segment, tile)`.
pub struct ClientConnection {
    send: AsyncMutex<tilecast::transport::SendStream>,
    pending: Arc<DashMap<TileKey, oneshot::Sender<ResponseFrame>>>,
    reader_handle: tokio::task::JoinHandle<()>,
}

impl ClientConnection {
    pub async fn connect(config: &TransportConfig, server_addr: std::net::SocketAddr) -> anyhow::Result<Self> {
        let conn = QuicConnection::connect(config, server_addr).await?;
        let (send, recv) = conn.open_bi().await?;

        let pending = Arc::new(DashMap::new());
        let reader_pending = pending.clone();
        let reader_handle = tokio::spawn(async move {
            reader_loop(recv, reader_pending).await;
        });

        Ok(Self {
            send: AsyncMutex::new(send),
            pending,
            reader_handle,
        })
    }

    /// Writes `req` and returns a receiver that resolves when its matching
    /// response arrives. The caller is responsible for timing out and
    /// calling [`Self::forget`] on a stale wait.
    pub async fn submit(&self, req: &RequestFrame) -> anyhow::Result<oneshot::Receiver<ResponseFrame>> {
        let key = TileKey {
            segment: req.segment,
            tile: req.tile,
        };
        let (tx, rx) = oneshot::channel();
        self.pending.insert(key, tx);

        let mut send = self.send.lock().await;
        if let Err(e) = framing::write_request(&mut *send, req).await {
            drop(send);
            self.pending.remove(&key);
            return Err(e.into());
        }
        if let Err(e) = send.flush().await {
            drop(send);
            self.pending.remove(&key);
            return Err(e.into());
        }
        Ok(rx)
    }

    /// Drops a registered wait that timed out before a response arrived.
    pub fn forget(&self, segment: u32, tile: u32) {
        self.pending.remove(&TileKey { segment, tile });
    }

    pub async fn shutdown(self) {
        self.reader_handle.abort();
        let _ = self.reader_handle.await;
    }
}

async fn reader_loop(
    recv: tilecast::transport::RecvStream,
    pending: Arc<DashMap<TileKey, oneshot::Sender<ResponseFrame>>>,
) {
    let mut reader = BufReader::new(recv);
    loop {
        let response = match framing::read_response(&mut reader).await {
            Ok(response) => response,
            Err(e) => {
                log::debug!("response stream closed: {e}");
                return;
            }
        };
        if let Some((_, tx)) = pending.remove(&response.key()) {
            let _ = tx.send(response);
        } else {
            log::debug!(
                "response for unknown or already-timed-out request ({}, {})",
                response.segment,
                response.tile
            );
        }
    }
}

/// Awaits `rx` with `timeout`, forgetting the pending entry if it elapses.
pub async fn await_response(
    conn: &ClientConnection,
    segment: u32,
    tile: u32,
    rx: oneshot::Receiver<ResponseFrame>,
    timeout: Duration,
) -> Option<ResponseFrame> {
    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(response)) => Some(response),
        Ok(Err(_)) => None,
        Err(_) => {
            conn.forget(segment, tile);
            None
        }
    }
}
