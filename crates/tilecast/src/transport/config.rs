// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! QUIC transport configuration.

use std::net::SocketAddr;
use std::time::Duration;

/// QUIC transport configuration shared by server and client.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Local address to bind to. The server binds the listening address;
    /// the client binds an ephemeral port via `0.0.0.0:0`.
    pub bind_addr: SocketAddr,

    /// Server name presented for TLS SNI and certificate generation.
    pub server_name: String,

    /// Connection idle timeout before `quinn` tears the connection down.
    pub idle_timeout: Duration,

    /// Keep-alive interval, sent well inside `idle_timeout` to hold NAT
    /// bindings open across idle periods between segment requests.
    pub keep_alive_interval: Duration,

    /// Maximum concurrent bidirectional streams per connection.
    pub max_concurrent_streams: u32,

    /// ALPN protocol identifier both sides must agree on.
    pub alpn: Vec<u8>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            #[allow(clippy::unwrap_used)] // constant valid socket address literal
            bind_addr: "0.0.0.0:0".parse().unwrap(),
            server_name: "tilecast.local".to_string(),
            idle_timeout: Duration::from_secs(30),
            keep_alive_interval: Duration::from_secs(10),
            max_concurrent_streams: 256,
            alpn: b"quic-streaming".to_vec(),
        }
    }
}
