// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! QUIC transport: one [`Endpoint`](quinn::Endpoint) per side, multiplexed
//! bidirectional streams, one stream per request/response pair.
//!
//! # Wire format
//!
//! Unlike a length-prefixed binary stream, each bidirectional stream here
//! carries exactly one [`crate::framing`] request followed by exactly one
//! response; the client finishes its send side after writing the request so
//! the server's header reader sees a clean EOF if the request is malformed.
//!
//! # Interoperability
//!
//! Both sides speak ALPN `quic-streaming`. The server always presents a
//! self-signed certificate generated at startup (or loaded from disk, if
//! configured); the client pins that certificate rather than validating
//! against a CA, since there is no public PKI for a point-to-point test
//! harness.
//!
//! # Feature flag
//!
//! This module requires the `quic` feature, enabled by default.

mod config;
mod tls;

pub use config::TransportConfig;
pub use quinn::{RecvStream, SendStream};
pub use tls::client_config_pinned_to;

use std::net::SocketAddr;

use quinn::{Connection as QuinnConnection, Endpoint};

use crate::error::TransportError;

/// A QUIC listener bound to one local address.
pub struct Listener {
    endpoint: Endpoint,
    cert_der: Vec<u8>,
}

impl Listener {
    /// Binds a server endpoint, generating (or loading) a self-signed
    /// certificate per `config`.
    pub async fn bind(config: &TransportConfig) -> Result<Self, TransportError> {
        let (server_config, cert_der) = tls::server_config(config)?;
        let endpoint = Endpoint::server(server_config, config.bind_addr)
            .map_err(|e| TransportError::Bind(e.to_string()))?;
        log::info!(
            "listening on {}",
            endpoint
                .local_addr()
                .map_err(|e| TransportError::Bind(e.to_string()))?,
        );
        Ok(Self { endpoint, cert_der })
    }

    /// The DER-encoded self-signed certificate this listener presents.
    /// Callers that control both ends (tests, or an operator distributing
    /// the cert out of band) use this for pinning instead of skip-verify.
    pub fn certificate_der(&self) -> &[u8] {
        &self.cert_der
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.endpoint
            .local_addr()
            .map_err(|e| TransportError::Bind(e.to_string()))
    }

    /// Accepts the next incoming connection and completes its handshake.
    /// Returns `None` once the endpoint has been closed.
    pub async fn accept(&self) -> Option<Result<Connection, TransportError>> {
        let incoming = self.endpoint.accept().await?;
        let remote = incoming.remote_address();
        let result = match incoming.await {
            Ok(conn) => Ok(Connection { inner: conn, remote }),
            Err(e) => Err(TransportError::Handshake(e.to_string())),
        };
        Some(result)
    }

    pub fn close(&self) {
        self.endpoint.close(0u32.into(), b"shutdown");
    }
}

/// One established QUIC connection, able to open or accept bidirectional
/// streams. Cheap to clone (shares `quinn`'s internal handle).
#[derive(Clone)]
pub struct Connection {
    inner: QuinnConnection,
    remote: SocketAddr,
}

impl Connection {
    /// Dials `remote_addr`, pinning the certificate the server advertised
    /// out of band via `config.server_name` (SNI only — verification itself
    /// is handled by [`tls::client_config`]'s trust anchor).
    pub async fn connect(
        config: &TransportConfig,
        remote_addr: SocketAddr,
    ) -> Result<Self, TransportError> {
        let client_config = tls::client_config(config)?;
        let mut endpoint = Endpoint::client(config.bind_addr)
            .map_err(|e| TransportError::Bind(e.to_string()))?;
        endpoint.set_default_client_config(client_config);

        let inner = endpoint
            .connect(remote_addr, &config.server_name)
            .map_err(|e| TransportError::Connect(e.to_string()))?
            .await
            .map_err(|e| TransportError::Handshake(e.to_string()))?;

        Ok(Self { inner, remote: remote_addr })
    }

    /// Dials `remote_addr`, trusting only `server_cert_der` rather than
    /// skipping verification outright.
    pub async fn connect_pinned(
        config: &TransportConfig,
        remote_addr: SocketAddr,
        server_cert_der: &[u8],
    ) -> Result<Self, TransportError> {
        let client_config = tls::client_config_pinned_to(config, server_cert_der)?;
        let mut endpoint = Endpoint::client(config.bind_addr)
            .map_err(|e| TransportError::Bind(e.to_string()))?;
        endpoint.set_default_client_config(client_config);

        let inner = endpoint
            .connect(remote_addr, &config.server_name)
            .map_err(|e| TransportError::Connect(e.to_string()))?
            .await
            .map_err(|e| TransportError::Handshake(e.to_string()))?;

        Ok(Self { inner, remote: remote_addr })
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    /// Opens a new bidirectional stream: one request/response exchange.
    pub async fn open_bi(&self) -> Result<(SendStream, RecvStream), TransportError> {
        self.inner
            .open_bi()
            .await
            .map_err(|e| TransportError::StreamOpen(e.to_string()))
    }

    /// Accepts the next bidirectional stream the peer opens, or `None` if
    /// the connection has closed.
    pub async fn accept_bi(&self) -> Option<Result<(SendStream, RecvStream), TransportError>> {
        match self.inner.accept_bi().await {
            Ok(streams) => Some(Ok(streams)),
            Err(quinn::ConnectionError::ApplicationClosed(_))
            | Err(quinn::ConnectionError::ConnectionClosed(_)) => None,
            Err(e) => Some(Err(TransportError::StreamAccept(e.to_string()))),
        }
    }

    pub fn close(&self) {
        self.inner.close(0u32.into(), b"done");
    }
}
