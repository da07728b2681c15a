// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for the tilecast core.
//!
//! Four kinds map directly onto the error handling design: transport,
//! framing, scheduling back-pressure, and deadline. Deadline misses are not
//! represented as an error at all — they are a normal, expected outcome
//! recorded through the metrics sink, not propagated via `Result`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FramingError {
    #[error("connection closed before a complete frame was read")]
    Eof,
    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),
    #[error("response frame is missing mandatory Content-Length header")]
    MissingContentLength,
    #[error("short read: expected {expected} payload bytes, got {got}")]
    ShortPayload { expected: usize, got: usize },
    #[error("I/O error while framing: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to read CSV: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("bind failed: {0}")]
    Bind(String),
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("failed to open stream: {0}")]
    StreamOpen(String),
    #[error("failed to accept stream: {0}")]
    StreamAccept(String),
    #[error("TLS configuration error: {0}")]
    Tls(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
