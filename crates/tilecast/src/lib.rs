// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # tilecast
//!
//! Request-scheduled tile-video delivery over a multiplexed reliable
//! transport. Clients open one long-lived QUIC connection and issue many
//! small, independent `(segment, tile)` requests, each carrying a priority
//! class and a deadline; the server answers with the tile payload if it can
//! before the deadline, or drops the request otherwise.
//!
//! The pieces that make that true live in three layers:
//!
//! - [`queue`] and [`sched`] — the bounded primitives (circular FIFO,
//!   fixed-capacity max-heap) and the three scheduler disciplines (FIFO,
//!   strict priority, weighted fair queuing) built on top of them.
//! - [`framing`] and [`transport`] — the wire format and the QUIC transport
//!   it rides on.
//! - [`blobstore`], [`fov`], [`metrics`], [`config`] — the ambient pieces a
//!   server and its companion test-load client both need: where tile bytes
//!   come from, what a recorded field-of-view trace means, what gets
//!   measured, and how both binaries are configured.
//!
//! This crate is a library; `tilecast-server` and `tilecast-client` are
//! thin binaries built on top of it.

pub mod blobstore;
pub mod config;
pub mod error;
pub mod fov;
pub mod framing;
pub mod metrics;
pub mod model;
pub mod queue;
pub mod sched;

#[cfg(feature = "quic")]
pub mod transport;

pub use error::{ConfigError, FramingError, TransportError};
pub use model::{
    Bitrate, Priority, RequestFrame, ResponseFrame, TileKey, Uuid, CLASS_COUNT, TILES_PER_SEGMENT,
};
pub use sched::{QueuePolicy, TaskScheduler};
