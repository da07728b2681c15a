// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wire-level data types shared by the server and the test client.
//!
//! `Priority` is deliberately kept separate from its numeric wire ordinal:
//! the wire encodes `HIGH=0, MEDIUM=1, LOW=2` (lower ordinal, higher urgency),
//! but the scheduler disciplines key on `Priority::weight()`, never on the
//! ordinal. See [`Priority::weight`].

pub use uuid::Uuid;

/// Number of distinct priority classes. Scheduler class ids are `0..CLASS_COUNT`.
pub const CLASS_COUNT: usize = 3;

/// Tiles per segment, fixed by the source content's tiling grid.
pub const TILES_PER_SEGMENT: u32 = 120;

/// Request priority class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    /// Scheduler class index, `0..CLASS_COUNT`. Stable and independent of
    /// the wire ordinal so a future wire revision can't silently reorder
    /// scheduling behavior.
    pub const fn class_id(self) -> usize {
        match self {
            Priority::High => 0,
            Priority::Medium => 1,
            Priority::Low => 2,
        }
    }

    pub const fn from_class_id(id: usize) -> Option<Self> {
        match id {
            0 => Some(Priority::High),
            1 => Some(Priority::Medium),
            2 => Some(Priority::Low),
            _ => None,
        }
    }

    /// Weight used by SP (as the priority key) and WFQ (as `1/weight`).
    /// HIGH must win SP outright and get the largest WFQ share; the wire's
    /// `0` ordinal for HIGH is irrelevant here.
    pub const fn weight(self) -> u32 {
        match self {
            Priority::High => 10,
            Priority::Medium => 3,
            Priority::Low => 1,
        }
    }

    /// Wire ordinal: `0=HIGH, 1=MEDIUM, 2=LOW`.
    pub const fn wire_value(self) -> i64 {
        match self {
            Priority::High => 0,
            Priority::Medium => 1,
            Priority::Low => 2,
        }
    }

    pub const fn from_wire_value(v: i64) -> Self {
        match v {
            0 => Priority::High,
            1 => Priority::Medium,
            _ => Priority::Low,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

/// Requested encoding bitrate, in the source's arbitrary units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bitrate {
    Low,
    Medium,
    High,
}

impl Bitrate {
    pub const fn wire_value(self) -> i64 {
        match self {
            Bitrate::Low => 3,
            Bitrate::Medium => 5,
            Bitrate::High => 10,
        }
    }

    pub const fn from_wire_value(v: i64) -> Self {
        match v {
            10 => Bitrate::High,
            5 => Bitrate::Medium,
            _ => Bitrate::Low,
        }
    }

    /// All bitrates ordered from lowest to highest, for ABR threshold scans.
    pub const ASCENDING: [Bitrate; 3] = [Bitrate::Low, Bitrate::Medium, Bitrate::High];

    pub const fn as_str(self) -> &'static str {
        match self {
            Bitrate::Low => "low",
            Bitrate::Medium => "medium",
            Bitrate::High => "high",
        }
    }
}

/// A tile request as read off (or written to) the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestFrame {
    pub id: Uuid,
    pub priority: Priority,
    pub bitrate: Bitrate,
    pub segment: u32,
    pub tile: u32,
    pub timeout_ms: u64,
}

/// A tile response as read off (or written to) the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    pub priority: Priority,
    pub bitrate: Bitrate,
    pub segment: u32,
    pub tile: u32,
    pub data: Vec<u8>,
}

/// Identifies a response independent of its priority/bitrate, for client-side
/// request/response matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileKey {
    pub segment: u32,
    pub tile: u32,
}

impl ResponseFrame {
    pub fn key(&self) -> TileKey {
        TileKey {
            segment: self.segment,
            tile: self.tile,
        }
    }
}
