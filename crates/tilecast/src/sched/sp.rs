// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Strict priority uses [`Priority::weight`] directly as the dequeue key:
//! HIGH(10) always beats MEDIUM(3) always beats LOW(1), regardless of the
//! wire ordinal those priorities carry.

use crate::model::Priority;

pub fn weight_for(priority: Priority) -> f64 {
    priority.weight() as f64
}
