// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! WFQ's weight table is the same `Priority::weight()` table SP uses, fed
//! through [`super::Discipline::set_priority`] which stores `1/weight` as
//! the per-dequeue virtual-finish increment. A class with weight 10 is
//! served roughly ten times as often as a class with weight 1 over any
//! sustained busy period.

use crate::model::Priority;

pub fn weight_for(priority: Priority) -> f64 {
    priority.weight() as f64
}
