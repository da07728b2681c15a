// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Throughput/latency collector: maps an opaque request id to its send
//! time, and on completion folds `(bytes, delay)` into a fixed-size
//! circular window so the ABR policy can read a recent average without
//! the whole session's history.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tilecast::Uuid;

pub struct ThroughputLatencyCollector {
    pending: DashMap<Uuid, Instant>,
    window: Mutex<VecDeque<f64>>,
    capacity: usize,
}

impl ThroughputLatencyCollector {
    pub fn new(window_len: usize) -> Self {
        let capacity = window_len.max(1);
        Self {
            pending: DashMap::new(),
            window: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Call the moment a request is written to the wire.
    pub fn record_send(&self, id: Uuid) {
        self.pending.insert(id, Instant::now());
    }

    /// Call on a matched response. Returns `(delay, throughput_kbps)`, or
    /// `None` if `id` was never sent (or was already forgotten by a
    /// timeout path) — not an error, just nothing left to measure.
    pub fn record_recv(&self, id: Uuid, bytes: u64) -> Option<(Duration, f64)> {
        let (_, sent_at) = self.pending.remove(&id)?;
        let delay = Instant::now().saturating_duration_since(sent_at);
        let kbps = if delay.as_secs_f64() > 0.0 {
            (bytes as f64 * 8.0 / 1000.0) / delay.as_secs_f64()
        } else {
            0.0
        };
        let mut window = self.window.lock();
        if window.len() == self.capacity {
            window.pop_front();
        }
        window.push_back(kbps);
        Some((delay, kbps))
    }

    /// Drops a pending send record whose request timed out or was skipped,
    /// so `pending` doesn't grow unbounded over a long run.
    pub fn forget(&self, id: Uuid) {
        self.pending.remove(&id);
    }

    pub fn avg_throughput_kbps(&self) -> f64 {
        let window = self.window.lock();
        if window.is_empty() {
            return 0.0;
        }
        window.iter().sum::<f64>() / window.len() as f64
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmatched_recv_returns_none() {
        let c = ThroughputLatencyCollector::new(4);
        assert!(c.record_recv(Uuid::new_v4(), 100).is_none());
    }

    #[test]
    fn average_throughput_is_mean_of_window() {
        let c = ThroughputLatencyCollector::new(2);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let cc = Uuid::new_v4();
        c.record_send(a);
        c.record_recv(a, 1_000).unwrap();
        c.record_send(b);
        c.record_recv(b, 1_000).unwrap();
        let first_avg = c.avg_throughput_kbps();
        assert!(first_avg > 0.0);

        // Window capacity 2: a third sample evicts the oldest.
        c.record_send(cc);
        c.record_recv(cc, 1_000).unwrap();
        assert_eq!(c.pending_count(), 0);
    }

    #[test]
    fn forget_drops_pending_entry() {
        let c = ThroughputLatencyCollector::new(4);
        let id = Uuid::new_v4();
        c.record_send(id);
        assert_eq!(c.pending_count(), 1);
        c.forget(id);
        assert_eq!(c.pending_count(), 0);
    }
}
