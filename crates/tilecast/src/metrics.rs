// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Metrics sink: per-class counters plus a handful of global counters,
//! guarded by one `parking_lot::Mutex` and flushed to CSV on demand.
//! Critical sections are a handful of field increments, so callers never
//! see meaningful contention even under a busy serve loop.

use std::path::Path;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

use crate::model::{Priority, CLASS_COUNT};

#[derive(Debug, Default, Clone, Copy)]
struct ClassCounters {
    enqueued: u64,
    started: u64,
    completed: u64,
    dropped_deadline: u64,
    bytes: u64,
    stale_bytes: u64,
    queue_delay_ns_total: u64,
    service_ns_total: u64,
}

#[derive(Debug, Default)]
struct Counters {
    classes: [ClassCounters; CLASS_COUNT],
    preemptions: u64,
    inversions: u64,
    /// Total time any class queue was non-empty.
    time_queued_ns: u64,
    /// Of that time, how much had no task in service — the numerator of
    /// the work-conserving ratio.
    idle_while_queued_ns: u64,
}

/// Accumulates per-class and global counters for one server connection (or
/// one whole server run, if the caller shares one instance across
/// connections).
#[derive(Default)]
pub struct Metrics {
    counters: Mutex<Counters>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_enqueue(&self, priority: Priority) {
        self.counters.lock().classes[priority.class_id()].enqueued += 1;
    }

    /// Records that service began `queue_delay` after enqueue. Detects a
    /// priority inversion: a higher class still had work queued (or in
    /// service) while this lower class's task started.
    pub fn on_start(&self, priority: Priority, queue_delay: Duration, higher_class_was_ready: bool) {
        let mut c = self.counters.lock();
        let class = &mut c.classes[priority.class_id()];
        class.started += 1;
        class.queue_delay_ns_total += queue_delay.as_nanos() as u64;
        if higher_class_was_ready {
            c.inversions += 1;
        }
    }

    /// Records a completed request.
    pub fn on_complete(&self, priority: Priority, service_time: Duration, bytes: u64) {
        let mut c = self.counters.lock();
        let class = &mut c.classes[priority.class_id()];
        class.completed += 1;
        class.bytes += bytes;
        class.service_ns_total += service_time.as_nanos() as u64;
    }

    /// Records a request abandoned at service start because its deadline
    /// had already passed. `est_bytes` is the blob store's size hint for
    /// the tile that would have been served — never read, so never
    /// counted as delivered, but still tracked as bandwidth that would
    /// have gone stale by the time it arrived. Not an error — see
    /// [`crate::error`].
    pub fn on_deadline_drop(&self, priority: Priority, est_bytes: u64) {
        let mut c = self.counters.lock();
        let class = &mut c.classes[priority.class_id()];
        class.dropped_deadline += 1;
        class.stale_bytes += est_bytes;
    }

    pub fn on_preempt(&self) {
        self.counters.lock().preemptions += 1;
    }

    /// Work-conserving accounting: call on every periodic queue-length
    /// sample with each class's current depth and whether a task is
    /// currently in service. While any class queue is non-empty, `elapsed`
    /// (the time since the previous sample) accumulates into
    /// `time_queued`; it also accumulates into `idle_while_queued` whenever
    /// nothing is in service despite that queued work.
    pub fn on_queue_sample(&self, lengths: [usize; CLASS_COUNT], busy: bool, elapsed: Duration) {
        if lengths.iter().all(|&len| len == 0) {
            return;
        }
        let mut c = self.counters.lock();
        let elapsed_ns = elapsed.as_nanos() as u64;
        c.time_queued_ns += elapsed_ns;
        if !busy {
            c.idle_while_queued_ns += elapsed_ns;
        }
    }

    /// `100 * idle_while_queued / time_queued` — 0% means the server was
    /// fully work-conserving (never idle while work sat queued) over the
    /// sampled period. Reads 0.0 if no sample ever observed queued work.
    pub fn work_conserving_ratio_percent(&self) -> f64 {
        let c = self.counters.lock();
        if c.time_queued_ns == 0 {
            0.0
        } else {
            100.0 * c.idle_while_queued_ns as f64 / c.time_queued_ns as f64
        }
    }

    /// Jain's fairness index over each class's completed-byte share,
    /// normalized by its weight under the active discipline. A value of
    /// 1.0 is perfectly proportionally fair; `1/CLASS_COUNT` is maximally
    /// unfair (one class takes everything).
    pub fn jain_fairness_index(&self, weights: [f64; CLASS_COUNT]) -> f64 {
        let c = self.counters.lock();
        let shares: Vec<f64> = c
            .classes
            .iter()
            .zip(weights.iter())
            .map(|(class, w)| if *w > 0.0 { class.bytes as f64 / w } else { 0.0 })
            .collect();
        let sum: f64 = shares.iter().sum();
        let sum_sq: f64 = shares.iter().map(|s| s * s).sum();
        if sum_sq == 0.0 {
            1.0
        } else {
            (sum * sum) / (shares.len() as f64 * sum_sq)
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let c = self.counters.lock();
        let classes = std::array::from_fn(|i| c.classes[i]);
        let work_conserving_ratio_percent = if c.time_queued_ns == 0 {
            0.0
        } else {
            100.0 * c.idle_while_queued_ns as f64 / c.time_queued_ns as f64
        };
        MetricsSnapshot {
            classes,
            preemptions: c.preemptions,
            inversions: c.inversions,
            work_conserving_ratio_percent,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MetricsSnapshot {
    classes: [ClassCounters; CLASS_COUNT],
    preemptions: u64,
    inversions: u64,
    work_conserving_ratio_percent: f64,
}

fn percent(numerator: f64, denominator: f64) -> f64 {
    if denominator <= 0.0 {
        0.0
    } else {
        100.0 * numerator / denominator
    }
}

impl MetricsSnapshot {
    pub fn work_conserving_ratio_percent(&self) -> f64 {
        self.work_conserving_ratio_percent
    }

    pub fn stale_bytes_total(&self) -> u64 {
        self.classes.iter().map(|c| c.stale_bytes).sum()
    }

    /// One row per priority class: `throughput_kbps, byte_share_percent,
    /// deadline_drop_rate_percent`.
    pub fn write_class_agg_csv(&self, path: impl AsRef<Path>, wall_clock: Duration) -> Result<(), csv::Error> {
        #[derive(Serialize)]
        struct ClassAggRow {
            class: &'static str,
            throughput_kbps: f64,
            byte_share_percent: f64,
            deadline_drop_rate_percent: f64,
        }

        let total_bytes: u64 = self.classes.iter().map(|c| c.bytes).sum();
        let wall_clock_secs = wall_clock.as_secs_f64().max(1e-9);

        let mut w = csv::Writer::from_path(path)?;
        for (i, class) in self.classes.iter().enumerate() {
            let priority = Priority::from_class_id(i).expect("i < CLASS_COUNT");
            let attempts = class.completed + class.dropped_deadline;
            w.serialize(ClassAggRow {
                class: priority.as_str(),
                throughput_kbps: (class.bytes as f64 * 8.0 / 1000.0) / wall_clock_secs,
                byte_share_percent: percent(class.bytes as f64, total_bytes as f64),
                deadline_drop_rate_percent: percent(class.dropped_deadline as f64, attempts as f64),
            })?;
        }
        w.flush()?;
        Ok(())
    }

    /// Single row: `jain_fairness_index, preemptions, inversions,
    /// work_conserving_ratio_percent, wall_clock_secs`.
    pub fn write_server_summary_csv(
        &self,
        path: impl AsRef<Path>,
        jain_fairness_index: f64,
        wall_clock: Duration,
    ) -> Result<(), csv::Error> {
        #[derive(Serialize)]
        struct SummaryRow {
            jain_fairness_index: f64,
            preemptions: u64,
            inversions: u64,
            work_conserving_ratio_percent: f64,
            wall_clock_secs: f64,
        }
        let mut w = csv::Writer::from_path(path)?;
        w.serialize(SummaryRow {
            jain_fairness_index,
            preemptions: self.preemptions,
            inversions: self.inversions,
            work_conserving_ratio_percent: self.work_conserving_ratio_percent,
            wall_clock_secs: wall_clock.as_secs_f64(),
        })?;
        w.flush()?;
        Ok(())
    }
}

/// One row of the `reqlog` CSV: a single completed (or dropped) request.
#[derive(Debug, Clone, Serialize)]
pub struct RequestLogRow {
    pub time_ns: u64,
    pub class: &'static str,
    pub segment: u32,
    pub tile: u32,
    pub queue_delay_ns: u64,
    pub service_ns: u64,
    pub bytes: u64,
    pub on_time: bool,
    pub dropped_deadline: bool,
}

/// Appends request-level rows incrementally, so a long-running server does
/// not hold the entire request log in memory before flushing.
pub struct RequestLogWriter {
    writer: csv::Writer<std::fs::File>,
}

impl RequestLogWriter {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, csv::Error> {
        Ok(Self {
            writer: csv::Writer::from_path(path)?,
        })
    }

    pub fn write(&mut self, row: &RequestLogRow) -> Result<(), csv::Error> {
        self.writer.serialize(row)?;
        self.writer.flush()?;
        Ok(())
    }
}

/// One row of the `queue_len` CSV: a periodic sample of one class's queue
/// depth, for plotting queueing behavior over the run.
#[derive(Debug, Clone, Serialize)]
pub struct QueueLenSample {
    pub time_ns: u64,
    pub class: &'static str,
    pub len: usize,
}

pub struct QueueLenWriter {
    writer: csv::Writer<std::fs::File>,
}

impl QueueLenWriter {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, csv::Error> {
        Ok(Self {
            writer: csv::Writer::from_path(path)?,
        })
    }

    pub fn write(&mut self, sample: &QueueLenSample) -> Result<(), csv::Error> {
        self.writer.serialize(sample)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), csv::Error> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jain_index_is_one_when_shares_are_equal() {
        let m = Metrics::new();
        m.on_complete(Priority::High, Duration::ZERO, 100);
        m.on_complete(Priority::Medium, Duration::ZERO, 30);
        m.on_complete(Priority::Low, Duration::ZERO, 10);
        // Weights proportional to bytes sent above: equal normalized shares.
        let idx = m.jain_fairness_index([10.0, 3.0, 1.0]);
        assert!((idx - 1.0).abs() < 1e-9, "expected ~1.0, got {idx}");
    }

    #[test]
    fn jain_index_drops_when_one_class_monopolizes() {
        let m = Metrics::new();
        m.on_complete(Priority::High, Duration::ZERO, 1000);
        let idx = m.jain_fairness_index([10.0, 3.0, 1.0]);
        assert!(idx < 1.0 / 3.0 + 1e-9);
    }

    #[test]
    fn work_conserving_ratio_is_zero_with_no_queued_work_observed() {
        let m = Metrics::new();
        assert_eq!(m.work_conserving_ratio_percent(), 0.0);
    }

    #[test]
    fn work_conserving_ratio_tracks_idle_fraction_while_queued() {
        let m = Metrics::new();
        let lengths = |n| {
            let mut l = [0usize; CLASS_COUNT];
            l[0] = n;
            l
        };
        // Three idle samples, one busy sample, all while something's queued.
        m.on_queue_sample(lengths(1), false, Duration::from_millis(100));
        m.on_queue_sample(lengths(1), false, Duration::from_millis(100));
        m.on_queue_sample(lengths(1), false, Duration::from_millis(100));
        m.on_queue_sample(lengths(1), true, Duration::from_millis(100));
        assert!((m.work_conserving_ratio_percent() - 75.0).abs() < 1e-9);
    }

    #[test]
    fn empty_queue_samples_do_not_count_toward_time_queued() {
        let m = Metrics::new();
        m.on_queue_sample([0; CLASS_COUNT], false, Duration::from_secs(10));
        m.on_queue_sample([1, 0, 0], true, Duration::from_millis(100));
        assert_eq!(m.work_conserving_ratio_percent(), 0.0);
    }

    #[test]
    fn deadline_drop_does_not_affect_completed_count() {
        let m = Metrics::new();
        m.on_deadline_drop(Priority::Low, 4096);
        let snap = m.snapshot();
        assert_eq!(snap.classes[Priority::Low.class_id()].dropped_deadline, 1);
        assert_eq!(snap.classes[Priority::Low.class_id()].completed, 0);
        assert_eq!(snap.stale_bytes_total(), 4096);
    }

    #[test]
    fn inversion_is_counted_when_a_higher_class_was_ready() {
        let m = Metrics::new();
        m.on_start(Priority::Low, Duration::ZERO, true);
        let snap = m.snapshot();
        assert_eq!(snap.inversions, 1);
    }

    #[test]
    fn class_agg_reports_full_byte_share_for_the_only_active_class() {
        let m = Metrics::new();
        m.on_complete(Priority::High, Duration::from_millis(1), 1000);
        let snap = m.snapshot();
        let path = std::env::temp_dir().join(format!("tilecast_class_agg_test_{}.csv", std::process::id()));
        snap.write_class_agg_csv(&path, Duration::from_secs(1)).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).ok();
        let high_row = text.lines().find(|l| l.starts_with("high,")).unwrap();
        let fields: Vec<&str> = high_row.split(',').collect();
        assert!((fields[1].parse::<f64>().unwrap() - 8.0).abs() < 1e-9);
        assert!((fields[2].parse::<f64>().unwrap() - 100.0).abs() < 1e-9);
        assert!((fields[3].parse::<f64>().unwrap() - 0.0).abs() < 1e-9);
    }
}
