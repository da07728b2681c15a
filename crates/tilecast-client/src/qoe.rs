// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Quality-of-experience aggregation: per-request CSV rows as they happen,
//! plus the running totals needed to emit the end-of-session summary and
//! the two time-series reports (FOV hit rate per segment, goodput per
//! one-second window).

use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

/// One row of `statistics-<pid>.csv`: the full record of a single tile
/// request, win or lose.
#[derive(Debug, Clone, Serialize)]
pub struct StatRow {
    pub time_ns: u64,
    pub segment: u32,
    pub tile: u32,
    pub priority: &'static str,
    pub latency_ns: u64,
    pub timedout: bool,
    pub skipped: bool,
    pub ok: bool,
    pub tp: f64,
    pub buffer_s: f64,
    pub tile_missing_ratio: f64,
    pub in_fov: bool,
    pub on_time: bool,
}

pub struct StatWriter {
    writer: csv::Writer<std::fs::File>,
}

impl StatWriter {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, csv::Error> {
        Ok(Self {
            writer: csv::Writer::from_path(path)?,
        })
    }

    pub fn write(&mut self, row: &StatRow) -> Result<(), csv::Error> {
        self.writer.serialize(row)?;
        Ok(self.writer.flush()?)
    }
}

/// One row of `statistics-summary-<pid>.csv`: the whole session in one line.
#[derive(Debug, Clone, Serialize)]
pub struct SummaryRow {
    pub join_latency_ms: u64,
    pub segment_completion_rate_percent: f64,
    pub segment_completion_rate_fov_percent: f64,
    pub stale_bytes_ratio_percent: f64,
    pub deadline_miss_rate_fov_percent: f64,
    pub deadline_miss_rate_nonfov_percent: f64,
    pub fov_hit_rate_delivery_percent: f64,
    pub useful_goodput_fov_kbps: f64,
}

impl SummaryRow {
    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<(), csv::Error> {
        let mut w = csv::Writer::from_path(path)?;
        w.serialize(self)?;
        Ok(w.flush()?)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FovHitSeriesRow {
    pub segment: u32,
    pub fov_hit_rate_percent: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GoodputSeriesRow {
    pub window_index: u64,
    pub goodput_kbps: f64,
}

#[derive(Debug, Default, Clone, Copy)]
struct SegmentTotals {
    required_all: u32,
    on_time_all: u32,
    processed_all: u32,
    required_fov: u32,
    on_time_fov: u32,
    processed_fov: u32,
    delivered_fov: u32,
    delivered_total: u32,
}

#[derive(Debug, Default)]
struct State {
    per_segment: HashMap<u32, SegmentTotals>,
    stale_bytes: u64,
    delivered_total_bytes: u64,
    deadline_total_fov: u64,
    deadline_miss_fov: u64,
    deadline_total_nonfov: u64,
    deadline_miss_nonfov: u64,
    goodput_bucket_bytes: HashMap<u64, u64>,
    first_request_sent: Option<Instant>,
}

/// Session-wide aggregator, one instance shared (behind `Arc`) across every
/// request task. Guarded by a single mutex, matching how the server's
/// `Metrics` sink handles its own counters — the critical sections here are
/// just as small.
pub struct QoeAggregator {
    state: Mutex<State>,
    start: Instant,
}

/// The outcome of one resolved request task, as the driver observes it.
pub struct RequestOutcome {
    pub segment: u32,
    pub in_fov: bool,
    pub ok: bool,
    pub on_time: bool,
    pub bytes: u64,
    pub response_time: Duration,
}

impl QoeAggregator {
    pub fn new(start: Instant) -> Self {
        Self {
            state: Mutex::new(State::default()),
            start,
        }
    }

    /// Call once per tile before it is submitted, so the denominators for
    /// completion and deadline-miss rates are fixed ahead of the outcome.
    pub fn mark_required(&self, segment: u32, in_fov: bool) {
        let mut s = self.state.lock();
        let totals = s.per_segment.entry(segment).or_default();
        totals.required_all += 1;
        if in_fov {
            totals.required_fov += 1;
        }
        if in_fov {
            s.deadline_total_fov += 1;
        } else {
            s.deadline_total_nonfov += 1;
        }
    }

    /// Call the instant the very first request of the session is sent, for
    /// join-latency accounting.
    pub fn mark_first_request_sent(&self) {
        let mut s = self.state.lock();
        s.first_request_sent.get_or_insert_with(Instant::now);
    }

    pub fn first_request_sent(&self) -> Option<Instant> {
        self.state.lock().first_request_sent
    }

    pub fn record(&self, outcome: &RequestOutcome) {
        let mut s = self.state.lock();
        {
            let totals = s.per_segment.entry(outcome.segment).or_default();
            totals.processed_all += 1;
            if outcome.on_time {
                totals.on_time_all += 1;
            }
            if outcome.in_fov {
                totals.processed_fov += 1;
                if outcome.on_time {
                    totals.on_time_fov += 1;
                }
            }
            if outcome.ok {
                totals.delivered_total += 1;
                if outcome.in_fov {
                    totals.delivered_fov += 1;
                }
            }
        }

        if !outcome.on_time {
            if outcome.in_fov {
                s.deadline_miss_fov += 1;
            } else {
                s.deadline_miss_nonfov += 1;
            }
        }

        if outcome.ok {
            s.delivered_total_bytes += outcome.bytes;
            if !outcome.on_time {
                s.stale_bytes += outcome.bytes;
            }
            if outcome.on_time && outcome.in_fov {
                let bucket = self.start.elapsed().as_secs();
                *s.goodput_bucket_bytes.entry(bucket).or_insert(0) += outcome.bytes;
            }
        }
    }

    /// Computes the end-of-session summary row. `join_latency` is supplied
    /// by the driver (`playback_start - first_request_sent`), since the
    /// playback clock owns that instant, not this aggregator.
    pub fn summarize(&self, join_latency: Duration) -> SummaryRow {
        let s = self.state.lock();
        let (mut req_all, mut ot_all, mut req_fov, mut ot_fov) = (0u64, 0u64, 0u64, 0u64);
        let (mut del_fov, mut del_total) = (0u64, 0u64);
        for totals in s.per_segment.values() {
            req_all += totals.required_all as u64;
            ot_all += totals.on_time_all as u64;
            req_fov += totals.required_fov as u64;
            ot_fov += totals.on_time_fov as u64;
            del_fov += totals.delivered_fov as u64;
            del_total += totals.delivered_total as u64;
        }

        let elapsed_secs = self.start.elapsed().as_secs_f64().max(1e-9);
        let goodput_fov_bytes: u64 = s.goodput_bucket_bytes.values().sum();

        SummaryRow {
            join_latency_ms: join_latency.as_millis() as u64,
            segment_completion_rate_percent: percent(ot_all, req_all),
            segment_completion_rate_fov_percent: percent(ot_fov, req_fov),
            stale_bytes_ratio_percent: percent(s.stale_bytes, s.delivered_total_bytes),
            deadline_miss_rate_fov_percent: percent(s.deadline_miss_fov, s.deadline_total_fov),
            deadline_miss_rate_nonfov_percent: percent(s.deadline_miss_nonfov, s.deadline_total_nonfov),
            fov_hit_rate_delivery_percent: percent(del_fov, del_total),
            useful_goodput_fov_kbps: (goodput_fov_bytes as f64 * 8.0 / 1000.0) / elapsed_secs,
        }
    }

    /// Per-segment FOV hit rate, ordered by segment, for the hit-rate series.
    pub fn fov_hit_series(&self) -> Vec<FovHitSeriesRow> {
        let s = self.state.lock();
        let mut segments: Vec<u32> = s.per_segment.keys().copied().collect();
        segments.sort_unstable();
        segments
            .into_iter()
            .map(|segment| {
                let totals = s.per_segment[&segment];
                FovHitSeriesRow {
                    segment,
                    fov_hit_rate_percent: percent(
                        totals.delivered_fov as u64,
                        totals.delivered_total as u64,
                    ),
                }
            })
            .collect()
    }

    /// Per-one-second-window useful goodput, for the goodput series.
    pub fn goodput_series(&self) -> Vec<GoodputSeriesRow> {
        let s = self.state.lock();
        let mut windows: Vec<u64> = s.goodput_bucket_bytes.keys().copied().collect();
        windows.sort_unstable();
        windows
            .into_iter()
            .map(|window_index| GoodputSeriesRow {
                window_index,
                goodput_kbps: s.goodput_bucket_bytes[&window_index] as f64 * 8.0 / 1000.0,
            })
            .collect()
    }
}

fn percent(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        100.0 * numerator as f64 / denominator as f64
    }
}

pub fn write_series_csv<T: Serialize>(path: impl AsRef<Path>, rows: &[T]) -> Result<(), csv::Error> {
    let mut w = csv::Writer::from_path(path)?;
    for row in rows {
        w.serialize(row)?;
    }
    Ok(w.flush()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fov_hit_rate_reflects_delivered_fov_share() {
        let agg = QoeAggregator::new(Instant::now());
        agg.mark_required(1, true);
        agg.mark_required(1, false);
        agg.record(&RequestOutcome {
            segment: 1,
            in_fov: true,
            ok: true,
            on_time: true,
            bytes: 1000,
            response_time: Duration::from_millis(5),
        });
        agg.record(&RequestOutcome {
            segment: 1,
            in_fov: false,
            ok: true,
            on_time: true,
            bytes: 500,
            response_time: Duration::from_millis(5),
        });
        let summary = agg.summarize(Duration::ZERO);
        assert!((summary.fov_hit_rate_delivery_percent - 50.0).abs() < 1e-9);
    }

    #[test]
    fn deadline_miss_rate_splits_by_fov() {
        let agg = QoeAggregator::new(Instant::now());
        agg.mark_required(1, true);
        agg.mark_required(1, false);
        agg.record(&RequestOutcome {
            segment: 1,
            in_fov: true,
            ok: false,
            on_time: false,
            bytes: 0,
            response_time: Duration::from_millis(5),
        });
        agg.record(&RequestOutcome {
            segment: 1,
            in_fov: false,
            ok: true,
            on_time: true,
            bytes: 100,
            response_time: Duration::from_millis(5),
        });
        let summary = agg.summarize(Duration::ZERO);
        assert!((summary.deadline_miss_rate_fov_percent - 100.0).abs() < 1e-9);
        assert!((summary.deadline_miss_rate_nonfov_percent - 0.0).abs() < 1e-9);
    }

    #[test]
    fn stale_bytes_ratio_counts_only_late_deliveries() {
        let agg = QoeAggregator::new(Instant::now());
        agg.mark_required(1, true);
        agg.record(&RequestOutcome {
            segment: 1,
            in_fov: true,
            ok: true,
            on_time: false,
            bytes: 200,
            response_time: Duration::from_millis(5),
        });
        let summary = agg.summarize(Duration::ZERO);
        assert!((summary.stale_bytes_ratio_percent - 100.0).abs() < 1e-9);
    }
}
