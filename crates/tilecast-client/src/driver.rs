// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The request driver: walks `[first, last]` segment by segment, gates each
//! one on the playback clock's pre-fetch window, and fans every tile of the
//! segment out as a concurrency-bounded, FOV-prioritized request.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tilecast::fov::FovTrace;
use tilecast::{Bitrate, Priority, RequestFrame, Uuid, TILES_PER_SEGMENT};
use tokio::sync::Semaphore;

use crate::abr;
use crate::collector::ThroughputLatencyCollector;
use crate::connection::{await_response, ClientConnection};
use crate::playback::PlaybackClock;
use crate::qoe::{QoeAggregator, RequestOutcome, StatRow, StatWriter};

const MIN_TIMEOUT: Duration = Duration::from_millis(1);

pub struct DriverConfig {
    pub first_segment: u32,
    pub last_segment: u32,
    pub segment_duration: Duration,
    pub parallelism: usize,
}

/// Runs the full session: one segment loop driving many concurrent tile
/// requests, until every segment in range has been requested.
#[allow(clippy::too_many_arguments)]
pub async fn run(
    config: DriverConfig,
    conn: Arc<ClientConnection>,
    clock: Arc<PlaybackClock>,
    fov: Option<Arc<FovTrace>>,
    collector: Arc<ThroughputLatencyCollector>,
    qoe: Arc<QoeAggregator>,
    stats: Arc<tokio::sync::Mutex<StatWriter>>,
    start: Instant,
) {
    let semaphore = Arc::new(Semaphore::new(config.parallelism.max(1)));
    let last_downloaded = Arc::new(AtomicU32::new(config.first_segment.saturating_sub(1)));

    let mut join_set = tokio::task::JoinSet::new();

    for segment in config.first_segment..=config.last_segment {
        let avg_throughput = collector.avg_throughput_kbps();
        let buffer_level = clock.buffer_level(last_downloaded.load(Ordering::SeqCst));
        let bitrate = abr::choose_bitrate(avg_throughput, buffer_level);

        clock.wait_until_within_prefetch_window(segment).await;

        let time_to_receive = clock.time_to_receive(segment);
        let time_budget = time_to_receive
            .clamp(config.segment_duration, config.segment_duration * 3)
            + config.segment_duration;
        let deadline = Instant::now() + time_budget;

        for tile in 1..=TILES_PER_SEGMENT {
            let in_fov = fov
                .as_ref()
                .map(|trace| trace.contains(segment, tile))
                .unwrap_or(true);
            qoe.mark_required(segment, in_fov);

            let priority = if in_fov { Priority::High } else { Priority::Low };
            let request_bitrate = if in_fov { bitrate } else { Bitrate::Low };

            let permit = semaphore.clone().acquire_owned().await.expect("semaphore never closes");
            let conn = conn.clone();
            let collector = collector.clone();
            let qoe = qoe.clone();
            let stats = stats.clone();
            let last_downloaded = last_downloaded.clone();
            let clock = clock.clone();

            join_set.spawn(async move {
                let _permit = permit;
                run_one_request(
                    conn,
                    collector,
                    qoe,
                    stats,
                    last_downloaded,
                    clock,
                    start,
                    segment,
                    tile,
                    priority,
                    request_bitrate,
                    in_fov,
                    deadline,
                )
                .await;
            });
        }
    }

    while join_set.join_next().await.is_some() {}
}

#[allow(clippy::too_many_arguments)]
async fn run_one_request(
    conn: Arc<ClientConnection>,
    collector: Arc<ThroughputLatencyCollector>,
    qoe: Arc<QoeAggregator>,
    stats: Arc<tokio::sync::Mutex<StatWriter>>,
    last_downloaded: Arc<AtomicU32>,
    clock: Arc<PlaybackClock>,
    start: Instant,
    segment: u32,
    tile: u32,
    priority: Priority,
    bitrate: Bitrate,
    in_fov: bool,
    deadline: Instant,
) {
    let buffer_s = clock.buffer_level(last_downloaded.load(Ordering::SeqCst)).as_secs_f64();
    let now = Instant::now();
    let remaining = deadline.saturating_duration_since(now);
    if remaining.is_zero() {
        record_row(
            &stats, start, segment, tile, priority, 0, false, true, false, 0.0, buffer_s, in_fov, false,
        )
        .await;
        qoe.record(&RequestOutcome {
            segment,
            in_fov,
            ok: false,
            on_time: false,
            bytes: 0,
            response_time: Duration::ZERO,
        });
        return;
    }

    let timeout = remaining.max(MIN_TIMEOUT);
    let req = RequestFrame {
        id: Uuid::new_v4(),
        priority,
        bitrate,
        segment,
        tile,
        timeout_ms: timeout.as_millis() as u64,
    };

    qoe.mark_first_request_sent();
    let submitted = conn.submit(&req).await;
    let rx = match submitted {
        Ok(rx) => rx,
        Err(e) => {
            log::warn!("failed to submit request for ({segment}, {tile}): {e}");
            return;
        }
    };

    collector.record_send(req.id);
    let send_time = Instant::now();
    let response = await_response(&conn, segment, tile, rx, timeout).await;
    let response_time = send_time.elapsed();

    let timed_out = response.is_none();
    let now_after = Instant::now();
    let late = now_after > deadline;

    let (ok, bytes, tp) = match &response {
        Some(response) => {
            let (_, tp) = collector.record_recv(req.id, response.data.len() as u64).unwrap_or((Duration::ZERO, 0.0));
            (!response.data.is_empty(), response.data.len() as u64, tp)
        }
        None => {
            collector.forget(req.id);
            (false, 0, 0.0)
        }
    };
    let on_time = ok && !late;

    if ok {
        last_downloaded.fetch_max(segment, Ordering::SeqCst);
    }

    qoe.record(&RequestOutcome {
        segment,
        in_fov,
        ok,
        on_time,
        bytes,
        response_time,
    });

    record_row(
        &stats,
        start,
        segment,
        tile,
        priority,
        response_time.as_nanos() as u64,
        timed_out,
        false,
        ok,
        tp,
        buffer_s,
        in_fov,
        on_time,
    )
    .await;
}

#[allow(clippy::too_many_arguments)]
async fn record_row(
    stats: &Arc<tokio::sync::Mutex<StatWriter>>,
    start: Instant,
    segment: u32,
    tile: u32,
    priority: Priority,
    latency_ns: u64,
    timedout: bool,
    skipped: bool,
    ok: bool,
    tp: f64,
    buffer_s: f64,
    in_fov: bool,
    on_time: bool,
) {
    let row = StatRow {
        time_ns: start.elapsed().as_nanos() as u64,
        segment,
        tile,
        priority: priority.as_str(),
        latency_ns,
        timedout,
        skipped,
        ok,
        tp,
        buffer_s,
        tile_missing_ratio: if ok { 0.0 } else { 1.0 },
        in_fov,
        on_time,
    };
    let mut writer = stats.lock().await;
    if let Err(e) = writer.write(&row) {
        log::warn!("failed to write statistics row for ({segment}, {tile}): {e}");
    }
}
