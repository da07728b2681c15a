// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-connection stream handling: one [`TaskScheduler`] per connection, an
//! acceptor loop that hands each incoming bidirectional stream to its own
//! reader task, a periodic queue-length sampler, and the service closure
//! stream readers submit.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tilecast::blobstore::BlobStore;
use tilecast::framing;
use tilecast::metrics::{Metrics, QueueLenSample, RequestLogRow};
use tilecast::model::{Priority, CLASS_COUNT};
use tilecast::sched::{QueuePolicy, TaskScheduler};
use tilecast::transport::{Connection, RecvStream, SendStream};
use tokio::io::BufReader;
use tokio::sync::mpsc;

const QUEUE_SAMPLE_INTERVAL: Duration = Duration::from_millis(200);

pub struct ConnectionConfig {
    pub policy: QueuePolicy,
    pub class_queue_capacity: usize,
    pub discipline_capacity: usize,
}

/// Drives one accepted connection end to end: scheduler, acceptor, the
/// periodic queue-length sampler, and the per-stream reader tasks it
/// spawns. Returns once the connection closes.
pub async fn handle_connection(
    conn: Connection,
    config: Arc<ConnectionConfig>,
    metrics: Arc<Metrics>,
    blob_store: Arc<dyn BlobStore>,
    server_start: Instant,
    reqlog_tx: mpsc::UnboundedSender<RequestLogRow>,
    queue_len_tx: mpsc::UnboundedSender<QueueLenSample>,
) {
    let scheduler = TaskScheduler::new(config.policy, config.class_queue_capacity, config.discipline_capacity);
    let runner = scheduler.clone();
    let serve_handle = tokio::task::spawn_blocking(move || runner.run());

    let sampler_scheduler = scheduler.clone();
    let sampler_metrics = metrics.clone();
    let sampler_queue_len_tx = queue_len_tx.clone();
    let sampler_handle = tokio::spawn(async move {
        sample_queue_lengths(sampler_scheduler, sampler_metrics, server_start, sampler_queue_len_tx).await;
    });

    let remote = conn.remote_addr();
    log::info!("connection established with {remote}");

    loop {
        match conn.accept_bi().await {
            Some(Ok((send, recv))) => {
                let scheduler = scheduler.clone();
                let metrics = metrics.clone();
                let blob_store = blob_store.clone();
                let reqlog_tx = reqlog_tx.clone();
                tokio::spawn(async move {
                    stream_reader(send, recv, scheduler, metrics, blob_store, server_start, reqlog_tx).await;
                });
            }
            Some(Err(e)) => {
                log::warn!("stream accept error from {remote}: {e}");
                break;
            }
            None => break,
        }
    }

    scheduler.stop();
    sampler_handle.abort();
    let _ = serve_handle.await;
    log::info!("connection with {remote} closed");
}

/// Samples each class's queue depth on a fixed interval for the life of the
/// connection: feeds `queue_len` rows and, since it's the only place that
/// knows both queue depth and whether the scheduler is currently servicing
/// anything, drives the work-conserving accounting in [`Metrics`].
async fn sample_queue_lengths(
    scheduler: TaskScheduler,
    metrics: Arc<Metrics>,
    server_start: Instant,
    queue_len_tx: mpsc::UnboundedSender<QueueLenSample>,
) {
    let mut ticker = tokio::time::interval(QUEUE_SAMPLE_INTERVAL);
    loop {
        ticker.tick().await;
        let lengths = scheduler.queue_lengths();
        metrics.on_queue_sample(lengths, scheduler.is_busy(), QUEUE_SAMPLE_INTERVAL);
        let time_ns = server_start.elapsed().as_nanos() as u64;
        for class_id in 0..CLASS_COUNT {
            let priority = Priority::from_class_id(class_id).expect("class_id < CLASS_COUNT");
            let _ = queue_len_tx.send(QueueLenSample {
                time_ns,
                class: priority.as_str(),
                len: lengths[class_id],
            });
        }
    }
}

/// Reads requests off one bidirectional stream and submits each to the
/// scheduler. A stream may carry more than one pipelined request; responses
/// may complete out of order relative to the order requests were read.
async fn stream_reader(
    send: SendStream,
    recv: RecvStream,
    scheduler: TaskScheduler,
    metrics: Arc<Metrics>,
    blob_store: Arc<dyn BlobStore>,
    server_start: Instant,
    reqlog_tx: mpsc::UnboundedSender<RequestLogRow>,
) {
    let mut reader = BufReader::new(recv);
    let send = Arc::new(tokio::sync::Mutex::new(send));
    // One response writer is shared by every request this stream reads;
    // the use-count tracks how many are still in flight so the stream is
    // only closed once nothing can write to it anymore.
    let use_count = Arc::new(AtomicUsize::new(0));

    loop {
        let req = match framing::read_request(&mut reader).await {
            Ok(req) => req,
            Err(_) => break,
        };

        let enqueued_at = Instant::now();
        let deadline = enqueued_at + Duration::from_millis(req.timeout_ms);
        metrics.on_enqueue(req.priority);
        use_count.fetch_add(1, Ordering::SeqCst);

        let send = send.clone();
        let scheduler_for_task = scheduler.clone();
        let metrics = metrics.clone();
        let blob_store = blob_store.clone();
        let use_count_for_task = use_count.clone();
        let reqlog_tx = reqlog_tx.clone();

        let ok = scheduler.enqueue(req.priority, move || {
            service_request(
                req,
                enqueued_at,
                deadline,
                send,
                scheduler_for_task,
                metrics,
                blob_store,
                use_count_for_task,
                server_start,
                reqlog_tx,
            );
        });
        if !ok {
            log::warn!("class queue saturated, dropping stream");
            use_count.fetch_sub(1, Ordering::SeqCst);
            break;
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn service_request(
    req: tilecast::model::RequestFrame,
    enqueued_at: Instant,
    deadline: Instant,
    send: Arc<tokio::sync::Mutex<SendStream>>,
    scheduler: TaskScheduler,
    metrics: Arc<Metrics>,
    blob_store: Arc<dyn BlobStore>,
    use_count: Arc<AtomicUsize>,
    server_start: Instant,
    reqlog_tx: mpsc::UnboundedSender<RequestLogRow>,
) {
    let start = Instant::now();
    let queue_delay = start.saturating_duration_since(enqueued_at);
    let higher_was_ready = scheduler.higher_class_ready(req.priority);
    metrics.on_start(req.priority, queue_delay, higher_was_ready);

    let finish = |bytes: u64, dropped_deadline: bool, est_bytes: u64, reqlog_tx: mpsc::UnboundedSender<RequestLogRow>| {
        let now = Instant::now();
        let service_time = now.saturating_duration_since(start);
        let on_time = !dropped_deadline && now <= deadline;
        if dropped_deadline {
            metrics.on_deadline_drop(req.priority, est_bytes);
        } else {
            metrics.on_complete(req.priority, service_time, bytes);
        }
        let _ = reqlog_tx.send(RequestLogRow {
            time_ns: server_start.elapsed().as_nanos() as u64,
            class: req.priority.as_str(),
            segment: req.segment,
            tile: req.tile,
            queue_delay_ns: queue_delay.as_nanos() as u64,
            service_ns: service_time.as_nanos() as u64,
            bytes,
            on_time,
            dropped_deadline,
        });
        if use_count.fetch_sub(1, Ordering::SeqCst) == 1 {
            // Last in-flight request on this stream: nothing left to write.
            let send = send.clone();
            tokio::spawn(async move {
                let mut send = send.lock().await;
                let _ = send.finish();
            });
        }
    };

    if Instant::now() > deadline {
        let est_bytes = blob_store.size_hint(req.segment, req.tile).unwrap_or(0);
        finish(0, true, est_bytes, reqlog_tx);
        return;
    }

    let payload = blob_store.read(req.segment, req.tile).unwrap_or_default();
    let bytes = payload.len() as u64;
    let response = tilecast::model::ResponseFrame {
        priority: req.priority,
        bitrate: req.bitrate,
        segment: req.segment,
        tile: req.tile,
        data: payload,
    };

    let send2 = send.clone();
    let reqlog_tx2 = reqlog_tx.clone();
    let write_result = tokio::runtime::Handle::current().block_on(async move {
        let mut send = send2.lock().await;
        framing::write_response(&mut *send, &response).await
    });

    match write_result {
        Ok(()) => finish(bytes, false, 0, reqlog_tx2),
        Err(e) => {
            log::debug!("write error for {}/{}: {e}", req.segment, req.tile);
            finish(0, false, 0, reqlog_tx2);
        }
    }
}
