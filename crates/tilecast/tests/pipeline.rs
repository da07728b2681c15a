// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Exercises the scheduler, blob store, and framing layers together the way
//! a connection's stream reader actually wires them: requests parsed off a
//! byte stream, submitted to a [`TaskScheduler`] by priority, serviced
//! against a [`BlobStore`], and the responses framed back out.

use std::sync::mpsc;
use std::sync::Arc;

use tilecast::blobstore::{BlobStore, SyntheticBlobStore};
use tilecast::framing;
use tilecast::model::{Bitrate, Priority, RequestFrame, CLASS_COUNT};
use tilecast::sched::{QueuePolicy, TaskScheduler};

fn rt() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

/// A HIGH-priority request queued behind a burst of LOW-priority ones is
/// still serviced first under strict priority, and its framed response
/// carries the payload the blob store actually holds for that tile.
#[test]
fn sp_scheduler_services_high_priority_ahead_of_a_low_priority_burst() {
    let scheduler = TaskScheduler::new(QueuePolicy::Sp, 64, CLASS_COUNT);
    let runner = scheduler.clone();
    let handle = std::thread::spawn(move || runner.run());

    let blob_store: Arc<dyn BlobStore> = Arc::new(SyntheticBlobStore::new(256));
    let (order_tx, order_rx) = mpsc::channel::<&'static str>();

    for tile in 0..10 {
        let tx = order_tx.clone();
        assert!(scheduler.enqueue(Priority::Low, move || {
            let _ = tx.send("low");
            let _ = tile; // keeps each closure distinct
        }));
    }

    let store = blob_store.clone();
    let tx = order_tx.clone();
    assert!(scheduler.enqueue(Priority::High, move || {
        let payload = store.read(3, 7).expect("synthetic store never misses");
        assert_eq!(payload.len(), 256);
        let _ = tx.send("high");
    }));

    // Everything was enqueued before the serve loop could have drained the
    // LOW burst: HIGH must still come out first.
    assert_eq!(order_rx.recv().unwrap(), "high");
    for _ in 0..10 {
        assert_eq!(order_rx.recv().unwrap(), "low");
    }

    scheduler.stop();
    handle.join().unwrap();
}

/// A request read off a framed byte stream survives the scheduler and comes
/// back out the other side as a correctly-framed response sized to match
/// the blob store's payload for that tile.
#[test]
fn framed_request_round_trips_through_the_scheduler_to_a_framed_response() {
    rt().block_on(async {
        let req = RequestFrame {
            id: tilecast::Uuid::new_v4(),
            priority: Priority::Medium,
            bitrate: Bitrate::Medium,
            segment: 12,
            tile: 5,
            timeout_ms: 5_000,
        };
        let mut wire = Vec::new();
        framing::write_request(&mut wire, &req).await.unwrap();

        let mut reader = tokio::io::BufReader::new(wire.as_slice());
        let parsed = framing::read_request(&mut reader).await.unwrap();
        assert_eq!(parsed, req);

        let scheduler = TaskScheduler::new(QueuePolicy::Fifo, 16, CLASS_COUNT);
        let runner = scheduler.clone();
        let handle = std::thread::spawn(move || runner.run());

        let blob_store: Arc<dyn BlobStore> = Arc::new(SyntheticBlobStore::new(128));
        let (tx, rx) = std::sync::mpsc::channel();
        let store = blob_store.clone();
        scheduler.enqueue(parsed.priority, move || {
            let data = store.read(parsed.segment, parsed.tile).unwrap_or_default();
            let response = tilecast::model::ResponseFrame {
                priority: parsed.priority,
                bitrate: parsed.bitrate,
                segment: parsed.segment,
                tile: parsed.tile,
                data,
            };
            tx.send(response).unwrap();
        });

        let response = tokio::task::spawn_blocking(move || rx.recv().unwrap())
            .await
            .unwrap();
        scheduler.stop();
        handle.join().unwrap();

        let mut out = Vec::new();
        framing::write_response(&mut out, &response).await.unwrap();
        let mut reader = tokio::io::BufReader::new(out.as_slice());
        let reparsed = framing::read_response(&mut reader).await.unwrap();
        assert_eq!(reparsed.segment, 12);
        assert_eq!(reparsed.tile, 5);
        assert_eq!(reparsed.data.len(), 128);
    });
}

/// A queue at capacity reports back-pressure rather than silently
/// dropping the request, exactly as the stream reader relies on to decide
/// whether to keep reading from a connection.
#[test]
fn scheduler_reports_backpressure_when_a_class_queue_saturates() {
    let scheduler = TaskScheduler::new(QueuePolicy::Wfq, 2, CLASS_COUNT);
    assert!(scheduler.enqueue(Priority::Low, || {}));
    assert!(scheduler.enqueue(Priority::Low, || {}));
    assert!(!scheduler.enqueue(Priority::Low, || {}));
}
