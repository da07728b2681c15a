// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! `tilecast-server` — deadline-aware tile-video delivery server.

mod connection;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use tilecast::blobstore::FileBlobStore;
use tilecast::config::{ServerConfig, ServerConfigOverrides};
use tilecast::metrics::{Metrics, QueueLenWriter, RequestLogWriter};
use tilecast::model::Priority;
use tilecast::sched::QueuePolicy;
use tilecast::transport::{Listener, TransportConfig};
use tokio::sync::mpsc;

use connection::{handle_connection, ConnectionConfig};

/// Deadline-aware tile-video delivery server.
#[derive(Parser, Debug)]
#[command(name = "tilecast-server")]
#[command(about = "Request-scheduled tile-video delivery server over QUIC")]
struct Args {
    /// Scheduler discipline applied to each connection's request queues.
    #[arg(long)]
    policy: Option<QueuePolicy>,

    /// Optional TOML config file; CLI flags here override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to bind the QUIC listener to.
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Per-class bounded queue capacity (`M`).
    #[arg(long)]
    class_queue_capacity: Option<usize>,

    /// Discipline capacity (`N`); normally left at the number of classes.
    #[arg(long)]
    discipline_capacity: Option<usize>,

    /// Root directory tile payloads are read from.
    #[arg(long)]
    blob_root: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let base = match &args.config {
        Some(path) => ServerConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => ServerConfig::default(),
    };
    let config = base.merge_cli(ServerConfigOverrides {
        policy: args.policy,
        bind_addr: args.bind,
        class_queue_capacity: args.class_queue_capacity,
        discipline_capacity: args.discipline_capacity,
        blob_root: args.blob_root,
    });

    run(config).await
}

async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let transport_config = TransportConfig {
        bind_addr: config.bind_addr,
        idle_timeout: Duration::from_millis(config.idle_timeout_ms),
        ..Default::default()
    };
    let listener = Listener::bind(&transport_config)
        .await
        .context("binding QUIC listener")?;
    log::info!(
        "tilecast-server listening on {} (policy {})",
        listener.local_addr()?,
        config.policy
    );

    let blob_store: Arc<dyn tilecast::blobstore::BlobStore> =
        Arc::new(FileBlobStore::new(config.blob_root.clone()));
    let metrics = Arc::new(Metrics::new());
    let conn_config = Arc::new(ConnectionConfig {
        policy: config.policy,
        class_queue_capacity: config.class_queue_capacity,
        discipline_capacity: config.discipline_capacity,
    });

    let (reqlog_tx, mut reqlog_rx) = mpsc::unbounded_channel();
    let reqlog_path = config.reqlog_path.clone();
    let reqlog_task = tokio::spawn(async move {
        let mut writer = match RequestLogWriter::create(&reqlog_path) {
            Ok(w) => w,
            Err(e) => {
                log::error!("failed to open reqlog at {}: {e}", reqlog_path.display());
                return;
            }
        };
        while let Some(row) = reqlog_rx.recv().await {
            if let Err(e) = writer.write(&row) {
                log::warn!("failed to write reqlog row: {e}");
            }
        }
    });

    let (queue_len_tx, mut queue_len_rx) = mpsc::unbounded_channel();
    let queue_len_path = config.queue_len_path.clone();
    let queue_len_task = tokio::spawn(async move {
        let mut writer = match QueueLenWriter::create(&queue_len_path) {
            Ok(w) => w,
            Err(e) => {
                log::error!("failed to open queue_len report at {}: {e}", queue_len_path.display());
                return;
            }
        };
        while let Some(sample) = queue_len_rx.recv().await {
            if let Err(e) = writer.write(&sample) {
                log::warn!("failed to write queue_len row: {e}");
            }
        }
        let _ = writer.flush();
    });

    let started = Instant::now();
    let mut shutdown = Box::pin(tokio::signal::ctrl_c());

    loop {
        tokio::select! {
            incoming = listener.accept() => {
                match incoming {
                    Some(Ok(conn)) => {
                        let conn_config = conn_config.clone();
                        let metrics = metrics.clone();
                        let blob_store = blob_store.clone();
                        let reqlog_tx = reqlog_tx.clone();
                        let queue_len_tx = queue_len_tx.clone();
                        tokio::spawn(async move {
                            handle_connection(
                                conn, conn_config, metrics, blob_store, started, reqlog_tx, queue_len_tx,
                            )
                            .await;
                        });
                    }
                    Some(Err(e)) => log::warn!("failed to accept connection: {e}"),
                    None => break,
                }
            }
            _ = &mut shutdown => {
                log::info!("shutdown requested");
                break;
            }
        }
    }

    listener.close();
    drop(reqlog_tx);
    drop(queue_len_tx);
    let _ = reqlog_task.await;
    let _ = queue_len_task.await;

    write_reports(&config, &metrics, started.elapsed())?;
    Ok(())
}

fn write_reports(config: &ServerConfig, metrics: &Metrics, wall_clock: Duration) -> anyhow::Result<()> {
    let snapshot = metrics.snapshot();
    snapshot
        .write_class_agg_csv(&config.class_agg_path, wall_clock)
        .context("writing class_agg report")?;

    let weights = [
        config.policy.weight_for(Priority::High),
        config.policy.weight_for(Priority::Medium),
        config.policy.weight_for(Priority::Low),
    ];
    let jain_fairness_index = metrics.jain_fairness_index(weights);
    snapshot
        .write_server_summary_csv(&config.summary_path, jain_fairness_index, wall_clock)
        .context("writing server_summary report")?;

    log::info!(
        "run complete in {:.2}s, work-conserving ratio {:.1}%",
        wall_clock.as_secs_f64(),
        snapshot.work_conserving_ratio_percent()
    );
    Ok(())
}
