// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! `tilecast-client` — deadline-driven, FOV-aware test-load generator for
//! `tilecast-server`.

mod abr;
mod collector;
mod connection;
mod driver;
mod playback;
mod qoe;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use tilecast::config::{ClientConfig, ClientConfigOverrides};
use tilecast::fov::FovTrace;
use tilecast::transport::TransportConfig;

use collector::ThroughputLatencyCollector;
use connection::ClientConnection;
use driver::DriverConfig;
use playback::PlaybackClock;
use qoe::{write_series_csv, QoeAggregator, StatWriter};

const THROUGHPUT_WINDOW: usize = 16;

/// Deadline-driven FOV-aware request generator for tilecast-server load testing.
#[derive(Parser, Debug)]
#[command(name = "tilecast-client")]
#[command(about = "FOV-aware tile-video test-load generator")]
struct Args {
    /// Server address to connect to.
    #[arg(long)]
    host: Option<SocketAddr>,

    /// Number of concurrent in-flight tile requests.
    #[arg(long)]
    parallelism: Option<usize>,

    /// Base latency before playback of the first segment begins.
    #[arg(long)]
    base_latency_ms: Option<u64>,

    /// Optional TOML config file; CLI flags here override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// First segment to request.
    #[arg(long)]
    first: Option<u32>,

    /// Last segment to request.
    #[arg(long)]
    last: Option<u32>,

    /// Directory CSV reports are written to.
    #[arg(long)]
    stats_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let base = match &args.config {
        Some(path) => ClientConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => ClientConfig::default(),
    };
    let config = base.apply_env().merge_cli(ClientConfigOverrides {
        server_addr: args.host,
        parallelism: args.parallelism,
        base_latency_ms: args.base_latency_ms,
        first_segment: args.first,
        last_segment: args.last,
        stats_dir: args.stats_dir,
    });

    run(config).await
}

async fn run(config: ClientConfig) -> anyhow::Result<()> {
    std::fs::create_dir_all(&config.stats_dir)
        .with_context(|| format!("creating stats dir {}", config.stats_dir.display()))?;
    let pid = std::process::id();

    let segment_duration = std::time::Duration::from_millis(config.segment_duration_ms);
    let base_latency = std::time::Duration::from_millis(config.base_latency_ms);

    let fov = match &config.fov_trace_path {
        Some(path) => {
            let fps = config.fov_trace_fps;
            let segment_duration_s = segment_duration.as_secs_f64();
            let trace = FovTrace::load(path, fps, segment_duration_s)
                .with_context(|| format!("loading FOV trace from {}", path.display()))?;
            log::info!("loaded FOV trace up to segment {}", trace.max_segment());
            Some(Arc::new(trace))
        }
        None => {
            log::info!("no FOV trace configured; treating every tile as in view");
            None
        }
    };

    let transport_config = TransportConfig::default();
    let conn = Arc::new(
        ClientConnection::connect(&transport_config, config.server_addr)
            .await
            .with_context(|| format!("connecting to {}", config.server_addr))?,
    );
    log::info!("connected to {}", config.server_addr);

    let start = Instant::now();
    let clock = Arc::new(PlaybackClock::new(
        segment_duration,
        base_latency,
        config.prefetch_window,
        config.first_segment,
        config.last_segment,
    ));
    let pacer = clock.clone();
    let pacer_handle = tokio::spawn(async move { pacer.run().await });

    let collector = Arc::new(ThroughputLatencyCollector::new(THROUGHPUT_WINDOW));
    let qoe = Arc::new(QoeAggregator::new(start));

    let stats_path = config.stats_dir.join(format!("statistics-{pid}.csv"));
    let stats = Arc::new(tokio::sync::Mutex::new(
        StatWriter::create(&stats_path)
            .with_context(|| format!("opening {}", stats_path.display()))?,
    ));

    let driver_config = DriverConfig {
        first_segment: config.first_segment,
        last_segment: config.last_segment,
        segment_duration,
        parallelism: config.parallelism,
    };

    driver::run(
        driver_config,
        conn.clone(),
        clock.clone(),
        fov,
        collector,
        qoe.clone(),
        stats,
        start,
    )
    .await;

    pacer_handle.abort();

    let first_request_sent = qoe.first_request_sent().unwrap_or(start);
    let join_latency = clock.playback_start().saturating_duration_since(first_request_sent);
    let summary = qoe.summarize(join_latency);

    let summary_path = config.stats_dir.join(format!("statistics-summary-{pid}.csv"));
    summary
        .write_csv(&summary_path)
        .with_context(|| format!("writing {}", summary_path.display()))?;

    let fov_hit_path = config.stats_dir.join(format!("fov-hit-series-{pid}.csv"));
    write_series_csv(&fov_hit_path, &qoe.fov_hit_series())
        .with_context(|| format!("writing {}", fov_hit_path.display()))?;

    let goodput_path = config.stats_dir.join(format!("goodput-series-{pid}.csv"));
    write_series_csv(&goodput_path, &qoe.goodput_series())
        .with_context(|| format!("writing {}", goodput_path.display()))?;

    log::info!(
        "session complete: {:.1}% segment completion, {:.1}% FOV completion",
        summary.segment_completion_rate_percent,
        summary.segment_completion_rate_fov_percent
    );

    if let Ok(conn) = Arc::try_unwrap(conn) {
        conn.shutdown().await;
    }

    Ok(())
}
