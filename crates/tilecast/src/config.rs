// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Configuration for both binaries: an optional TOML file, explicit CLI
//! flags layered on top, and (for the FOV trace path and frame rate)
//! environment variables layered between the file and built-in defaults.
//! Precedence, highest first: CLI flag > env var > config file >
//! [`Default`].

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::sched::QueuePolicy;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub policy: QueuePolicy,
    pub bind_addr: SocketAddr,
    /// `M` in the scheduling design: per-class bounded queue capacity.
    pub class_queue_capacity: usize,
    /// `N`: discipline capacity, normally left at the number of classes.
    pub discipline_capacity: usize,
    pub handshake_timeout_ms: u64,
    pub idle_timeout_ms: u64,
    pub blob_root: PathBuf,
    pub reqlog_path: PathBuf,
    pub class_agg_path: PathBuf,
    pub queue_len_path: PathBuf,
    pub summary_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            policy: QueuePolicy::Wfq,
            #[allow(clippy::unwrap_used)] // constant valid socket address literal
            bind_addr: "0.0.0.0:4433".parse().unwrap(),
            class_queue_capacity: 1000,
            discipline_capacity: crate::model::CLASS_COUNT,
            handshake_timeout_ms: 5_000,
            idle_timeout_ms: 30_000,
            blob_root: PathBuf::from("./tiles"),
            reqlog_path: PathBuf::from("reqlog.csv"),
            class_agg_path: PathBuf::from("class_agg.csv"),
            queue_len_path: PathBuf::from("queue_len.csv"),
            summary_path: PathBuf::from("server_summary.csv"),
        }
    }
}

impl ServerConfig {
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    /// Applies explicitly-passed CLI flags on top of `self`. `None` leaves
    /// the existing value (file value, or default) untouched.
    pub fn merge_cli(mut self, overrides: ServerConfigOverrides) -> Self {
        if let Some(v) = overrides.policy {
            self.policy = v;
        }
        if let Some(v) = overrides.bind_addr {
            self.bind_addr = v;
        }
        if let Some(v) = overrides.class_queue_capacity {
            self.class_queue_capacity = v;
        }
        if let Some(v) = overrides.discipline_capacity {
            self.discipline_capacity = v;
        }
        if let Some(v) = overrides.blob_root {
            self.blob_root = v;
        }
        self
    }
}

#[derive(Debug, Default, Clone)]
pub struct ServerConfigOverrides {
    pub policy: Option<QueuePolicy>,
    pub bind_addr: Option<SocketAddr>,
    pub class_queue_capacity: Option<usize>,
    pub discipline_capacity: Option<usize>,
    pub blob_root: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server_addr: SocketAddr,
    pub parallelism: usize,
    pub base_latency_ms: u64,
    pub segment_duration_ms: u64,
    pub first_segment: u32,
    pub last_segment: u32,
    /// `W` in the pre-fetch gate design.
    pub prefetch_window: u32,
    pub fov_trace_path: Option<PathBuf>,
    pub fov_trace_fps: f64,
    pub stats_dir: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            #[allow(clippy::unwrap_used)] // constant valid socket address literal
            server_addr: "127.0.0.1:4433".parse().unwrap(),
            parallelism: 4,
            base_latency_ms: 20,
            segment_duration_ms: 2_000,
            first_segment: 1,
            last_segment: 60,
            prefetch_window: 3,
            fov_trace_path: None,
            fov_trace_fps: 30.0,
            stats_dir: PathBuf::from("./stats"),
        }
    }
}

impl ClientConfig {
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    /// Layers `FOV_TRACE_PATH`/`FOV_TRACE_FPS` on top of the current values.
    /// Called after `from_file` (or `default()`) and before `merge_cli`.
    pub fn apply_env(mut self) -> Self {
        if let Ok(path) = std::env::var("FOV_TRACE_PATH") {
            self.fov_trace_path = Some(PathBuf::from(path));
        }
        if let Ok(fps) = std::env::var("FOV_TRACE_FPS") {
            if let Ok(fps) = fps.parse() {
                self.fov_trace_fps = fps;
            }
        }
        self
    }

    pub fn merge_cli(mut self, overrides: ClientConfigOverrides) -> Self {
        if let Some(v) = overrides.server_addr {
            self.server_addr = v;
        }
        if let Some(v) = overrides.parallelism {
            self.parallelism = v;
        }
        if let Some(v) = overrides.base_latency_ms {
            self.base_latency_ms = v;
        }
        if let Some(v) = overrides.first_segment {
            self.first_segment = v;
        }
        if let Some(v) = overrides.last_segment {
            self.last_segment = v;
        }
        if let Some(v) = overrides.stats_dir {
            self.stats_dir = v;
        }
        self
    }
}

#[derive(Debug, Default, Clone)]
pub struct ClientConfigOverrides {
    pub server_addr: Option<SocketAddr>,
    pub parallelism: Option<usize>,
    pub base_latency_ms: Option<u64>,
    pub first_segment: Option<u32>,
    pub last_segment: Option<u32>,
    pub stats_dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_config_defaults_use_wfq() {
        assert_eq!(ServerConfig::default().policy, QueuePolicy::Wfq);
    }

    #[test]
    fn cli_override_wins_over_default() {
        let cfg = ServerConfig::default().merge_cli(ServerConfigOverrides {
            policy: Some(QueuePolicy::Sp),
            ..Default::default()
        });
        assert_eq!(cfg.policy, QueuePolicy::Sp);
    }

    #[test]
    fn env_var_overrides_default_fov_trace_path() {
        std::env::set_var("FOV_TRACE_PATH", "/tmp/trace.csv");
        let cfg = ClientConfig::default().apply_env();
        assert_eq!(cfg.fov_trace_path, Some(PathBuf::from("/tmp/trace.csv")));
        std::env::remove_var("FOV_TRACE_PATH");
    }
}
