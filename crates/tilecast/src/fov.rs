// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Field-of-view trace loading for the test client. A trace is a CSV
//! recorded from a head-tracking session: a 1-based frame number in the
//! first column, followed by a variable number of tile id columns — e.g.
//! `1, 49, 50` for a frame where tiles 49 and 50 were in view. The client
//! maps each frame to a segment using the content's frame rate and segment
//! duration, then asks which tiles were in view for that segment.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::error::ConfigError;

/// A loaded FOV trace, indexed by segment number.
#[derive(Debug, Clone)]
pub struct FovTrace {
    frames_per_segment: u32,
    tiles_by_segment: HashMap<u32, HashSet<u32>>,
    max_segment: u32,
}

impl FovTrace {
    /// Loads a trace CSV and buckets its per-frame tile sets into segments.
    /// `frames_per_segment = round(segment_duration_s * fps)`, matching how
    /// the playback clock buckets frames into segments on the server side.
    pub fn load(path: impl AsRef<Path>, fps: f64, segment_duration_s: f64) -> Result<Self, ConfigError> {
        let frames_per_segment = (segment_duration_s * fps).round().max(1.0) as u32;
        // Row width varies with how many tiles were in view at that frame.
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(path)?;
        let mut tiles_by_segment: HashMap<u32, HashSet<u32>> = HashMap::new();
        let mut max_segment = 0u32;

        for result in reader.records() {
            let record = result?;
            let mut fields = record.iter();
            let frame = match fields.next().and_then(|f| f.trim().parse::<u32>().ok()) {
                Some(frame) => frame,
                None => continue,
            };
            let segment = segment_for_frame(frame, frames_per_segment);
            max_segment = max_segment.max(segment);
            let tiles = tiles_by_segment.entry(segment).or_default();
            for field in fields {
                if let Ok(tile) = field.trim().parse::<u32>() {
                    tiles.insert(tile);
                }
            }
        }

        Ok(Self {
            frames_per_segment,
            tiles_by_segment,
            max_segment,
        })
    }

    pub fn frames_per_segment(&self) -> u32 {
        self.frames_per_segment
    }

    pub fn max_segment(&self) -> u32 {
        self.max_segment
    }

    /// Whether `tile` was ever in view during `segment`. Segments with no
    /// recorded rows (past the end of the trace) report every tile as out
    /// of view.
    pub fn contains(&self, segment: u32, tile: u32) -> bool {
        self.tiles_by_segment
            .get(&segment)
            .is_some_and(|t| t.contains(&tile))
    }

    /// All tiles in view during `segment`, or an empty set if the segment
    /// has no recorded rows.
    pub fn tiles_for_segment(&self, segment: u32) -> HashSet<u32> {
        self.tiles_by_segment
            .get(&segment)
            .cloned()
            .unwrap_or_default()
    }
}

/// `segment = ceil(frame / frames_per_segment)`, 1-indexed to match the
/// server's segment numbering (segment 0 is reserved for pre-roll).
pub fn segment_for_frame(frame: u32, frames_per_segment: u32) -> u32 {
    if frames_per_segment == 0 {
        return 0;
    }
    frame.div_ceil(frames_per_segment)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `rows` are raw CSV lines, already comma-joined, e.g. `"1, 49, 50"`.
    fn write_trace(rows: &[&str]) -> tempfile_path::TempCsv {
        tempfile_path::TempCsv::new(rows)
    }

    // A tiny self-contained temp-file helper — the crate does not otherwise
    // need a `tempfile` dependency for one test module.
    mod tempfile_path {
        use std::io::Write;

        pub struct TempCsv {
            pub path: std::path::PathBuf,
        }

        impl TempCsv {
            pub fn new(rows: &[&str]) -> Self {
                let path = std::env::temp_dir().join(format!(
                    "tilecast_fov_test_{}.csv",
                    std::process::id()
                ));
                let mut f = std::fs::File::create(&path).unwrap();
                writeln!(f, "no. frames, tile numbers").unwrap();
                for row in rows {
                    writeln!(f, "{row}").unwrap();
                }
                Self { path }
            }
        }

        impl Drop for TempCsv {
            fn drop(&mut self) {
                let _ = std::fs::remove_file(&self.path);
            }
        }
    }

    #[test]
    fn segment_boundaries_use_ceiling_division() {
        assert_eq!(segment_for_frame(1, 30), 1);
        assert_eq!(segment_for_frame(30, 30), 1);
        assert_eq!(segment_for_frame(31, 30), 2);
        assert_eq!(segment_for_frame(0, 30), 0);
    }

    #[test]
    fn loading_the_documented_example_row_yields_its_tile_set() {
        // The literal row from the trace format's own documentation.
        let trace_file = write_trace(&["1, 49, 50"]);
        let trace = FovTrace::load(&trace_file.path, 30.0, 1.0).unwrap();
        assert_eq!(trace.tiles_for_segment(1), HashSet::from([49, 50]));
        assert_eq!(trace.max_segment(), 1);
    }

    #[test]
    fn trace_buckets_frames_into_segments_by_fps() {
        let trace_file = write_trace(&["1, 1, 2, 3", "30, 1, 2", "31, 4, 5"]);
        let trace = FovTrace::load(&trace_file.path, 30.0, 1.0).unwrap();
        assert_eq!(trace.frames_per_segment(), 30);
        assert!(trace.contains(1, 1));
        assert!(trace.contains(1, 3));
        assert!(!trace.contains(1, 4));
        assert!(trace.contains(2, 4));
        assert_eq!(trace.max_segment(), 2);
    }

    #[test]
    fn unrecorded_segment_contains_nothing() {
        let trace_file = write_trace(&["1, 1"]);
        let trace = FovTrace::load(&trace_file.path, 30.0, 1.0).unwrap();
        assert!(trace.tiles_for_segment(99).is_empty());
        assert!(!trace.contains(99, 1));
    }
}
