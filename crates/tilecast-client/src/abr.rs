// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reference ABR policy: a pure function of two scalars. Real deployments
//! are expected to swap this out; it exists so the request driver has
//! something deterministic to call.

use std::time::Duration;

use tilecast::Bitrate;

const LOW_BUFFER_FLOOR: Duration = Duration::from_secs(2);

/// Minimum sustained throughput (kbps) required to sustain each bitrate.
const fn required_kbps(bitrate: Bitrate) -> f64 {
    match bitrate {
        Bitrate::Low => 1_000.0,
        Bitrate::Medium => 4_000.0,
        Bitrate::High => 10_000.0,
    }
}

/// Picks a bitrate from the last-measured average throughput and the
/// current buffer level. Below the low-buffer floor this always picks
/// `LOW` regardless of throughput, to drain the request queue and let
/// playback catch back up; otherwise it picks the highest bitrate whose
/// threshold the measured throughput clears, falling back to `LOW`.
pub fn choose_bitrate(avg_throughput_kbps: f64, buffer_level: Duration) -> Bitrate {
    if buffer_level < LOW_BUFFER_FLOOR {
        return Bitrate::Low;
    }
    for bitrate in Bitrate::ASCENDING.iter().rev() {
        if avg_throughput_kbps >= required_kbps(*bitrate) {
            return *bitrate;
        }
    }
    Bitrate::Low
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_buffer_always_picks_low_bitrate() {
        assert_eq!(choose_bitrate(50_000.0, Duration::from_millis(500)), Bitrate::Low);
    }

    #[test]
    fn ample_throughput_and_buffer_picks_high() {
        assert_eq!(choose_bitrate(20_000.0, Duration::from_secs(5)), Bitrate::High);
    }

    #[test]
    fn mid_throughput_picks_medium_not_high() {
        assert_eq!(choose_bitrate(5_000.0, Duration::from_secs(5)), Bitrate::Medium);
    }

    #[test]
    fn throughput_below_every_threshold_falls_back_to_low() {
        assert_eq!(choose_bitrate(10.0, Duration::from_secs(5)), Bitrate::Low);
    }
}
