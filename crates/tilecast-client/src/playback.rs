// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Playback-clock simulator. Models a player that starts consuming segments
//! `base_latency` after the session starts and advances one segment every
//! `segment_duration`, independent of how the request driver is doing.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Notify;

/// Fixed playback-time schedule for `[first, last]`, plus the pacer that
/// walks it. Cheap to share: wrap in `Arc` and clone the `Arc`, not `Self`.
pub struct PlaybackClock {
    first: u32,
    last: u32,
    segment_duration: Duration,
    prefetch_window: u32,
    /// `playback_time[i]` is when segment `first + i` starts playing.
    playback_time: Vec<Instant>,
    current_segment: AtomicU32,
    notify: Notify,
}

impl PlaybackClock {
    /// Fixes `t[seg] = now + base_latency + (seg - first) * segment_duration`
    /// for every segment up front; the pacer just sleeps until each one.
    pub fn new(
        segment_duration: Duration,
        base_latency: Duration,
        prefetch_window: u32,
        first: u32,
        last: u32,
    ) -> Self {
        let now = Instant::now();
        let count = (last.saturating_sub(first) + 1) as usize;
        let mut playback_time = Vec::with_capacity(count);
        let mut t = now + base_latency;
        for _ in 0..count {
            playback_time.push(t);
            t += segment_duration;
        }
        Self {
            first,
            last,
            segment_duration,
            prefetch_window,
            playback_time,
            current_segment: AtomicU32::new(first.saturating_sub(1)),
            notify: Notify::new(),
        }
    }

    fn playback_time_of(&self, segment: u32) -> Option<Instant> {
        if segment < self.first || segment > self.last {
            return None;
        }
        self.playback_time.get((segment - self.first) as usize).copied()
    }

    /// Drives `current_segment` forward at each fixed playback instant.
    /// Spawn once per session; runs until the last segment has played.
    pub async fn run(self: &std::sync::Arc<Self>) {
        for segment in self.first..=self.last {
            let Some(t) = self.playback_time_of(segment) else {
                continue;
            };
            tokio::time::sleep_until(t.into()).await;
            log::debug!("playback reached segment {segment}");
            self.current_segment.store(segment, Ordering::SeqCst);
            self.notify.notify_waiters();
        }
    }

    /// The instant playback of the first segment begins, for join-latency
    /// accounting (`playback_start - first_request_sent`).
    pub fn playback_start(&self) -> Instant {
        self.playback_time
            .first()
            .copied()
            .unwrap_or_else(Instant::now)
    }

    pub fn current_segment(&self) -> u32 {
        self.current_segment.load(Ordering::SeqCst)
    }

    /// Blocks until playback has reached (or passed) `segment`.
    pub async fn wait_for_playback_start(&self, segment: u32) {
        loop {
            let notified = self.notify.notified();
            if self.current_segment() >= segment {
                return;
            }
            notified.await;
        }
    }

    /// Blocks while `segment` is more than `prefetch_window` segments ahead
    /// of playback.
    pub async fn wait_until_within_prefetch_window(&self, segment: u32) {
        loop {
            let notified = self.notify.notified();
            if segment.saturating_sub(self.current_segment()) <= self.prefetch_window {
                return;
            }
            notified.await;
        }
    }

    /// Time remaining until `segment` starts playing, or zero if it has
    /// already started (or played out).
    pub fn time_to_receive(&self, segment: u32) -> Duration {
        if segment <= self.current_segment() {
            return Duration::ZERO;
        }
        match self.playback_time_of(segment) {
            Some(t) => t.saturating_duration_since(Instant::now()),
            None => Duration::ZERO,
        }
    }

    /// Media-seconds buffered ahead of playback, given the last segment the
    /// driver has finished downloading. Clamped to the pre-fetch window so
    /// a driver that races far ahead doesn't report unbounded buffer.
    pub fn buffer_level(&self, last_downloaded_segment: u32) -> Duration {
        let ahead = last_downloaded_segment.saturating_sub(self.current_segment());
        let capped = ahead.min(self.prefetch_window);
        self.segment_duration * capped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn pacer_advances_current_segment_on_schedule() {
        let clock = Arc::new(PlaybackClock::new(
            Duration::from_millis(100),
            Duration::from_millis(50),
            3,
            1,
            5,
        ));
        let runner = clock.clone();
        tokio::spawn(async move { runner.run().await });

        assert_eq!(clock.current_segment(), 0);
        clock.wait_for_playback_start(1).await;
        assert_eq!(clock.current_segment(), 1);
        clock.wait_for_playback_start(3).await;
        assert_eq!(clock.current_segment(), 3);
    }

    #[test]
    fn time_to_receive_is_zero_once_segment_has_started() {
        let clock = PlaybackClock::new(Duration::from_secs(1), Duration::from_millis(10), 3, 1, 10);
        clock.current_segment.store(5, Ordering::SeqCst);
        assert_eq!(clock.time_to_receive(5), Duration::ZERO);
        assert_eq!(clock.time_to_receive(3), Duration::ZERO);
    }

    #[test]
    fn buffer_level_is_capped_at_prefetch_window() {
        let clock = PlaybackClock::new(Duration::from_secs(2), Duration::from_millis(10), 3, 1, 20);
        clock.current_segment.store(1, Ordering::SeqCst);
        assert_eq!(clock.buffer_level(10), Duration::from_secs(6));
        assert_eq!(clock.buffer_level(2), Duration::from_secs(2));
        assert_eq!(clock.buffer_level(1), Duration::ZERO);
    }
}
