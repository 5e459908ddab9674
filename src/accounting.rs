//! Frame and audio accounting for one recording session
//!
//! Every tuple offered while recording is either admitted or dropped, never
//! both, so `frame_count + dropped_frame_count == tuples_offered` always holds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::assert_invariant;

/// One warning per this many consecutive drops
pub const DROP_LOG_INTERVAL: u64 = 30;

/// Why a tuple was not written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DropReason {
    /// At least one video input reported not ready
    NotReady,
    /// The compositor produced nothing
    ComposeFailed,
    /// Timestamp went backwards or repeated
    OutOfOrder,
    /// Frames failed validation
    Malformed,
}

/// Mutable counters owned by the session controller
#[derive(Debug, Default)]
pub struct FrameAccounting {
    offered: u64,
    frame_count: u64,
    dropped: u64,
    consecutive_drops: u64,
    compose_total: Duration,
    compose_samples: u64,
    compose_max: Duration,
    compose_failures: u64,
    audio_samples: u64,
    audio_partial_writes: u64,
    audio_unrouted: u64,
}

impl FrameAccounting {
    pub fn new() -> Self {
        Self::default()
    }

    /// A tuple was written to all three outputs
    pub fn record_admitted(&mut self, compose_time: Duration) {
        self.offered += 1;
        self.frame_count += 1;
        self.consecutive_drops = 0;
        self.compose_total += compose_time;
        self.compose_samples += 1;
        self.compose_max = self.compose_max.max(compose_time);
        self.check_balance();
    }

    /// A tuple was discarded before reaching any output
    pub fn record_dropped(&mut self, reason: DropReason) {
        self.offered += 1;
        self.dropped += 1;
        self.consecutive_drops += 1;
        if reason == DropReason::ComposeFailed {
            self.compose_failures += 1;
        }
        if self.consecutive_drops % DROP_LOG_INTERVAL == 0 {
            log::warn!(
                "Dropped {} consecutive frame tuples (latest: {:?}); {} dropped of {} offered",
                self.consecutive_drops,
                reason,
                self.dropped,
                self.offered
            );
        }
        self.check_balance();
    }

    /// One audio sample offered to the outputs; `accepted` of three took it
    pub fn record_audio(&mut self, accepted: usize) {
        self.audio_samples += 1;
        match accepted {
            3 => {}
            0 => {
                self.audio_unrouted += 1;
                log::warn!("Audio sample at position {} reached no output", self.audio_samples);
            }
            n => {
                self.audio_partial_writes += 1;
                log::warn!("Audio sample reached {} of 3 outputs", n);
            }
        }
    }

    fn check_balance(&self) {
        assert_invariant!(
            self.frame_count + self.dropped == self.offered,
            "Admitted plus dropped tuples equal tuples offered",
            "accounting"
        );
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn dropped_frame_count(&self) -> u64 {
        self.dropped
    }

    pub fn offered(&self) -> u64 {
        self.offered
    }

    pub fn consecutive_drops(&self) -> u64 {
        self.consecutive_drops
    }

    pub fn snapshot(&self) -> RecordingStatistics {
        let average_compose_ms = if self.compose_samples == 0 {
            0.0
        } else {
            self.compose_total.as_secs_f64() * 1000.0 / self.compose_samples as f64
        };
        RecordingStatistics {
            tuples_offered: self.offered,
            frame_count: self.frame_count,
            dropped_frame_count: self.dropped,
            compose_failures: self.compose_failures,
            average_compose_ms,
            max_compose_ms: self.compose_max.as_secs_f64() * 1000.0,
            audio_sample_count: self.audio_samples,
            audio_partial_writes: self.audio_partial_writes,
            audio_unrouted: self.audio_unrouted,
        }
    }
}

/// Point-in-time copy of the session counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordingStatistics {
    pub tuples_offered: u64,
    pub frame_count: u64,
    pub dropped_frame_count: u64,
    pub compose_failures: u64,
    pub average_compose_ms: f64,
    pub max_compose_ms: f64,
    pub audio_sample_count: u64,
    /// Samples accepted by one or two outputs
    pub audio_partial_writes: u64,
    /// Samples accepted by none
    pub audio_unrouted: u64,
}

impl RecordingStatistics {
    pub fn drop_percentage(&self) -> f64 {
        if self.tuples_offered == 0 {
            0.0
        } else {
            self.dropped_frame_count as f64 * 100.0 / self.tuples_offered as f64
        }
    }

    /// Samples that reached at least one output
    pub fn audio_routed(&self) -> u64 {
        self.audio_sample_count.saturating_sub(self.audio_unrouted)
    }

    /// Log the end-of-session summary line
    pub fn log_summary(&self) {
        log::info!(
            "Recording summary: {} frames written, {} dropped ({:.1}%), avg compose {:.2} ms, \
             {} of {} audio samples routed ({} partial)",
            self.frame_count,
            self.dropped_frame_count,
            self.drop_percentage(),
            self.average_compose_ms,
            self.audio_routed(),
            self.audio_sample_count,
            self.audio_partial_writes
        );
    }
}
