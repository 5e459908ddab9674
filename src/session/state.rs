//! Recording lifecycle states, events and the stop summary

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::accounting::RecordingStatistics;
use crate::muxer::OutputSummary;
use crate::types::{OutputPaths, OutputRole};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopOutcome {
    Completed,
    Failed,
}

/// idle -> starting -> recording -> stopping -> stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordingState {
    Idle,
    Starting,
    Recording,
    Stopping,
    Stopped(StopOutcome),
}

impl RecordingState {
    pub fn is_recording(&self) -> bool {
        matches!(self, RecordingState::Recording)
    }

    /// A session is being set up, written or finalized
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            RecordingState::Starting | RecordingState::Recording | RecordingState::Stopping
        )
    }

    /// Whether the state machine permits moving to `next`
    pub fn can_transition_to(&self, next: RecordingState) -> bool {
        use RecordingState::*;
        matches!(
            (self, next),
            (Idle | Stopped(_), Starting)
                | (Starting, Recording)
                | (Starting, Stopped(StopOutcome::Failed))
                | (Recording, Stopping)
                | (Stopping, Stopped(_))
        )
    }
}

impl fmt::Display for RecordingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordingState::Idle => write!(f, "idle"),
            RecordingState::Starting => write!(f, "starting"),
            RecordingState::Recording => write!(f, "recording"),
            RecordingState::Stopping => write!(f, "stopping"),
            RecordingState::Stopped(StopOutcome::Completed) => write!(f, "stopped (completed)"),
            RecordingState::Stopped(StopOutcome::Failed) => write!(f, "stopped (failed)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    UserRequested,
    /// Forced by a critical memory-pressure signal
    ResourcePressure,
}

/// Per-output finalize result as reported in a summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MuxerReport {
    pub role: OutputRole,
    pub completed: bool,
    pub error: Option<String>,
    pub summary: Option<OutputSummary>,
}

/// Everything known about a finished session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingSummary {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub stopped_at: DateTime<Utc>,
    pub reason: StopReason,
    pub outputs: OutputPaths,
    /// Session origin in capture-clock microseconds, if any tuple was admitted
    pub origin_us: Option<u64>,
    pub statistics: RecordingStatistics,
    /// Composed, back, front
    pub muxers: Vec<MuxerReport>,
}

impl RecordingSummary {
    pub fn completed(&self) -> bool {
        self.muxers.iter().all(|m| m.completed)
    }

    pub fn muxer(&self, role: OutputRole) -> Option<&MuxerReport> {
        self.muxers.iter().find(|m| m.role == role)
    }
}

/// Broadcast to every `DualRecorder::subscribe` receiver
#[derive(Debug, Clone)]
pub enum RecorderEvent {
    StateChanged(RecordingState),
    /// Caches were cleared in response to a pressure warning
    PressureWarning { released_buffers: usize },
    /// A session ended; forced stops deliver their outcome only here
    Finished {
        reason: StopReason,
        result: Result<RecordingSummary, String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_transitions() {
        use RecordingState::*;
        assert!(Idle.can_transition_to(Starting));
        assert!(Starting.can_transition_to(Recording));
        assert!(Recording.can_transition_to(Stopping));
        assert!(Stopping.can_transition_to(Stopped(StopOutcome::Completed)));
        assert!(Stopped(StopOutcome::Failed).can_transition_to(Starting));

        assert!(!Idle.can_transition_to(Recording));
        assert!(!Recording.can_transition_to(Starting));
        assert!(!Stopping.can_transition_to(Recording));
    }

    #[test]
    fn test_activity() {
        assert!(RecordingState::Stopping.is_active());
        assert!(!RecordingState::Stopping.is_recording());
        assert!(!RecordingState::Stopped(StopOutcome::Completed).is_active());
        assert_eq!(RecordingState::Stopped(StopOutcome::Failed).to_string(), "stopped (failed)");
    }
}
