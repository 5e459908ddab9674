//! Frame synchronization helpers
//!
//! The capture layer matches the two sensor streams; these types enforce its
//! delivery contract at the boundary of the recording core. Delivered buffers
//! are matched to cameras by output identity, never by their position in the
//! delivery, since delivery order does not follow registration order.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{RecordingError, RecordingResult};
use crate::types::{FrameTuple, VideoFrame};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CameraPosition {
    Back,
    Front,
}

impl fmt::Display for CameraPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraPosition::Back => write!(f, "back"),
            CameraPosition::Front => write!(f, "front"),
        }
    }
}

/// Opaque identifier the capture layer assigns to each data output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputId(pub u64);

/// One buffer as delivered by the synchronizer
#[derive(Debug)]
pub struct CapturedFrame {
    pub output: OutputId,
    pub frame: VideoFrame,
    pub timestamp_us: u64,
}

impl CapturedFrame {
    pub fn new(output: OutputId, frame: VideoFrame, timestamp_us: u64) -> Self {
        Self {
            output,
            frame,
            timestamp_us,
        }
    }
}

/// Maps capture outputs to camera positions and pairs their deliveries
#[derive(Debug, Clone)]
pub struct OutputRegistry {
    outputs: HashMap<OutputId, CameraPosition>,
    max_skew_us: u64,
}

impl OutputRegistry {
    pub fn new(max_skew_us: u64) -> Self {
        Self {
            outputs: HashMap::new(),
            max_skew_us,
        }
    }

    /// Bind `output` to `position`; each side may be bound once
    pub fn register(&mut self, output: OutputId, position: CameraPosition) -> RecordingResult<()> {
        if let Some(existing) = self.outputs.get(&output) {
            return Err(RecordingError::sync(format!(
                "output {:?} is already registered as {}",
                output, existing
            )));
        }
        if self.outputs.values().any(|p| *p == position) {
            return Err(RecordingError::sync(format!("a {position} output is already registered")));
        }
        self.outputs.insert(output, position);
        log::debug!("Registered capture output {:?} as {}", output, position);
        Ok(())
    }

    pub fn position_of(&self, output: OutputId) -> Option<CameraPosition> {
        self.outputs.get(&output).copied()
    }

    pub fn is_complete(&self) -> bool {
        self.outputs.len() == 2
    }

    /// Build a tuple from one synchronized delivery, in any order
    ///
    /// The tuple is stamped with the back frame's timestamp.
    pub fn pair(&self, delivery: Vec<CapturedFrame>) -> RecordingResult<FrameTuple> {
        if delivery.len() != 2 {
            return Err(RecordingError::sync(format!(
                "expected two frames per delivery, got {}",
                delivery.len()
            )));
        }

        let mut back = None;
        let mut front = None;
        for captured in delivery {
            let slot = match self.position_of(captured.output) {
                Some(CameraPosition::Back) => &mut back,
                Some(CameraPosition::Front) => &mut front,
                None => {
                    let message = format!("unknown output {:?}", captured.output);
                    return Err(RecordingError::sync(message));
                }
            };
            if slot.is_some() {
                return Err(RecordingError::sync(format!(
                    "output {:?} delivered twice in one tuple",
                    captured.output
                )));
            }
            *slot = Some(captured);
        }

        let (Some(back), Some(front)) = (back, front) else {
            return Err(RecordingError::sync("delivery is missing a camera"));
        };
        let skew = back.timestamp_us.abs_diff(front.timestamp_us);
        if skew > self.max_skew_us {
            return Err(RecordingError::sync(format!(
                "frames are {skew}us apart, limit is {}us",
                self.max_skew_us
            )));
        }

        Ok(FrameTuple::new(back.frame, front.frame, back.timestamp_us))
    }
}

/// Enforces non-decreasing, at-most-once tuple timestamps
#[derive(Debug, Default, Clone)]
pub struct TupleSequencer {
    last_us: Option<u64>,
    rejected: u64,
}

impl TupleSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `timestamp_us` if it moves the stream forward
    pub fn admit(&mut self, timestamp_us: u64) -> bool {
        if self.last_us.is_some_and(|last| timestamp_us <= last) {
            self.rejected += 1;
            log::debug!(
                "Tuple at {}us does not follow {:?}us; rejected",
                timestamp_us,
                self.last_us
            );
            return false;
        }
        self.last_us = Some(timestamp_us);
        true
    }

    pub fn last(&self) -> Option<u64> {
        self.last_us
    }

    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::solid_frame;

    const BACK: OutputId = OutputId(7);
    const FRONT: OutputId = OutputId(3);

    fn registry() -> OutputRegistry {
        let mut registry = OutputRegistry::new(20_000);
        registry.register(BACK, CameraPosition::Back).unwrap();
        registry.register(FRONT, CameraPosition::Front).unwrap();
        registry
    }

    #[test]
    fn test_pairs_by_identity_not_order() {
        let registry = registry();
        // Front first: positional matching would swap the cameras
        let delivery = vec![
            CapturedFrame::new(FRONT, solid_frame(4, 2, [0, 0, 255, 255]), 1_000),
            CapturedFrame::new(BACK, solid_frame(8, 6, [255, 0, 0, 255]), 1_005),
        ];
        let tuple = registry.pair(delivery).unwrap();
        assert_eq!((tuple.back.width, tuple.back.height), (8, 6));
        assert_eq!((tuple.front.width, tuple.front.height), (4, 2));
        assert_eq!(tuple.timestamp_us, 1_005);
    }

    #[test]
    fn test_rejects_unknown_and_duplicate_outputs() {
        let registry = registry();
        let unknown = vec![
            CapturedFrame::new(BACK, solid_frame(2, 2, [0; 4]), 0),
            CapturedFrame::new(OutputId(99), solid_frame(2, 2, [0; 4]), 0),
        ];
        assert!(matches!(registry.pair(unknown), Err(RecordingError::Sync(_))));

        let twice = vec![
            CapturedFrame::new(BACK, solid_frame(2, 2, [0; 4]), 0),
            CapturedFrame::new(BACK, solid_frame(2, 2, [0; 4]), 0),
        ];
        assert!(registry.pair(twice).is_err());
    }

    #[test]
    fn test_rejects_excess_skew() {
        let registry = registry();
        let delivery = vec![
            CapturedFrame::new(BACK, solid_frame(2, 2, [0; 4]), 0),
            CapturedFrame::new(FRONT, solid_frame(2, 2, [0; 4]), 50_000),
        ];
        assert!(registry.pair(delivery).is_err());
    }

    #[test]
    fn test_register_twice_fails() {
        let mut registry = registry();
        assert!(registry.register(BACK, CameraPosition::Front).is_err());
        assert!(registry.register(OutputId(1), CameraPosition::Back).is_err());
        assert!(registry.is_complete());
    }

    #[test]
    fn test_sequencer_is_strictly_forward() {
        let mut seq = TupleSequencer::new();
        assert!(seq.admit(10));
        assert!(!seq.admit(10));
        assert!(!seq.admit(5));
        assert!(seq.admit(11));
        assert_eq!(seq.rejected(), 2);
        seq.reset();
        assert!(seq.admit(0));
    }
}
