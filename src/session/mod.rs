//! Recording session lifecycle
//!
//! [`DualRecorder`] is the public surface. Behind it a single tokio task owns
//! the session: it admits or drops each frame tuple, fans audio out, and runs
//! the one stop path used both by `stop_recording` and by critical memory
//! pressure.

mod controller;
mod handle;
mod state;

pub use handle::{DualRecorder, DualRecorderBuilder};
pub use state::{
    MuxerReport, RecorderEvent, RecordingState, RecordingSummary, StopOutcome, StopReason,
};
