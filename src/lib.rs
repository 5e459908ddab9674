//! duocam: the recording core of a dual-camera capture application
//!
//! Takes synchronized (back, front) frame pairs and one shared audio stream
//! and writes three containers at once: the raw back stream, the raw front
//! stream, and a split-screen composite (front on top, back on the bottom).
//! Audio is fanned out to all three.
//!
//! # Features
//! - Whole-tuple admission control keeps the three outputs frame-for-frame aligned
//! - One session origin shared by every output, set by the first admitted tuple
//! - Concurrent finalize that reports every output's outcome
//! - Memory-pressure handling: cache trimming on warning, a clean stop on critical
//! - `recording` feature: H.264 + Opus MP4 output through muxide
//!
//! # Usage
//! ```toml
//! [dependencies]
//! duocam = { version = "0.1", features = ["recording"] }
//! ```
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use duocam::{DualRecorder, DuocamConfig, RecordingDestination, Dimensions};
//! use duocam::muxer::Mp4WriterFactory;
//!
//! let recorder = DualRecorder::builder()
//!     .config(DuocamConfig::load_or_default())
//!     .writer_factory(Arc::new(Mp4WriterFactory))
//!     .spawn()?;
//!
//! recorder
//!     .start_recording(RecordingDestination::new(
//!         "clips/session.mp4",
//!         Dimensions::new(1920, 1440),
//!         Dimensions::new(1280, 960),
//!     ))
//!     .await?;
//! // feed recorder.process_synchronized_frames(..) and recorder.process_audio(..)
//! let summary = recorder.stop_recording().await?;
//! ```

pub mod accounting;
pub mod composition;
pub mod config;
pub mod errors;
pub mod invariant_ppt;
pub mod muxer;
pub mod pressure;
pub mod session;
pub mod sync;
pub mod testing;
pub mod types;

pub use accounting::{FrameAccounting, RecordingStatistics};
pub use config::DuocamConfig;
pub use errors::{RecordingError, RecordingResult};
pub use pressure::{ManualPressureSource, PressureLevel, PressureSource, PsiPressureSource};
pub use session::{
    DualRecorder, DualRecorderBuilder, RecorderEvent, RecordingState, RecordingSummary, StopOutcome,
    StopReason,
};
pub use types::{
    AudioSample, Dimensions, FrameTuple, OutputPaths, OutputRole, PixelFormat, RecordingDestination,
    VideoFrame,
};

/// Initialize `env_logger`, defaulting to `duocam=info`
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "duocam=info");
    }
    let _ = env_logger::try_init();
}

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
