//! Container writer seam
//!
//! A [`ContainerWriter`] owns one output file with one video and one audio
//! track. Writers run on their own worker thread (see `worker`), so every
//! method may block on encoding or disk I/O.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::RecordingSettings;
use crate::errors::RecordingResult;
use crate::types::{AudioSample, Dimensions, OutputRole, VideoFrame};

/// Everything a factory needs to configure one output
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSpec {
    pub role: OutputRole,
    pub path: PathBuf,
    pub dimensions: Dimensions,
    pub fps: f64,
    pub video_bitrate: u32,
    pub audio_sample_rate: u32,
    pub audio_channels: u16,
    pub audio_bitrate: u32,
    pub fast_start: bool,
    pub title: Option<String>,
}

impl OutputSpec {
    /// Spec for `role` with the shared encoder settings
    pub fn new(
        role: OutputRole,
        path: PathBuf,
        dimensions: Dimensions,
        settings: &RecordingSettings,
    ) -> Self {
        Self {
            role,
            path,
            dimensions,
            fps: settings.fps,
            video_bitrate: settings.video_bitrate,
            audio_sample_rate: settings.audio_sample_rate,
            audio_channels: settings.audio_channels,
            audio_bitrate: settings.audio_bitrate,
            fast_start: settings.fast_start,
            title: settings.title.clone(),
        }
    }
}

/// Shared "video input can take more data" flag a writer may expose
#[derive(Debug, Clone)]
pub struct ReadyFlag(Arc<AtomicBool>);

impl ReadyFlag {
    pub fn new(ready: bool) -> Self {
        Self(Arc::new(AtomicBool::new(ready)))
    }

    pub fn set(&self, ready: bool) {
        self.0.store(ready, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

impl Default for ReadyFlag {
    fn default() -> Self {
        Self::new(true)
    }
}

/// What a finalized output contains
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSummary {
    pub role: OutputRole,
    pub path: PathBuf,
    pub video_frames: u64,
    pub audio_frames: u64,
    pub duration_secs: f64,
    pub bytes_written: u64,
}

/// One container file with a video and an audio track
///
/// Timestamps passed to `append_*` are relative to the session origin given
/// to `begin_session`, in microseconds, and strictly increasing per track.
pub trait ContainerWriter: Send {
    /// Called exactly once, before the first video sample
    fn begin_session(&mut self, origin_us: u64) -> RecordingResult<()>;

    fn append_video(&mut self, frame: &VideoFrame, relative_us: u64) -> RecordingResult<()>;

    fn append_audio(&mut self, sample: &AudioSample, relative_us: u64) -> RecordingResult<()>;

    /// Finalize the container so it is independently readable
    fn finish(self: Box<Self>) -> RecordingResult<OutputSummary>;

    /// Abandon the output without leaving a valid-looking partial file
    fn cancel(self: Box<Self>);

    /// Optional readiness signal consulted before each tuple is admitted
    fn ready_flag(&self) -> Option<ReadyFlag> {
        None
    }
}

/// Creates configured writers; rejecting a spec fails the whole session start
pub trait WriterFactory: Send + Sync {
    fn create(&self, spec: &OutputSpec) -> RecordingResult<Box<dyn ContainerWriter>>;
}
