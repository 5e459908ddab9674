//! In-memory container writers
//!
//! [`MemoryWriterFactory`] records everything the recording core hands its
//! writers so tests can inspect what each output would contain. Any output
//! can be made to reject its configuration, stay perpetually not ready,
//! reject audio, or fail to finalize. Optionally each finalized output persists a JSON
//! manifest at its destination path.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{RecordingError, RecordingResult};
use crate::muxer::{ContainerWriter, OutputSpec, OutputSummary, ReadyFlag, WriterFactory};
use crate::types::{AudioSample, Dimensions, OutputRole, VideoFrame};

/// What one output received
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedOutput {
    pub role: OutputRole,
    pub path: PathBuf,
    pub dimensions: Dimensions,
    /// Every `begin_session` origin, in call order
    pub session_starts: Vec<u64>,
    /// Relative video timestamps, in append order
    pub video_timestamps_us: Vec<u64>,
    pub video_dimensions: Vec<Dimensions>,
    pub audio_timestamps_us: Vec<u64>,
    pub finished: bool,
    pub cancelled: bool,
}

impl RecordedOutput {
    fn new(spec: &OutputSpec) -> Self {
        Self {
            role: spec.role,
            path: spec.path.clone(),
            dimensions: spec.dimensions,
            session_starts: Vec::new(),
            video_timestamps_us: Vec::new(),
            video_dimensions: Vec::new(),
            audio_timestamps_us: Vec::new(),
            finished: false,
            cancelled: false,
        }
    }

    pub fn origin_us(&self) -> Option<u64> {
        self.session_starts.first().copied()
    }

    pub fn video_frames(&self) -> usize {
        self.video_timestamps_us.len()
    }
}

#[derive(Default)]
struct FactoryState {
    outputs: HashMap<OutputRole, RecordedOutput>,
    created: usize,
    rejected: HashSet<OutputRole>,
    failing_finish: HashSet<OutputRole>,
    failing_audio: HashSet<OutputRole>,
    ready: HashMap<OutputRole, ReadyFlag>,
    write_manifest: bool,
    append_delay: Option<Duration>,
}

/// Shared, inspectable factory of [`MemoryWriter`]s
#[derive(Clone, Default)]
pub struct MemoryWriterFactory {
    state: Arc<Mutex<FactoryState>>,
}

impl MemoryWriterFactory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FactoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Persist a JSON manifest at each output path when it finalizes
    pub fn with_manifests(self) -> Self {
        self.lock().write_manifest = true;
        self
    }

    /// Sleep this long in every video append, simulating a slow encoder
    pub fn with_append_delay(self, delay: Duration) -> Self {
        self.lock().append_delay = Some(delay);
        self
    }

    pub fn reject_configuration(&self, role: OutputRole) {
        self.lock().rejected.insert(role);
    }

    pub fn fail_finish(&self, role: OutputRole) {
        self.lock().failing_finish.insert(role);
    }

    /// Every audio append on `role` returns an error
    pub fn fail_audio(&self, role: OutputRole) {
        self.lock().failing_audio.insert(role);
    }

    /// Readiness flag for `role`, shared with current and future writers
    pub fn ready_flag(&self, role: OutputRole) -> ReadyFlag {
        self.lock().ready.entry(role).or_default().clone()
    }

    pub fn set_ready(&self, role: OutputRole, ready: bool) {
        self.ready_flag(role).set(ready);
    }

    pub fn output(&self, role: OutputRole) -> Option<RecordedOutput> {
        self.lock().outputs.get(&role).cloned()
    }

    /// Writers created so far, across sessions
    pub fn created(&self) -> usize {
        self.lock().created
    }
}

impl WriterFactory for MemoryWriterFactory {
    fn create(&self, spec: &OutputSpec) -> RecordingResult<Box<dyn ContainerWriter>> {
        let mut state = self.lock();
        if state.rejected.contains(&spec.role) {
            return Err(RecordingError::output_configuration(
                spec.role,
                "rejected by test factory",
            ));
        }
        state.created += 1;
        state.outputs.insert(spec.role, RecordedOutput::new(spec));
        let ready = state.ready.entry(spec.role).or_default().clone();

        Ok(Box::new(MemoryWriter {
            role: spec.role,
            path: spec.path.clone(),
            factory: self.clone(),
            ready,
            fail_finish: state.failing_finish.contains(&spec.role),
            fail_audio: state.failing_audio.contains(&spec.role),
            write_manifest: state.write_manifest,
            append_delay: state.append_delay,
        }))
    }
}

/// A writer that records into its factory
pub struct MemoryWriter {
    role: OutputRole,
    path: PathBuf,
    factory: MemoryWriterFactory,
    ready: ReadyFlag,
    fail_finish: bool,
    fail_audio: bool,
    write_manifest: bool,
    append_delay: Option<Duration>,
}

impl MemoryWriter {
    fn update<T>(&self, f: impl FnOnce(&mut RecordedOutput) -> T) -> RecordingResult<T> {
        let mut state = self.factory.lock();
        let output = state
            .outputs
            .get_mut(&self.role)
            .ok_or_else(|| RecordingError::write_failure(self.role, "output record missing"))?;
        Ok(f(output))
    }
}

impl ContainerWriter for MemoryWriter {
    fn begin_session(&mut self, origin_us: u64) -> RecordingResult<()> {
        self.update(|out| out.session_starts.push(origin_us))
    }

    fn append_video(&mut self, frame: &VideoFrame, relative_us: u64) -> RecordingResult<()> {
        if let Some(delay) = self.append_delay {
            std::thread::sleep(delay);
        }
        self.update(|out| {
            out.video_timestamps_us.push(relative_us);
            out.video_dimensions.push(frame.dimensions());
        })
    }

    fn append_audio(&mut self, _sample: &AudioSample, relative_us: u64) -> RecordingResult<()> {
        if self.fail_audio {
            return Err(RecordingError::write_failure(self.role, "audio input rejected sample"));
        }
        self.update(|out| out.audio_timestamps_us.push(relative_us))
    }

    fn finish(self: Box<Self>) -> RecordingResult<OutputSummary> {
        let recorded = self.update(|out| out.clone())?;
        if recorded.session_starts.is_empty() {
            self.update(|out| out.cancelled = true)?;
            return Err(RecordingError::write_failure(self.role, "session never started"));
        }
        if self.fail_finish {
            self.update(|out| out.cancelled = true)?;
            return Err(RecordingError::write_failure(self.role, "simulated finalize failure"));
        }

        let recorded = self.update(|out| {
            out.finished = true;
            out.clone()
        })?;
        let mut bytes_written = 0;
        if self.write_manifest {
            let manifest = serde_json::to_vec_pretty(&recorded)
                .map_err(|e| RecordingError::write_failure(self.role, e.to_string()))?;
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&self.path, &manifest)?;
            bytes_written = manifest.len() as u64;
        }

        Ok(OutputSummary {
            role: self.role,
            path: self.path.clone(),
            video_frames: recorded.video_timestamps_us.len() as u64,
            audio_frames: recorded.audio_timestamps_us.len() as u64,
            duration_secs: recorded.video_timestamps_us.last().copied().unwrap_or(0) as f64
                / 1_000_000.0,
            bytes_written,
        })
    }

    fn cancel(self: Box<Self>) {
        let _ = self.update(|out| out.cancelled = true);
        if self.path.exists() {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    fn ready_flag(&self) -> Option<ReadyFlag> {
        Some(self.ready.clone())
    }
}

/// Read back a manifest persisted by a finalized [`MemoryWriter`]
pub fn read_manifest(path: &std::path::Path) -> RecordingResult<RecordedOutput> {
    let bytes = std::fs::read(path)?;
    serde_json::from_slice(&bytes)
        .map_err(|e| RecordingError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
}
