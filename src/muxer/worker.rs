//! Per-output writer thread
//!
//! Each output gets a named thread draining three bounded queues (video,
//! audio, control). The thread owns the [`ContainerWriter`]; the session
//! only ever talks to it through a [`MuxerHandle`].

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use tokio::sync::oneshot;

use super::writer::{ContainerWriter, OutputSpec, OutputSummary, ReadyFlag};
use crate::errors::{RecordingError, RecordingResult};
use crate::types::{AudioSample, OutputRole, VideoFrame};

/// Audio held while waiting for the session origin
const MAX_PENDING_AUDIO: usize = 256;

pub(crate) struct VideoInput {
    pub frame: VideoFrame,
    pub timestamp_us: u64,
    /// The tuple that establishes the session origin
    pub begins_session: bool,
}

enum Control {
    Finish(oneshot::Sender<MuxerOutcome>),
    Cancel,
}

/// Result of finalizing one output
#[derive(Debug)]
pub struct MuxerOutcome {
    pub role: OutputRole,
    pub result: RecordingResult<OutputSummary>,
    pub finished_at: Instant,
}

impl MuxerOutcome {
    fn failed(role: OutputRole, message: impl Into<String>) -> Self {
        Self {
            role,
            result: Err(RecordingError::write_failure(role, message)),
            finished_at: Instant::now(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.result.is_ok()
    }
}

/// Session-side handle to one writer thread
pub struct MuxerHandle {
    role: OutputRole,
    path: PathBuf,
    video_tx: Sender<VideoInput>,
    audio_tx: Sender<AudioSample>,
    control_tx: Sender<Control>,
    ready: Option<ReadyFlag>,
    failed: Arc<AtomicBool>,
    audio_failed: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    settled: bool,
}

impl MuxerHandle {
    pub(crate) fn spawn(
        spec: &OutputSpec,
        writer: Box<dyn ContainerWriter>,
        video_depth: usize,
        audio_depth: usize,
    ) -> Result<Self, (RecordingError, Option<Box<dyn ContainerWriter>>)> {
        let (video_tx, video_rx) = bounded(video_depth.max(1));
        let (audio_tx, audio_rx) = bounded(audio_depth.max(1));
        let (control_tx, control_rx) = bounded(1);
        let failed = Arc::new(AtomicBool::new(false));
        let audio_failed = Arc::new(AtomicBool::new(false));
        let ready = writer.ready_flag();

        let worker = Worker {
            role: spec.role,
            writer: Some(writer),
            origin_us: None,
            last_video_us: None,
            last_audio_us: None,
            pending_audio: VecDeque::new(),
            error: None,
            failed: failed.clone(),
            audio_failed: audio_failed.clone(),
        };

        // Keep the writer recoverable if the OS refuses the thread
        let slot = Arc::new(std::sync::Mutex::new(Some(worker)));
        let thread_slot = slot.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("duocam-muxer-{}", spec.role))
            .spawn(move || {
                let worker = thread_slot
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .take();
                if let Some(worker) = worker {
                    worker.run(video_rx, audio_rx, control_rx);
                }
            });

        match spawned {
            Ok(thread) => Ok(Self {
                role: spec.role,
                path: spec.path.clone(),
                video_tx,
                audio_tx,
                control_tx,
                ready,
                failed,
                audio_failed,
                thread: Some(thread),
                settled: false,
            }),
            Err(e) => {
                let writer = slot
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .take()
                    .and_then(|mut w| w.writer.take());
                let message = format!("writer thread spawn failed: {e}");
                Err((RecordingError::output_configuration(spec.role, message), writer))
            }
        }
    }

    pub fn role(&self) -> OutputRole {
        self.role
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writer healthy, its own flag set, and room in the video queue
    pub fn video_ready(&self) -> bool {
        !self.failed.load(Ordering::Acquire)
            && self.ready.as_ref().map_or(true, ReadyFlag::is_ready)
            && !self.video_tx.is_full()
    }

    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// The audio track stopped accepting samples; video is unaffected
    pub fn audio_failed(&self) -> bool {
        self.audio_failed.load(Ordering::Acquire)
    }

    pub fn queued_video(&self) -> usize {
        self.video_tx.len()
    }

    pub fn queued_audio(&self) -> usize {
        self.audio_tx.len()
    }

    pub(crate) fn push_video(&self, input: VideoInput) -> RecordingResult<()> {
        self.video_tx.try_send(input).map_err(|e| {
            let reason = match e {
                TrySendError::Full(_) => "video queue full",
                TrySendError::Disconnected(_) => "writer thread exited",
            };
            RecordingError::write_failure(self.role, reason)
        })
    }

    /// Queue a sample unless this output's audio track is known to be dead
    pub(crate) fn push_audio(&self, sample: AudioSample) -> bool {
        if self.has_failed() || self.audio_failed() {
            return false;
        }
        self.audio_tx.try_send(sample).is_ok()
    }

    /// Mark both track inputs finished and ask the writer to finalize
    pub(crate) fn request_finish(&mut self) -> oneshot::Receiver<MuxerOutcome> {
        let (tx, rx) = oneshot::channel();
        self.settled = true;
        if let Err(e) = self.control_tx.try_send(Control::Finish(tx)) {
            if let Control::Finish(reply) = e.into_inner() {
                let _ = reply.send(MuxerOutcome::failed(self.role, "writer thread is not running"));
            }
        }
        rx
    }

    pub(crate) fn cancel(&mut self) {
        if self.settled {
            return;
        }
        self.settled = true;
        log::warn!("Cancelling {} output {:?}", self.role, self.path);
        let _ = self.control_tx.try_send(Control::Cancel);
    }
}

impl Drop for MuxerHandle {
    fn drop(&mut self) {
        self.cancel();
        if let Some(thread) = self.thread.take() {
            if thread.is_finished() {
                let _ = thread.join();
            }
        }
    }
}

struct Worker {
    role: OutputRole,
    writer: Option<Box<dyn ContainerWriter>>,
    origin_us: Option<u64>,
    last_video_us: Option<u64>,
    last_audio_us: Option<u64>,
    pending_audio: VecDeque<AudioSample>,
    error: Option<RecordingError>,
    failed: Arc<AtomicBool>,
    audio_failed: Arc<AtomicBool>,
}

impl Worker {
    fn run(
        mut self,
        video_rx: Receiver<VideoInput>,
        audio_rx: Receiver<AudioSample>,
        control_rx: Receiver<Control>,
    ) {
        loop {
            select! {
                recv(video_rx) -> msg => match msg {
                    Ok(input) => self.on_video(input),
                    Err(_) => break,
                },
                recv(audio_rx) -> msg => match msg {
                    Ok(sample) => self.on_audio(sample),
                    Err(_) => break,
                },
                recv(control_rx) -> msg => match msg {
                    Ok(Control::Finish(reply)) => {
                        for input in video_rx.try_iter() {
                            self.on_video(input);
                        }
                        for sample in audio_rx.try_iter() {
                            self.on_audio(sample);
                        }
                        let _ = reply.send(self.finish());
                        return;
                    }
                    Ok(Control::Cancel) | Err(_) => break,
                },
            }
        }

        if let Some(writer) = self.writer.take() {
            writer.cancel();
        }
    }

    fn on_video(&mut self, input: VideoInput) {
        if self.error.is_some() {
            return;
        }
        let Some(writer) = self.writer.as_mut() else {
            return;
        };

        if input.begins_session && self.origin_us.is_none() {
            if let Err(e) = writer.begin_session(input.timestamp_us) {
                self.fail(e);
                return;
            }
            self.origin_us = Some(input.timestamp_us);
            log::debug!("{} output session starts at {}us", self.role, input.timestamp_us);
        }

        let Some(origin) = self.origin_us else {
            log::warn!("{} output got video before its session start; dropped", self.role);
            return;
        };
        let Some(relative) = input.timestamp_us.checked_sub(origin) else {
            log::warn!("{} output got video before the origin; dropped", self.role);
            return;
        };
        if self.last_video_us.is_some_and(|last| relative <= last) {
            log::warn!(
                "{} output got non-increasing video timestamp {}us; dropped",
                self.role,
                relative
            );
            return;
        }

        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        match writer.append_video(&input.frame, relative) {
            Ok(()) => self.last_video_us = Some(relative),
            Err(e) => {
                self.fail(e);
                return;
            }
        }

        // Audio that beat the first frame follows it into the container
        while let Some(sample) = self.pending_audio.pop_front() {
            self.on_audio(sample);
        }
    }

    fn on_audio(&mut self, sample: AudioSample) {
        if self.error.is_some() || self.audio_failed.load(Ordering::Acquire) {
            return;
        }
        let Some(origin) = self.origin_us else {
            if self.pending_audio.len() >= MAX_PENDING_AUDIO {
                self.pending_audio.pop_front();
            }
            self.pending_audio.push_back(sample);
            return;
        };
        let Some(relative) = sample.timestamp_us.checked_sub(origin) else {
            log::trace!("{} output: audio before the origin dropped", self.role);
            return;
        };
        if self.last_audio_us.is_some_and(|last| relative <= last) {
            log::warn!(
                "{} output got non-increasing audio timestamp {}us; dropped",
                self.role,
                relative
            );
            return;
        }

        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        match writer.append_audio(&sample, relative) {
            Ok(()) => self.last_audio_us = Some(relative),
            Err(e) => self.fail_audio(e),
        }
    }

    /// Audio errors close only the audio track; video keeps flowing
    fn fail_audio(&mut self, error: RecordingError) {
        log::warn!("{} output audio track stopped: {}", self.role, error);
        self.audio_failed.store(true, Ordering::Release);
        self.pending_audio.clear();
    }

    fn fail(&mut self, error: RecordingError) {
        log::error!("{} output failed: {}", self.role, error);
        self.failed.store(true, Ordering::Release);
        self.error = Some(error);
    }

    fn finish(&mut self) -> MuxerOutcome {
        let result = match (self.writer.take(), self.error.take()) {
            (Some(writer), Some(error)) => {
                writer.cancel();
                Err(error)
            }
            (Some(writer), None) => writer.finish(),
            (None, error) => Err(error.unwrap_or_else(|| {
                RecordingError::write_failure(self.role, "writer already released")
            })),
        };
        if let Err(e) = &result {
            self.failed.store(true, Ordering::Release);
            log::error!("{} output failed to finalize: {}", self.role, e);
        }
        MuxerOutcome {
            role: self.role,
            result,
            finished_at: Instant::now(),
        }
    }
}
