//! The three per-session muxers, opened, fed and finalized together

use std::sync::Arc;
use std::time::{Duration, Instant};

use super::worker::{MuxerHandle, MuxerOutcome, VideoInput};
use super::writer::{ContainerWriter, OutputSpec, OutputSummary, WriterFactory};
use crate::errors::{RecordingError, RecordingResult};
use crate::types::{AudioSample, OutputRole, VideoFrame};

const DRAIN_POLL: Duration = Duration::from_millis(5);

/// Muxer ownership: either nothing is configured or all three outputs are
pub enum MuxerSlots {
    NotConfigured,
    Configured(MuxerSet),
}

impl MuxerSlots {
    pub fn is_configured(&self) -> bool {
        matches!(self, MuxerSlots::Configured(_))
    }

    pub fn as_set(&self) -> Option<&MuxerSet> {
        match self {
            MuxerSlots::Configured(set) => Some(set),
            MuxerSlots::NotConfigured => None,
        }
    }

    /// Take the set out, leaving `NotConfigured`
    pub fn take(&mut self) -> Option<MuxerSet> {
        match std::mem::replace(self, MuxerSlots::NotConfigured) {
            MuxerSlots::Configured(set) => Some(set),
            MuxerSlots::NotConfigured => None,
        }
    }
}

impl Default for MuxerSlots {
    fn default() -> Self {
        MuxerSlots::NotConfigured
    }
}

/// Queue depths shared by the three writer threads
#[derive(Debug, Clone, Copy)]
pub struct QueueDepths {
    pub video: usize,
    pub audio: usize,
}

/// Composed, back and front muxers
pub struct MuxerSet {
    composed: MuxerHandle,
    back: MuxerHandle,
    front: MuxerHandle,
}

impl MuxerSet {
    /// Create and configure all three writers, or none of them
    ///
    /// Writer construction may touch the filesystem, so it runs on the
    /// blocking pool. If any writer is rejected the others are cancelled.
    pub async fn open(
        factory: Arc<dyn WriterFactory>,
        specs: [OutputSpec; 3],
        depths: QueueDepths,
    ) -> RecordingResult<Self> {
        tokio::task::spawn_blocking(move || Self::open_blocking(&*factory, &specs, depths))
            .await
            .map_err(|e| RecordingError::configuration(format!("writer setup task failed: {e}")))?
    }

    fn open_blocking(
        factory: &dyn WriterFactory,
        specs: &[OutputSpec; 3],
        depths: QueueDepths,
    ) -> RecordingResult<Self> {
        let mut writers: Vec<Box<dyn ContainerWriter>> = Vec::with_capacity(3);
        for spec in specs {
            match factory.create(spec) {
                Ok(writer) => writers.push(writer),
                Err(e) => {
                    log::error!("Failed to configure {} output {:?}: {}", spec.role, spec.path, e);
                    for writer in writers {
                        writer.cancel();
                    }
                    return Err(attach_role(e, spec.role));
                }
            }
        }

        let mut handles: Vec<MuxerHandle> = Vec::with_capacity(3);
        let mut remaining = writers.into_iter();
        for spec in specs {
            let Some(writer) = remaining.next() else {
                return Err(RecordingError::output_configuration(spec.role, "writer missing"));
            };
            match MuxerHandle::spawn(spec, writer, depths.video, depths.audio) {
                Ok(handle) => handles.push(handle),
                Err((e, writer)) => {
                    if let Some(writer) = writer {
                        writer.cancel();
                    }
                    for writer in remaining {
                        writer.cancel();
                    }
                    // Dropping the spawned handles cancels their outputs
                    drop(handles);
                    return Err(e);
                }
            }
        }

        let mut handles = handles.into_iter();
        match (handles.next(), handles.next(), handles.next()) {
            (Some(composed), Some(back), Some(front)) => {
                log::info!(
                    "Opened outputs {:?}, {:?}, {:?}",
                    composed.path(),
                    back.path(),
                    front.path()
                );
                Ok(Self { composed, back, front })
            }
            _ => Err(RecordingError::configuration("expected three outputs")),
        }
    }

    pub fn handles(&self) -> [&MuxerHandle; 3] {
        [&self.composed, &self.back, &self.front]
    }

    pub fn handle(&self, role: OutputRole) -> &MuxerHandle {
        match role {
            OutputRole::Composed => &self.composed,
            OutputRole::Back => &self.back,
            OutputRole::Front => &self.front,
        }
    }

    /// Every video input can accept a frame right now
    pub fn all_video_ready(&self) -> bool {
        self.handles().iter().all(|h| h.video_ready())
    }

    /// Roles whose video input cannot accept a frame
    pub fn not_ready(&self) -> Vec<OutputRole> {
        self.handles()
            .iter()
            .filter(|h| !h.video_ready())
            .map(|h| h.role())
            .collect()
    }

    pub fn any_failed(&self) -> bool {
        self.handles().iter().any(|h| h.has_failed())
    }

    /// Queue one composed frame and both camera frames under one timestamp
    ///
    /// Call only after `all_video_ready`; queues are owned by the caller's
    /// thread, so readiness cannot be lost between the check and the push.
    pub fn write_tuple(
        &self,
        composed: VideoFrame,
        back: VideoFrame,
        front: VideoFrame,
        timestamp_us: u64,
        begins_session: bool,
    ) -> RecordingResult<()> {
        let input = |frame| VideoInput {
            frame,
            timestamp_us,
            begins_session,
        };
        self.composed.push_video(input(composed))?;
        self.back.push_video(input(back))?;
        self.front.push_video(input(front))?;
        Ok(())
    }

    /// Offer audio to all three outputs; returns how many queued it
    ///
    /// An output whose audio track has failed no longer counts, so repeated
    /// rejections show up as partial writes.
    pub fn write_audio(&self, sample: &AudioSample) -> usize {
        self.handles()
            .iter()
            .filter(|h| h.push_audio(sample.clone()))
            .count()
    }

    pub fn queued_video(&self) -> usize {
        self.handles().iter().map(|h| h.queued_video()).sum()
    }

    pub fn queued(&self) -> usize {
        self.handles()
            .iter()
            .map(|h| h.queued_video() + h.queued_audio())
            .sum()
    }

    /// Wait until every queue is empty or the grace window closes
    ///
    /// Returns `true` when everything drained in time.
    pub async fn drain(&self, grace: Duration) -> bool {
        let deadline = Instant::now() + grace;
        loop {
            if self.queued() == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                log::warn!("Grace window elapsed with {} samples still queued", self.queued());
                return false;
            }
            tokio::time::sleep(DRAIN_POLL).await;
        }
    }

    /// Finish all three outputs concurrently and wait for every one
    pub async fn finalize(mut self) -> FinalizeReport {
        let composed = self.composed.request_finish();
        let back = self.back.request_finish();
        let front = self.front.request_finish();

        let (composed, back, front) = tokio::join!(composed, back, front);
        let settle = |outcome: Result<MuxerOutcome, _>, role| {
            outcome.unwrap_or_else(|_| MuxerOutcome {
                role,
                result: Err(RecordingError::write_failure(
                    role,
                    "writer thread exited without reporting",
                )),
                finished_at: Instant::now(),
            })
        };

        FinalizeReport {
            composed: settle(composed, OutputRole::Composed),
            back: settle(back, OutputRole::Back),
            front: settle(front, OutputRole::Front),
        }
    }

    /// Abandon all three outputs
    pub fn cancel(mut self) {
        self.composed.cancel();
        self.back.cancel();
        self.front.cancel();
    }
}

fn attach_role(error: RecordingError, role: OutputRole) -> RecordingError {
    match error {
        RecordingError::Configuration { role: None, message } => {
            RecordingError::output_configuration(role, message)
        }
        other => other,
    }
}

/// Every output's finalize outcome
#[derive(Debug)]
pub struct FinalizeReport {
    pub composed: MuxerOutcome,
    pub back: MuxerOutcome,
    pub front: MuxerOutcome,
}

impl FinalizeReport {
    pub fn outcomes(&self) -> [&MuxerOutcome; 3] {
        [&self.composed, &self.back, &self.front]
    }

    pub fn all_completed(&self) -> bool {
        self.outcomes().iter().all(|o| o.is_completed())
    }

    /// Roles that failed, in the order they finished
    pub fn failed_roles(&self) -> Vec<OutputRole> {
        let mut failed: Vec<&MuxerOutcome> =
            self.outcomes().into_iter().filter(|o| !o.is_completed()).collect();
        failed.sort_by_key(|o| o.finished_at);
        failed.into_iter().map(|o| o.role).collect()
    }

    /// Every summary when all completed, else the error that finished first
    pub fn into_result(self) -> RecordingResult<[OutputSummary; 3]> {
        let mut outcomes = [self.composed, self.back, self.front];
        outcomes.sort_by_key(|o| o.finished_at);

        let mut summaries = Vec::with_capacity(3);
        for outcome in outcomes {
            summaries.push(outcome.result?);
        }
        summaries.sort_by_key(|s| s.role);
        let mut summaries = summaries.into_iter();
        match (summaries.next(), summaries.next(), summaries.next()) {
            (Some(composed), Some(back), Some(front)) => Ok([composed, back, front]),
            _ => Err(RecordingError::configuration("expected three outputs")),
        }
    }
}
