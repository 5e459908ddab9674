//! The session controller task
//!
//! Every frame tuple, audio sample, lifecycle request and pressure signal is
//! a [`Command`] on one queue, handled to completion before the next. That
//! queue is the only place recording state, statistics and the compositor
//! are touched.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use uuid::Uuid;

use super::state::{
    MuxerReport, RecorderEvent, RecordingState, RecordingSummary, StopOutcome, StopReason,
};
use crate::accounting::{DropReason, FrameAccounting, RecordingStatistics};
use crate::composition::{CompositionEngine, RotationAngles};
use crate::config::DuocamConfig;
use crate::errors::{RecordingError, RecordingResult};
use crate::muxer::{MuxerSet, MuxerSlots, OutputSpec, QueueDepths, WriterFactory};
use crate::pressure::{PressureLevel, PressureSource, PressureSubscription};
use crate::sync::{CameraPosition, CapturedFrame, OutputId, OutputRegistry, TupleSequencer};
use crate::types::{
    AudioSample, Dimensions, FrameTuple, OutputPaths, OutputRole, RecordingDestination,
};

pub(crate) enum Command {
    Start {
        destination: RecordingDestination,
        reply: oneshot::Sender<RecordingResult<OutputPaths>>,
    },
    Stop {
        reply: oneshot::Sender<RecordingResult<RecordingSummary>>,
    },
    Frames(FrameTuple),
    Delivery(Vec<CapturedFrame>),
    Audio(AudioSample),
    Rotation(RotationAngles),
    RegisterOutput {
        output: OutputId,
        position: CameraPosition,
        reply: oneshot::Sender<RecordingResult<()>>,
    },
    Pressure {
        level: PressureLevel,
        generation: u64,
    },
    Statistics(oneshot::Sender<Option<RecordingStatistics>>),
}

/// State that exists only between a successful start and the end of stop
struct Session {
    id: Uuid,
    started_at: chrono::DateTime<Utc>,
    generation: u64,
    outputs: OutputPaths,
    back_size: Dimensions,
    front_size: Dimensions,
    muxers: MuxerSlots,
    accounting: FrameAccounting,
    sequencer: TupleSequencer,
    origin_us: Option<u64>,
    stopping: bool,
    pressure: Option<PressureSubscription>,
}

pub(crate) struct Controller {
    config: DuocamConfig,
    factory: Arc<dyn WriterFactory>,
    pressure_source: Option<Arc<dyn PressureSource>>,
    engine: CompositionEngine,
    registry: OutputRegistry,
    state: watch::Sender<RecordingState>,
    events: broadcast::Sender<RecorderEvent>,
    commands: mpsc::WeakUnboundedSender<Command>,
    session: Option<Session>,
    generation: u64,
}

impl Controller {
    pub(crate) fn new(
        config: DuocamConfig,
        factory: Arc<dyn WriterFactory>,
        pressure_source: Option<Arc<dyn PressureSource>>,
        state: watch::Sender<RecordingState>,
        events: broadcast::Sender<RecorderEvent>,
        commands: mpsc::WeakUnboundedSender<Command>,
    ) -> RecordingResult<Self> {
        let engine = CompositionEngine::new(&config.composition)?;
        let registry = OutputRegistry::new(config.recording.max_sync_skew_us());
        Ok(Self {
            config,
            factory,
            pressure_source,
            engine,
            registry,
            state,
            events,
            commands,
            session: None,
            generation: 0,
        })
    }

    pub(crate) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        log::debug!("Recorder task started");
        while let Some(command) = commands.recv().await {
            self.handle(command).await;
        }

        if let Some(mut session) = self.session.take() {
            log::warn!("Recorder dropped while {}; cancelling outputs", self.current_state());
            if let Some(set) = session.muxers.take() {
                set.cancel();
            }
        }
        log::debug!("Recorder task finished");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Start { destination, reply } => {
                let _ = reply.send(self.start(destination).await);
            }
            Command::Stop { reply } => {
                let result = if self.accepting_frames() {
                    self.finish_session(StopReason::UserRequested).await
                } else {
                    log::warn!("Stop requested while {}", self.current_state());
                    Err(RecordingError::NotRecording)
                };
                let _ = reply.send(result);
            }
            Command::Frames(tuple) => self.process_tuple(tuple),
            Command::Delivery(delivery) => {
                if !self.accepting_frames() {
                    log::trace!("Delivery outside a recording ignored");
                    return;
                }
                match self.registry.pair(delivery) {
                    Ok(tuple) => self.process_tuple(tuple),
                    Err(e) => {
                        log::debug!("Unusable frame delivery: {}", e);
                        if let Some(session) = self.session.as_mut() {
                            session.accounting.record_dropped(DropReason::Malformed);
                        }
                    }
                }
            }
            Command::Audio(sample) => self.process_audio(sample),
            Command::Rotation(angles) => self.engine.set_rotation_angles(angles),
            Command::RegisterOutput { output, position, reply } => {
                let _ = reply.send(self.registry.register(output, position));
            }
            Command::Pressure { level, generation } => self.on_pressure(level, generation).await,
            Command::Statistics(reply) => {
                let _ = reply.send(self.session.as_ref().map(|s| s.accounting.snapshot()));
            }
        }
    }

    fn current_state(&self) -> RecordingState {
        *self.state.borrow()
    }

    fn set_state(&self, next: RecordingState) {
        let current = self.current_state();
        if !current.can_transition_to(next) {
            log::warn!("Unexpected recording state change {} -> {}", current, next);
        }
        log::info!("Recording state: {} -> {}", current, next);
        self.state.send_replace(next);
        let _ = self.events.send(RecorderEvent::StateChanged(next));
    }

    fn accepting_frames(&self) -> bool {
        self.current_state().is_recording() && self.session.as_ref().is_some_and(|s| !s.stopping)
    }

    async fn start(&mut self, destination: RecordingDestination) -> RecordingResult<OutputPaths> {
        if self.current_state().is_active() {
            log::warn!("Start requested while {}", self.current_state());
            return Err(RecordingError::AlreadyRecording);
        }
        let sensors = [
            (OutputRole::Back, destination.back_size),
            (OutputRole::Front, destination.front_size),
        ];
        for (role, size) in sensors {
            if size.is_empty() {
                let message = format!("sensor size {size} has no area");
                return Err(RecordingError::output_configuration(role, message));
            }
        }

        self.set_state(RecordingState::Starting);
        let outputs = destination.output_paths();
        let settings = &self.config.recording;
        let specs = [
            OutputSpec::new(
                OutputRole::Composed,
                outputs.composed.clone(),
                self.engine.canvas(),
                settings,
            ),
            OutputSpec::new(
                OutputRole::Back,
                outputs.back.clone(),
                destination.back_size,
                settings,
            ),
            OutputSpec::new(
                OutputRole::Front,
                outputs.front.clone(),
                destination.front_size,
                settings,
            ),
        ];
        let depths = QueueDepths {
            video: settings.video_queue_depth,
            audio: settings.audio_queue_depth,
        };

        let set = match MuxerSet::open(self.factory.clone(), specs, depths).await {
            Ok(set) => set,
            Err(e) => {
                log::error!("Recording start failed: {}", e);
                self.set_state(RecordingState::Stopped(StopOutcome::Failed));
                return Err(e);
            }
        };

        self.generation += 1;
        let pressure = self.subscribe_pressure(self.generation);
        let session = Session {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            generation: self.generation,
            outputs: outputs.clone(),
            back_size: destination.back_size,
            front_size: destination.front_size,
            muxers: MuxerSlots::Configured(set),
            accounting: FrameAccounting::new(),
            sequencer: TupleSequencer::new(),
            origin_us: None,
            stopping: false,
            pressure,
        };
        log::info!(
            "Recording session {} started: composed {} at {:?}, back {} at {:?}, front {} at {:?}",
            session.id,
            self.engine.canvas(),
            outputs.composed,
            destination.back_size,
            outputs.back,
            destination.front_size,
            outputs.front
        );
        self.session = Some(session);
        self.set_state(RecordingState::Recording);
        Ok(outputs)
    }

    fn subscribe_pressure(&self, generation: u64) -> Option<PressureSubscription> {
        if !self.config.pressure.enabled {
            return None;
        }
        let source = self.pressure_source.as_ref()?;
        let commands = self.commands.clone();
        Some(PressureSubscription::spawn(source.as_ref(), move |level| {
            // The recorder may already be gone; that ends the subscription
            let Some(commands) = commands.upgrade() else {
                return false;
            };
            commands.send(Command::Pressure { level, generation }).is_ok()
        }))
    }

    fn process_tuple(&mut self, tuple: FrameTuple) {
        if !self.accepting_frames() {
            log::trace!("Frame tuple at {}us outside a recording ignored", tuple.timestamp_us);
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };

        if !session.sequencer.admit(tuple.timestamp_us) {
            session.accounting.record_dropped(DropReason::OutOfOrder);
            return;
        }
        if tuple.back.dimensions() != session.back_size
            || tuple.front.dimensions() != session.front_size
            || !tuple.back.is_well_formed()
            || !tuple.front.is_well_formed()
        {
            log::debug!(
                "Tuple at {}us has back {} / front {}, expected {} / {}",
                tuple.timestamp_us,
                tuple.back.dimensions(),
                tuple.front.dimensions(),
                session.back_size,
                session.front_size
            );
            session.accounting.record_dropped(DropReason::Malformed);
            return;
        }

        let MuxerSlots::Configured(set) = &session.muxers else {
            session.accounting.record_dropped(DropReason::NotReady);
            return;
        };
        if !set.all_video_ready() {
            log::trace!(
                "Tuple at {}us dropped; not ready: {:?}",
                tuple.timestamp_us,
                set.not_ready()
            );
            session.accounting.record_dropped(DropReason::NotReady);
            return;
        }

        let (composed, compose_time) = self.engine.compose_timed(&tuple);
        let Some(composed) = composed else {
            session.accounting.record_dropped(DropReason::ComposeFailed);
            return;
        };

        let FrameTuple { back, front, timestamp_us } = tuple;
        let begins_session = session.origin_us.is_none();
        if let Err(e) = set.write_tuple(composed, back, front, timestamp_us, begins_session) {
            log::error!("Tuple at {}us could not be queued: {}", timestamp_us, e);
            session.accounting.record_dropped(DropReason::NotReady);
            return;
        }
        if begins_session {
            session.origin_us = Some(timestamp_us);
            log::info!("Session {} origin set at {}us", session.id, timestamp_us);
        }
        session.accounting.record_admitted(compose_time);
    }

    fn process_audio(&mut self, sample: AudioSample) {
        if !self.accepting_frames() {
            log::trace!("Audio at {}us outside a recording ignored", sample.timestamp_us);
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.origin_us.is_none() {
            log::trace!("Audio at {}us before the session origin ignored", sample.timestamp_us);
            return;
        }
        if let Some(set) = session.muxers.as_set() {
            let accepted = set.write_audio(&sample);
            session.accounting.record_audio(accepted);
        }
    }

    async fn on_pressure(&mut self, level: PressureLevel, generation: u64) {
        let current = self
            .session
            .as_ref()
            .is_some_and(|s| s.generation == generation && !s.stopping);
        if !current || !self.current_state().is_recording() {
            log::debug!("Pressure {:?} for an ended session ignored", level);
            return;
        }

        match level {
            PressureLevel::Normal => {}
            PressureLevel::Warning => {
                log::warn!("Memory pressure warning; clearing composition caches");
                let released_buffers = self.engine.clear_caches();
                let _ = self.events.send(RecorderEvent::PressureWarning { released_buffers });
            }
            PressureLevel::Critical => {
                log::warn!("Critical memory pressure; stopping recording");
                if let Err(e) = self.finish_session(StopReason::ResourcePressure).await {
                    log::error!("Pressure-triggered stop finished with an error: {}", e);
                }
            }
        }
    }

    /// The one stop path, shared by user and pressure-triggered stops
    async fn finish_session(&mut self, reason: StopReason) -> RecordingResult<RecordingSummary> {
        let Some(session) = self.session.as_mut() else {
            return Err(RecordingError::NotRecording);
        };
        session.stopping = true;
        session.pressure = None;
        let session_id = session.id;
        let muxers = session.muxers.take();
        self.set_state(RecordingState::Stopping);
        log::info!("Stopping session {} ({:?})", session_id, reason);

        let Some(set) = muxers else {
            self.session = None;
            self.set_state(RecordingState::Stopped(StopOutcome::Failed));
            return Err(RecordingError::NotRecording);
        };
        let grace = self.config.recording.stop_grace();
        if !set.drain(grace).await {
            log::warn!("Finalizing with frames still queued after {:?}", grace);
        }
        let report = set.finalize().await;

        let Some(session) = self.session.take() else {
            return Err(RecordingError::NotRecording);
        };
        let statistics = session.accounting.snapshot();
        statistics.log_summary();

        let muxers: Vec<MuxerReport> = report
            .outcomes()
            .iter()
            .map(|outcome| MuxerReport {
                role: outcome.role,
                completed: outcome.is_completed(),
                error: outcome.result.as_ref().err().map(ToString::to_string),
                summary: outcome.result.as_ref().ok().cloned(),
            })
            .collect();
        let summary = RecordingSummary {
            session_id: session.id,
            started_at: session.started_at,
            stopped_at: Utc::now(),
            reason,
            outputs: session.outputs,
            origin_us: session.origin_us,
            statistics,
            muxers,
        };

        let result = report.into_result().map(|_| summary);
        self.engine.clear_caches();

        let outcome = if result.is_ok() {
            StopOutcome::Completed
        } else {
            StopOutcome::Failed
        };
        self.set_state(RecordingState::Stopped(outcome));
        match &result {
            Ok(_) => log::info!("Recording stopped ({:?}); all outputs finalized", reason),
            Err(e) => log::error!("Recording stopped ({:?}) with failure: {}", reason, e),
        }
        let _ = self.events.send(RecorderEvent::Finished {
            reason,
            result: result.as_ref().cloned().map_err(ToString::to_string),
        });
        result
    }
}
