//! Public recorder handle

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};

use super::controller::{Command, Controller};
use super::state::{RecorderEvent, RecordingState, RecordingSummary};
use crate::accounting::RecordingStatistics;
use crate::composition::RotationAngles;
use crate::config::DuocamConfig;
use crate::errors::{RecordingError, RecordingResult};
use crate::muxer::WriterFactory;
use crate::pressure::PressureSource;
use crate::sync::{CameraPosition, CapturedFrame, OutputId};
use crate::types::{AudioSample, FrameTuple, OutputPaths, RecordingDestination};

const EVENT_CAPACITY: usize = 64;

/// Builder for [`DualRecorder`]
///
/// # Example
/// ```rust,ignore
/// let recorder = DualRecorder::builder()
///     .config(DuocamConfig::load_or_default())
///     .writer_factory(Arc::new(Mp4WriterFactory))
///     .spawn()?;
/// ```
#[derive(Default)]
pub struct DualRecorderBuilder {
    config: Option<DuocamConfig>,
    factory: Option<Arc<dyn WriterFactory>>,
    pressure: Option<Arc<dyn PressureSource>>,
}

impl DualRecorderBuilder {
    pub fn config(mut self, config: DuocamConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn writer_factory(mut self, factory: Arc<dyn WriterFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Memory-pressure signals consulted while recording
    pub fn pressure_source(mut self, source: Arc<dyn PressureSource>) -> Self {
        self.pressure = Some(source);
        self
    }

    /// Validate the configuration and start the recorder task
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(self) -> RecordingResult<DualRecorder> {
        let config = self.config.unwrap_or_default();
        config.validate().map_err(RecordingError::configuration)?;
        let factory = self
            .factory
            .ok_or_else(|| RecordingError::configuration("no writer factory configured"))?;

        let (commands, receiver) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(RecordingState::Idle);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let controller = Controller::new(
            config,
            factory,
            self.pressure,
            state_tx,
            events.clone(),
            commands.downgrade(),
        )?;
        tokio::spawn(controller.run(receiver));

        Ok(DualRecorder {
            commands,
            state: state_rx,
            events,
        })
    }
}

/// Handle to the dual-camera recording core
///
/// Cheap to clone; every clone feeds the same session. When the last handle
/// is dropped an unfinished recording is cancelled and its partial outputs
/// removed.
#[derive(Clone)]
pub struct DualRecorder {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<RecordingState>,
    events: broadcast::Sender<RecorderEvent>,
}

impl DualRecorder {
    pub fn builder() -> DualRecorderBuilder {
        DualRecorderBuilder::default()
    }

    fn send(&self, command: Command) -> RecordingResult<()> {
        self.commands.send(command).map_err(|_| RecordingError::Shutdown)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> RecordingResult<T> {
        let (reply, response) = oneshot::channel();
        self.send(make(reply))?;
        response.await.map_err(|_| RecordingError::Shutdown)
    }

    /// Open all three outputs; resolves once every writer accepted its setup
    pub async fn start_recording(
        &self,
        destination: RecordingDestination,
    ) -> RecordingResult<OutputPaths> {
        self.request(|reply| Command::Start { destination, reply }).await?
    }

    /// Drain, finalize all three outputs and report the session
    pub async fn stop_recording(&self) -> RecordingResult<RecordingSummary> {
        self.request(|reply| Command::Stop { reply }).await?
    }

    /// Offer one synchronized tuple; admission happens on the recorder task
    pub fn process_synchronized_frames(&self, tuple: FrameTuple) -> RecordingResult<()> {
        self.send(Command::Frames(tuple))
    }

    /// Offer one raw synchronizer delivery, paired by registered output identity
    pub fn process_delivery(&self, delivery: Vec<CapturedFrame>) -> RecordingResult<()> {
        self.send(Command::Delivery(delivery))
    }

    pub fn process_audio(&self, sample: AudioSample) -> RecordingResult<()> {
        self.send(Command::Audio(sample))
    }

    /// Applies from the next composed frame
    pub fn set_rotation_angles(&self, back: f32, front: f32) -> RecordingResult<()> {
        self.send(Command::Rotation(RotationAngles { back, front }))
    }

    pub async fn register_output(
        &self,
        output: OutputId,
        position: CameraPosition,
    ) -> RecordingResult<()> {
        self.request(|reply| Command::RegisterOutput { output, position, reply }).await?
    }

    /// Counters of the running session, `None` when idle
    pub async fn statistics(&self) -> RecordingResult<Option<RecordingStatistics>> {
        self.request(Command::Statistics).await
    }

    pub fn state(&self) -> RecordingState {
        *self.state.borrow()
    }

    pub fn is_recording(&self) -> bool {
        self.state().is_recording()
    }

    /// Wait until the state satisfies `predicate`
    pub async fn wait_for_state(
        &self,
        predicate: impl Fn(&RecordingState) -> bool,
    ) -> RecordingResult<RecordingState> {
        let mut state = self.state.clone();
        let current = state
            .wait_for(|s| predicate(s))
            .await
            .map_err(|_| RecordingError::Shutdown)?;
        Ok(*current)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecorderEvent> {
        self.events.subscribe()
    }
}
