//! Memory pressure signals
//!
//! A [`PressureSource`] hands out broadcast receivers of [`PressureLevel`].
//! Sessions subscribe only while recording through a [`PressureSubscription`],
//! which forwards each signal into the session's own task and unsubscribes
//! when dropped.
//!
//! - [`PsiPressureSource`]: polls Linux PSI (`/proc/pressure/memory`)
//! - [`ManualPressureSource`]: raised by the application from its own OS hooks

use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::PressureSettings;

const CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PressureLevel {
    Normal,
    Warning,
    Critical,
}

/// Anything that can report memory pressure
pub trait PressureSource: Send + Sync {
    fn subscribe(&self) -> broadcast::Receiver<PressureLevel>;

    fn name(&self) -> &'static str;
}

/// Pressure raised by hand, e.g. from a platform low-memory callback
#[derive(Debug, Clone)]
pub struct ManualPressureSource {
    sender: broadcast::Sender<PressureLevel>,
}

impl ManualPressureSource {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Deliver `level` to current subscribers; returns how many got it
    pub fn signal(&self, level: PressureLevel) -> usize {
        log::info!("Memory pressure signalled: {:?}", level);
        self.sender.send(level).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ManualPressureSource {
    fn default() -> Self {
        Self::new()
    }
}

impl PressureSource for ManualPressureSource {
    fn subscribe(&self) -> broadcast::Receiver<PressureLevel> {
        self.sender.subscribe()
    }

    fn name(&self) -> &'static str {
        "manual"
    }
}

/// Linux pressure-stall polling, active only while someone is subscribed
pub struct PsiPressureSource {
    path: PathBuf,
    settings: PressureSettings,
    sender: broadcast::Sender<PressureLevel>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl PsiPressureSource {
    pub const DEFAULT_PATH: &'static str = "/proc/pressure/memory";

    pub fn new(settings: PressureSettings) -> Self {
        Self::with_path(Self::DEFAULT_PATH, settings)
    }

    pub fn with_path(path: impl Into<PathBuf>, settings: PressureSettings) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            path: path.into(),
            settings,
            sender,
            poller: Mutex::new(None),
        }
    }

    /// Whether the kernel exposes memory PSI here
    pub fn is_available(&self) -> bool {
        self.path.exists()
    }

    fn ensure_polling(&self) {
        let mut poller = self.poller.lock().unwrap_or_else(PoisonError::into_inner);
        if poller.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            log::warn!("No tokio runtime; memory pressure polling disabled");
            return;
        };

        let path = self.path.clone();
        let settings = self.settings.clone();
        let sender = self.sender.clone();
        log::debug!("Starting memory pressure polling of {:?}", path);
        *poller = Some(runtime.spawn(poll_psi(path, settings, sender)));
    }
}

impl PressureSource for PsiPressureSource {
    fn subscribe(&self) -> broadcast::Receiver<PressureLevel> {
        let receiver = self.sender.subscribe();
        self.ensure_polling();
        receiver
    }

    fn name(&self) -> &'static str {
        "psi"
    }
}

impl Drop for PsiPressureSource {
    fn drop(&mut self) {
        let poller = self.poller.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = poller.take() {
            task.abort();
        }
    }
}

async fn poll_psi(
    path: PathBuf,
    settings: PressureSettings,
    sender: broadcast::Sender<PressureLevel>,
) {
    let mut interval = tokio::time::interval(settings.poll_interval());
    let mut last = PressureLevel::Normal;

    loop {
        interval.tick().await;
        if sender.receiver_count() == 0 {
            log::debug!("No pressure subscribers left; polling stops");
            return;
        }

        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) => {
                log::warn!("Cannot read {:?}: {}; pressure polling stops", path, e);
                return;
            }
        };
        let Some(avg10) = parse_some_avg10(&contents) else {
            log::warn!("Unrecognized PSI format in {:?}", path);
            continue;
        };

        let level = classify(avg10, &settings);
        if level != last {
            log::info!("Memory pressure {:?} -> {:?} (some avg10 = {:.2})", last, level, avg10);
            last = level;
            let _ = sender.send(level);
        }
    }
}

/// Extract `avg10` from the `some` line of a PSI file
pub fn parse_some_avg10(contents: &str) -> Option<f64> {
    let line = contents.lines().find(|line| line.starts_with("some "))?;
    line.split_whitespace()
        .find_map(|field| field.strip_prefix("avg10="))
        .and_then(|value| value.parse().ok())
}

pub fn classify(avg10: f64, settings: &PressureSettings) -> PressureLevel {
    if avg10 >= settings.critical_avg10 {
        PressureLevel::Critical
    } else if avg10 >= settings.warning_avg10 {
        PressureLevel::Warning
    } else {
        PressureLevel::Normal
    }
}

/// A live subscription forwarding signals to a session
///
/// Dropping it ends the forwarding task and releases the receiver.
pub struct PressureSubscription {
    task: JoinHandle<()>,
    source: &'static str,
}

impl PressureSubscription {
    /// Forward every level to `on_signal` until it returns `false`
    pub fn spawn<F>(source: &dyn PressureSource, mut on_signal: F) -> Self
    where
        F: FnMut(PressureLevel) -> bool + Send + 'static,
    {
        let mut receiver = source.subscribe();
        let name = source.name();
        let task = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(level) => {
                        if !on_signal(level) {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        log::warn!("Missed {} pressure signals from {}", missed, name);
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });
        log::debug!("Subscribed to {} memory pressure", name);
        Self { task, source: name }
    }

    pub fn source(&self) -> &'static str {
        self.source
    }
}

impl Drop for PressureSubscription {
    fn drop(&mut self) {
        self.task.abort();
        log::debug!("Unsubscribed from {} memory pressure", self.source);
    }
}
