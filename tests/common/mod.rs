//! Shared fixtures for the recorder integration tests

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use duocam::testing::{MemoryWriterFactory, SensorCharacteristics};
use duocam::{DualRecorder, DuocamConfig, RecordingDestination, RecordingState};

/// First tuple timestamp used throughout the tests
pub const T0: u64 = 1_000_000;

/// Small canvas and sensors so compose stays cheap
pub fn test_config() -> DuocamConfig {
    let mut config = DuocamConfig::default();
    config.composition.canvas = [64, 36];
    config.composition.pool_capacity = 32;
    config.recording.video_queue_depth = 16;
    config.recording.stop_grace_ms = 200;
    config
}

pub fn sensors() -> SensorCharacteristics {
    SensorCharacteristics::tiny()
}

pub fn destination(dir: &Path) -> RecordingDestination {
    let sensors = sensors();
    RecordingDestination::new(dir.join("clip.mp4"), sensors.back, sensors.front)
}

pub fn recorder(factory: &MemoryWriterFactory) -> DualRecorder {
    DualRecorder::builder()
        .config(test_config())
        .writer_factory(Arc::new(factory.clone()))
        .spawn()
        .expect("recorder should spawn")
}

pub async fn wait_for(
    recorder: &DualRecorder,
    predicate: impl Fn(&RecordingState) -> bool,
) -> RecordingState {
    tokio::time::timeout(Duration::from_secs(5), recorder.wait_for_state(predicate))
        .await
        .expect("state change before timeout")
        .expect("recorder alive")
}
