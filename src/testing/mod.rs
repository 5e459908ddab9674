//! Testing utilities for duocam
//!
//! Synthetic sensor data and an in-memory writer backend, so the whole
//! recording pipeline can be exercised without cameras or encoders.

pub mod memory_writer;
pub mod synthetic_data;

pub use memory_writer::{read_manifest, MemoryWriter, MemoryWriterFactory, RecordedOutput};
pub use synthetic_data::{
    solid_frame, synthetic_audio, synthetic_frame, synthetic_tuple, SensorCharacteristics,
    FRAME_INTERVAL_US,
};
