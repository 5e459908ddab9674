//! Synthetic sensor data for offline tests
//!
//! Frames and audio shaped like a phone's dual-camera session: a 4:3 back
//! sensor, a smaller 4:3 front sensor, and 48 kHz stereo microphone audio.

use crate::types::{AudioSample, Dimensions, FrameTuple, VideoFrame};

/// Frame interval at 30 fps, in microseconds
pub const FRAME_INTERVAL_US: u64 = 33_333;

/// A frame filled with one RGBA color
pub fn solid_frame(width: u32, height: u32, rgba: [u8; 4]) -> VideoFrame {
    let data = rgba.repeat((width as usize) * (height as usize));
    VideoFrame::rgba(width, height, data)
}

/// A gradient frame that changes with `frame_number`, so encoders see motion
pub fn synthetic_frame(frame_number: u64, width: u32, height: u32) -> VideoFrame {
    let mut data = vec![0u8; (width as usize) * (height as usize) * 4];
    let base = (frame_number % 256) as u8;
    for y in 0..height {
        for x in 0..width {
            let idx = ((y * width + x) * 4) as usize;
            data[idx] = base.wrapping_add((x % 256) as u8);
            data[idx + 1] = base.wrapping_add((y % 256) as u8);
            data[idx + 2] = base.wrapping_add(((x + y) % 256) as u8);
            data[idx + 3] = 255;
        }
    }
    VideoFrame::rgba(width, height, data)
}

/// A back/front tuple of solid frames at `timestamp_us`
pub fn synthetic_tuple(sensors: &SensorCharacteristics, timestamp_us: u64) -> FrameTuple {
    FrameTuple::new(
        solid_frame(sensors.back.width, sensors.back.height, [200, 40, 40, 255]),
        solid_frame(sensors.front.width, sensors.front.height, [40, 40, 200, 255]),
        timestamp_us,
    )
}

/// A 440 Hz tone of `frames` samples per channel starting at `timestamp_us`
pub fn synthetic_audio(
    timestamp_us: u64,
    frames: usize,
    sample_rate: u32,
    channels: u16,
) -> AudioSample {
    let channels_usize = channels.max(1) as usize;
    let start = timestamp_us as f64 / 1_000_000.0;
    let mut samples = vec![0.0f32; frames * channels_usize];
    for i in 0..frames {
        let t = start + i as f64 / sample_rate as f64;
        let value = (2.0 * std::f64::consts::PI * 440.0 * t).sin() as f32 * 0.3;
        for c in 0..channels_usize {
            samples[i * channels_usize + c] = value;
        }
    }
    AudioSample::new(samples, sample_rate, channels, timestamp_us)
}

/// Sensor geometry and audio format of a simulated device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorCharacteristics {
    pub back: Dimensions,
    pub front: Dimensions,
    pub audio_sample_rate: u32,
    pub audio_channels: u16,
}

impl SensorCharacteristics {
    /// Full-size sensors as a phone reports them
    pub fn phone() -> Self {
        Self {
            back: Dimensions::new(1920, 1440),
            front: Dimensions::new(1280, 960),
            audio_sample_rate: 48_000,
            audio_channels: 2,
        }
    }

    /// Same aspect ratios, small enough for fast unit tests
    pub fn tiny() -> Self {
        Self {
            back: Dimensions::new(64, 48),
            front: Dimensions::new(32, 24),
            audio_sample_rate: 48_000,
            audio_channels: 2,
        }
    }
}
