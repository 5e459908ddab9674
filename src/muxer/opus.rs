//! Opus audio encoder
//!
//! Accumulates interleaved f32 PCM into 20 ms frames at 48 kHz and emits one
//! Opus packet per frame. Packet timestamps are relative to the session
//! origin and advance by exactly one frame duration.

use crate::errors::RecordingError;
use crate::types::AudioSample;

/// 20 ms at 48 kHz, per channel
const OPUS_FRAME_SAMPLES: usize = 960;

/// OPUS_APPLICATION_AUDIO from opus.h
const OPUS_APPLICATION_AUDIO: i32 = 2049;

/// Largest packet libopus will produce for one frame
const MAX_PACKET_BYTES: usize = 4000;

pub const OPUS_SAMPLE_RATE: u32 = 48_000;

#[derive(Debug, Clone)]
pub struct EncodedAudio {
    pub data: Vec<u8>,
    /// Seconds from the session origin
    pub timestamp: f64,
    pub duration: f64,
}

/// Opus encoder owned by one writer thread
///
/// Not `Sync`: libopus encoder state must only be touched from one thread.
pub struct OpusEncoder {
    encoder: *mut libopus_sys::OpusEncoder,
    channels: u16,
    sample_buffer: Vec<f32>,
    /// Relative timestamp of the first buffered sample
    buffer_start: Option<f64>,
    samples_encoded: u64,
}

// SAFETY: the encoder pointer is owned exclusively by this value and only
// used through `&mut self`; the type is never shared between threads.
unsafe impl Send for OpusEncoder {}

impl OpusEncoder {
    pub fn new(sample_rate: u32, channels: u16, bitrate: u32) -> Result<Self, RecordingError> {
        if sample_rate != OPUS_SAMPLE_RATE {
            return Err(RecordingError::configuration(format!(
                "Opus requires {OPUS_SAMPLE_RATE} Hz, got {sample_rate}"
            )));
        }
        if channels != 1 && channels != 2 {
            return Err(RecordingError::configuration(format!(
                "Opus supports mono or stereo, got {channels} channels"
            )));
        }

        let mut error: i32 = 0;
        let encoder = unsafe {
            libopus_sys::opus_encoder_create(
                sample_rate as i32,
                channels as i32,
                OPUS_APPLICATION_AUDIO,
                &mut error,
            )
        };
        if encoder.is_null() || error != 0 {
            return Err(RecordingError::configuration(format!(
                "Failed to create Opus encoder: error code {error}"
            )));
        }

        let result = unsafe {
            libopus_sys::opus_encoder_ctl(
                encoder,
                libopus_sys::OPUS_SET_BITRATE_REQUEST as i32,
                bitrate as i32,
            )
        };
        if result != 0 {
            unsafe { libopus_sys::opus_encoder_destroy(encoder) };
            return Err(RecordingError::configuration(format!(
                "Failed to set Opus bitrate: error code {result}"
            )));
        }

        Ok(Self {
            encoder,
            channels,
            sample_buffer: Vec::with_capacity(OPUS_FRAME_SAMPLES * channels as usize * 2),
            buffer_start: None,
            samples_encoded: 0,
        })
    }

    /// Whether `sample` matches this encoder's format
    pub fn accepts(&self, sample: &AudioSample) -> bool {
        sample.sample_rate == OPUS_SAMPLE_RATE && sample.channels == self.channels
    }

    /// Buffer `sample` and encode every complete frame
    pub fn encode(
        &mut self,
        sample: &AudioSample,
        relative_secs: f64,
    ) -> Result<Vec<EncodedAudio>, RecordingError> {
        if !self.accepts(sample) {
            return Err(RecordingError::encoding(format!(
                "audio is {} Hz/{}ch, encoder is {} Hz/{}ch",
                sample.sample_rate, sample.channels, OPUS_SAMPLE_RATE, self.channels
            )));
        }
        if self.buffer_start.is_none() && !sample.samples.is_empty() {
            self.buffer_start = Some(relative_secs);
        }
        self.sample_buffer.extend_from_slice(&sample.samples);
        self.drain_frames()
    }

    /// Zero-pad and encode whatever is left
    pub fn flush(&mut self) -> Result<Vec<EncodedAudio>, RecordingError> {
        let samples_per_frame = OPUS_FRAME_SAMPLES * self.channels as usize;
        let remainder = self.sample_buffer.len() % samples_per_frame;
        if remainder != 0 {
            let padded = self.sample_buffer.len() + samples_per_frame - remainder;
            self.sample_buffer.resize(padded, 0.0);
        }
        self.drain_frames()
    }

    fn drain_frames(&mut self) -> Result<Vec<EncodedAudio>, RecordingError> {
        let samples_per_frame = OPUS_FRAME_SAMPLES * self.channels as usize;
        let frame_duration = OPUS_FRAME_SAMPLES as f64 / OPUS_SAMPLE_RATE as f64;
        let mut packets = Vec::new();

        while self.sample_buffer.len() >= samples_per_frame {
            let mut output = vec![0u8; MAX_PACKET_BYTES];
            let len = unsafe {
                libopus_sys::opus_encode_float(
                    self.encoder,
                    self.sample_buffer.as_ptr(),
                    OPUS_FRAME_SAMPLES as i32,
                    output.as_mut_ptr(),
                    output.len() as i32,
                )
            };
            if len < 0 {
                let message = format!("Opus encoding failed: error code {len}");
                return Err(RecordingError::encoding(message));
            }
            self.sample_buffer.drain(..samples_per_frame);
            output.truncate(len as usize);

            let offset = self.samples_encoded as f64 / OPUS_SAMPLE_RATE as f64;
            packets.push(EncodedAudio {
                data: output,
                timestamp: self.buffer_start.unwrap_or(0.0) + offset,
                duration: frame_duration,
            });
            self.samples_encoded += OPUS_FRAME_SAMPLES as u64;
        }

        Ok(packets)
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }
}

impl Drop for OpusEncoder {
    fn drop(&mut self) {
        if !self.encoder.is_null() {
            unsafe { libopus_sys::opus_encoder_destroy(self.encoder) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm(frames: usize, channels: u16, timestamp_us: u64) -> AudioSample {
        let samples = vec![0.0f32; frames * channels as usize];
        AudioSample::new(samples, OPUS_SAMPLE_RATE, channels, timestamp_us)
    }

    #[test]
    fn test_rejects_wrong_format() {
        assert!(OpusEncoder::new(44_100, 2, 128_000).is_err());
        assert!(OpusEncoder::new(48_000, 6, 128_000).is_err());
    }

    #[test]
    fn test_full_frame_yields_packet() {
        let mut encoder = OpusEncoder::new(48_000, 2, 128_000).unwrap();
        let packets = encoder.encode(&pcm(OPUS_FRAME_SAMPLES, 2, 0), 0.0).unwrap();
        assert_eq!(packets.len(), 1);
        assert!(!packets[0].data.is_empty());
    }

    #[test]
    fn test_partial_frame_waits_for_flush() {
        let mut encoder = OpusEncoder::new(48_000, 1, 64_000).unwrap();
        assert!(encoder.encode(&pcm(100, 1, 0), 0.5).unwrap().is_empty());
        let flushed = encoder.flush().unwrap();
        assert_eq!(flushed.len(), 1);
        assert!((flushed[0].timestamp - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_mismatched_sample_is_rejected() {
        let mut encoder = OpusEncoder::new(48_000, 2, 128_000).unwrap();
        assert!(!encoder.accepts(&pcm(10, 1, 0)));
        assert!(encoder.encode(&pcm(10, 1, 0), 0.0).is_err());
    }
}
