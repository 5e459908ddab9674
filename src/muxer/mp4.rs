//! MP4 writer: openh264 video, libopus audio, muxide container

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use muxide::api::{AudioCodec, Metadata, Muxer, MuxerBuilder, VideoCodec};

use super::h264::H264Encoder;
use super::opus::OpusEncoder;
use super::writer::{ContainerWriter, OutputSpec, OutputSummary, WriterFactory};
use crate::errors::{RecordingError, RecordingResult};
use crate::types::{AudioSample, Dimensions, OutputRole, VideoFrame};

/// Builds an [`Mp4Writer`] per output
#[derive(Debug, Default, Clone, Copy)]
pub struct Mp4WriterFactory;

impl WriterFactory for Mp4WriterFactory {
    fn create(&self, spec: &OutputSpec) -> RecordingResult<Box<dyn ContainerWriter>> {
        Ok(Box::new(Mp4Writer::create(spec)?))
    }
}

/// One H.264 + Opus MP4 file
pub struct Mp4Writer {
    role: OutputRole,
    path: PathBuf,
    muxer: Muxer<BufWriter<File>>,
    video: H264Encoder,
    audio: OpusEncoder,
    session_started: bool,
    skipped_audio: u64,
}

impl Mp4Writer {
    pub fn create(spec: &OutputSpec) -> RecordingResult<Self> {
        let Dimensions { width, height } = spec.dimensions;
        let video = H264Encoder::new(width, height, spec.fps, spec.video_bitrate)
            .map_err(|e| RecordingError::output_configuration(spec.role, e.to_string()))?;
        let audio =
            OpusEncoder::new(spec.audio_sample_rate, spec.audio_channels, spec.audio_bitrate)
            .map_err(|e| RecordingError::output_configuration(spec.role, e.to_string()))?;

        if let Some(parent) = spec.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(&spec.path)?;

        let metadata = match &spec.title {
            Some(title) => Metadata::new().with_title(title).with_current_time(),
            None => Metadata::new().with_current_time(),
        };
        let muxer = MuxerBuilder::new(BufWriter::new(file))
            .video(VideoCodec::H264, spec.dimensions.width, spec.dimensions.height, spec.fps)
            .audio(AudioCodec::Opus, spec.audio_sample_rate, spec.audio_channels)
            .with_fast_start(spec.fast_start)
            .with_metadata(metadata)
            .build()
            .map_err(|e| {
                let _ = std::fs::remove_file(&spec.path);
                let message = format!("Failed to create muxer: {e}");
                RecordingError::output_configuration(spec.role, message)
            })?;

        log::debug!("Created {} output at {:?}", spec.role, spec.path);
        Ok(Self {
            role: spec.role,
            path: spec.path.clone(),
            muxer,
            video,
            audio,
            session_started: false,
            skipped_audio: 0,
        })
    }

    fn mux_error(&self, what: &str, e: impl std::fmt::Display) -> RecordingError {
        RecordingError::write_failure(self.role, format!("{what}: {e}"))
    }

    fn discard_file(&self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            log::debug!("Could not remove {:?}: {}", self.path, e);
        }
    }
}

impl ContainerWriter for Mp4Writer {
    fn begin_session(&mut self, _origin_us: u64) -> RecordingResult<()> {
        self.session_started = true;
        self.video.force_keyframe();
        Ok(())
    }

    fn append_video(&mut self, frame: &VideoFrame, relative_us: u64) -> RecordingResult<()> {
        let encoded = self.video.encode(frame)?;
        if encoded.data.is_empty() {
            // A missing sample would leave this output a frame short of the others
            return Err(RecordingError::write_failure(
                self.role,
                format!("encoder produced no sample for the frame at {relative_us}us"),
            ));
        }
        let pts = relative_us as f64 / 1_000_000.0;
        self.muxer
            .write_video(pts, &encoded.data, encoded.is_keyframe)
            .map_err(|e| self.mux_error("video write failed", e))
    }

    fn append_audio(&mut self, sample: &AudioSample, relative_us: u64) -> RecordingResult<()> {
        if !self.audio.accepts(sample) {
            self.skipped_audio += 1;
            if self.skipped_audio == 1 {
                log::warn!(
                    "{} output skipping {} Hz/{}ch audio it was not configured for",
                    self.role,
                    sample.sample_rate,
                    sample.channels
                );
            }
            return Ok(());
        }
        let packets = self.audio.encode(sample, relative_us as f64 / 1_000_000.0)?;
        for packet in packets {
            self.muxer
                .write_audio(packet.timestamp, &packet.data)
                .map_err(|e| self.mux_error("audio write failed", e))?;
        }
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> RecordingResult<OutputSummary> {
        if !self.session_started {
            self.discard_file();
            return Err(RecordingError::write_failure(self.role, "session never started"));
        }
        for packet in self.audio.flush()? {
            self.muxer
                .write_audio(packet.timestamp, &packet.data)
                .map_err(|e| self.mux_error("audio flush failed", e))?;
        }

        let Mp4Writer { role, path, muxer, .. } = *self;
        let stats = muxer
            .finish_with_stats()
            .map_err(|e| RecordingError::write_failure(role, format!("Failed to finalize: {e}")))?;

        log::info!(
            "Finalized {} output {:?}: {} video / {} audio frames, {:.2}s, {} bytes",
            role,
            path,
            stats.video_frames,
            stats.audio_frames,
            stats.duration_secs,
            stats.bytes_written
        );
        Ok(OutputSummary {
            role,
            path,
            video_frames: stats.video_frames,
            audio_frames: stats.audio_frames,
            duration_secs: stats.duration_secs,
            bytes_written: stats.bytes_written,
        })
    }

    fn cancel(self: Box<Self>) {
        let path = self.path.clone();
        drop(self);
        if let Err(e) = std::fs::remove_file(&path) {
            log::debug!("Could not remove cancelled output {:?}: {}", path, e);
        }
    }
}
