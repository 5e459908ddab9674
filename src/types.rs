//! Frame, audio and output types shared by every stage of the recording core

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::composition::PooledBuffer;

/// Width and height in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Swap width and height (quarter-turn rotation)
    pub fn transposed(&self) -> Self {
        Self::new(self.height, self.width)
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl From<[u32; 2]> for Dimensions {
    fn from(value: [u32; 2]) -> Self {
        Self::new(value[0], value[1])
    }
}

/// Packed 8-bit pixel layouts accepted from the sensors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgba8,
    Bgra8,
}

impl PixelFormat {
    pub const fn bytes_per_pixel(&self) -> usize {
        4
    }
}

/// YCbCr matrix the frame's RGB values are meant to be encoded with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ColorMatrix {
    #[default]
    Bt601,
    Bt709,
}

/// Pixel storage: shared sensor memory or a buffer leased from the compositor pool
#[derive(Debug)]
pub enum FrameBuffer {
    Shared(Bytes),
    Pooled(PooledBuffer),
}

impl FrameBuffer {
    pub fn as_slice(&self) -> &[u8] {
        match self {
            FrameBuffer::Shared(bytes) => bytes,
            FrameBuffer::Pooled(buffer) => buffer.as_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }
}

/// One uncompressed video frame
#[derive(Debug)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub color: ColorMatrix,
    pub data: FrameBuffer,
}

impl VideoFrame {
    /// Wrap sensor memory as an RGBA frame
    pub fn rgba(width: u32, height: u32, data: impl Into<Bytes>) -> Self {
        Self {
            width,
            height,
            format: PixelFormat::Rgba8,
            color: ColorMatrix::Bt601,
            data: FrameBuffer::Shared(data.into()),
        }
    }

    /// Wrap sensor memory as a BGRA frame
    pub fn bgra(width: u32, height: u32, data: impl Into<Bytes>) -> Self {
        Self {
            format: PixelFormat::Bgra8,
            ..Self::rgba(width, height, data)
        }
    }

    pub fn with_color(mut self, color: ColorMatrix) -> Self {
        self.color = color;
        self
    }

    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.width, self.height)
    }

    pub fn bytes(&self) -> &[u8] {
        self.data.as_slice()
    }

    /// The buffer holds exactly width * height pixels of a positive-area frame
    pub fn is_well_formed(&self) -> bool {
        !self.dimensions().is_empty()
            && self.data.len() == self.dimensions().pixel_count() * self.format.bytes_per_pixel()
    }
}

/// A back/front frame pair sharing one capture timestamp
#[derive(Debug)]
pub struct FrameTuple {
    pub back: VideoFrame,
    pub front: VideoFrame,
    /// Presentation timestamp in microseconds
    pub timestamp_us: u64,
}

impl FrameTuple {
    pub fn new(back: VideoFrame, front: VideoFrame, timestamp_us: u64) -> Self {
        Self {
            back,
            front,
            timestamp_us,
        }
    }
}

/// Interleaved f32 PCM shared by every output's audio track
#[derive(Debug, Clone)]
pub struct AudioSample {
    pub samples: Arc<[f32]>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Presentation timestamp in microseconds
    pub timestamp_us: u64,
}

impl AudioSample {
    pub fn new(
        samples: impl Into<Arc<[f32]>>,
        sample_rate: u32,
        channels: u16,
        timestamp_us: u64,
    ) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
            channels,
            timestamp_us,
        }
    }

    /// Samples per channel
    pub fn frame_count(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }
}

/// The three containers written per session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OutputRole {
    Composed,
    Back,
    Front,
}

impl OutputRole {
    pub const ALL: [OutputRole; 3] = [OutputRole::Composed, OutputRole::Back, OutputRole::Front];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputRole::Composed => "composed",
            OutputRole::Back => "back",
            OutputRole::Front => "front",
        }
    }
}

impl fmt::Display for OutputRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a session writes, plus the native sensor geometry of each raw output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingDestination {
    pub base: PathBuf,
    pub back_size: Dimensions,
    pub front_size: Dimensions,
}

impl RecordingDestination {
    pub fn new(base: impl Into<PathBuf>, back_size: Dimensions, front_size: Dimensions) -> Self {
        Self {
            base: base.into(),
            back_size,
            front_size,
        }
    }

    /// `<stem>_<role>.mp4` next to the base path
    pub fn path_for(&self, role: OutputRole) -> PathBuf {
        let stem = self
            .base
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "recording".to_string());
        let parent = self.base.parent().unwrap_or_else(|| Path::new(""));
        parent.join(format!("{}_{}.mp4", stem, role.as_str()))
    }

    pub fn output_paths(&self) -> OutputPaths {
        OutputPaths {
            composed: self.path_for(OutputRole::Composed),
            back: self.path_for(OutputRole::Back),
            front: self.path_for(OutputRole::Front),
        }
    }
}

/// The three container paths of one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputPaths {
    pub composed: PathBuf,
    pub back: PathBuf,
    pub front: PathBuf,
}

impl OutputPaths {
    pub fn get(&self, role: OutputRole) -> &Path {
        match role {
            OutputRole::Composed => &self.composed,
            OutputRole::Back => &self.back,
            OutputRole::Front => &self.front,
        }
    }
}
