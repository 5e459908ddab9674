//! Container muxing for the three session outputs
//!
//! Every output (composed, back, front) is written by its own
//! [`ContainerWriter`] on a dedicated thread. [`MuxerSet`] opens the three
//! together, gates admission on their readiness and finalizes them
//! concurrently.
//!
//! With the `recording` feature, [`Mp4WriterFactory`] writes H.264 + Opus
//! MP4 files through muxide.

mod set;
mod worker;
mod writer;

#[cfg(feature = "recording")]
mod h264;
#[cfg(feature = "recording")]
mod mp4;
#[cfg(feature = "recording")]
mod opus;

pub use set::{FinalizeReport, MuxerSet, MuxerSlots, QueueDepths};
pub use worker::{MuxerHandle, MuxerOutcome};
pub use writer::{ContainerWriter, OutputSpec, OutputSummary, ReadyFlag, WriterFactory};

#[cfg(feature = "recording")]
pub use h264::{EncodedFrame, H264Encoder};
#[cfg(feature = "recording")]
pub use mp4::{Mp4Writer, Mp4WriterFactory};
#[cfg(feature = "recording")]
pub use opus::{EncodedAudio, OpusEncoder};
