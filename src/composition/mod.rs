//! Split-screen composition for the combined output
//!
//! - `geometry`: quarter-turn rotation, aspect-fill crops and the half-canvas layout
//! - `pool`: bounded pixel-buffer pool for composed frames
//! - `engine`: the compositor and its invalidatable cache
//!
//! # Example
//! ```rust,ignore
//! use duocam::composition::CompositionEngine;
//!
//! let mut engine = CompositionEngine::new(&config.composition)?;
//! if let Some(frame) = engine.compose(&tuple) {
//!     // frame is canvas-sized, front on top, back on the bottom
//! }
//! ```

mod engine;
mod geometry;
mod pool;

pub use engine::{ColorSpace, CompositionCache, CompositionEngine};
pub use geometry::{aspect_fill_crop, QuarterTurn, Rect, RotationAngles, SplitLayout};
pub use pool::{BufferPool, PooledBuffer};
