//! Split-screen compositor
//!
//! Renders one canvas-sized RGBA frame from a back/front tuple: each source is
//! rotation-corrected, aspect-filled into its half, and drawn over a cached
//! solid background in the fixed order background, back, front.

use std::time::{Duration, Instant};

use image::imageops::{self, FilterType};
use image::{GenericImageView, ImageBuffer, Rgba, RgbaImage};

use super::geometry::{aspect_fill_crop, QuarterTurn, Rect, RotationAngles, SplitLayout};
use super::pool::BufferPool;
use crate::config::CompositionSettings;
use crate::errors::RecordingError;
use crate::types::{ColorMatrix, Dimensions, FrameBuffer, FrameTuple, PixelFormat, VideoFrame};

/// Pixel layout and YCbCr matrix of composed frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorSpace {
    pub format: PixelFormat,
    pub matrix: ColorMatrix,
}

impl ColorSpace {
    /// HD canvases and up use BT.709, smaller ones BT.601
    pub fn for_canvas(canvas: Dimensions) -> Self {
        let matrix = if canvas.height >= 720 {
            ColorMatrix::Bt709
        } else {
            ColorMatrix::Bt601
        };
        Self {
            format: PixelFormat::Rgba8,
            matrix,
        }
    }
}

/// Reusable compositor state; the background and color space are optional
/// and rebuilt on demand after [`CompositionCache::clear`]
pub struct CompositionCache {
    background: Option<RgbaImage>,
    color_space: Option<ColorSpace>,
    pool: BufferPool,
}

impl CompositionCache {
    fn new(canvas: Dimensions, pool_capacity: usize) -> Self {
        Self {
            background: None,
            color_space: None,
            pool: BufferPool::new(pool_capacity, canvas.pixel_count() * 4),
        }
    }

    fn background(&mut self, canvas: Dimensions, color: [u8; 4]) -> &RgbaImage {
        self.background
            .get_or_insert_with(|| RgbaImage::from_pixel(canvas.width, canvas.height, Rgba(color)))
    }

    fn color_space(&mut self, canvas: Dimensions) -> ColorSpace {
        *self
            .color_space
            .get_or_insert_with(|| ColorSpace::for_canvas(canvas))
    }

    /// Drop the background and color space and release idle pool buffers
    pub fn clear(&mut self) -> usize {
        self.background = None;
        self.color_space = None;
        self.pool.trim()
    }

    pub fn is_warm(&self) -> bool {
        self.background.is_some() && self.color_space.is_some()
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }
}

/// Composes synchronized tuples into split-screen frames
pub struct CompositionEngine {
    canvas: Dimensions,
    layout: SplitLayout,
    background_color: [u8; 4],
    filter: FilterType,
    back_turn: QuarterTurn,
    front_turn: QuarterTurn,
    cache: CompositionCache,
    frames_composed: u64,
    failures: u64,
}

impl CompositionEngine {
    pub fn new(settings: &CompositionSettings) -> Result<Self, RecordingError> {
        let canvas = settings.canvas_size();
        if canvas.is_empty() || canvas.height < 2 {
            return Err(RecordingError::configuration(format!(
                "canvas {} cannot be split into two halves",
                canvas
            )));
        }

        Ok(Self {
            canvas,
            layout: SplitLayout::for_canvas(canvas),
            background_color: settings.background,
            filter: settings.filter.to_filter_type(),
            back_turn: QuarterTurn::None,
            front_turn: QuarterTurn::None,
            cache: CompositionCache::new(canvas, settings.pool_capacity),
            frames_composed: 0,
            failures: 0,
        })
    }

    pub fn canvas(&self) -> Dimensions {
        self.canvas
    }

    pub fn layout(&self) -> SplitLayout {
        self.layout
    }

    pub fn cache(&self) -> &CompositionCache {
        &self.cache
    }

    /// Takes effect on the next composed frame
    pub fn set_rotation_angles(&mut self, angles: RotationAngles) {
        self.back_turn = QuarterTurn::from_degrees(angles.back);
        self.front_turn = QuarterTurn::from_degrees(angles.front);
        log::debug!(
            "Rotation set: back {}°, front {}° (requested {}°, {}°)",
            self.back_turn.degrees(),
            self.front_turn.degrees(),
            angles.back,
            angles.front
        );
    }

    /// Returns how many idle pool buffers were released
    pub fn clear_caches(&mut self) -> usize {
        let released = self.cache.clear();
        log::info!("Composition caches cleared, released {} idle buffers", released);
        released
    }

    /// Compose a tuple; `None` means this one frame is dropped
    pub fn compose(&mut self, tuple: &FrameTuple) -> Option<VideoFrame> {
        match self.render(tuple) {
            Ok(frame) => {
                self.frames_composed += 1;
                Some(frame)
            }
            Err(reason) => {
                self.failures += 1;
                log::debug!("Compose skipped at {}us: {}", tuple.timestamp_us, reason);
                None
            }
        }
    }

    /// Compose and report how long it took
    pub fn compose_timed(&mut self, tuple: &FrameTuple) -> (Option<VideoFrame>, Duration) {
        let started = Instant::now();
        let frame = self.compose(tuple);
        (frame, started.elapsed())
    }

    pub fn frames_composed(&self) -> u64 {
        self.frames_composed
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    fn render(&mut self, tuple: &FrameTuple) -> Result<VideoFrame, &'static str> {
        if !tuple.back.is_well_formed() {
            return Err("back source buffer unavailable");
        }
        if !tuple.front.is_well_formed() {
            return Err("front source buffer unavailable");
        }

        let mut buffer = self.cache.pool.acquire().ok_or("pixel buffer pool exhausted")?;

        let canvas = self.canvas;
        let background = self.cache.background(canvas, self.background_color);
        buffer.as_mut_slice().copy_from_slice(background.as_raw());

        let back_size = self.layout.back.size();
        let back = render_slot(&tuple.back, self.back_turn, back_size, self.filter)
            .ok_or("back frame could not be sampled")?;
        blit(buffer.as_mut_slice(), canvas.width, &back, self.layout.back);

        let front_size = self.layout.front.size();
        let front = render_slot(&tuple.front, self.front_turn, front_size, self.filter)
            .ok_or("front frame could not be sampled")?;
        blit(buffer.as_mut_slice(), canvas.width, &front, self.layout.front);

        let color_space = self.cache.color_space(canvas);
        Ok(VideoFrame {
            width: canvas.width,
            height: canvas.height,
            format: color_space.format,
            color: color_space.matrix,
            data: FrameBuffer::Pooled(buffer),
        })
    }
}

/// Orient, aspect-fill and resample one source into a slot-sized image
fn render_slot(
    frame: &VideoFrame,
    turn: QuarterTurn,
    slot: Dimensions,
    filter: FilterType,
) -> Option<RgbaImage> {
    match frame.format {
        PixelFormat::Rgba8 => {
            let view =
                ImageBuffer::<Rgba<u8>, &[u8]>::from_raw(frame.width, frame.height, frame.bytes())?;
            Some(orient_and_fill(&view, turn, slot, filter))
        }
        PixelFormat::Bgra8 => {
            let mut owned = RgbaImage::from_raw(frame.width, frame.height, frame.bytes().to_vec())?;
            for pixel in owned.pixels_mut() {
                pixel.0.swap(0, 2);
            }
            Some(orient_and_fill(&owned, turn, slot, filter))
        }
    }
}

fn orient_and_fill<I>(
    image: &I,
    turn: QuarterTurn,
    slot: Dimensions,
    filter: FilterType,
) -> RgbaImage
where
    I: GenericImageView<Pixel = Rgba<u8>>,
{
    match turn {
        QuarterTurn::None => fill(image, slot, filter),
        QuarterTurn::Cw90 => fill(&imageops::rotate90(image), slot, filter),
        QuarterTurn::Cw180 => fill(&imageops::rotate180(image), slot, filter),
        QuarterTurn::Cw270 => fill(&imageops::rotate270(image), slot, filter),
    }
}

fn fill<I>(image: &I, slot: Dimensions, filter: FilterType) -> RgbaImage
where
    I: GenericImageView<Pixel = Rgba<u8>>,
{
    let (width, height) = image.dimensions();
    let crop = aspect_fill_crop(Dimensions::new(width, height), slot);
    // Copy the crop out by hand so borrowed views work as sources
    let region = RgbaImage::from_fn(crop.width, crop.height, |x, y| {
        image.get_pixel(crop.x + x, crop.y + y)
    });
    if region.dimensions() == (slot.width, slot.height) {
        return region;
    }
    imageops::resize(&region, slot.width, slot.height, filter)
}

/// Copy a slot image into the canvas at its rectangle
fn blit(canvas: &mut [u8], canvas_width: u32, slot: &RgbaImage, at: Rect) {
    let stride = canvas_width as usize * 4;
    let row_len = at.width as usize * 4;
    for (row, src) in slot.as_raw().chunks_exact(row_len).enumerate() {
        let start = (at.y as usize + row) * stride + at.x as usize * 4;
        canvas[start..start + row_len].copy_from_slice(src);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScaleFilter;
    use crate::testing::solid_frame;

    fn small_settings() -> CompositionSettings {
        CompositionSettings {
            canvas: [64, 36],
            background: [9, 9, 9, 255],
            pool_capacity: 2,
            filter: ScaleFilter::Nearest,
        }
    }

    #[test]
    fn test_halves_hold_their_sources() {
        let mut engine = CompositionEngine::new(&small_settings()).unwrap();
        let tuple = FrameTuple::new(
            solid_frame(40, 30, [200, 0, 0, 255]),
            solid_frame(30, 40, [0, 0, 200, 255]),
            1_000,
        );

        let frame = engine.compose(&tuple).expect("composed");
        assert_eq!(frame.dimensions(), Dimensions::new(64, 36));
        let data = frame.bytes();
        for (i, px) in data.chunks_exact(4).enumerate() {
            let y = i / 64;
            if y < 18 {
                assert_eq!(px, [0, 0, 200, 255], "top row {}", y);
            } else {
                assert_eq!(px, [200, 0, 0, 255], "bottom row {}", y);
            }
        }
    }

    #[test]
    fn test_borrowed_source_is_cropped_to_center() {
        let mut engine = CompositionEngine::new(&small_settings()).unwrap();
        // 96x18 into a 64x18 slot: 16 columns trimmed on each side
        let mut pixels = Vec::new();
        for _y in 0..18 {
            for x in 0..96 {
                let px: [u8; 4] = match x {
                    0..=15 => [255, 0, 0, 255],
                    80..=95 => [0, 255, 0, 255],
                    _ => [0, 0, 255, 255],
                };
                pixels.extend_from_slice(&px);
            }
        }
        let tuple = FrameTuple::new(
            solid_frame(64, 18, [9, 9, 9, 255]),
            VideoFrame::rgba(96, 18, pixels),
            0,
        );

        let frame = engine.compose(&tuple).unwrap();
        let top = &frame.bytes()[..64 * 18 * 4];
        assert!(top.chunks_exact(4).all(|px| px == [0, 0, 255, 255]));
    }

    #[test]
    fn test_bgra_sources_are_swizzled() {
        let mut engine = CompositionEngine::new(&small_settings()).unwrap();
        let back = VideoFrame::bgra(8, 8, vec![[10u8, 20, 30, 255]; 64].concat());
        let front = solid_frame(8, 8, [1, 2, 3, 255]);
        let frame = engine.compose(&FrameTuple::new(back, front, 0)).unwrap();
        let last = &frame.bytes()[frame.bytes().len() - 4..];
        assert_eq!(last, [30, 20, 10, 255]);
    }

    #[test]
    fn test_malformed_source_is_dropped() {
        let mut engine = CompositionEngine::new(&small_settings()).unwrap();
        let back = VideoFrame::rgba(8, 8, vec![0u8; 10]);
        let front = solid_frame(8, 8, [1, 2, 3, 255]);
        assert!(engine.compose(&FrameTuple::new(back, front, 0)).is_none());
        assert_eq!(engine.failures(), 1);
    }

    #[test]
    fn test_pool_exhaustion_drops_frame() {
        let mut engine = CompositionEngine::new(&small_settings()).unwrap();
        let make = || {
            FrameTuple::new(
                solid_frame(8, 8, [1, 1, 1, 255]),
                solid_frame(8, 8, [2, 2, 2, 255]),
                0,
            )
        };
        let first = engine.compose(&make()).unwrap();
        let second = engine.compose(&make()).unwrap();
        assert!(engine.compose(&make()).is_none(), "pool of two is exhausted");
        drop(first);
        assert!(engine.compose(&make()).is_some());
        drop(second);
    }

    #[test]
    fn test_rotation_applies_to_next_frame() {
        let mut engine = CompositionEngine::new(&small_settings()).unwrap();
        // Left half red, right half green; a 180° turn swaps them
        let mut pixels = Vec::new();
        for _y in 0..8 {
            for x in 0..16 {
                pixels.extend_from_slice(if x < 8 { &[255, 0, 0, 255] } else { &[0, 255, 0, 255] });
            }
        }
        let make = |pixels: &Vec<u8>| {
            FrameTuple::new(
                solid_frame(16, 8, [0, 0, 0, 255]),
                VideoFrame::rgba(16, 8, pixels.clone()),
                0,
            )
        };

        let plain = engine.compose(&make(&pixels)).unwrap();
        assert_eq!(&plain.bytes()[0..4], [255, 0, 0, 255]);

        engine.set_rotation_angles(RotationAngles { back: 0.0, front: 180.0 });
        let turned = engine.compose(&make(&pixels)).unwrap();
        assert_eq!(&turned.bytes()[0..4], [0, 255, 0, 255]);
    }

    #[test]
    fn test_clear_caches_rebuilds_lazily() {
        let mut engine = CompositionEngine::new(&small_settings()).unwrap();
        let tuple = FrameTuple::new(
            solid_frame(8, 8, [1, 1, 1, 255]),
            solid_frame(8, 8, [2, 2, 2, 255]),
            0,
        );
        drop(engine.compose(&tuple).unwrap());
        assert!(engine.cache().is_warm());
        assert_eq!(engine.cache().pool().idle(), 1);

        engine.clear_caches();
        assert!(!engine.cache().is_warm());
        assert_eq!(engine.cache().pool().idle(), 0);

        let frame = engine.compose(&tuple).unwrap();
        assert_eq!(frame.color, ColorMatrix::Bt601);
        assert!(engine.cache().is_warm());
    }

    #[test]
    fn test_hd_canvas_uses_bt709() {
        assert_eq!(
            ColorSpace::for_canvas(Dimensions::new(1920, 1080)).matrix,
            ColorMatrix::Bt709
        );
    }
}
