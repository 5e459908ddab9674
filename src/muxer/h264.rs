//! H.264 encoder wrapper using openh264

use openh264::encoder::{BitRate, Encoder, EncoderConfig, FrameRate, FrameType, RateControlMode};
use openh264::formats::YUVBuffer;
use openh264::OpenH264API;

use crate::errors::RecordingError;
use crate::types::{ColorMatrix, PixelFormat, VideoFrame};

/// H.264 encoder for one output's video track
pub struct H264Encoder {
    encoder: Encoder,
    width: u32,
    height: u32,
    frame_count: u64,
}

impl H264Encoder {
    /// Dimensions must be even; openh264 reads them from the YUV source.
    ///
    /// Frame skipping is off: every appended frame must come out as a sample
    /// or the three outputs drift apart.
    pub fn new(width: u32, height: u32, fps: f64, bitrate: u32) -> Result<Self, RecordingError> {
        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
            return Err(RecordingError::configuration(format!(
                "H.264 needs even, non-zero dimensions; got {width}x{height}"
            )));
        }
        if bitrate == 0 || !(fps.is_finite() && fps > 0.0) {
            return Err(RecordingError::configuration(format!(
                "H.264 needs a positive rate; got {bitrate} bps at {fps} fps"
            )));
        }
        let config = EncoderConfig::new()
            .bitrate(BitRate::from_bps(bitrate))
            .max_frame_rate(FrameRate::from_hz(fps as f32))
            .rate_control_mode(RateControlMode::Bitrate)
            .skip_frames(false);
        let encoder = Encoder::with_api_config(OpenH264API::from_source(), config).map_err(|e| {
            RecordingError::configuration(format!("Failed to create H.264 encoder: {e}"))
        })?;

        Ok(Self {
            encoder,
            width,
            height,
            frame_count: 0,
        })
    }

    /// Encode one frame into Annex B NAL units
    pub fn encode(&mut self, frame: &VideoFrame) -> Result<EncodedFrame, RecordingError> {
        if frame.width != self.width || frame.height != self.height {
            return Err(RecordingError::encoding(format!(
                "frame is {}x{}, track is {}x{}",
                frame.width, frame.height, self.width, self.height
            )));
        }
        if !frame.is_well_formed() {
            return Err(RecordingError::encoding(format!(
                "frame buffer holds {} bytes for {}x{}",
                frame.bytes().len(),
                frame.width,
                frame.height
            )));
        }

        let yuv = rgba_to_yuv420(frame.bytes(), frame.format, frame.color, self.width, self.height);
        let yuv_buffer = YUVBuffer::from_vec(yuv, self.width as usize, self.height as usize);

        let bitstream = self
            .encoder
            .encode(&yuv_buffer)
            .map_err(|e| RecordingError::encoding(format!("H.264 encoding failed: {e}")))?;

        self.frame_count += 1;
        let is_keyframe = matches!(bitstream.frame_type(), FrameType::IDR | FrameType::I);

        Ok(EncodedFrame {
            data: bitstream.to_vec(),
            is_keyframe,
        })
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn force_keyframe(&mut self) {
        self.encoder.force_intra_frame();
    }
}

#[derive(Debug, Clone)]
pub struct EncodedFrame {
    /// Annex B with start codes
    pub data: Vec<u8>,
    pub is_keyframe: bool,
}

/// Fixed-point (8.8) YCbCr coefficients, studio swing
struct Coefficients {
    y: [i32; 3],
    u: [i32; 3],
    v: [i32; 3],
}

impl Coefficients {
    fn for_matrix(matrix: ColorMatrix) -> Self {
        match matrix {
            ColorMatrix::Bt601 => Self {
                y: [66, 129, 25],
                u: [-38, -74, 112],
                v: [112, -94, -18],
            },
            ColorMatrix::Bt709 => Self {
                y: [47, 157, 16],
                u: [-26, -86, 112],
                v: [112, -102, -10],
            },
        }
    }
}

/// Convert packed 4-byte RGB(A) to planar YUV420
fn rgba_to_yuv420(
    pixels: &[u8],
    format: PixelFormat,
    matrix: ColorMatrix,
    width: u32,
    height: u32,
) -> Vec<u8> {
    let w = width as usize;
    let h = height as usize;
    let k = Coefficients::for_matrix(matrix);
    let (ri, bi) = match format {
        PixelFormat::Rgba8 => (0, 2),
        PixelFormat::Bgra8 => (2, 0),
    };

    let y_size = w * h;
    let uv_size = (w / 2) * (h / 2);
    let mut yuv = vec![0u8; y_size + uv_size * 2];
    let (y_plane, uv_planes) = yuv.split_at_mut(y_size);
    let (u_plane, v_plane) = uv_planes.split_at_mut(uv_size);

    for y in 0..h {
        for x in 0..w {
            let idx = (y * w + x) * 4;
            let r = pixels[idx + ri] as i32;
            let g = pixels[idx + 1] as i32;
            let b = pixels[idx + bi] as i32;

            let y_val = ((k.y[0] * r + k.y[1] * g + k.y[2] * b + 128) >> 8) + 16;
            y_plane[y * w + x] = y_val.clamp(0, 255) as u8;

            if y % 2 == 0 && x % 2 == 0 {
                let uv_idx = (y / 2) * (w / 2) + (x / 2);
                let u_val = ((k.u[0] * r + k.u[1] * g + k.u[2] * b + 128) >> 8) + 128;
                let v_val = ((k.v[0] * r + k.v[1] * g + k.v[2] * b + 128) >> 8) + 128;
                u_plane[uv_idx] = u_val.clamp(0, 255) as u8;
                v_plane[uv_idx] = v_val.clamp(0, 255) as u8;
            }
        }
    }

    yuv
}
