use bytes::Bytes;
use common::EncodedFrame;
use image::codecs::jpeg::JpegEncoder;
use image::{ImageBuffer, Rgb};

use super::{CaptureError, RawFrame};

/// 占位帧颜色（中灰）
pub const PLACEHOLDER_RGB: [u8; 3] = [50, 50, 50];
pub const PLACEHOLDER_QUALITY: u8 = 50;

/// JPEG 编码器
#[derive(Debug, Clone, Copy)]
pub struct JpegFrameEncoder {
    quality: u8,
}

impl JpegFrameEncoder {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    pub fn encode(&self, frame: &RawFrame) -> Result<EncodedFrame, CaptureError> {
        encode_rgb(frame, self.quality)
    }
}

fn encode_rgb(frame: &RawFrame, quality: u8) -> Result<EncodedFrame, CaptureError> {
    let expected = (frame.width as usize) * (frame.height as usize) * 3;
    if frame.rgb.len() != expected {
        return Err(CaptureError::Encode(format!(
            "frame buffer is {} bytes, expected {} for {}x{}",
            frame.rgb.len(),
            expected,
            frame.width,
            frame.height
        )));
    }

    let img: ImageBuffer<Rgb<u8>, &[u8]> =
        ImageBuffer::from_raw(frame.width, frame.height, frame.rgb.as_slice())
            .ok_or_else(|| CaptureError::Encode("failed to create image buffer".to_string()))?;

    let mut jpeg = Vec::with_capacity(expected / 8);
    let mut encoder = JpegEncoder::new_with_quality(&mut jpeg, quality);
    encoder
        .encode_image(&img)
        .map_err(|e| CaptureError::Encode(e.to_string()))?;

    Ok(EncodedFrame::new(Bytes::from(jpeg)))
}

/// 设备不可用时发布的占位帧
pub fn placeholder_frame(width: u32, height: u32) -> Result<EncodedFrame, CaptureError> {
    let raw = RawFrame::filled(width, height, PLACEHOLDER_RGB);
    encode_rgb(&raw, PLACEHOLDER_QUALITY)
}
