use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;

use crate::shared::constants::DEFAULT_JPEG_QUALITY;
use crate::shared::frame::Frame;
use crate::video::domain::frame_encoder::FrameEncoder;

/// Baseline JPEG via the `image` crate. Only RGB frames are accepted.
pub struct JpegFrameEncoder {
    quality: u8,
}

impl JpegFrameEncoder {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    #[cfg(test)]
    fn quality(&self) -> u8 {
        self.quality
    }
}

impl Default for JpegFrameEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}

impl FrameEncoder for JpegFrameEncoder {
    fn encode(&self, frame: &Frame) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
        if frame.channels() != 3 {
            return Err(format!(
                "JPEG encoder expects 3 channels, frame has {}",
                frame.channels()
            )
            .into());
        }
        let img = RgbImage::from_raw(frame.width(), frame.height(), frame.data().to_vec())
            .ok_or("frame buffer does not match its dimensions")?;
        let mut buf = Vec::new();
        JpegEncoder::new_with_quality(&mut buf, self.quality).encode_image(&img)?;
        Ok(buf)
    }

    fn content_type(&self) -> &'static str {
        "image/jpeg"
    }
}
