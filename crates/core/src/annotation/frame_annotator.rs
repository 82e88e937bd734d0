use crate::annotation::glyphs::{glyph_bits, GLYPH_ADVANCE, GLYPH_HEIGHT, GLYPH_WIDTH};
use crate::emotion::domain::detection::Detection;
use crate::shared::frame::Frame;

pub const DEFAULT_BOX_COLOR: [u8; 3] = [0, 255, 0];
pub const DEFAULT_THICKNESS: i32 = 2;
/// Gap between the label baseline and the top edge of its box.
pub const LABEL_OFFSET: i32 = 10;

/// Draws each detection's box and strongest-emotion label onto a copy of
/// the frame.
#[derive(Clone, Debug)]
pub struct FrameAnnotator {
    color: [u8; 3],
    thickness: i32,
}

impl FrameAnnotator {
    pub fn new(color: [u8; 3], thickness: i32) -> Self {
        Self {
            color,
            thickness: thickness.max(1),
        }
    }

    /// The source frame is left untouched.
    pub fn annotate(&self, frame: &Frame, detections: &[Detection]) -> Frame {
        let mut out = frame.clone();
        for detection in detections {
            let Some(bbox) = detection.bbox.clamp_to(frame.width(), frame.height()) else {
                continue;
            };
            self.draw_box(&mut out, bbox.x, bbox.y, bbox.right() - 1, bbox.bottom() - 1);
            if let Some(emotion) = detection.strongest_emotion() {
                let label_y = (bbox.y - LABEL_OFFSET - GLYPH_HEIGHT).max(0);
                self.draw_label(&mut out, bbox.x, label_y, emotion.label());
            }
        }
        out
    }

    fn draw_box(&self, frame: &mut Frame, left: i32, top: i32, right: i32, bottom: i32) {
        for t in 0..self.thickness {
            for x in left..=right {
                self.put(frame, x, top + t);
                self.put(frame, x, bottom - t);
            }
            for y in top..=bottom {
                self.put(frame, left + t, y);
                self.put(frame, right - t, y);
            }
        }
    }

    fn draw_label(&self, frame: &mut Frame, mut x: i32, y: i32, text: &str) {
        for ch in text.chars().flat_map(char::to_uppercase) {
            if let Some(rows) = glyph_bits(ch) {
                for (row, pattern) in rows.iter().enumerate() {
                    for col in 0..GLYPH_WIDTH {
                        if (pattern >> (GLYPH_WIDTH - 1 - col)) & 1 == 1 {
                            self.put(frame, x + col, y + row as i32);
                        }
                    }
                }
            }
            x += GLYPH_ADVANCE;
        }
    }

    /// Writes the colour at `(x, y)`; out-of-frame coordinates are ignored.
    fn put(&self, frame: &mut Frame, x: i32, y: i32) {
        if x < 0 || y < 0 || x >= frame.width() as i32 || y >= frame.height() as i32 {
            return;
        }
        let channels = frame.channels() as usize;
        let start = (y as usize * frame.width() as usize + x as usize) * channels;
        let pixel = &mut frame.data_mut()[start..start + channels];
        if channels >= 3 {
            pixel[..3].copy_from_slice(&self.color);
        } else {
            pixel.fill(self.color.iter().copied().max().unwrap_or(255));
        }
    }
}

impl Default for FrameAnnotator {
    fn default() -> Self {
        Self::new(DEFAULT_BOX_COLOR, DEFAULT_THICKNESS)
    }
}
