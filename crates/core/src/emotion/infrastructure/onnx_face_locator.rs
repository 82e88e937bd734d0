//! YOLO face locator running on ONNX Runtime via `ort`.
//!
//! Letterboxes the frame to the model's square input, runs inference, and
//! keeps the confident, non-overlapping boxes mapped back to frame pixels.
use std::path::Path;

use crate::shared::bounding_box::BoundingBox;
use crate::shared::frame::Frame;

use super::math::bbox_iou;
use super::onnx_session::load_session;

/// Fallback input resolution when the model declares a dynamic shape.
const DEFAULT_INPUT_SIZE: u32 = 640;

pub const DEFAULT_FACE_CONFIDENCE: f64 = 0.5;

const NMS_IOU_THRESH: f64 = 0.45;

/// Letterbox padding value (114/255 grey, YOLO convention).
const PAD_VALUE: f32 = 114.0 / 255.0;

pub struct OnnxFaceLocator {
    session: ort::session::Session,
    confidence: f64,
    input_size: u32,
}

impl OnnxFaceLocator {
    /// Loads a YOLO face model. The input size is read from the NCHW input
    /// shape when the model declares one.
    pub fn new(model_path: &Path, confidence: f64) -> Result<Self, Box<dyn std::error::Error>> {
        let session = load_session(model_path)?;

        let input_size = session
            .inputs()
            .first()
            .and_then(|input| match input.dtype() {
                ort::value::ValueType::Tensor { ref shape, .. }
                    if shape.len() >= 4 && shape[2] > 0 =>
                {
                    Some(shape[2] as u32)
                }
                _ => None,
            })
            .unwrap_or(DEFAULT_INPUT_SIZE);

        log::info!(
            "Loaded face model {} (input {input_size}px)",
            model_path.display()
        );

        Ok(Self {
            session,
            confidence,
            input_size,
        })
    }

    /// Face boxes ordered by descending confidence, clamped to the frame.
    pub fn locate(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>, Box<dyn std::error::Error>> {
        let (input_tensor, geometry) = letterbox(frame, self.input_size);

        let input_value = ort::value::Tensor::from_array(input_tensor)?;
        let outputs = self.session.run(ort::inputs![input_value])?;
        if outputs.len() == 0 {
            return Err("face model produced no outputs".into());
        }
        let tensor = outputs[0].try_extract_array::<f32>()?;
        let shape = tensor.shape().to_vec();
        if shape.len() != 3 {
            return Err(format!("unexpected face model output shape: {shape:?}").into());
        }
        let data = tensor.as_slice().ok_or("face model output is not contiguous")?;

        let mut candidates = parse_rows(data, shape[1], shape[2], self.confidence, &geometry);
        let kept = nms(&mut candidates, NMS_IOU_THRESH);

        Ok(kept
            .iter()
            .filter_map(|c| {
                BoundingBox::from_corners(c.bbox[0], c.bbox[1], c.bbox[2], c.bbox[3])
                    .clamp_to(frame.width(), frame.height())
            })
            .collect())
    }
}

/// How a frame was placed inside the square model input.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Letterbox {
    scale: f64,
    pad_x: u32,
    pad_y: u32,
}

impl Letterbox {
    fn to_frame(self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.pad_x as f64) / self.scale,
            (y - self.pad_y as f64) / self.scale,
        )
    }
}

/// Nearest-neighbour resize into a padded `target` x `target` NCHW tensor.
fn letterbox(frame: &Frame, target: u32) -> (ndarray::Array4<f32>, Letterbox) {
    let fw = frame.width() as f64;
    let fh = frame.height() as f64;
    let scale = (target as f64 / fw).min(target as f64 / fh);
    let new_w = ((fw * scale).round() as u32).min(target);
    let new_h = ((fh * scale).round() as u32).min(target);
    let geometry = Letterbox {
        scale,
        pad_x: (target - new_w) / 2,
        pad_y: (target - new_h) / 2,
    };

    let mut tensor =
        ndarray::Array4::<f32>::from_elem((1, 3, target as usize, target as usize), PAD_VALUE);
    let src = frame.as_ndarray();
    let src_w = frame.width() as usize;
    let src_h = frame.height() as usize;
    let channels = (frame.channels() as usize).min(3);

    for y in 0..new_h as usize {
        let sy = ((y as f64 / scale) as usize).min(src_h - 1);
        for x in 0..new_w as usize {
            let sx = ((x as f64 / scale) as usize).min(src_w - 1);
            let ty = geometry.pad_y as usize + y;
            let tx = geometry.pad_x as usize + x;
            for c in 0..3 {
                // Grey frames replicate their single channel.
                let v = src[[sy, sx, c.min(channels - 1)]];
                tensor[[0, c, ty, tx]] = v as f32 / 255.0;
            }
        }
    }

    (tensor, geometry)
}

#[derive(Clone, Debug, PartialEq)]
struct Candidate {
    bbox: [f64; 4],
    confidence: f64,
}

/// Decodes `[cx, cy, w, h, conf, ...]` rows. YOLO exports either
/// `[1, features, boxes]` or `[1, boxes, features]`; the smaller axis is
/// taken to be the feature axis.
fn parse_rows(
    data: &[f32],
    dim1: usize,
    dim2: usize,
    min_confidence: f64,
    geometry: &Letterbox,
) -> Vec<Candidate> {
    let transposed = dim1 < dim2;
    let (num_boxes, num_feats) = if transposed { (dim2, dim1) } else { (dim1, dim2) };
    if num_feats < 5 {
        return Vec::new();
    }
    let at = |i: usize, f: usize| -> f64 {
        if transposed {
            data[f * num_boxes + i] as f64
        } else {
            data[i * num_feats + f] as f64
        }
    };

    (0..num_boxes)
        .filter_map(|i| {
            let confidence = at(i, 4);
            if confidence < min_confidence {
                return None;
            }
            let (cx, cy, w, h) = (at(i, 0), at(i, 1), at(i, 2), at(i, 3));
            let (x1, y1) = geometry.to_frame(cx - w / 2.0, cy - h / 2.0);
            let (x2, y2) = geometry.to_frame(cx + w / 2.0, cy + h / 2.0);
            Some(Candidate {
                bbox: [x1, y1, x2, y2],
                confidence,
            })
        })
        .collect()
}

/// Greedy NMS: highest confidence first, suppress boxes overlapping a kept one.
fn nms(candidates: &mut [Candidate], iou_thresh: f64) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept: Vec<Candidate> = Vec::new();
    for c in candidates.iter() {
        if kept.iter().all(|k| bbox_iou(&k.bbox, &c.bbox) <= iou_thresh) {
            kept.push(c.clone());
        }
    }
    kept
}
