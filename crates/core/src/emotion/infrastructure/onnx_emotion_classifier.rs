//! Facial-expression classifier: YOLO face boxes followed by a FER+ model
//! scoring each face crop.
use std::path::Path;

use crate::emotion::domain::detection::Detection;
use crate::emotion::domain::emotion::{Emotion, EmotionScores};
use crate::emotion::domain::emotion_classifier::EmotionClassifier;
use crate::shared::bounding_box::BoundingBox;
use crate::shared::frame::Frame;

use super::math::{luma, softmax};
use super::onnx_face_locator::OnnxFaceLocator;
use super::onnx_session::load_session;

/// FER+ takes a 64x64 single-channel crop with raw 0-255 intensities.
const FERPLUS_INPUT_SIZE: usize = 64;

/// Output order of the FER+ logits.
const FERPLUS_LABELS: [Emotion; 8] = [
    Emotion::Neutral,
    Emotion::Happy,
    Emotion::Surprise,
    Emotion::Sad,
    Emotion::Angry,
    Emotion::Disgust,
    Emotion::Fear,
    Emotion::Contempt,
];

pub struct OnnxEmotionClassifier {
    locator: OnnxFaceLocator,
    session: ort::session::Session,
}

impl OnnxEmotionClassifier {
    pub fn new(
        locator: OnnxFaceLocator,
        emotion_model_path: &Path,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let session = load_session(emotion_model_path)?;
        log::info!("Loaded emotion model {}", emotion_model_path.display());
        Ok(Self { locator, session })
    }

    fn score_face(
        &mut self,
        frame: &Frame,
        bbox: &BoundingBox,
    ) -> Result<EmotionScores, Box<dyn std::error::Error>> {
        let input = ort::value::Tensor::from_array(face_tensor(frame, bbox, FERPLUS_INPUT_SIZE))?;
        let outputs = self.session.run(ort::inputs![input])?;
        if outputs.len() == 0 {
            return Err("emotion model produced no outputs".into());
        }
        let logits = outputs[0].try_extract_array::<f32>()?;
        let logits: Vec<f32> = logits.iter().copied().collect();
        if logits.len() != FERPLUS_LABELS.len() {
            return Err(format!(
                "emotion model returned {} scores, expected {}",
                logits.len(),
                FERPLUS_LABELS.len()
            )
            .into());
        }
        Ok(scores_from_logits(&logits))
    }
}

impl EmotionClassifier for OnnxEmotionClassifier {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, Box<dyn std::error::Error>> {
        let faces = self.locator.locate(frame)?;
        let mut detections = Vec::with_capacity(faces.len());
        for bbox in faces {
            let scores = self.score_face(frame, &bbox)?;
            detections.push(Detection::new(bbox, scores));
        }
        Ok(detections)
    }
}

/// Softmax probabilities re-keyed into [`Emotion::ALL`] order, so ties
/// resolve the same way regardless of the model's output layout.
fn scores_from_logits(logits: &[f32]) -> EmotionScores {
    let probs = softmax(logits);
    Emotion::ALL
        .iter()
        .filter_map(|emotion| {
            FERPLUS_LABELS
                .iter()
                .position(|l| l == emotion)
                .map(|i| (*emotion, probs[i]))
        })
        .collect()
}

/// Grey `[1, 1, size, size]` tensor of the face crop, nearest-neighbour
/// resampled. The box must already be clamped to the frame.
fn face_tensor(frame: &Frame, bbox: &BoundingBox, size: usize) -> ndarray::Array4<f32> {
    let mut tensor = ndarray::Array4::<f32>::zeros((1, 1, size, size));
    let src = frame.as_ndarray();
    let channels = frame.channels() as usize;
    let bw = bbox.width.max(1) as f64;
    let bh = bbox.height.max(1) as f64;
    let max_x = frame.width().saturating_sub(1) as i32;
    let max_y = frame.height().saturating_sub(1) as i32;

    for ty in 0..size {
        let sy = (bbox.y + (ty as f64 * bh / size as f64) as i32).clamp(0, max_y) as usize;
        for tx in 0..size {
            let sx = (bbox.x + (tx as f64 * bw / size as f64) as i32).clamp(0, max_x) as usize;
            tensor[[0, 0, ty, tx]] = if channels >= 3 {
                luma(src[[sy, sx, 0]], src[[sy, sx, 1]], src[[sy, sx, 2]])
            } else {
                src[[sy, sx, 0]] as f32
            };
        }
    }
    tensor
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_scores_are_in_canonical_order() {
        let scores = scores_from_logits(&[0.0; 8]);
        let order: Vec<Emotion> = scores.iter().map(|(e, _)| e).collect();
        assert_eq!(order, Emotion::ALL.to_vec());
    }

    #[test]
    fn test_scores_map_ferplus_indices() {
        // Index 1 is "happiness" in FER+ output order.
        let mut logits = [0.0f32; 8];
        logits[1] = 10.0;
        let scores = scores_from_logits(&logits);
        assert_eq!(scores.strongest(), Some(Emotion::Happy));
        assert!(scores.get(Emotion::Happy).unwrap() > 0.99);
    }

    #[test]
    fn test_scores_sum_to_one() {
        let scores = scores_from_logits(&[0.1, 0.5, -1.0, 2.0, 0.0, 0.3, 0.2, -0.4]);
        let total: f32 = scores.iter().map(|(_, s)| s).sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_face_tensor_shape_and_intensity() {
        let frame = Frame::filled(100, 80, [255, 255, 255], 0);
        let tensor = face_tensor(&frame, &BoundingBox::new(10, 10, 40, 40), 64);
        assert_eq!(tensor.shape(), &[1, 1, 64, 64]);
        assert_relative_eq!(tensor[[0, 0, 32, 32]], 255.0, epsilon = 0.01);
    }

    #[test]
    fn test_face_tensor_samples_inside_box() {
        // Left half black, right half white; a box on the right half must
        // produce an all-white crop.
        let (w, h) = (100u32, 50u32);
        let mut data = Vec::with_capacity((w * h * 3) as usize);
        for _y in 0..h {
            for x in 0..w {
                let v = if x < 50 { 0 } else { 255 };
                data.extend_from_slice(&[v, v, v]);
            }
        }
        let frame = Frame::new(data, w, h, 3, 0);
        let tensor = face_tensor(&frame, &BoundingBox::new(60, 5, 30, 30), 16);
        assert!(tensor.iter().all(|&v| v > 250.0));
    }
}
