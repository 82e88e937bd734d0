use crate::emotion::domain::emotion::{Emotion, EmotionScores};
use crate::shared::bounding_box::BoundingBox;

/// One face found in a frame, with its expression scores.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub scores: EmotionScores,
}

impl Detection {
    pub fn new(bbox: BoundingBox, scores: EmotionScores) -> Self {
        Self { bbox, scores }
    }

    /// This face's own strongest emotion, used for its on-frame label.
    pub fn strongest_emotion(&self) -> Option<Emotion> {
        self.scores.strongest()
    }
}
