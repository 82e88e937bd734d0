use crate::emotion::domain::detection::Detection;
use crate::emotion::domain::emotion::Emotion;

/// Result when no face is visible.
pub const DEFAULT_EMOTION: Emotion = Emotion::Neutral;

/// Dominant emotion of a frame.
///
/// Only the first detection (the primary subject) is considered. Its
/// highest-scoring label wins, ties going to the first maximum in score
/// order. No detections, or a detection without scores, yields
/// [`DEFAULT_EMOTION`].
pub fn dominant_emotion(detections: &[Detection]) -> Emotion {
    detections
        .first()
        .and_then(Detection::strongest_emotion)
        .unwrap_or(DEFAULT_EMOTION)
}
