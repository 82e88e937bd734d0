use crate::emotion::domain::detection::Detection;
use crate::shared::frame::Frame;

/// Domain interface for facial-expression classification.
///
/// An empty result means "no face found" and is not an error. Errors are
/// reserved for a broken classifier, and end the capture session.
pub trait EmotionClassifier: Send {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, Box<dyn std::error::Error>>;
}
