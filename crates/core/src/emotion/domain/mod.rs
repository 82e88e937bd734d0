pub mod detection;
pub mod dominant_emotion;
pub mod emotion;
pub mod emotion_classifier;
