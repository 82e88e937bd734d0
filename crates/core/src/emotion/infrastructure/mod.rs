pub mod math;
pub mod onnx_emotion_classifier;
pub mod onnx_face_locator;
pub mod onnx_session;
