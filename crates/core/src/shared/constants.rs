pub const FACE_MODEL_NAME: &str = "yolo11n-pose_widerface.onnx";
pub const FACE_MODEL_URL: &str =
    "https://github.com/neutrinographics/faceguard/releases/download/v0.1.0/yolo11n-pose_widerface.onnx";

pub const EMOTION_MODEL_NAME: &str = "emotion-ferplus-8.onnx";
pub const EMOTION_MODEL_URL: &str =
    "https://github.com/onnx/models/raw/main/validated/vision/body_analysis/emotion_ferplus/model/emotion-ferplus-8.onnx";

/// Event name clients listen on for recommendation updates.
pub const RECOMMENDATION_EVENT_NAME: &str = "update_recommendations";

/// Part boundary of the `multipart/x-mixed-replace` video feed.
pub const MULTIPART_BOUNDARY: &str = "frame";

pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Per-subscriber queue depth; a slow video client sees the newest frame
/// rather than a backlog.
pub const DEFAULT_FRAME_QUEUE_CAPACITY: usize = 2;
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 4;
