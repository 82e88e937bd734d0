use crate::shared::frame::Frame;

/// Compresses a frame for transport.
pub trait FrameEncoder: Send + Sync {
    fn encode(&self, frame: &Frame) -> Result<Vec<u8>, Box<dyn std::error::Error>>;

    /// MIME type of the bytes `encode` returns.
    fn content_type(&self) -> &'static str;
}
