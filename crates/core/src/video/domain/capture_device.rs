use crate::shared::frame::Frame;

/// An opened acquisition handle that yields frames in capture order.
pub trait FrameSource: Send {
    /// Blocks until the next frame is available.
    fn read_frame(&mut self) -> Result<Frame, Box<dyn std::error::Error>>;

    /// Releases the underlying device. Calling it more than once is harmless.
    fn release(&mut self);
}

/// Something that can be opened into a [`FrameSource`], such as a camera,
/// a capture card or a stream URL.
///
/// Opening is the only fallible step a caller has to handle up front; every
/// later failure surfaces through `read_frame`.
pub trait CaptureDevice: Send + Sync {
    fn open(&self) -> Result<Box<dyn FrameSource>, Box<dyn std::error::Error>>;

    /// Human-readable name used in logs.
    fn describe(&self) -> String;
}
