pub mod ffmpeg_capture_device;
pub mod jpeg_frame_encoder;
