pub mod capture_controller;
pub mod capture_session;
pub mod session_logger;
pub mod video_transport;
