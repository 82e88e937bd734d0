use std::sync::Arc;

use crate::broadcast::broadcast_channel::{Broadcaster, Subscription};

/// One encoded frame as handed to video consumers.
#[derive(Clone, Debug)]
pub struct EncodedFrame {
    pub sequence: u64,
    pub content_type: &'static str,
    pub bytes: Arc<[u8]>,
}

impl EncodedFrame {
    /// `--{boundary}\r\nContent-Type: ...\r\n\r\n<bytes>\r\n`
    pub fn multipart_part(&self, boundary: &str) -> Vec<u8> {
        let header = format!(
            "--{boundary}\r\nContent-Type: {}\r\n\r\n",
            self.content_type
        );
        let mut part = Vec::with_capacity(header.len() + self.bytes.len() + 2);
        part.extend_from_slice(header.as_bytes());
        part.extend_from_slice(&self.bytes);
        part.extend_from_slice(b"\r\n");
        part
    }
}

/// Encoded frames of a single capture session.
///
/// Consumers attaching mid-stream start at the next emitted frame. Closing
/// the transport ends every attached stream, so a consumer's sequence is
/// finite and bounded by the session.
pub struct VideoTransport {
    frames: Broadcaster<EncodedFrame>,
}

pub type VideoStream = Subscription<EncodedFrame>;

impl VideoTransport {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: Broadcaster::new(capacity),
        }
    }

    pub fn attach(&self) -> VideoStream {
        self.frames.subscribe()
    }

    pub fn emit(&self, frame: EncodedFrame) -> usize {
        self.frames.publish(frame)
    }

    pub fn close(&self) {
        self.frames.close();
    }

    pub fn is_closed(&self) -> bool {
        self.frames.is_closed()
    }

    #[cfg(test)]
    fn viewers(&self) -> usize {
        self.frames.subscriber_count()
    }
}
