use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use crate::annotation::frame_annotator::FrameAnnotator;
use crate::broadcast::broadcast_channel::Broadcaster;
use crate::emotion::domain::dominant_emotion::dominant_emotion;
use crate::emotion::domain::emotion_classifier::EmotionClassifier;
use crate::pipeline::session_logger::SessionLogger;
use crate::pipeline::video_transport::{EncodedFrame, VideoTransport};
use crate::recommendation::recommendation_mapper::{RecommendationEvent, RecommendationMapper};
use crate::recommendation::selection_context::SelectionContext;
use crate::video::domain::capture_device::FrameSource;
use crate::video::domain::frame_encoder::FrameEncoder;

/// Why a capture session left the Running state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEnd {
    Stopped,
    FrameReadFailure(String),
    ClassifierFailure(String),
    EncodeFailure(String),
}

impl SessionEnd {
    pub fn is_failure(&self) -> bool {
        !matches!(self, SessionEnd::Stopped)
    }
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEnd::Stopped => write!(f, "stopped"),
            SessionEnd::FrameReadFailure(e) => write!(f, "frame read failed: {e}"),
            SessionEnd::ClassifierFailure(e) => write!(f, "classifier failed: {e}"),
            SessionEnd::EncodeFailure(e) => write!(f, "encoding failed: {e}"),
        }
    }
}

/// Cooperative stop request shared between the controller and one session.
///
/// Requesting a stop and publishing an event take the same lock, so once
/// [`StopSignal::request`] returns no further event from this session can
/// reach subscribers.
#[derive(Default)]
pub struct StopSignal {
    requested: AtomicBool,
    gate: Mutex<()>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Runs `publish` unless a stop was requested. Returns whether it ran.
    pub fn publish_unless_stopped(&self, publish: impl FnOnce()) -> bool {
        let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_requested() {
            return false;
        }
        publish();
        true
    }
}

/// Everything a session needs besides the device, shared by all sessions
/// of one controller.
#[derive(Clone)]
pub struct PipelineStages {
    pub classifier: Arc<Mutex<Box<dyn EmotionClassifier>>>,
    pub mapper: RecommendationMapper,
    pub annotator: FrameAnnotator,
    pub encoder: Arc<dyn FrameEncoder>,
    pub selection: SelectionContext,
    pub events: Arc<Broadcaster<RecommendationEvent>>,
}

/// One run of the capture loop, from an opened device to its release.
pub struct CaptureSession {
    source: Box<dyn FrameSource>,
    stages: PipelineStages,
    transport: Arc<VideoTransport>,
    stop: Arc<StopSignal>,
    logger: Box<dyn SessionLogger>,
}

impl CaptureSession {
    pub fn new(
        source: Box<dyn FrameSource>,
        stages: PipelineStages,
        transport: Arc<VideoTransport>,
        stop: Arc<StopSignal>,
        logger: Box<dyn SessionLogger>,
    ) -> Self {
        Self {
            source,
            stages,
            transport,
            stop,
            logger,
        }
    }

    /// Loops until stopped or a stage fails, then releases the device and
    /// closes the transport.
    pub fn run(mut self) -> SessionEnd {
        let end = loop {
            if self.stop.is_requested() {
                break SessionEnd::Stopped;
            }
            if let Err(end) = self.step() {
                break end;
            }
        };

        self.source.release();
        self.transport.close();

        if end.is_failure() {
            log::warn!("Capture session ended: {end}");
        } else {
            self.logger.info("Capture session stopped");
        }
        self.logger.summary();
        end
    }

    fn step(&mut self) -> Result<(), SessionEnd> {
        let t0 = Instant::now();
        let frame = self
            .source
            .read_frame()
            .map_err(|e| SessionEnd::FrameReadFailure(e.to_string()))?;
        let t1 = Instant::now();
        self.logger.timing("read", ms(t0, t1));

        let selection = self.stages.selection.snapshot();
        let detections = {
            let mut classifier = self.stages.classifier.lock().map_err(|_| {
                SessionEnd::ClassifierFailure("classifier lock poisoned".to_string())
            })?;
            classifier
                .detect(&frame)
                .map_err(|e| SessionEnd::ClassifierFailure(e.to_string()))?
        };
        let t2 = Instant::now();
        self.logger.timing("classify", ms(t1, t2));
        self.logger.metric("faces", detections.len() as f64);

        let emotion = dominant_emotion(&detections);
        let event = self.stages.mapper.map(emotion, &selection);
        let events = &self.stages.events;
        let mut delivered = 0;
        if !self.stop.publish_unless_stopped(|| delivered = events.publish(event)) {
            return Ok(());
        }
        self.logger.metric("event_subscribers", delivered as f64);

        let annotated = self.stages.annotator.annotate(&frame, &detections);
        let t3 = Instant::now();
        self.logger.timing("annotate", ms(t2, t3));

        let bytes = self
            .stages
            .encoder
            .encode(&annotated)
            .map_err(|e| SessionEnd::EncodeFailure(e.to_string()))?;
        let t4 = Instant::now();
        self.logger.timing("encode", ms(t3, t4));

        self.transport.emit(EncodedFrame {
            sequence: frame.index() as u64,
            content_type: self.stages.encoder.content_type(),
            bytes: bytes.into(),
        });
        self.logger.frame(frame.index());
        Ok(())
    }
}

fn ms(from: Instant, to: Instant) -> f64 {
    to.duration_since(from).as_secs_f64() * 1000.0
}
