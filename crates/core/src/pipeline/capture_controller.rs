use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use serde::Serialize;
use thiserror::Error;

use crate::broadcast::broadcast_channel::Subscription;
use crate::pipeline::capture_session::{CaptureSession, PipelineStages, SessionEnd, StopSignal};
use crate::pipeline::session_logger::{NullSessionLogger, SessionLogger, StdoutSessionLogger};
use crate::pipeline::video_transport::{VideoStream, VideoTransport};
use crate::recommendation::recommendation_mapper::RecommendationEvent;
use crate::shared::constants::DEFAULT_FRAME_QUEUE_CAPACITY;
use crate::video::domain::capture_device::CaptureDevice;

const SESSION_THREAD_NAME: &str = "capture-session";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureStatus {
    Idle,
    /// The device is being opened; the slot is reserved for that session.
    Opening,
    Running,
    Stopping,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// A session already exists; nothing was opened.
    AlreadyActive(CaptureStatus),
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("failed to spawn capture thread: {0}")]
    Spawn(#[source] std::io::Error),
}

#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Per-viewer queue depth of the video transport.
    pub frame_queue_capacity: usize,
    /// Log throughput every N frames; `None` keeps sessions quiet.
    pub log_every_frames: Option<usize>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            frame_queue_capacity: DEFAULT_FRAME_QUEUE_CAPACITY,
            log_every_frames: None,
        }
    }
}

struct ControllerState {
    status: CaptureStatus,
    session_id: u64,
    stop: Option<Arc<StopSignal>>,
    transport: Option<Arc<VideoTransport>>,
    handle: Option<JoinHandle<SessionEnd>>,
}

/// Owns the capture device and the Idle / Opening / Running / Stopping state
/// machine.
///
/// At most one session exists at a time. All transitions go through one
/// mutex; the session thread itself performs the final transition back to
/// Idle after the device has been released.
pub struct CaptureController {
    device: Arc<dyn CaptureDevice>,
    stages: PipelineStages,
    config: ControllerConfig,
    state: Arc<Mutex<ControllerState>>,
}

impl CaptureController {
    pub fn new(
        device: Arc<dyn CaptureDevice>,
        stages: PipelineStages,
        config: ControllerConfig,
    ) -> Self {
        Self {
            device,
            stages,
            config,
            state: Arc::new(Mutex::new(ControllerState {
                status: CaptureStatus::Idle,
                session_id: 0,
                stop: None,
                transport: None,
                handle: None,
            })),
        }
    }

    /// Opens the device and starts a session on a background thread.
    ///
    /// Returns as soon as the thread is running. When a session already
    /// exists this is a no-op reported as [`StartOutcome::AlreadyActive`].
    /// The device is opened without holding the state lock, so `status()`
    /// and `stop()` answer immediately while a slow device is opening.
    pub fn start(&self) -> Result<StartOutcome, CaptureError> {
        let (session_id, stop, previous) = {
            let mut state = lock(&self.state);
            if state.status != CaptureStatus::Idle {
                return Ok(StartOutcome::AlreadyActive(state.status));
            }
            state.session_id += 1;
            state.status = CaptureStatus::Opening;
            let stop = Arc::new(StopSignal::new());
            state.stop = Some(stop.clone());
            (state.session_id, stop, state.handle.take())
        };

        // The previous session already set Idle, so its thread is finishing.
        if let Some(previous) = previous {
            let _ = previous.join();
        }

        let source = match self.device.open() {
            Ok(source) => source,
            Err(e) => {
                log::warn!("Could not open {}: {e}", self.device.describe());
                self.abandon(session_id);
                return Err(CaptureError::DeviceUnavailable(e.to_string()));
            }
        };

        let transport = Arc::new(VideoTransport::new(self.config.frame_queue_capacity));
        let session = CaptureSession::new(
            source,
            self.stages.clone(),
            transport.clone(),
            stop.clone(),
            self.session_logger(),
        );

        // Held until the new state is committed, so the session thread cannot
        // report Idle before Running is recorded.
        let mut state = lock(&self.state);
        let shared = self.state.clone();
        let handle = std::thread::Builder::new()
            .name(SESSION_THREAD_NAME.to_string())
            .spawn(move || {
                let end = session.run();
                let mut state = lock(&shared);
                if state.session_id == session_id {
                    state.status = CaptureStatus::Idle;
                    state.stop = None;
                    state.transport = None;
                }
                end
            });
        let handle = match handle {
            Ok(handle) => handle,
            Err(e) => {
                state.status = CaptureStatus::Idle;
                state.stop = None;
                return Err(CaptureError::Spawn(e));
            }
        };

        // A stop that arrived while opening already left the status at
        // Stopping; the session observes it before its first read.
        if state.status == CaptureStatus::Opening {
            state.status = CaptureStatus::Running;
        }
        state.transport = Some(transport);
        state.handle = Some(handle);
        log::info!("Capture session {session_id} started on {}", self.device.describe());
        Ok(StartOutcome::Started)
    }

    fn abandon(&self, session_id: u64) {
        let mut state = lock(&self.state);
        if state.session_id == session_id {
            state.status = CaptureStatus::Idle;
            state.stop = None;
        }
    }

    /// Asks the running (or opening) session to stop and returns
    /// immediately. Idle and Stopping are left as they are.
    pub fn stop(&self) {
        let mut state = lock(&self.state);
        request_stop(&mut state);
    }

    pub fn status(&self) -> CaptureStatus {
        lock(&self.state).status
    }

    /// Video of the running session, starting at its next frame. `None`
    /// unless a session is Running.
    pub fn attach_video(&self) -> Option<VideoStream> {
        let state = lock(&self.state);
        match (state.status, &state.transport) {
            (CaptureStatus::Running, Some(transport)) => Some(transport.attach()),
            _ => None,
        }
    }

    /// Recommendation events of this and all later sessions.
    pub fn subscribe_recommendations(&self) -> Subscription<RecommendationEvent> {
        self.stages.events.subscribe()
    }

    /// Ends every recommendation subscription for good and asks the session
    /// to stop, without waiting. Called when the process starts shutting
    /// down so long-lived event streams finish.
    pub fn begin_shutdown(&self) {
        self.stages.events.close();
        self.stop();
    }

    /// Stops the session, if any, and waits for its thread to exit.
    pub fn shutdown(&self) -> Option<SessionEnd> {
        let handle = {
            let mut state = lock(&self.state);
            request_stop(&mut state);
            state.handle.take()
        };
        let end = handle.and_then(|h| h.join().ok());
        if let Some(end) = &end {
            log::debug!("Capture thread joined ({end})");
        }
        end
    }

    fn session_logger(&self) -> Box<dyn SessionLogger> {
        match self.config.log_every_frames {
            Some(n) => Box::new(StdoutSessionLogger::new(n)),
            None => Box::new(NullSessionLogger),
        }
    }
}

impl Drop for CaptureController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn request_stop(state: &mut ControllerState) {
    if !matches!(state.status, CaptureStatus::Opening | CaptureStatus::Running) {
        return;
    }
    state.status = CaptureStatus::Stopping;
    if let Some(stop) = &state.stop {
        stop.request();
    }
    log::info!("Capture session {} stopping", state.session_id);
}

fn lock(state: &Mutex<ControllerState>) -> MutexGuard<'_, ControllerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::time::{Duration, Instant};

    use crate::annotation::frame_annotator::FrameAnnotator;
    use crate::broadcast::broadcast_channel::{Broadcaster, TryRecvError};
    use crate::emotion::domain::detection::Detection;
    use crate::emotion::domain::emotion::{Emotion, EmotionScores};
    use crate::emotion::domain::emotion_classifier::EmotionClassifier;
    use crate::recommendation::catalog::Catalog;
    use crate::recommendation::recommendation_mapper::RecommendationMapper;
    use crate::recommendation::selection_context::SelectionContext;
    use crate::shared::bounding_box::BoundingBox;
    use crate::shared::frame::Frame;
    use crate::video::domain::capture_device::FrameSource;
    use crate::video::infrastructure::jpeg_frame_encoder::JpegFrameEncoder;

    const WAIT: Duration = Duration::from_secs(5);

    #[derive(Default)]
    struct DeviceCounters {
        opens: AtomicUsize,
        releases: AtomicUsize,
        unavailable: AtomicBool,
        /// Reads fail after this many frames when non-zero.
        fail_after: AtomicUsize,
        open_delay_ms: AtomicU64,
    }

    struct StubDevice(Arc<DeviceCounters>);

    impl CaptureDevice for StubDevice {
        fn open(&self) -> Result<Box<dyn FrameSource>, Box<dyn std::error::Error>> {
            std::thread::sleep(Duration::from_millis(
                self.0.open_delay_ms.load(Ordering::SeqCst),
            ));
            if self.0.unavailable.load(Ordering::SeqCst) {
                return Err("no camera".into());
            }
            self.0.opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(StubSource {
                counters: self.0.clone(),
                read: 0,
            }))
        }

        fn describe(&self) -> String {
            "stub".to_string()
        }
    }

    struct StubSource {
        counters: Arc<DeviceCounters>,
        read: usize,
    }

    impl FrameSource for StubSource {
        fn read_frame(&mut self) -> Result<Frame, Box<dyn std::error::Error>> {
            let limit = self.counters.fail_after.load(Ordering::SeqCst);
            if limit != 0 && self.read >= limit {
                return Err("read failed".into());
            }
            std::thread::sleep(Duration::from_millis(2));
            self.read += 1;
            Ok(Frame::filled(32, 32, [0, 0, 0], self.read - 1))
        }

        fn release(&mut self) {
            self.counters.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct StubClassifier {
        fail: bool,
    }

    impl EmotionClassifier for StubClassifier {
        fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>, Box<dyn std::error::Error>> {
            if self.fail {
                return Err("inference failed".into());
            }
            Ok(vec![Detection::new(
                BoundingBox::new(4, 4, 16, 16),
                EmotionScores::from_iter([(Emotion::Happy, 0.9), (Emotion::Neutral, 0.1)]),
            )])
        }
    }

    fn controller_with(counters: &Arc<DeviceCounters>, failing_classifier: bool) -> CaptureController {
        let classifier: Box<dyn EmotionClassifier> = Box::new(StubClassifier {
            fail: failing_classifier,
        });
        let stages = PipelineStages {
            classifier: Arc::new(Mutex::new(classifier)),
            mapper: RecommendationMapper::new(Arc::new(Catalog::builtin())),
            annotator: FrameAnnotator::default(),
            encoder: Arc::new(JpegFrameEncoder::default()),
            selection: SelectionContext::new(),
            events: Arc::new(Broadcaster::new(64)),
        };
        CaptureController::new(
            Arc::new(StubDevice(counters.clone())),
            stages,
            ControllerConfig::default(),
        )
    }

    fn controller(counters: &Arc<DeviceCounters>) -> CaptureController {
        controller_with(counters, false)
    }

    fn wait_for_idle(controller: &CaptureController) {
        let deadline = Instant::now() + WAIT;
        while controller.status() != CaptureStatus::Idle {
            assert!(Instant::now() < deadline, "session did not end");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_start_is_idempotent() {
        let counters = Arc::new(DeviceCounters::default());
        let controller = controller(&counters);

        assert_eq!(controller.start().unwrap(), StartOutcome::Started);
        assert_eq!(
            controller.start().unwrap(),
            StartOutcome::AlreadyActive(CaptureStatus::Running)
        );
        assert_eq!(counters.opens.load(Ordering::SeqCst), 1);

        controller.shutdown();
        assert_eq!(counters.releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_while_idle_is_noop() {
        let counters = Arc::new(DeviceCounters::default());
        let controller = controller(&counters);
        controller.stop();
        controller.stop();
        assert_eq!(controller.status(), CaptureStatus::Idle);
        assert_eq!(counters.releases.load(Ordering::SeqCst), 0);
        assert!(controller.shutdown().is_none());
    }

    #[test]
    fn test_device_unavailable_stays_idle() {
        let counters = Arc::new(DeviceCounters::default());
        counters.unavailable.store(true, Ordering::SeqCst);
        let controller = controller(&counters);
        let video_before = controller.attach_video();

        let err = controller.start().unwrap_err();

        assert!(matches!(err, CaptureError::DeviceUnavailable(ref msg) if msg == "no camera"));
        assert_eq!(controller.status(), CaptureStatus::Idle);
        assert!(video_before.is_none());
        assert!(controller.attach_video().is_none());
    }

    #[test]
    fn test_concurrent_starts_open_device_once() {
        let counters = Arc::new(DeviceCounters::default());
        let controller = Arc::new(controller(&counters));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let controller = controller.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    controller.start().unwrap()
                })
            })
            .collect();
        let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let started = outcomes
            .iter()
            .filter(|o| **o == StartOutcome::Started)
            .count();
        assert_eq!(started, 1);
        assert_eq!(counters.opens.load(Ordering::SeqCst), 1);
        controller.shutdown();
    }

    fn wait_for_status(controller: &CaptureController, status: CaptureStatus) {
        let deadline = Instant::now() + WAIT;
        while controller.status() != status {
            assert!(Instant::now() < deadline, "never reached {status:?}");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_slow_open_does_not_block_status_or_stop() {
        let counters = Arc::new(DeviceCounters::default());
        counters.open_delay_ms.store(400, Ordering::SeqCst);
        let controller = Arc::new(controller(&counters));

        let starter = {
            let controller = controller.clone();
            std::thread::spawn(move || controller.start().unwrap())
        };
        wait_for_status(&controller, CaptureStatus::Opening);

        let before = Instant::now();
        assert_eq!(controller.status(), CaptureStatus::Opening);
        assert!(controller.attach_video().is_none());
        controller.stop();
        assert!(before.elapsed() < Duration::from_millis(100));
        assert_eq!(controller.status(), CaptureStatus::Stopping);

        assert_eq!(starter.join().unwrap(), StartOutcome::Started);
        wait_for_idle(&controller);
        assert_eq!(counters.opens.load(Ordering::SeqCst), 1);
        assert_eq!(counters.releases.load(Ordering::SeqCst), 1);
        assert_eq!(controller.shutdown(), Some(SessionEnd::Stopped));
    }

    #[test]
    fn test_start_while_opening_reports_already_active() {
        let counters = Arc::new(DeviceCounters::default());
        counters.open_delay_ms.store(200, Ordering::SeqCst);
        let controller = Arc::new(controller(&counters));

        let starter = {
            let controller = controller.clone();
            std::thread::spawn(move || controller.start().unwrap())
        };
        wait_for_status(&controller, CaptureStatus::Opening);

        assert_eq!(
            controller.start().unwrap(),
            StartOutcome::AlreadyActive(CaptureStatus::Opening)
        );
        assert_eq!(starter.join().unwrap(), StartOutcome::Started);
        assert_eq!(controller.status(), CaptureStatus::Running);
        controller.shutdown();
        assert_eq!(counters.opens.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_slow_open_after_stop_returns_to_idle() {
        let counters = Arc::new(DeviceCounters::default());
        counters.open_delay_ms.store(200, Ordering::SeqCst);
        counters.unavailable.store(true, Ordering::SeqCst);
        let controller = Arc::new(controller(&counters));

        let starter = {
            let controller = controller.clone();
            std::thread::spawn(move || controller.start())
        };
        wait_for_status(&controller, CaptureStatus::Opening);
        controller.stop();

        assert!(matches!(
            starter.join().unwrap(),
            Err(CaptureError::DeviceUnavailable(_))
        ));
        assert_eq!(controller.status(), CaptureStatus::Idle);
        assert_eq!(counters.releases.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_happy_session_streams_frames_and_events() {
        let counters = Arc::new(DeviceCounters::default());
        let controller = controller(&counters);
        let events = controller.subscribe_recommendations();

        controller.start().unwrap();
        let video = controller.attach_video().expect("session is running");

        let frame = video.recv_timeout(WAIT).unwrap();
        assert_eq!(frame.content_type, "image/jpeg");
        let event = events.recv_timeout(WAIT).unwrap();
        assert_eq!(event.emotion, Emotion::Happy);
        assert_eq!(
            event.recommendations.iter().map(|p| p.id).collect::<Vec<_>>(),
            vec![1, 2]
        );

        controller.shutdown();
    }

    #[test]
    fn test_stop_ends_video_and_silences_events() {
        let counters = Arc::new(DeviceCounters::default());
        let controller = controller(&counters);
        let events = controller.subscribe_recommendations();
        controller.start().unwrap();
        let video = controller.attach_video().unwrap();
        events.recv_timeout(WAIT).unwrap();

        controller.stop();
        assert_ne!(controller.status(), CaptureStatus::Running);
        while events.try_recv().is_ok() {}

        // The video stream drains and terminates once the loop exits.
        let deadline = Instant::now() + WAIT;
        loop {
            match video.recv_timeout(WAIT) {
                Ok(_) => assert!(Instant::now() < deadline),
                Err(_) => break,
            }
        }
        wait_for_idle(&controller);
        assert_eq!(events.try_recv(), Err(TryRecvError::Empty));
        assert_eq!(counters.releases.load(Ordering::SeqCst), 1);
        assert!(controller.attach_video().is_none());
    }

    #[test]
    fn test_read_failure_releases_and_returns_to_idle() {
        let counters = Arc::new(DeviceCounters::default());
        counters.fail_after.store(3, Ordering::SeqCst);
        let controller = controller(&counters);

        controller.start().unwrap();
        wait_for_idle(&controller);

        assert_eq!(counters.releases.load(Ordering::SeqCst), 1);
        assert!(matches!(
            controller.shutdown(),
            Some(SessionEnd::FrameReadFailure(_))
        ));
    }

    #[test]
    fn test_classifier_failure_releases_and_returns_to_idle() {
        let counters = Arc::new(DeviceCounters::default());
        let controller = controller_with(&counters, true);

        controller.start().unwrap();
        wait_for_idle(&controller);

        assert_eq!(counters.releases.load(Ordering::SeqCst), 1);
        assert!(matches!(
            controller.shutdown(),
            Some(SessionEnd::ClassifierFailure(_))
        ));
    }

    #[test]
    fn test_restart_after_stop_opens_new_session() {
        let counters = Arc::new(DeviceCounters::default());
        let controller = controller(&counters);

        controller.start().unwrap();
        controller.stop();
        wait_for_idle(&controller);
        assert_eq!(controller.start().unwrap(), StartOutcome::Started);

        assert_eq!(counters.opens.load(Ordering::SeqCst), 2);
        assert_eq!(controller.shutdown(), Some(SessionEnd::Stopped));
        assert_eq!(counters.releases.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_begin_shutdown_ends_event_subscriptions() {
        let counters = Arc::new(DeviceCounters::default());
        let controller = controller(&counters);
        let events = controller.subscribe_recommendations();
        controller.start().unwrap();
        events.recv_timeout(WAIT).unwrap();

        controller.begin_shutdown();

        assert_ne!(controller.status(), CaptureStatus::Running);
        let deadline = Instant::now() + WAIT;
        while events.recv_timeout(WAIT).is_ok() {
            assert!(Instant::now() < deadline, "event stream did not end");
        }
        assert!(controller.subscribe_recommendations().recv_timeout(WAIT).is_err());
        assert_eq!(controller.shutdown(), Some(SessionEnd::Stopped));
        assert_eq!(counters.releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_joins_session() {
        let counters = Arc::new(DeviceCounters::default());
        {
            let controller = controller(&counters);
            controller.start().unwrap();
        }
        assert_eq!(counters.releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&CaptureStatus::Stopping).unwrap(),
            "\"stopping\""
        );
        assert_eq!(
            serde_json::to_string(&CaptureStatus::Opening).unwrap(),
            "\"opening\""
        );
    }
}
