mod http;

use std::path::PathBuf;
use std::process;
use std::sync::{Arc, Mutex};

use actix_web::{web, App, HttpServer};
use clap::Parser;

use moodfeed_core::annotation::frame_annotator::FrameAnnotator;
use moodfeed_core::broadcast::broadcast_channel::Broadcaster;
use moodfeed_core::emotion::domain::emotion_classifier::EmotionClassifier;
use moodfeed_core::emotion::infrastructure::onnx_emotion_classifier::OnnxEmotionClassifier;
use moodfeed_core::emotion::infrastructure::onnx_face_locator::OnnxFaceLocator;
use moodfeed_core::pipeline::capture_controller::{CaptureController, ControllerConfig};
use moodfeed_core::pipeline::capture_session::PipelineStages;
use moodfeed_core::recommendation::catalog::Catalog;
use moodfeed_core::recommendation::recommendation_mapper::RecommendationMapper;
use moodfeed_core::recommendation::selection_context::SelectionContext;
use moodfeed_core::shared::constants::{
    DEFAULT_EVENT_QUEUE_CAPACITY, DEFAULT_FRAME_QUEUE_CAPACITY, DEFAULT_JPEG_QUALITY,
    EMOTION_MODEL_NAME, EMOTION_MODEL_URL, FACE_MODEL_NAME, FACE_MODEL_URL,
};
use moodfeed_core::shared::model_resolver::ModelResolver;
use moodfeed_core::video::infrastructure::ffmpeg_capture_device::FfmpegCaptureDevice;
use moodfeed_core::video::infrastructure::jpeg_frame_encoder::JpegFrameEncoder;

use crate::http::AppState;

/// Upper bound on graceful HTTP shutdown once a signal arrived.
const SHUTDOWN_TIMEOUT_SECS: u64 = 5;

/// Live camera feed with emotion-driven product recommendations.
#[derive(Parser)]
#[command(name = "moodfeed")]
struct Cli {
    /// Address to bind.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on.
    #[arg(long, env = "PORT", default_value = "5000")]
    port: u16,

    /// Capture device, file or stream URL.
    #[arg(long, default_value = "/dev/video0")]
    device: String,

    /// ffmpeg input device format (v4l2, avfoundation, dshow). Defaults to
    /// v4l2 for /dev/video* paths; otherwise the input is probed.
    #[arg(long)]
    input_format: Option<String>,

    /// Requested capture size, e.g. 640x480.
    #[arg(long)]
    video_size: Option<String>,

    /// Requested capture frame rate.
    #[arg(long)]
    framerate: Option<String>,

    /// JSON catalog file; the built-in catalog is used when omitted.
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Face detection model (downloaded on first use when omitted).
    #[arg(long)]
    face_model: Option<PathBuf>,

    /// FER+ emotion model (downloaded on first use when omitted).
    #[arg(long)]
    emotion_model: Option<PathBuf>,

    /// Directory for downloaded models.
    #[arg(long)]
    model_dir: Option<PathBuf>,

    /// Face detection confidence threshold (0.0-1.0).
    #[arg(long, default_value = "0.5")]
    confidence: f64,

    /// JPEG quality of the video feed (1-100).
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY)]
    jpeg_quality: u8,

    /// Frames buffered per video client before the oldest is dropped.
    #[arg(long, default_value_t = DEFAULT_FRAME_QUEUE_CAPACITY)]
    frame_queue: usize,

    /// Events buffered per recommendation client before the oldest is dropped.
    #[arg(long, default_value_t = DEFAULT_EVENT_QUEUE_CAPACITY)]
    event_queue: usize,

    /// Log capture throughput every N frames.
    #[arg(long)]
    log_every: Option<usize>,
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let catalog = Arc::new(match &cli.catalog {
        Some(path) => Catalog::load(path)?,
        None => Catalog::builtin(),
    });
    let classifier = build_classifier(&cli)?;
    let device = build_device(&cli);
    let selection = SelectionContext::new();

    let stages = PipelineStages {
        classifier: Arc::new(Mutex::new(classifier)),
        mapper: RecommendationMapper::new(catalog.clone()),
        annotator: FrameAnnotator::default(),
        encoder: Arc::new(JpegFrameEncoder::new(cli.jpeg_quality)),
        selection: selection.clone(),
        events: Arc::new(Broadcaster::new(cli.event_queue)),
    };
    let controller = Arc::new(CaptureController::new(
        Arc::new(device),
        stages,
        ControllerConfig {
            frame_queue_capacity: cli.frame_queue,
            log_every_frames: cli.log_every,
        },
    ));
    let state = web::Data::new(AppState::new(controller.clone(), catalog, selection));

    let host = cli.host;
    let port = cli.port;
    log::info!("Listening on http://{host}:{port}");
    let signalled = controller.clone();
    actix_web::rt::System::new().block_on(async move {
        let server =
            HttpServer::new(move || App::new().app_data(state.clone()).configure(http::configure))
                .shutdown_timeout(SHUTDOWN_TIMEOUT_SECS)
                .bind((host.as_str(), port))?
                .run();
        close_streams_on_signal(&signalled);
        server.await
    })?;

    controller.shutdown();
    Ok(())
}

/// Open SSE streams end only once the recommendation broadcaster is closed.
/// actix receives the same signals and drains the remaining connections.
fn close_streams_on_signal(controller: &Arc<CaptureController>) {
    let on_interrupt = controller.clone();
    actix_web::rt::spawn(async move {
        if actix_web::rt::signal::ctrl_c().await.is_ok() {
            log::info!("Interrupted, closing event streams");
            on_interrupt.begin_shutdown();
        }
    });

    #[cfg(unix)]
    {
        use actix_web::rt::signal::unix::{signal, SignalKind};

        let on_terminate = controller.clone();
        actix_web::rt::spawn(async move {
            if let Ok(mut terminate) = signal(SignalKind::terminate()) {
                terminate.recv().await;
                log::info!("Terminated, closing event streams");
                on_terminate.begin_shutdown();
            }
        });
    }
}

fn build_classifier(cli: &Cli) -> Result<Box<dyn EmotionClassifier>, Box<dyn std::error::Error>> {
    let resolver = match &cli.model_dir {
        Some(dir) => ModelResolver::new(dir.clone()),
        None => ModelResolver::with_default_cache()?,
    };
    let face_model = resolver.resolve(FACE_MODEL_NAME, FACE_MODEL_URL, cli.face_model.as_deref())?;
    let emotion_model =
        resolver.resolve(EMOTION_MODEL_NAME, EMOTION_MODEL_URL, cli.emotion_model.as_deref())?;

    let locator = OnnxFaceLocator::new(&face_model, cli.confidence)?;
    Ok(Box::new(OnnxEmotionClassifier::new(locator, &emotion_model)?))
}

fn build_device(cli: &Cli) -> FfmpegCaptureDevice {
    let mut device = FfmpegCaptureDevice::new(&cli.device);
    let format = cli
        .input_format
        .clone()
        .or_else(|| default_input_format(&cli.device).map(str::to_string));
    if let Some(format) = format {
        device = device.with_format(format);
    }
    if let Some(size) = &cli.video_size {
        device = device.with_option("video_size", size);
    }
    if let Some(rate) = &cli.framerate {
        device = device.with_option("framerate", rate);
    }
    device
}

fn default_input_format(device: &str) -> Option<&'static str> {
    device.starts_with("/dev/video").then_some("v4l2")
}
