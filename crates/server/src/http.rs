//! HTTP surface of the capture controller: camera control, the MJPEG feed,
//! recommendation events over SSE and the cart lookup.

use std::sync::Arc;
use std::time::{Duration, Instant};

use actix_web::{
    http::header,
    web::{self, Bytes},
    HttpResponse,
};
use async_stream::stream;
use serde::{Deserialize, Serialize};
use serde_json::json;

use moodfeed_core::broadcast::broadcast_channel::TryRecvError;
use moodfeed_core::pipeline::capture_controller::{CaptureController, CaptureError};
use moodfeed_core::recommendation::catalog::Catalog;
use moodfeed_core::recommendation::product::Product;
use moodfeed_core::recommendation::selection_context::SelectionContext;
use moodfeed_core::shared::constants::{MULTIPART_BOUNDARY, RECOMMENDATION_EVENT_NAME};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(33);
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);
const SSE_RETRY_MS: u64 = 1000;

/// Shared state backing the handlers.
pub struct AppState {
    pub controller: Arc<CaptureController>,
    pub catalog: Arc<Catalog>,
    pub selection: SelectionContext,
    /// How often streaming responses check their subscription.
    pub poll_interval: Duration,
}

impl AppState {
    pub fn new(
        controller: Arc<CaptureController>,
        catalog: Arc<Catalog>,
        selection: SelectionContext,
    ) -> Self {
        Self {
            controller,
            catalog,
            selection,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/start_camera", web::post().to(start_camera))
        .route("/stop_camera", web::post().to(stop_camera))
        .route("/camera_status", web::get().to(camera_status))
        .route("/video_feed", web::get().to(video_feed))
        .route("/recommendations", web::get().to(recommendations))
        .route("/get_cart_items", web::post().to(get_cart_items));
}

/// Opening a device can block, so it runs on the blocking pool.
async fn start_camera(state: web::Data<AppState>) -> HttpResponse {
    let controller = state.controller.clone();
    match web::block(move || controller.start()).await {
        Ok(Ok(_)) => HttpResponse::Ok().json(json!({ "success": true, "active": true })),
        Ok(Err(CaptureError::DeviceUnavailable(error))) => HttpResponse::ServiceUnavailable()
            .json(json!({ "success": false, "error": error })),
        Ok(Err(err)) => HttpResponse::InternalServerError()
            .json(json!({ "success": false, "error": err.to_string() })),
        Err(err) => HttpResponse::InternalServerError()
            .json(json!({ "success": false, "error": err.to_string() })),
    }
}

async fn stop_camera(state: web::Data<AppState>) -> HttpResponse {
    state.controller.stop();
    HttpResponse::Ok().json(json!({ "success": true }))
}

async fn camera_status(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": state.controller.status() }))
}

/// Multipart JPEG stream of the running session; ends with the session.
async fn video_feed(state: web::Data<AppState>) -> HttpResponse {
    let Some(video) = state.controller.attach_video() else {
        return HttpResponse::ServiceUnavailable()
            .json(json!({ "success": false, "error": "camera is not running" }));
    };
    let poll = state.poll_interval;

    let stream = stream! {
        let mut interval = actix_web::rt::time::interval(poll);
        let mut open = true;
        while open {
            interval.tick().await;
            loop {
                match video.try_recv() {
                    Ok(frame) => {
                        yield Ok::<Bytes, actix_web::Error>(Bytes::from(
                            frame.multipart_part(MULTIPART_BOUNDARY),
                        ));
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        open = false;
                        break;
                    }
                }
            }
        }
    };

    HttpResponse::Ok()
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .insert_header((
            header::CONTENT_TYPE,
            format!("multipart/x-mixed-replace; boundary={MULTIPART_BOUNDARY}"),
        ))
        .streaming(stream)
}

/// Server-Sent Events carrying one recommendation per processed frame.
async fn recommendations(state: web::Data<AppState>) -> HttpResponse {
    let events = state.controller.subscribe_recommendations();
    let poll = state.poll_interval;

    let stream = stream! {
        yield Ok::<Bytes, actix_web::Error>(Bytes::from(format!("retry: {SSE_RETRY_MS}\n\n")));
        let mut interval = actix_web::rt::time::interval(poll);
        let mut last_write = Instant::now();
        let mut open = true;
        while open {
            interval.tick().await;
            loop {
                match events.try_recv() {
                    Ok(event) => {
                        last_write = Instant::now();
                        yield Ok::<Bytes, actix_web::Error>(Bytes::from(
                            sse_event(RECOMMENDATION_EVENT_NAME, &event),
                        ));
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        open = false;
                        break;
                    }
                }
            }
            if open && last_write.elapsed() >= KEEP_ALIVE_INTERVAL {
                last_write = Instant::now();
                yield Ok::<Bytes, actix_web::Error>(Bytes::from_static(b": keep-alive\n\n"));
            }
        }
    };

    HttpResponse::Ok()
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .insert_header((header::CONTENT_TYPE, "text/event-stream"))
        .streaming(stream)
}

#[derive(Deserialize)]
struct CartRequest {
    #[serde(default)]
    selected_products: Vec<u32>,
}

#[derive(Serialize)]
struct CartResponse {
    cart_items: Vec<Product>,
}

/// Replaces the selection the capture loop reads and returns the selected
/// products. Unknown ids are ignored.
async fn get_cart_items(
    state: web::Data<AppState>,
    body: web::Json<CartRequest>,
) -> HttpResponse {
    let ids = body.into_inner().selected_products;
    let cart_items = state.catalog.select(&ids);
    state.selection.replace(ids);
    HttpResponse::Ok().json(CartResponse { cart_items })
}

fn sse_event<T: Serialize>(name: &str, payload: &T) -> String {
    match serde_json::to_string(payload) {
        Ok(data) => format!("event: {name}\ndata: {data}\n\n"),
        Err(err) => format!("event: error\ndata: {err}\n\n"),
    }
}
