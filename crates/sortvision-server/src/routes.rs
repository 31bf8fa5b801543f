//! HTTP routes and handlers

use axum::{
    body::Bytes,
    extract::{
        multipart::{MultipartError, MultipartRejection},
        DefaultBodyLimit, Multipart, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    let body_limit = state.config.max_upload_bytes;

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .route("/labels", get(labels))
        .route("/predict", post(predict))
        .fallback(fallback)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

async fn metrics(State(state): State<AppState>) -> String {
    state.metrics_handle.render()
}

async fn labels(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.classifier.labels().as_slice().to_vec())
}

/// Successful `/predict` response
#[derive(Debug, Serialize, Deserialize)]
struct PredictResponse {
    label: String,
    confidence: f64,
}

/// Classify one uploaded image
async fn predict(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PredictResponse>, AppError> {
    let request_id = Uuid::new_v4();

    async move {
        metrics::counter!("sortvision_requests_total").increment(1);

        let mut multipart = multipart.map_err(|e| AppError::InvalidMultipart(e.body_text()))?;
        let upload = read_upload(&mut multipart, &state.config.upload_field).await?;
        debug!("Received upload of {} bytes", upload.len());

        let classifier = state.classifier.clone();
        let prediction = tokio::task::spawn_blocking(move || {
            let image = decode_image(&upload)?;
            classifier.classify(&image)
        })
        .await
        .map_err(|e| AppError::Inference(format!("inference task failed: {}", e)))??;

        metrics::counter!("sortvision_predictions_total", "label" => prediction.label.clone()).increment(1);
        metrics::histogram!("sortvision_inference_latency_us").record(prediction.latency_us as f64);

        info!(
            label = %prediction.label,
            confidence = prediction.confidence,
            uncertain = prediction.uncertain,
            latency_us = prediction.latency_us,
            "Prediction complete"
        );

        Ok(Json(PredictResponse {
            label: state.config.render_label(prediction.display_label()),
            confidence: round_confidence(prediction.confidence),
        }))
    }
    .instrument(info_span!("predict", %request_id))
    .await
}

/// Bytes of the first non-empty field named `field_name`
async fn read_upload(multipart: &mut Multipart, field_name: &str) -> Result<Bytes, AppError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(field_name) {
            continue;
        }

        let bytes = field.bytes().await?;
        if bytes.is_empty() {
            return Err(AppError::MissingUpload(format!("field '{}' is empty", field_name)));
        }
        return Ok(bytes);
    }

    Err(AppError::MissingUpload(format!(
        "multipart field '{}' not found",
        field_name
    )))
}

/// Decode any supported format and drop alpha/palette to plain RGB
fn decode_image(bytes: &[u8]) -> sortvision_core::Result<DynamicImage> {
    let image = image::load_from_memory(bytes)
        .map_err(|e| sortvision_core::Error::image(format!("could not decode image: {}", e)))?;
    Ok(DynamicImage::ImageRgb8(image.to_rgb8()))
}

/// Four decimals, exact ties to even
fn round_confidence(confidence: f32) -> f64 {
    (confidence as f64 * 10_000.0).round_ties_even() / 10_000.0
}

async fn fallback() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not found")
}

/// Error handling
#[derive(Debug)]
enum AppError {
    MissingUpload(String),
    InvalidMultipart(String),
    InvalidImage(String),
    PayloadTooLarge(String),
    ImageTooSmall(String),
    Inference(String),
}

impl AppError {
    fn kind(&self) -> &'static str {
        match self {
            AppError::MissingUpload(_) => "missing_upload",
            AppError::InvalidMultipart(_) => "invalid_multipart",
            AppError::InvalidImage(_) => "invalid_image",
            AppError::PayloadTooLarge(_) => "payload_too_large",
            AppError::ImageTooSmall(_) => "image_too_small",
            AppError::Inference(_) => "inference_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::MissingUpload(_) | AppError::InvalidMultipart(_) | AppError::InvalidImage(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::ImageTooSmall(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Inference(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::PayloadTooLarge(err.body_text())
        } else {
            AppError::InvalidMultipart(err.body_text())
        }
    }
}

impl From<sortvision_core::Error> for AppError {
    fn from(err: sortvision_core::Error) -> Self {
        match err {
            sortvision_core::Error::Image(msg) => AppError::InvalidImage(msg),
            e @ sortvision_core::Error::ImageTooSmall { .. } => AppError::ImageTooSmall(e.to_string()),
            e => AppError::Inference(e.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let kind = self.kind();

        let message = match self {
            AppError::MissingUpload(msg)
            | AppError::InvalidMultipart(msg)
            | AppError::InvalidImage(msg)
            | AppError::PayloadTooLarge(msg)
            | AppError::ImageTooSmall(msg)
            | AppError::Inference(msg) => msg,
        };

        if status.is_server_error() {
            error!("Request failed ({}): {}", kind, message);
        } else {
            warn!("Request rejected ({}): {}", kind, message);
        }
        metrics::counter!("sortvision_errors_total", "type" => kind).increment(1);

        let body = json!({
            "error": {
                "message": message,
                "type": kind,
            }
        });

        (status, Json(body)).into_response()
    }
}
