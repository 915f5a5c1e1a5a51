use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::bbox::BoundingBox;
use crate::config::ServeConfig;
use crate::device::Device;
use crate::errors::{LeafSamError, Result};
use crate::imageops::mask::coverage;
use crate::oracle::OracleHandle;
use crate::render;

const INDEX_HTML: &str = include_str!("../static/index.html");
const COORDINATE_FIELDS: [&str; 4] = ["x1", "y1", "x2", "y2"];

#[derive(Clone)]
pub struct AppState {
    pub oracle: OracleHandle,
    pub validate_boxes: bool,
}

impl AppState {
    pub const fn new(oracle: OracleHandle) -> Self {
        Self {
            oracle,
            validate_boxes: true,
        }
    }

    pub const fn with_box_validation(mut self, enabled: bool) -> Self {
        self.validate_boxes = enabled;
        self
    }
}

/// Successful `/predict` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictResponse {
    /// Base64 PNG composite of the source image, mask overlay and box outline.
    pub image: String,
    pub gpu: bool,
    pub device: Device,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub gpu: bool,
    pub device: Device,
}

/// One decoded `/predict` call.
pub struct InferenceRequest {
    pub image: RgbImage,
    pub prompt: BoundingBox,
}

impl IntoResponse for LeafSamError {
    fn into_response(self) -> Response {
        let status = if self.is_client_error() {
            tracing::warn!(error = %self, "rejected request");
            StatusCode::BAD_REQUEST
        } else {
            tracing::error!(error = %self, "request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        };
        let body = ErrorResponse {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/predict", post(predict))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Binds the configured address and serves until Ctrl-C.
pub async fn serve(config: &ServeConfig, oracle: OracleHandle) -> Result<()> {
    let addr = config.socket_addr();
    let state = AppState::new(oracle).with_box_validation(!config.allow_malformed_boxes);
    let app = router(state, config.max_upload_bytes());

    let listener =
        tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| LeafSamError::Network {
                operation: format!("bind {addr}"),
                source: e,
            })?;
    tracing::info!(%addr, "segmentation server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| LeafSamError::Network {
            operation: "serve".to_string(),
            source: e,
        })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let device = state.oracle.device();
    Json(HealthResponse {
        status: "ok".to_string(),
        gpu: device.is_accelerated(),
        device,
    })
}

async fn predict(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<PredictResponse>> {
    // multipart でないフォームには file が入り得ない
    let multipart = multipart.map_err(|rejection| {
        tracing::debug!(%rejection, "request body is not multipart");
        LeafSamError::MissingUpload
    })?;
    let request = read_request(multipart, state.validate_boxes).await?;
    let device = state.oracle.device();
    tracing::info!(
        x1 = request.prompt.x1,
        y1 = request.prompt.y1,
        x2 = request.prompt.x2,
        y2 = request.prompt.y2,
        width = request.image.width(),
        height = request.image.height(),
        %device,
        "running box prompt"
    );

    let oracle = state.oracle.clone();
    let image = tokio::task::spawn_blocking(move || run_inference(&oracle, &request))
        .await
        .map_err(|e| LeafSamError::model("inference task", e))??;

    Ok(Json(PredictResponse {
        image,
        gpu: device.is_accelerated(),
        device,
    }))
}

/// Segments, composes and encodes one request. Runs on the blocking pool.
pub fn run_inference(oracle: &OracleHandle, request: &InferenceRequest) -> Result<String> {
    let mask = oracle.segment(&request.image, &request.prompt)?;
    tracing::debug!(masked_pixels = coverage(&mask), "mask predicted");
    let composite = render::compose(&request.image, &mask, &request.prompt)?;
    render::encode_png_base64(&composite)
}

async fn read_request(mut multipart: Multipart, validate_boxes: bool) -> Result<InferenceRequest> {
    let mut upload = None;
    let mut coordinates: [Option<String>; 4] = Default::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| LeafSamError::validation("multipart", e.body_text()))?
    {
        let Some(name) = field.name().map(str::to_owned) else {
            continue;
        };
        if name == "file" {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| LeafSamError::validation("file", e.body_text()))?;
            upload = Some(bytes);
        } else if let Some(slot) = COORDINATE_FIELDS.iter().position(|f| *f == name) {
            let text = field
                .text()
                .await
                .map_err(|e| LeafSamError::validation(name.as_str(), e.body_text()))?;
            coordinates[slot] = Some(text);
        }
    }

    let upload = upload.ok_or(LeafSamError::MissingUpload)?;
    let prompt = parse_box(&coordinates, validate_boxes)?;
    let image = image::load_from_memory(&upload)
        .map_err(|source| LeafSamError::UnreadableImage { source })?
        .into_rgb8();

    Ok(InferenceRequest { image, prompt })
}

/// Parses the four coordinate fields. With validation off, missing or
/// unparsable values become NaN and the box is forwarded as is.
fn parse_box(coordinates: &[Option<String>; 4], validate: bool) -> Result<BoundingBox> {
    let mut values = [f32::NAN; 4];
    for ((value, raw), field) in values.iter_mut().zip(coordinates).zip(COORDINATE_FIELDS) {
        match raw.as_deref().map(str::trim).map(str::parse::<f32>) {
            Some(Ok(parsed)) => *value = parsed,
            Some(Err(_)) if validate => {
                return Err(LeafSamError::validation(field, "is not a number"));
            }
            None if validate => {
                return Err(LeafSamError::validation(field, "is missing"));
            }
            _ => {}
        }
    }

    let prompt = BoundingBox::from(values);
    if validate {
        prompt.validate()?;
    }
    Ok(prompt)
}
