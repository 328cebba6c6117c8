//! HTTP routes of the enrollment service.

use crate::capture::{CaptureController, StartOutcome};
use crate::engine::{EngineError, EngineHandle};
use crate::preview;
use crate::store::{CreateOutcome, NewProfile, ProfileStore, StoreError};
use crate::trainer::{TrainError, Trainer};
use axum::body::Body;
use axum::extract::{Form, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use faceroll_core::dataset::DatasetError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

const INDEX_HTML: &str = include_str!("../assets/index.html");

pub struct AppState {
    pub store: ProfileStore,
    pub capture: CaptureController,
    pub trainer: Trainer,
    pub engine: EngineHandle,
    pub jpeg_quality: u8,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/video_feed", get(video_feed))
        .route("/user", post(create_user))
        .route("/start_capture", post(start_capture))
        .route("/stop_capture", post(stop_capture))
        .route("/train", post(train))
        .route("/stop", get(stop))
        .with_state(state)
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("User not found")]
    UnknownUser,
    #[error("Already capturing images for another user")]
    CaptureBusy,
    #[error("Training already in progress")]
    TrainingBusy,
    #[error("profile store: {0}")]
    Store(#[from] StoreError),
    #[error("dataset: {0}")]
    Dataset(#[from] DatasetError),
    #[error("training failed: {0}")]
    Training(#[source] TrainError),
    #[error("camera: {0}")]
    Engine(#[from] EngineError),
}

impl From<TrainError> for ApiError {
    fn from(e: TrainError) -> Self {
        match e {
            TrainError::Busy => ApiError::TrainingBusy,
            other => ApiError::Training(other),
        }
    }
}

#[derive(Serialize)]
struct Message {
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::UnknownUser => StatusCode::NOT_FOUND,
            ApiError::CaptureBusy | ApiError::TrainingBusy => StatusCode::CONFLICT,
            ApiError::Store(_)
            | ApiError::Dataset(_)
            | ApiError::Training(_)
            | ApiError::Engine(_) => {
                tracing::error!(error = %self, "request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(Message { message: self.to_string() })).into_response()
    }
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn video_feed(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stream = preview::mjpeg_stream(state.engine.clone(), state.jpeg_quality);
    ([(header::CONTENT_TYPE, preview::CONTENT_TYPE)], Body::from_stream(stream))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UserResponse {
    message: &'static str,
    user_id: String,
}

async fn create_user(
    State(state): State<Arc<AppState>>,
    Form(fields): Form<NewProfile>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    let (outcome, profile) = state.store.create_or_get(fields).await?;
    state.capture.prepare(&profile.subject())?;

    let (status, message) = match outcome {
        CreateOutcome::Created => (StatusCode::CREATED, "User created"),
        CreateOutcome::Existing => (StatusCode::OK, "User already exists"),
    };
    Ok((
        status,
        Json(UserResponse {
            message,
            user_id: profile.unique_identifier,
        }),
    ))
}

#[derive(Deserialize)]
struct StartCapture {
    #[serde(rename = "userId", default)]
    user_id: String,
}

async fn start_capture(
    State(state): State<Arc<AppState>>,
    Form(form): Form<StartCapture>,
) -> Result<Json<Message>, ApiError> {
    let profile = state
        .store
        .find_by_id(&form.user_id)
        .await?
        .ok_or(ApiError::UnknownUser)?;

    let message = match state.capture.start(profile.subject()).await? {
        StartOutcome::Started => "Started capturing images",
        StartOutcome::AlreadyCapturing => "Already capturing images",
        StartOutcome::Busy { subject } => {
            tracing::info!(
                requested = %profile.unique_identifier,
                active = %subject.id,
                "capture refused"
            );
            return Err(ApiError::CaptureBusy);
        }
    };
    Ok(Json(Message { message: message.into() }))
}

#[derive(Serialize)]
struct StopCaptureResponse {
    message: &'static str,
    captured: usize,
}

async fn stop_capture(State(state): State<Arc<AppState>>) -> Json<StopCaptureResponse> {
    let captured = state.capture.stop().await.unwrap_or(0);
    Json(StopCaptureResponse {
        message: "Stopped capturing images",
        captured,
    })
}

#[derive(Serialize)]
struct TrainResponse {
    message: &'static str,
    count: usize,
}

async fn train(State(state): State<Arc<AppState>>) -> Result<Json<TrainResponse>, ApiError> {
    let names = state.store.display_names().await?;
    let summary = state.trainer.train(names).await?;
    tracing::info!(
        images = summary.images,
        encodings = summary.encodings,
        subjects = summary.subjects,
        "training completed"
    );
    Ok(Json(TrainResponse {
        message: "Training completed and encodings saved",
        count: summary.encodings,
    }))
}

async fn stop(State(state): State<Arc<AppState>>) -> Result<&'static str, ApiError> {
    state.capture.stop().await;
    state.engine.release().await?;
    Ok("Camera stopped")
}
