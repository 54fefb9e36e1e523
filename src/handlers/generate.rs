//! # Generation Endpoints
//!
//! - `POST /api/v1/chat`: search-grounded answer with sources
//! - `POST /api/v1/images`: one image, returned as a data URL media item
//! - `POST /api/v1/videos`: one video, returned as `video/mp4` bytes
//! - `POST /api/v1/speech`: base64 24 kHz PCM in a prebuilt voice
//!
//! Each request is independent: a failure is reported to its caller only
//! and nothing is retried.

use crate::error::{AppError, AppResult};
use crate::gemini::{AspectRatio, UnknownOption, VideoAspectRatio, VideoModel, Voice};
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use std::str::FromStr;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub prompt: String,
}

#[derive(Debug, Deserialize)]
pub struct ImageRequest {
    pub prompt: String,
    pub aspect_ratio: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VideoRequest {
    pub prompt: String,
    pub model: Option<String>,
    pub aspect_ratio: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SpeechRequest {
    pub text: String,
    pub voice: Option<String>,
}

/// Trimmed, non-empty text or a validation error naming the field.
pub(crate) fn require_text<'a>(field: &str, value: &'a str) -> AppResult<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(AppError::ValidationError(format!("'{}' must not be empty", field)))
    } else {
        Ok(trimmed)
    }
}

/// Parse an optional selector, falling back to the type's default.
fn parse_option<T>(value: Option<&str>) -> AppResult<T>
where
    T: FromStr<Err = UnknownOption> + Default,
{
    match value {
        None => Ok(T::default()),
        Some(raw) => raw.parse().map_err(|e: UnknownOption| AppError::ValidationError(e.to_string())),
    }
}

pub(crate) fn mp4_response(bytes: Vec<u8>) -> HttpResponse {
    HttpResponse::Ok().content_type("video/mp4").body(bytes)
}

pub async fn chat(state: web::Data<AppState>, body: web::Json<ChatRequest>) -> AppResult<HttpResponse> {
    let prompt = require_text("prompt", &body.prompt)?;
    let reply = state.gemini().chat_with_search(prompt).await?;

    info!(sources = reply.sources.len(), "Chat answered");
    Ok(HttpResponse::Ok().json(json!({
        "text": reply.text,
        "sources": reply.sources,
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

pub async fn generate_image(
    state: web::Data<AppState>,
    body: web::Json<ImageRequest>,
) -> AppResult<HttpResponse> {
    let prompt = require_text("prompt", &body.prompt)?;
    let aspect_ratio: AspectRatio = parse_option(body.aspect_ratio.as_deref())?;

    let image = state.gemini().generate_image(prompt, aspect_ratio).await?;

    Ok(HttpResponse::Ok().json(json!({
        "id": Uuid::new_v4().to_string(),
        "type": "image",
        "prompt": prompt,
        "aspect_ratio": aspect_ratio,
        "mime_type": image.mime_type,
        "url": image.data_url(),
        "created_at": chrono::Utc::now().to_rfc3339()
    })))
}

/// Blocks until the video is ready; generation typically takes minutes.
pub async fn generate_video(
    state: web::Data<AppState>,
    body: web::Json<VideoRequest>,
) -> AppResult<HttpResponse> {
    let prompt = require_text("prompt", &body.prompt)?;
    let aspect_ratio: VideoAspectRatio = parse_option(body.aspect_ratio.as_deref())?;
    let model = match body.model.as_deref() {
        Some(raw) => parse_option::<VideoModel>(Some(raw))?.as_str().to_string(),
        None => state.get_config().gemini.video_model,
    };

    let bytes = state.gemini().generate_video(prompt, &model, aspect_ratio).await?;
    Ok(mp4_response(bytes))
}

pub async fn text_to_speech(
    state: web::Data<AppState>,
    body: web::Json<SpeechRequest>,
) -> AppResult<HttpResponse> {
    let text = require_text("text", &body.text)?;
    let voice: Voice = parse_option(body.voice.as_deref())?;

    let speech = state.gemini().text_to_speech(text, voice).await?;
    Ok(HttpResponse::Ok().json(speech))
}
