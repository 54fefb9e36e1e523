//! # TikTok Shop Flow
//!
//! Two steps, each its own request:
//! 1. **Analyze** (`POST /api/v1/tiktok/analyze`): upload a product image or
//!    video as multipart field `media`, get back a visual prompt plus
//!    narration script
//! 2. **Render** (`POST /api/v1/tiktok/render`): send the (possibly edited)
//!    script, get back a vertical video from the quality model

use super::generate::{mp4_response, require_text};
use crate::error::AppResult;
use crate::gemini::VideoAspectRatio;
use crate::media::{read_media_field, UploadPolicy};
use crate::state::AppState;
use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

pub const MEDIA_FIELD: &str = "media";

#[derive(Debug, Deserialize)]
pub struct RenderRequest {
    pub script: String,
}

pub async fn analyze(state: web::Data<AppState>, mut payload: Multipart) -> AppResult<HttpResponse> {
    let policy = UploadPolicy::new(state.get_config().media.max_upload_bytes);
    let upload = read_media_field(&mut payload, MEDIA_FIELD, policy).await?;

    info!(
        kind = ?upload.kind,
        mime_type = %upload.mime_type,
        bytes = upload.bytes.len(),
        "Analyzing uploaded media"
    );
    let script = state
        .gemini()
        .analyze_media(upload.to_base64(), &upload.mime_type)
        .await?;

    Ok(HttpResponse::Ok().json(json!({
        "script": script,
        "media_type": upload.kind,
        "mime_type": upload.mime_type,
        "filename": upload.filename
    })))
}

pub async fn render(state: web::Data<AppState>, body: web::Json<RenderRequest>) -> AppResult<HttpResponse> {
    let script = require_text("script", &body.script)?;
    let model = state.get_config().gemini.render_video_model;

    let bytes = state
        .gemini()
        .generate_video(script, &model, VideoAspectRatio::Portrait)
        .await?;
    Ok(mp4_response(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use actix_web::{http::header, http::StatusCode, test, App};
    use serde_json::Value;

    const BOUNDARY: &str = "studio-boundary";

    fn multipart_body(field: &str, content_type: &str, data: &[u8]) -> Vec<u8> {
        let mut body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"{f}\"; filename=\"upload.bin\"\r\nContent-Type: {ct}\r\n\r\n",
            b = BOUNDARY,
            f = field,
            ct = content_type
        )
        .into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    /// State with a key set, so a request that got past validation would
    /// try the network; none of these tests may get that far.
    fn state_with_limit(max_upload_bytes: usize) -> web::Data<AppState> {
        let mut config = AppConfig::default();
        config.gemini.api_key = "test-key".to_string();
        config.gemini.api_base_url = "http://127.0.0.1:9".to_string();
        config.media.max_upload_bytes = max_upload_bytes;
        web::Data::new(AppState::new(config))
    }

    async fn post_upload(state: web::Data<AppState>, body: Vec<u8>) -> (StatusCode, Value) {
        let app = test::init_service(
            App::new()
                .app_data(state)
                .route("/analyze", web::post().to(analyze)),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/analyze")
            .insert_header((
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            ))
            .set_payload(body)
            .to_request();
        let resp = test::call_service(&app, req).await;
        let status = resp.status();
        let json: Value = test::read_body_json(resp).await;
        (status, json)
    }

    #[actix_web::test]
    async fn test_oversized_upload_is_rejected() {
        let body = multipart_body(MEDIA_FIELD, "image/png", &[7u8; 64]);
        let (status, json) = post_upload(state_with_limit(32), body).await;

        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(json["error"]["type"], "payload_too_large");
    }

    #[actix_web::test]
    async fn test_unsupported_type_is_rejected() {
        let body = multipart_body(MEDIA_FIELD, "application/pdf", b"%PDF-1.7");
        let (status, json) = post_upload(state_with_limit(1024), body).await;

        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(json["error"]["type"], "unsupported_media");
    }

    #[actix_web::test]
    async fn test_missing_media_field_is_rejected() {
        let body = multipart_body("file", "image/png", &[1, 2, 3]);
        let (status, _) = post_upload(state_with_limit(1024), body).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_render_requires_script() {
        let app = test::init_service(
            App::new()
                .app_data(state_with_limit(1024))
                .route("/render", web::post().to(render)),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/render")
            .set_json(json!({"script": ""}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
