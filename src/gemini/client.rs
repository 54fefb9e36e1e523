use super::prompts::{CHAT_SYSTEM_INSTRUCTION, TIKTOK_ANALYSIS_PROMPT};
use super::types::{
    Content, GenerateContentRequest, GenerateContentResponse, GenerationConfig, GoogleSearch,
    GroundingSource, ImageConfig, Operation, Part, PredictLongRunningRequest, SpeechConfig, Tool,
    VideoInstance, VideoParameters,
};
use super::{AspectRatio, GeminiError, VideoAspectRatio, Voice};
use crate::audio::pcm::{pcm_mime_type, PlaybackChunk};
use crate::config::GeminiConfig;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Sample rate of the speech endpoint's PCM output.
pub const SPEECH_SAMPLE_RATE: u32 = 24_000;

const VIDEO_RESOLUTION: &str = "720p";

#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub text: String,
    pub sources: Vec<GroundingSource>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedImage {
    pub mime_type: String,
    /// Base64 image bytes
    pub data: String,
}

impl GeneratedImage {
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SynthesizedSpeech {
    pub voice: Voice,
    pub sample_rate: u32,
    pub mime_type: String,
    /// Base64 little-endian 16-bit PCM
    pub data: String,
    pub duration_seconds: f64,
}

/// One client per request; the underlying `reqwest::Client` is shared.
#[derive(Clone)]
pub struct GeminiClient {
    http: Client,
    config: GeminiConfig,
    poll_interval: Duration,
}

impl GeminiClient {
    pub fn new(http: Client, config: GeminiConfig, poll_interval: Duration) -> Self {
        Self { http, config, poll_interval }
    }

    fn api_key(&self) -> Result<&str, GeminiError> {
        let key = self.config.api_key.trim();
        if key.is_empty() {
            Err(GeminiError::MissingApiKey)
        } else {
            Ok(key)
        }
    }

    fn base_url(&self) -> &str {
        self.config.api_base_url.trim_end_matches('/')
    }

    fn model_url(&self, model: &str, method: &str) -> String {
        format!("{}/models/{}:{}", self.base_url(), model, method)
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.request_timeout_secs)
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, GeminiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GeminiError::Status { status: status.as_u16(), body });
        }
        response
            .json::<T>()
            .await
            .map_err(|e| GeminiError::Decode(e.to_string()))
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        url: String,
        body: &B,
    ) -> Result<T, GeminiError> {
        let key = self.api_key()?;
        let response = self
            .http
            .post(url)
            .header("x-goog-api-key", key)
            .timeout(self.timeout())
            .json(body)
            .send()
            .await?;
        Self::read_json(response).await
    }

    async fn generate(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse, GeminiError> {
        let started = Instant::now();
        let response = self.post_json(self.model_url(model, "generateContent"), request).await?;
        debug!(model, elapsed_ms = started.elapsed().as_millis() as u64, "generateContent completed");
        Ok(response)
    }

    /// Search-grounded answer in Brazilian Portuguese.
    pub async fn chat_with_search(&self, prompt: &str) -> Result<ChatReply, GeminiError> {
        let mut request = GenerateContentRequest::new(vec![Content::user(vec![Part::text(prompt)])]);
        request.system_instruction = Some(Content::instruction(CHAT_SYSTEM_INSTRUCTION));
        request.tools = Some(vec![Tool { google_search: GoogleSearch::default() }]);

        let response = self.generate(&self.config.chat_model, &request).await?;
        Ok(ChatReply {
            text: response.text().unwrap_or_default(),
            sources: response.grounding_sources(),
        })
    }

    pub async fn generate_image(
        &self,
        prompt: &str,
        aspect_ratio: AspectRatio,
    ) -> Result<GeneratedImage, GeminiError> {
        let mut request = GenerateContentRequest::new(vec![Content::user(vec![Part::text(prompt)])]);
        request.generation_config = Some(GenerationConfig {
            image_config: Some(ImageConfig { aspect_ratio: aspect_ratio.as_str().to_string() }),
            ..Default::default()
        });

        let response = self.generate(&self.config.image_model, &request).await?;
        let blob = response
            .first_inline_data()
            .ok_or(GeminiError::NoPayload("image"))?;
        let mime_type = if blob.mime_type.is_empty() {
            "image/png".to_string()
        } else {
            blob.mime_type.clone()
        };
        Ok(GeneratedImage { mime_type, data: blob.data.clone() })
    }

    /// Ask for a TikTok Shop visual prompt and narration script based on an
    /// uploaded image or video.
    pub async fn analyze_media(&self, data: String, mime_type: &str) -> Result<String, GeminiError> {
        let request = GenerateContentRequest::new(vec![Content::user(vec![
            Part::inline(mime_type, data),
            Part::text(TIKTOK_ANALYSIS_PROMPT),
        ])]);

        let response = self.generate(&self.config.chat_model, &request).await?;
        response.text().ok_or(GeminiError::NoPayload("script"))
    }

    pub async fn text_to_speech(&self, text: &str, voice: Voice) -> Result<SynthesizedSpeech, GeminiError> {
        let mut request = GenerateContentRequest::new(vec![Content::user(vec![Part::text(text)])]);
        request.generation_config = Some(GenerationConfig {
            response_modalities: Some(vec!["AUDIO".to_string()]),
            speech_config: Some(SpeechConfig::prebuilt(voice.as_str())),
            ..Default::default()
        });

        let response = self.generate(&self.config.speech_model, &request).await?;
        let blob = response
            .first_inline_data()
            .ok_or(GeminiError::NoPayload("audio"))?;
        let chunk = PlaybackChunk::from_base64(&blob.data, SPEECH_SAMPLE_RATE)
            .map_err(|e| GeminiError::Decode(e.to_string()))?;

        Ok(SynthesizedSpeech {
            voice,
            sample_rate: SPEECH_SAMPLE_RATE,
            mime_type: pcm_mime_type(SPEECH_SAMPLE_RATE),
            data: blob.data.clone(),
            duration_seconds: chunk.duration(),
        })
    }

    pub async fn start_video(
        &self,
        prompt: &str,
        model: &str,
        aspect_ratio: VideoAspectRatio,
    ) -> Result<Operation, GeminiError> {
        let request = PredictLongRunningRequest {
            instances: vec![VideoInstance { prompt: prompt.to_string() }],
            parameters: VideoParameters {
                aspect_ratio: aspect_ratio.as_str().to_string(),
                resolution: VIDEO_RESOLUTION.to_string(),
                sample_count: 1,
            },
        };
        self.post_json(self.model_url(model, "predictLongRunning"), &request).await
    }

    pub async fn poll_video(&self, operation_name: &str) -> Result<Operation, GeminiError> {
        let key = self.api_key()?;
        let response = self
            .http
            .get(format!("{}/{}", self.base_url(), operation_name))
            .header("x-goog-api-key", key)
            .timeout(self.timeout())
            .send()
            .await?;
        Self::read_json(response).await
    }

    /// Start a video, poll until the operation is done, then download it.
    pub async fn generate_video(
        &self,
        prompt: &str,
        model: &str,
        aspect_ratio: VideoAspectRatio,
    ) -> Result<Vec<u8>, GeminiError> {
        let started = Instant::now();
        let mut operation = self.start_video(prompt, model, aspect_ratio).await?;
        info!(model, operation = %operation.name, "Video generation started");

        while !operation.done {
            tokio::time::sleep(self.poll_interval).await;
            operation = self.poll_video(&operation.name).await?;
            debug!(
                operation = %operation.name,
                done = operation.done,
                elapsed_secs = started.elapsed().as_secs(),
                "Polled video operation"
            );
        }

        if let Some(error) = &operation.error {
            warn!(operation = %operation.name, code = ?error.code, "Video operation failed");
            return Err(GeminiError::Operation(
                error.message.clone().unwrap_or_else(|| "unknown error".to_string()),
            ));
        }

        let uri = operation.video_uri().ok_or(GeminiError::NoPayload("video"))?;
        let bytes = self.download_video(uri).await?;
        info!(
            model,
            bytes = bytes.len(),
            elapsed_secs = started.elapsed().as_secs(),
            "Video generation finished"
        );
        Ok(bytes)
    }

    /// Fetch a generated video. The file URI only accepts the key as a query parameter.
    pub async fn download_video(&self, uri: &str) -> Result<Vec<u8>, GeminiError> {
        let key = self.api_key()?;
        let response = self
            .http
            .get(uri)
            .query(&[("key", key)])
            .timeout(self.timeout())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GeminiError::Status { status: status.as_u16(), body });
        }
        Ok(response.bytes().await?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn client_with_key(key: &str) -> GeminiClient {
        let config = GeminiConfig {
            api_key: key.to_string(),
            api_base_url: "https://generativelanguage.example/v1beta/".to_string(),
            ..AppConfig::default().gemini
        };
        GeminiClient::new(Client::new(), config, Duration::from_millis(1))
    }

    #[test]
    fn test_model_url_strips_trailing_slash() {
        let client = client_with_key("k");
        assert_eq!(
            client.model_url("gemini-2.5-flash-image", "generateContent"),
            "https://generativelanguage.example/v1beta/models/gemini-2.5-flash-image:generateContent"
        );
    }

    #[test]
    fn test_image_data_url() {
        let image = GeneratedImage { mime_type: "image/png".into(), data: "AAAA".into() };
        assert_eq!(image.data_url(), "data:image/png;base64,AAAA");
    }

    #[tokio::test]
    async fn test_missing_key_fails_before_any_request() {
        let client = client_with_key("   ");
        assert!(matches!(
            client.chat_with_search("oi").await,
            Err(GeminiError::MissingApiKey)
        ));
        assert!(matches!(
            client.download_video("https://files.example/v.mp4").await,
            Err(GeminiError::MissingApiKey)
        ));
        assert!(matches!(
            client.generate_video("gato", "veo", VideoAspectRatio::Portrait).await,
            Err(GeminiError::MissingApiKey)
        ));
    }

    #[tokio::test]
    async fn test_download_failure_does_not_expose_key() {
        use crate::error::AppError;
        use actix_web::ResponseError;

        let client = client_with_key("SECRETKEY123");
        let err = client
            .download_video("http://127.0.0.1:9/files/v.mp4?alt=media")
            .await
            .unwrap_err();
        assert!(matches!(err, GeminiError::Transport(_)));
        assert!(!err.to_string().contains("SECRETKEY123"));

        let response = AppError::from(err).error_response();
        let body = actix_web::body::to_bytes(response.into_body()).await.unwrap();
        let body = String::from_utf8_lossy(&body);
        assert!(body.contains("generation_failed"));
        assert!(!body.contains("SECRETKEY123"));
        assert!(!body.contains("127.0.0.1:9/files"));
    }
}
