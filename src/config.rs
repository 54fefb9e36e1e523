//! # Configuration Management
//!
//! Settings are layered from several sources, lowest priority first:
//! 1. Built-in defaults (`AppConfig::default()`)
//! 2. An optional `config.toml` next to the binary
//! 3. Environment variables with the `APP__` prefix (`APP__SERVER__PORT=9000`,
//!    `APP__LIVE__FRAME_QUEUE_CAPACITY=64`)
//! 4. Platform variables: `HOST`, `PORT`, and `GEMINI_API_KEY` / `API_KEY`
//!
//! The API key is the only secret here. It may be empty at boot (the server
//! still starts and serves health checks) but every generation request will
//! fail with a configuration error until it is set.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Root configuration for the content studio backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub gemini: GeminiConfig,
    pub live: LiveConfig,
    pub media: MediaConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Generative API endpoints, credentials and model selection.
///
/// ## Models:
/// - `chat_model`: text + search grounding, also used for media-to-script analysis
/// - `image_model`: inline image generation
/// - `speech_model`: text-to-speech
/// - `live_model`: streaming duplex audio
/// - `video_model` / `render_video_model`: the fast and the quality Veo models
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    pub api_key: String,
    pub api_base_url: String,
    pub live_url: String,
    pub chat_model: String,
    pub image_model: String,
    pub speech_model: String,
    pub live_model: String,
    pub video_model: String,
    pub render_video_model: String,
    pub live_voice: String,
    pub request_timeout_secs: u64,
}

/// Realtime voice session tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveConfig {
    /// Capture sample rate the upstream expects (16 kHz PCM)
    pub input_sample_rate: u32,
    /// Sample rate of synthesized audio coming back (24 kHz PCM)
    pub output_sample_rate: u32,
    /// Samples per capture block delivered by the client
    pub capture_block_samples: usize,
    /// Frames held while the upstream socket is slow; oldest are dropped past this
    pub frame_queue_capacity: usize,
    pub max_concurrent_sessions: usize,
    pub heartbeat_interval_secs: u64,
    pub client_timeout_secs: u64,
}

/// Upload and long-running generation limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Largest accepted upload for media analysis, in bytes
    pub max_upload_bytes: usize,
    /// Delay between polls of a video generation operation
    pub video_poll_interval_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            gemini: GeminiConfig {
                api_key: String::new(),
                api_base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
                live_url: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".to_string(),
                chat_model: "gemini-3-flash-preview".to_string(),
                image_model: "gemini-2.5-flash-image".to_string(),
                speech_model: "gemini-2.5-flash-preview-tts".to_string(),
                live_model: "gemini-2.5-flash-native-audio-preview-12-2025".to_string(),
                video_model: "veo-3.1-fast-generate-preview".to_string(),
                render_video_model: "veo-3.1-generate-preview".to_string(),
                live_voice: "Zephyr".to_string(),
                request_timeout_secs: 120,
            },
            live: LiveConfig {
                input_sample_rate: 16_000,
                output_sample_rate: 24_000,
                capture_block_samples: 4096,
                frame_queue_capacity: 32, // ~8 seconds of 16 kHz audio
                max_concurrent_sessions: 10,
                heartbeat_interval_secs: 30,
                client_timeout_secs: 60,
            },
            media: MediaConfig {
                max_upload_bytes: 15 * 1024 * 1024,
                video_poll_interval_secs: 10,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml` and the environment.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            // Double underscore so field names like `api_key` survive the split
            .add_source(config::Environment::with_prefix("APP").prefix_separator("__").separator("__"));

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Some(key) = env::var("GEMINI_API_KEY").ok().or_else(|| env::var("API_KEY").ok()) {
            settings = settings.set_override("gemini.api_key", key)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Reject values that would make the server unusable.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.live.input_sample_rate == 0 || self.live.output_sample_rate == 0 {
            return Err(anyhow::anyhow!("Live sample rates must be greater than 0"));
        }

        if self.live.capture_block_samples == 0 {
            return Err(anyhow::anyhow!("Capture block size must be greater than 0"));
        }

        if self.live.frame_queue_capacity == 0 {
            return Err(anyhow::anyhow!("Frame queue capacity must be greater than 0"));
        }

        if self.live.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent live sessions must be greater than 0"));
        }

        if self.media.max_upload_bytes == 0 {
            return Err(anyhow::anyhow!("Max upload size must be greater than 0"));
        }

        if self.media.video_poll_interval_secs == 0 {
            return Err(anyhow::anyhow!("Video poll interval must be greater than 0"));
        }

        Ok(())
    }

    pub fn has_api_key(&self) -> bool {
        !self.gemini.api_key.trim().is_empty()
    }

    /// Apply a partial JSON update (from `PUT /api/v1/config`).
    ///
    /// Only model names and limits are accepted here. Credentials and
    /// endpoints come from the environment and are never updated at runtime.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(gemini) = partial.get("gemini") {
            for (field, target) in [
                ("chat_model", &mut self.gemini.chat_model),
                ("image_model", &mut self.gemini.image_model),
                ("speech_model", &mut self.gemini.speech_model),
                ("live_model", &mut self.gemini.live_model),
                ("video_model", &mut self.gemini.video_model),
                ("render_video_model", &mut self.gemini.render_video_model),
                ("live_voice", &mut self.gemini.live_voice),
            ] {
                if let Some(value) = gemini.get(field).and_then(|v| v.as_str()) {
                    *target = value.to_string();
                }
            }
        }

        if let Some(live) = partial.get("live") {
            if let Some(capacity) = live.get("frame_queue_capacity").and_then(|v| v.as_u64()) {
                self.live.frame_queue_capacity = capacity as usize;
            }
            if let Some(sessions) = live.get("max_concurrent_sessions").and_then(|v| v.as_u64()) {
                self.live.max_concurrent_sessions = sessions as usize;
            }
        }

        if let Some(media) = partial.get("media") {
            if let Some(bytes) = media.get("max_upload_bytes").and_then(|v| v.as_u64()) {
                self.media.max_upload_bytes = bytes as usize;
            }
            if let Some(secs) = media.get("video_poll_interval_secs").and_then(|v| v.as_u64()) {
                self.media.video_poll_interval_secs = secs;
            }
        }

        self.validate()?;
        Ok(())
    }

    /// JSON view of the configuration with the API key masked.
    pub fn redacted(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(gemini) = value.get_mut("gemini").and_then(|g| g.as_object_mut()) {
            let masked = if self.has_api_key() { "********" } else { "" };
            gemini.insert("api_key".to_string(), serde_json::Value::from(masked));
        }
        value
    }
}
