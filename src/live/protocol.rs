//! # Live Wire Formats
//!
//! Two protocols meet in a live session:
//!
//! ## Upstream (streaming duplex endpoint, JSON over WebSocket)
//! - **→ `setup`**: first message; model, AUDIO modality, voice, system
//!   instruction, input and output transcription enabled
//! - **→ `realtimeInput`**: one base64 capture frame per message
//! - **← `setupComplete`**: session is open
//! - **← `serverContent`**: model audio parts, transcription fragments,
//!   `turnComplete` and `interrupted` flags
//!
//! ## Browser socket (`/ws/live`)
//! - **Client → Server**: [`ClientMessage`] as JSON text, capture blocks as
//!   binary little-endian `f32`
//! - **Server → Client**: [`LiveEvent`] as JSON text

use crate::audio::capture::AudioFrame;
use crate::audio::pcm::pcm_mime_type;
use crate::audio::playback::ChunkId;
use crate::audio::transcript::TurnTranscript;
use crate::gemini::types::{Blob, Content, SpeechConfig};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

// Upstream: client → server

#[derive(Debug, Clone, Default, Serialize)]
pub struct TranscriptionConfig {}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveGenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveSetup {
    /// Fully qualified, e.g. `models/gemini-2.5-flash-native-audio-preview-12-2025`
    pub model: String,
    pub generation_config: LiveGenerationConfig,
    pub system_instruction: Content,
    pub input_audio_transcription: TranscriptionConfig,
    pub output_audio_transcription: TranscriptionConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SetupMessage {
    pub setup: LiveSetup,
}

impl SetupMessage {
    pub fn new(model: &str, voice: &str, system_instruction: &str) -> Self {
        let model = if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{}", model)
        };
        Self {
            setup: LiveSetup {
                model,
                generation_config: LiveGenerationConfig {
                    response_modalities: vec!["AUDIO".to_string()],
                    speech_config: SpeechConfig::prebuilt(voice),
                },
                system_instruction: Content::instruction(system_instruction),
                input_audio_transcription: TranscriptionConfig::default(),
                output_audio_transcription: TranscriptionConfig::default(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RealtimeInput {
    pub audio: Blob,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputMessage {
    pub realtime_input: RealtimeInput,
}

impl From<&AudioFrame> for RealtimeInputMessage {
    fn from(frame: &AudioFrame) -> Self {
        Self {
            realtime_input: RealtimeInput {
                audio: Blob {
                    mime_type: pcm_mime_type(frame.sample_rate),
                    data: STANDARD.encode(&frame.pcm),
                },
            },
        }
    }
}

// Upstream: server → client

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub go_away: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Transcription {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub input_transcription: Option<Transcription>,
    #[serde(default)]
    pub output_transcription: Option<Transcription>,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default)]
    pub interrupted: bool,
}

impl ServerContent {
    /// Every inline audio payload of the model turn, in part order.
    pub fn audio_payloads(&self) -> impl Iterator<Item = &Blob> {
        self.model_turn
            .iter()
            .flat_map(|turn| turn.parts.iter())
            .filter_map(|part| part.inline_data.as_ref())
            .filter(|blob| blob.mime_type.is_empty() || blob.mime_type.starts_with("audio/"))
    }
}

// Browser socket

fn default_channels() -> u16 {
    1
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Microphone is open; declares the capture format
    Start {
        sample_rate: u32,
        #[serde(default = "default_channels")]
        channels: u16,
    },
    Stop,
    /// Microphone permission denied or no input device
    CaptureFailed { reason: String },
    Pong { timestamp: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LiveEvent {
    SessionStatus {
        session_id: String,
        status: String,
    },
    /// Play `data` (base64 16-bit PCM) at `start_at` seconds on the output timeline
    PlaybackStart {
        chunk_id: ChunkId,
        start_at: f64,
        duration: f64,
        sample_rate: u32,
        data: String,
    },
    PlaybackStop {
        chunk_ids: Vec<ChunkId>,
    },
    Transcript {
        user: String,
        model: String,
    },
    Error {
        code: String,
        message: String,
    },
    Ping {
        timestamp: u64,
    },
}

impl From<TurnTranscript> for LiveEvent {
    fn from(turn: TurnTranscript) -> Self {
        LiveEvent::Transcript { user: turn.user, model: turn.model }
    }
}
