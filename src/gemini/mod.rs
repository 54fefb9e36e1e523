//! # Generative API Client
//!
//! Thin typed wrapper over the REST endpoints the studio uses:
//! - **Text with search**: grounded answers plus their web sources
//! - **Images**: one inline image per prompt, fixed aspect ratios
//! - **Videos**: long-running operation, polled until done, then downloaded
//! - **Media analysis**: image/video in, TikTok Shop script out
//! - **Speech**: prebuilt voices, 24 kHz 16-bit PCM out
//!
//! Every call is a single attempt. Failures surface as [`GeminiError`] and
//! are never retried here.

pub mod client;
pub mod prompts;
pub mod types;

pub use client::GeminiClient;

use serde::de::{value::StrDeserializer, DeserializeOwned};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug)]
pub enum GeminiError {
    /// No API key configured
    MissingApiKey,
    /// Request never got a response (DNS, TLS, timeout)
    Transport(String),
    /// Non-success HTTP status
    Status { status: u16, body: String },
    /// Body did not match the expected shape
    Decode(String),
    /// Response was well-formed but carried no image/audio/text/video
    NoPayload(&'static str),
    /// Long-running operation finished with an error
    Operation(String),
}

impl fmt::Display for GeminiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeminiError::MissingApiKey => write!(f, "API key is not configured"),
            GeminiError::Transport(msg) => write!(f, "request failed: {}", msg),
            GeminiError::Status { status, body } => write!(f, "API returned {}: {}", status, body),
            GeminiError::Decode(msg) => write!(f, "unexpected response: {}", msg),
            GeminiError::NoPayload(what) => write!(f, "no {} generated", what),
            GeminiError::Operation(msg) => write!(f, "operation failed: {}", msg),
        }
    }
}

impl std::error::Error for GeminiError {}

/// The request URL is dropped: file downloads carry the API key in the query.
impl From<reqwest::Error> for GeminiError {
    fn from(err: reqwest::Error) -> Self {
        let err = err.without_url();
        if err.is_decode() {
            GeminiError::Decode(err.to_string())
        } else {
            GeminiError::Transport(err.to_string())
        }
    }
}

/// Returned by the `FromStr` impls below for values outside the allowed set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownOption {
    pub kind: &'static str,
    pub value: String,
    pub allowed: &'static [&'static str],
}

impl fmt::Display for UnknownOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown {} '{}' (expected one of: {})",
            self.kind,
            self.value,
            self.allowed.join(", ")
        )
    }
}

impl std::error::Error for UnknownOption {}

/// Parse a selector through its serde names, so the accepted strings are
/// exactly the ones it serializes to.
fn parse_option<T: DeserializeOwned>(
    kind: &'static str,
    value: &str,
    allowed: &'static [&'static str],
) -> Result<T, UnknownOption> {
    T::deserialize(StrDeserializer::<serde::de::value::Error>::new(value)).map_err(|_| UnknownOption {
        kind,
        value: value.to_string(),
        allowed,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "16:9")]
    Landscape,
    #[serde(rename = "9:16")]
    Portrait,
}

impl AspectRatio {
    pub const ALL: &'static [&'static str] = &["1:1", "16:9", "9:16"];

    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Square => "1:1",
            AspectRatio::Landscape => "16:9",
            AspectRatio::Portrait => "9:16",
        }
    }
}

impl FromStr for AspectRatio {
    type Err = UnknownOption;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_option("aspect ratio", s, Self::ALL)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VideoAspectRatio {
    #[default]
    #[serde(rename = "16:9")]
    Landscape,
    #[serde(rename = "9:16")]
    Portrait,
}

impl VideoAspectRatio {
    pub const ALL: &'static [&'static str] = &["16:9", "9:16"];

    pub fn as_str(&self) -> &'static str {
        match self {
            VideoAspectRatio::Landscape => "16:9",
            VideoAspectRatio::Portrait => "9:16",
        }
    }
}

impl FromStr for VideoAspectRatio {
    type Err = UnknownOption;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_option("video aspect ratio", s, Self::ALL)
    }
}

/// The two video models: fast drafts and the slower quality render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VideoModel {
    #[default]
    #[serde(rename = "veo-3.1-fast-generate-preview")]
    Fast,
    #[serde(rename = "veo-3.1-generate-preview")]
    Quality,
}

impl VideoModel {
    pub const ALL: &'static [&'static str] = &["veo-3.1-fast-generate-preview", "veo-3.1-generate-preview"];

    pub fn as_str(&self) -> &'static str {
        match self {
            VideoModel::Fast => "veo-3.1-fast-generate-preview",
            VideoModel::Quality => "veo-3.1-generate-preview",
        }
    }
}

impl FromStr for VideoModel {
    type Err = UnknownOption;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_option("video model", s, Self::ALL)
    }
}

/// Prebuilt voices; serialized under their own names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Voice {
    #[default]
    Kore,
    Puck,
    Charon,
    Fenrir,
    Zephyr,
}

impl Voice {
    pub const ALL: &'static [&'static str] = &["Kore", "Puck", "Charon", "Fenrir", "Zephyr"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Voice::Kore => "Kore",
            Voice::Puck => "Puck",
            Voice::Charon => "Charon",
            Voice::Fenrir => "Fenrir",
            Voice::Zephyr => "Zephyr",
        }
    }
}

impl FromStr for Voice {
    type Err = UnknownOption;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_option("voice", s, Self::ALL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_option_parsing() {
        assert_eq!("9:16".parse::<AspectRatio>().unwrap(), AspectRatio::Portrait);
        assert_eq!("Zephyr".parse::<Voice>().unwrap(), Voice::Zephyr);
        assert_eq!(
            "veo-3.1-generate-preview".parse::<VideoModel>().unwrap(),
            VideoModel::Quality
        );
        assert!("1:1".parse::<VideoAspectRatio>().is_err());
    }

    #[test]
    fn test_defaults() {
        assert_eq!(AspectRatio::default().as_str(), "1:1");
        assert_eq!(VideoAspectRatio::default().as_str(), "16:9");
        assert_eq!(VideoModel::default().as_str(), "veo-3.1-fast-generate-preview");
        assert_eq!(Voice::default().as_str(), "Kore");
    }

    #[test]
    fn test_unknown_option_lists_choices() {
        let err = "Alloy".parse::<Voice>().unwrap_err();
        assert_eq!(
            err.to_string(),
            "unknown voice 'Alloy' (expected one of: Kore, Puck, Charon, Fenrir, Zephyr)"
        );
    }

    #[test]
    fn test_serialized_names_match_as_str() {
        for ratio in [AspectRatio::Square, AspectRatio::Landscape, AspectRatio::Portrait] {
            assert_eq!(serde_json::to_value(ratio).unwrap(), ratio.as_str());
            assert_eq!(ratio.as_str().parse::<AspectRatio>().unwrap(), ratio);
        }
        for model in [VideoModel::Fast, VideoModel::Quality] {
            assert_eq!(serde_json::to_value(model).unwrap(), model.as_str());
        }
        assert_eq!(serde_json::to_value(Voice::Fenrir).unwrap(), "Fenrir");
        assert_eq!(serde_json::to_value(VideoAspectRatio::Portrait).unwrap(), "9:16");
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(GeminiError::NoPayload("image").to_string(), "no image generated");
        assert_eq!(
            GeminiError::Status { status: 429, body: "quota".into() }.to_string(),
            "API returned 429: quota"
        );
    }
}
