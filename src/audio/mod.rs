//! # Audio Pipeline
//!
//! The duplex audio path of a live session, independent of any transport.
//!
//! ## Key Components:
//! - **PCM**: float <-> 16-bit conversions, little-endian packing, base64 chunks
//! - **Capture**: per-block encoding into frames and the drop-oldest frame queue
//! - **Playback**: gapless scheduling of model audio on an output timeline
//! - **Transcript**: per-turn user/model transcription buffers
//!
//! ## Audio Formats:
//! - **Capture**: 16 kHz mono, 16-bit PCM, 4096-sample blocks
//! - **Playback**: 24 kHz mono, 16-bit PCM, arbitrary chunk lengths

pub mod capture;
pub mod pcm;
pub mod playback;
pub mod transcript;
