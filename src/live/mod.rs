//! # Realtime Voice Sessions
//!
//! Bridges a browser socket to the streaming duplex endpoint of the
//! generative API. Microphone audio flows up as 16 kHz PCM frames; model
//! audio flows back as 24 kHz chunks scheduled on a gapless timeline,
//! together with per-turn transcriptions.

pub mod protocol;
pub mod registry;
pub mod session;
pub mod socket;
pub mod upstream;
