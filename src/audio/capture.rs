//! # Capture Path
//!
//! Turns each block of captured float samples into one [`AudioFrame`] of
//! 16-bit PCM and hands it to the transport without waiting.
//!
//! ## Rules:
//! - Every block is encoded on its own. Nothing is carried over between blocks.
//! - Frames keep arrival order (sequence numbers increase by one per block).
//! - The capture side never blocks on the network: frames go into a bounded
//!   [`FrameQueue`] that drops its oldest frame when full.

use crate::audio::pcm::{float_to_pcm16, pcm16_to_le_bytes};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use tokio::sync::Notify;

/// One encoded block of captured audio, ready for the upstream socket.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub seq: u64,
    pub sample_rate: u32,
    /// Little-endian 16-bit PCM
    pub pcm: Vec<u8>,
}

impl AudioFrame {
    #[cfg(test)]
    pub fn sample_count(&self) -> usize {
        self.pcm.len() / 2
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    EmptyBlock,
    OversizedBlock { samples: usize, max: usize },
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::EmptyBlock => write!(f, "capture block contains no samples"),
            CaptureError::OversizedBlock { samples, max } => {
                write!(f, "capture block of {} samples exceeds the {}-sample block size", samples, max)
            }
        }
    }
}

impl std::error::Error for CaptureError {}

/// Encodes capture blocks for one session.
#[derive(Debug)]
pub struct CaptureEncoder {
    sample_rate: u32,
    block_samples: usize,
    next_seq: u64,
}

impl CaptureEncoder {
    pub fn new(sample_rate: u32, block_samples: usize) -> Self {
        Self {
            sample_rate,
            block_samples,
            next_seq: 0,
        }
    }

    /// Encode one block. Blocks shorter than the nominal size are accepted
    /// (the last block before a stop is often partial); longer ones are not.
    pub fn encode_block(&mut self, samples: &[f32]) -> Result<AudioFrame, CaptureError> {
        if samples.is_empty() {
            return Err(CaptureError::EmptyBlock);
        }
        if samples.len() > self.block_samples {
            return Err(CaptureError::OversizedBlock {
                samples: samples.len(),
                max: self.block_samples,
            });
        }

        let frame = AudioFrame {
            seq: self.next_seq,
            sample_rate: self.sample_rate,
            pcm: pcm16_to_le_bytes(&float_to_pcm16(samples)),
        };
        self.next_seq += 1;
        Ok(frame)
    }

    pub fn frames_encoded(&self) -> u64 {
        self.next_seq
    }
}

/// What happened to a pushed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queue was full; the oldest frame was discarded to make room
    DroppedOldest,
    /// Queue is closed; the frame was discarded
    Closed,
}

#[derive(Debug, Default)]
struct QueueState {
    frames: VecDeque<AudioFrame>,
    closed: bool,
    dropped: u64,
}

/// Bounded single-consumer frame queue between the capture path and the
/// upstream writer task.
///
/// `push` never waits. `pop` waits until a frame arrives or the queue is
/// closed; after `close` it returns `None` immediately, discarding whatever
/// was still queued.
#[derive(Debug)]
pub struct FrameQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, frame: AudioFrame) -> PushOutcome {
        let outcome = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.closed {
                return PushOutcome::Closed;
            }
            let outcome = if state.frames.len() >= self.capacity {
                state.frames.pop_front();
                state.dropped += 1;
                PushOutcome::DroppedOldest
            } else {
                PushOutcome::Queued
            };
            state.frames.push_back(frame);
            outcome
        };
        self.notify.notify_one();
        outcome
    }

    pub async fn pop(&self) -> Option<AudioFrame> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
                if state.closed {
                    return None;
                }
                if let Some(frame) = state.frames.pop_front() {
                    return Some(frame);
                }
            }
            notified.await;
        }
    }

    pub fn close(&self) {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.closed = true;
            state.frames.clear();
        }
        self.notify.notify_waiters();
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).closed
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).frames.len()
    }

    pub fn dropped(&self) -> u64 {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).dropped
    }
}
