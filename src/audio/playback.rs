//! # Playback Scheduling
//!
//! Model audio arrives in chunks with network jitter. To play it back
//! without gaps or overlaps, each chunk is appended to a timeline cursor:
//!
//! ```text
//! next_start = max(next_start, now)
//! start(chunk) = next_start
//! next_start += duration(chunk)
//! ```
//!
//! The `max` matters after idle periods: if nothing has played for a while,
//! the cursor is in the past and the new chunk starts "now" instead.
//!
//! On interruption every scheduled chunk is stopped and the cursor goes back
//! to zero. Forgetting that reset makes every later turn start further in
//! the future than the one before.

use crate::audio::pcm::PlaybackChunk;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

/// A monotonically increasing source of "current output time" in seconds.
pub trait OutputClock: Send + Sync {
    fn now(&self) -> f64;
}

/// Wall clock backed by [`Instant`].
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputClock for MonotonicClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ChunkId(pub u64);

/// A chunk's slot on the output timeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScheduledChunk {
    pub id: ChunkId,
    pub start_at: f64,
    pub duration: f64,
}

impl ScheduledChunk {
    #[cfg(test)]
    pub fn end_at(&self) -> f64 {
        self.start_at + self.duration
    }
}

/// The cursor plus the set of chunks that have not finished yet.
#[derive(Debug, Default)]
pub struct PlaybackScheduler {
    next_start: f64,
    active: BTreeMap<ChunkId, ScheduledChunk>,
}

impl PlaybackScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a chunk of `duration` seconds on the timeline.
    pub fn schedule(&mut self, id: ChunkId, duration: f64, now: f64) -> ScheduledChunk {
        self.next_start = self.next_start.max(now);
        let scheduled = ScheduledChunk {
            id,
            start_at: self.next_start,
            duration: duration.max(0.0),
        };
        self.next_start += scheduled.duration;
        self.active.insert(id, scheduled);
        scheduled
    }

    /// A chunk played to its end. Returns false for unknown or already-stopped ids.
    pub fn finish(&mut self, id: ChunkId) -> bool {
        self.active.remove(&id).is_some()
    }

    /// Stop everything and rewind the cursor. Returns the ids that were
    /// still scheduled or playing, in schedule order.
    pub fn interrupt(&mut self) -> Vec<ChunkId> {
        self.next_start = 0.0;
        std::mem::take(&mut self.active).into_keys().collect()
    }

    #[cfg(test)]
    pub fn next_start(&self) -> f64 {
        self.next_start
    }

    #[cfg(test)]
    pub fn active_len(&self) -> usize {
        self.active.len()
    }
}

/// Output side of a live session: a clock epoch and the scheduler.
///
/// Times handed out are relative to the moment the context was opened, so
/// the first chunk of a fresh session starts at (roughly) zero.
pub struct PlaybackContext {
    clock: Arc<dyn OutputClock>,
    epoch: f64,
    sample_rate: u32,
    scheduler: PlaybackScheduler,
}

impl PlaybackContext {
    pub fn open(clock: Arc<dyn OutputClock>, sample_rate: u32) -> Self {
        let epoch = clock.now();
        Self {
            clock,
            epoch,
            sample_rate,
            scheduler: PlaybackScheduler::new(),
        }
    }

    pub fn current_time(&self) -> f64 {
        (self.clock.now() - self.epoch).max(0.0)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn enqueue(&mut self, id: ChunkId, chunk: &PlaybackChunk) -> ScheduledChunk {
        let now = self.current_time();
        self.scheduler.schedule(id, chunk.duration(), now)
    }

    pub fn finish(&mut self, id: ChunkId) -> bool {
        self.scheduler.finish(id)
    }

    pub fn interrupt(&mut self) -> Vec<ChunkId> {
        self.scheduler.interrupt()
    }

    #[cfg(test)]
    pub fn scheduler(&self) -> &PlaybackScheduler {
        &self.scheduler
    }
}

impl std::fmt::Debug for PlaybackContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackContext")
            .field("epoch", &self.epoch)
            .field("sample_rate", &self.sample_rate)
            .field("scheduler", &self.scheduler)
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ManualClock;
    use super::*;

    #[test]
    fn test_back_to_back_chunks() {
        let mut scheduler = PlaybackScheduler::new();
        let first = scheduler.schedule(ChunkId(0), 1.0, 0.0);
        let second = scheduler.schedule(ChunkId(1), 0.5, 0.0);

        assert_eq!(first.start_at, 0.0);
        assert_eq!(second.start_at, 1.0);
        assert_eq!(scheduler.next_start(), 1.5);
        assert_eq!(scheduler.active_len(), 2);
    }

    #[test]
    fn test_start_times_never_overlap() {
        let durations = [0.2, 0.05, 1.3, 0.0, 0.7, 0.25];
        let arrivals = [0.0, 0.01, 0.1, 2.0, 2.0, 5.0];
        let mut scheduler = PlaybackScheduler::new();

        let scheduled: Vec<_> = durations
            .iter()
            .zip(arrivals.iter())
            .enumerate()
            .map(|(i, (&d, &now))| {
                let chunk = scheduler.schedule(ChunkId(i as u64), d, now);
                assert!(chunk.start_at >= now, "chunk {} starts before now", i);
                chunk
            })
            .collect();

        for pair in scheduled.windows(2) {
            assert!(pair[1].start_at >= pair[0].end_at());
            assert!(pair[1].start_at >= pair[0].start_at);
        }
    }

    #[test]
    fn test_idle_cursor_catches_up_to_now() {
        let mut scheduler = PlaybackScheduler::new();
        scheduler.schedule(ChunkId(0), 1.0, 0.0);
        let late = scheduler.schedule(ChunkId(1), 0.5, 4.0);

        assert_eq!(late.start_at, 4.0);
        assert_eq!(scheduler.next_start(), 4.5);
    }

    #[test]
    fn test_interrupt_clears_and_rewinds() {
        let mut scheduler = PlaybackScheduler::new();
        scheduler.schedule(ChunkId(3), 2.0, 0.0);
        scheduler.schedule(ChunkId(4), 2.0, 0.0);

        assert_eq!(scheduler.interrupt(), vec![ChunkId(3), ChunkId(4)]);
        assert_eq!(scheduler.active_len(), 0);
        assert_eq!(scheduler.next_start(), 0.0);

        // Next chunk is relative to the clock, not the old 4.0s cursor
        let next = scheduler.schedule(ChunkId(5), 1.0, 0.5);
        assert_eq!(next.start_at, 0.5);
    }

    #[test]
    fn test_finish_removes_only_known_chunks() {
        let mut scheduler = PlaybackScheduler::new();
        scheduler.schedule(ChunkId(1), 1.0, 0.0);

        assert!(scheduler.finish(ChunkId(1)));
        assert!(!scheduler.finish(ChunkId(1)));
        assert!(!scheduler.finish(ChunkId(9)));
        // Finishing does not move the cursor
        assert_eq!(scheduler.next_start(), 1.0);
    }

    #[test]
    fn test_context_times_are_relative_to_open() {
        let clock = Arc::new(ManualClock::at(100.0));
        let mut context = PlaybackContext::open(clock.clone(), 24_000);

        let chunk = PlaybackChunk::new(vec![0; 24_000], 24_000);
        let first = context.enqueue(ChunkId(0), &chunk);
        assert_eq!(first.start_at, 0.0);
        assert_eq!(first.duration, 1.0);

        clock.set(103.0);
        let second = context.enqueue(ChunkId(1), &chunk);
        assert_eq!(second.start_at, 3.0);
        assert_eq!(context.scheduler().next_start(), 4.0);
    }
}
