//! Playback bookkeeping: frame position, loops, speed and timing

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::errors::{EngineError, GifError};
use crate::frame_source::RenderedFrame;
use crate::metadata::DEFAULT_FRAME_DURATION_MS;

/// Smallest accepted speed factor.
pub const MIN_SPEED: f32 = 1.0 / i32::MAX as f32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackStatus {
    Stopped,
    Running,
    Recycled,
}

/// Result of accounting for a rendered frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameAdvance {
    /// Wait before the next frame, `None` when nothing more is scheduled
    pub next_delay: Option<Duration>,
    /// Set to the number of the loop that just finished
    pub loop_finished: Option<u32>,
}

/// Mutable playback state of one animation.
///
/// The worker owns the authoritative copy; readers see a clone published
/// after every task.
#[derive(Clone, Debug)]
pub struct PlaybackState {
    status: PlaybackStatus,
    durations: Arc<[u32]>,
    frame_index: Option<usize>,
    current_loop: u32,
    loop_count: u16,
    speed: f32,
    next_frame_at: Option<Instant>,
    remainder: Option<Duration>,
    error: GifError,
}

impl PlaybackState {
    pub fn new(durations: impl Into<Arc<[u32]>>, loop_count: u16, running: bool) -> Self {
        Self {
            status: if running { PlaybackStatus::Running } else { PlaybackStatus::Stopped },
            durations: durations.into(),
            frame_index: None,
            current_loop: 0,
            loop_count,
            speed: 1.0,
            next_frame_at: None,
            remainder: None,
            error: GifError::NoError,
        }
    }

    #[inline]
    pub fn status(&self) -> PlaybackStatus {
        self.status
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.status == PlaybackStatus::Running
    }

    pub fn frame_count(&self) -> usize {
        self.durations.len()
    }

    pub fn frame_index(&self) -> Option<usize> {
        self.frame_index
    }

    pub fn current_loop(&self) -> u32 {
        self.current_loop
    }

    pub fn loop_count(&self) -> u16 {
        self.loop_count
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    pub fn error(&self) -> GifError {
        self.error
    }

    pub fn set_error(&mut self, error: GifError) {
        self.error = error;
    }

    pub fn remainder(&self) -> Option<Duration> {
        self.remainder
    }

    /// A finite loop count has been played through.
    pub fn is_animation_completed(&self) -> bool {
        self.loop_count != 0 && self.current_loop >= self.loop_count as u32
    }

    pub fn set_speed(&mut self, factor: f32) -> Result<(), EngineError> {
        validate_speed(factor)?;
        self.speed = factor.max(MIN_SPEED);
        Ok(())
    }

    pub fn set_loop_count(&mut self, loop_count: u32) -> Result<(), EngineError> {
        self.loop_count = validate_loop_count(loop_count)?;
        Ok(())
    }

    /// Returns true when the state changed. A completed animation stays
    /// stopped until it is reset.
    pub fn start(&mut self) -> bool {
        if self.status != PlaybackStatus::Stopped || self.is_animation_completed() {
            return false;
        }
        self.status = PlaybackStatus::Running;
        true
    }

    /// Returns true when the state changed.
    pub fn stop(&mut self, now: Instant) -> bool {
        if self.status != PlaybackStatus::Running {
            return false;
        }
        self.save_remainder(now);
        self.status = PlaybackStatus::Stopped;
        true
    }

    /// Marks playback as no longer scheduled without saving a remainder.
    pub(crate) fn halt(&mut self) {
        if self.status == PlaybackStatus::Running {
            self.status = PlaybackStatus::Stopped;
        }
        self.next_frame_at = None;
    }

    pub(crate) fn recycle(&mut self) {
        self.status = PlaybackStatus::Recycled;
        self.next_frame_at = None;
        self.remainder = None;
    }

    /// Back to the state before the first frame.
    pub fn reset(&mut self) {
        self.frame_index = None;
        self.current_loop = 0;
        self.next_frame_at = None;
        self.remainder = None;
        self.error = GifError::NoError;
    }

    fn save_remainder(&mut self, now: Instant) {
        if self.remainder.is_some() || self.frame_count() <= 1 {
            return;
        }
        if let Some(at) = self.next_frame_at.take() {
            self.remainder = Some(at.saturating_duration_since(now));
        }
    }

    /// Consumes the saved remainder and schedules the next frame after it.
    ///
    /// Returns `None` when there is nothing to resume: no remainder saved,
    /// a single frame, or the loop limit already reached.
    pub fn take_remainder(&mut self, now: Instant) -> Option<Duration> {
        if self.frame_count() <= 1 || self.is_animation_completed() {
            return None;
        }
        let remainder = self.remainder.take()?;
        self.next_frame_at = Some(now + remainder);
        Some(remainder)
    }

    fn scaled(&self, duration_ms: u32) -> Duration {
        Duration::from_nanos((duration_ms as f64 * 1_000_000.0 / self.speed as f64).round() as u64)
    }

    /// Accounts for a frame rendered by the worker. The render began at
    /// `started`; time spent rendering is taken off the next delay.
    pub fn on_frame_rendered(&mut self, frame: &RenderedFrame, started: Instant, now: Instant) -> FrameAdvance {
        self.frame_index = Some(frame.index);
        self.error = GifError::NoError;
        self.remainder = None;

        let mut advance = FrameAdvance::default();
        if frame.loop_completed && self.frame_count() > 1 {
            self.current_loop = self.current_loop.saturating_add(1);
            advance.loop_finished = Some(self.current_loop);
        }

        if self.frame_count() <= 1 || self.is_animation_completed() {
            self.halt();
            return advance;
        }

        let at = started + self.scaled(frame.duration_ms);
        self.next_frame_at = Some(at);
        advance.next_delay = Some(at.saturating_duration_since(now));
        advance
    }

    /// Delay before retrying after a failed render.
    pub(crate) fn retry_delay(&self) -> Duration {
        self.scaled(DEFAULT_FRAME_DURATION_MS)
    }

    /// Accounts for a frame reached by seeking, `offset_ms` into it.
    /// Returns the delay to schedule when running.
    pub fn on_seek(&mut self, frame: &RenderedFrame, offset_ms: u32, now: Instant) -> Option<Duration> {
        self.frame_index = Some(frame.index);
        self.error = GifError::NoError;

        if self.frame_count() <= 1 {
            return None;
        }

        let remaining = self.scaled(frame.duration_ms.saturating_sub(offset_ms));
        if self.is_running() {
            self.remainder = None;
            self.next_frame_at = Some(now + remaining);
            Some(remaining)
        } else {
            self.next_frame_at = None;
            self.remainder = Some(remaining);
            None
        }
    }

    /// Restores position values captured earlier.
    pub(crate) fn restore(&mut self, frame_index: Option<usize>, current_loop: u32, speed: f32, remainder: Option<Duration>) {
        self.frame_index = frame_index;
        self.current_loop = current_loop;
        self.speed = speed.max(MIN_SPEED);
        self.remainder = remainder;
        self.next_frame_at = None;
        self.error = GifError::NoError;
    }

    /// Delay to schedule after a restore while running.
    pub(crate) fn resume_delay(&mut self, now: Instant) -> Option<Duration> {
        if let Some(delay) = self.take_remainder(now) {
            return Some(delay);
        }
        if self.frame_count() <= 1 || self.is_animation_completed() {
            return None;
        }
        let duration_ms = self.durations[self.frame_index.unwrap_or(0)];
        let delay = self.scaled(duration_ms);
        self.next_frame_at = Some(now + delay);
        Some(delay)
    }

    /// Milliseconds elapsed in the current loop, in animation time.
    pub fn position_ms(&self, now: Instant) -> u64 {
        if self.frame_count() <= 1 {
            return 0;
        }
        let Some(index) = self.frame_index else {
            return 0;
        };

        let through_current: u64 = self.durations[..=index].iter().map(|&d| d as u64).sum();
        let pending = self
            .remainder
            .or_else(|| self.next_frame_at.map(|at| at.saturating_duration_since(now)))
            .unwrap_or(Duration::ZERO);
        let pending_ms = (pending.as_nanos() as f64 * self.speed as f64 / 1_000_000.0).round() as u64;

        through_current.saturating_sub(pending_ms.min(self.durations[index] as u64))
    }

    /// Time until the next scheduled frame, `None` when nothing is scheduled.
    pub fn time_to_next_frame(&self, now: Instant) -> Option<Duration> {
        self.next_frame_at.map(|at| at.saturating_duration_since(now))
    }
}

pub(crate) fn validate_speed(factor: f32) -> Result<(), EngineError> {
    if factor.is_nan() || factor <= 0.0 {
        return Err(EngineError::InvalidArgument(format!("speed factor must be positive, got {factor}")));
    }
    Ok(())
}

pub(crate) fn validate_loop_count(loop_count: u32) -> Result<u16, EngineError> {
    u16::try_from(loop_count).map_err(|_| {
        EngineError::InvalidArgument(format!("loop count must be in 0..=65535, got {loop_count}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(loop_count: u16) -> PlaybackState {
        PlaybackState::new(vec![100, 150, 200], loop_count, true)
    }

    fn frame(index: usize, duration_ms: u32, loop_completed: bool) -> RenderedFrame {
        RenderedFrame { index, duration_ms, loop_completed }
    }

    #[test]
    fn test_initial_state() {
        let state = state(0);
        assert!(state.is_running());
        assert_eq!(state.frame_index(), None);
        assert_eq!(state.speed(), 1.0);
        assert_eq!(state.error(), GifError::NoError);
        assert!(!state.is_animation_completed());
    }

    #[test]
    fn test_delay_follows_frame_duration() {
        let mut state = state(0);
        let now = Instant::now();
        let advance = state.on_frame_rendered(&frame(0, 100, false), now, now);
        assert_eq!(advance.next_delay, Some(Duration::from_millis(100)));
        assert_eq!(advance.loop_finished, None);
    }

    #[test]
    fn test_render_time_is_subtracted() {
        let mut state = state(0);
        let started = Instant::now();
        let advance = state.on_frame_rendered(&frame(0, 100, false), started, started + Duration::from_millis(30));
        assert_eq!(advance.next_delay, Some(Duration::from_millis(70)));
    }

    #[test]
    fn test_speed_scales_delay() {
        let mut state = state(0);
        state.set_speed(2.0).unwrap();
        let now = Instant::now();
        let advance = state.on_frame_rendered(&frame(1, 150, false), now, now);
        assert_eq!(advance.next_delay, Some(Duration::from_millis(75)));
    }

    #[test]
    fn test_invalid_speed_rejected() {
        let mut state = state(0);
        assert!(state.set_speed(0.0).is_err());
        assert!(state.set_speed(-1.0).is_err());
        assert!(state.set_speed(f32::NAN).is_err());
        assert_eq!(state.speed(), 1.0);

        state.set_speed(f32::MIN_POSITIVE).unwrap();
        assert_eq!(state.speed(), MIN_SPEED);
    }

    #[test]
    fn test_loop_count_range() {
        let mut state = state(0);
        assert!(state.set_loop_count(65_536).is_err());
        assert_eq!(state.loop_count(), 0);
        state.set_loop_count(65_535).unwrap();
        assert_eq!(state.loop_count(), 65_535);
    }

    #[test]
    fn test_finite_loops_complete() {
        let mut state = state(1);
        let now = Instant::now();
        state.on_frame_rendered(&frame(0, 100, false), now, now);
        state.on_frame_rendered(&frame(1, 150, false), now, now);
        let advance = state.on_frame_rendered(&frame(2, 200, true), now, now);

        assert_eq!(advance, FrameAdvance { next_delay: None, loop_finished: Some(1) });
        assert!(state.is_animation_completed());
        assert_eq!(state.status(), PlaybackStatus::Stopped);
        assert_eq!(state.frame_index(), Some(2));
        assert_eq!(state.position_ms(now), 450);
    }

    #[test]
    fn test_infinite_loop_keeps_going() {
        let mut state = state(0);
        let now = Instant::now();
        let advance = state.on_frame_rendered(&frame(2, 200, true), now, now);
        assert_eq!(advance.loop_finished, Some(1));
        assert_eq!(advance.next_delay, Some(Duration::from_millis(200)));
        assert!(!state.is_animation_completed());
    }

    #[test]
    fn test_stop_saves_remainder_and_start_resumes() {
        let mut state = state(0);
        let t0 = Instant::now();
        state.on_frame_rendered(&frame(1, 150, false), t0, t0);

        assert!(state.stop(t0 + Duration::from_millis(50)));
        assert!(!state.stop(t0 + Duration::from_millis(60)));
        assert_eq!(state.remainder(), Some(Duration::from_millis(100)));
        assert_eq!(state.position_ms(t0 + Duration::from_secs(5)), 150);

        assert!(state.start());
        let resumed = t0 + Duration::from_secs(1);
        assert_eq!(state.take_remainder(resumed), Some(Duration::from_millis(100)));
        assert_eq!(state.time_to_next_frame(resumed), Some(Duration::from_millis(100)));
        assert_eq!(state.take_remainder(resumed), None);
    }

    #[test]
    fn test_single_frame_has_no_remainder() {
        let mut state = PlaybackState::new(vec![500], 0, true);
        let now = Instant::now();
        let advance = state.on_frame_rendered(&frame(0, 500, true), now, now);
        assert_eq!(advance.next_delay, None);
        assert_eq!(state.position_ms(now), 0);

        state.start();
        state.stop(now);
        assert_eq!(state.take_remainder(now), None);
    }

    #[test]
    fn test_position_within_frame() {
        let mut state = state(0);
        let t0 = Instant::now();
        state.on_frame_rendered(&frame(1, 150, false), t0, t0);
        assert_eq!(state.position_ms(t0 + Duration::from_millis(40)), 140);
    }

    #[test]
    fn test_seek_while_stopped_sets_remainder() {
        let mut state = state(0);
        let now = Instant::now();
        state.stop(now);

        let delay = state.on_seek(&frame(2, 200, true), 200, now);
        assert_eq!(delay, None);
        assert_eq!(state.remainder(), Some(Duration::ZERO));
        assert_eq!(state.position_ms(now), 450);
    }

    #[test]
    fn test_reset_clears_position() {
        let mut state = state(2);
        let now = Instant::now();
        state.on_frame_rendered(&frame(2, 200, true), now, now);
        state.set_error(GifError::ReadFailed);
        state.reset();

        assert_eq!(state.frame_index(), None);
        assert_eq!(state.current_loop(), 0);
        assert_eq!(state.error(), GifError::NoError);
    }
}
