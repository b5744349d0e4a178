//! Frame scheduling state shared by the preview surface.
//!
//! Nothing here touches the GPU. The surface asks the loop for permission to
//! draw and reports back, which keeps the lifecycle rules testable.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceState {
    Uninitialized,
    /// A program is installed and geometry is uploaded.
    Ready,
    Running,
    TornDown,
}

/// A scheduled draw. Dropped tokens never draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameToken {
    sequence: u64,
}

#[derive(Debug)]
pub struct FrameLoop {
    state: SurfaceState,
    pending: Option<FrameToken>,
    sequence: u64,
    frames_drawn: u64,
}

impl Default for FrameLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameLoop {
    pub fn new() -> Self {
        Self {
            state: SurfaceState::Uninitialized,
            pending: None,
            sequence: 0,
            frames_drawn: 0,
        }
    }

    pub fn state(&self) -> SurfaceState {
        self.state
    }

    /// Called once the first program is installed.
    pub fn mark_ready(&mut self) {
        if self.state == SurfaceState::Uninitialized {
            self.state = SurfaceState::Ready;
        }
    }

    /// Queues the next frame. Returns `None` before a program exists or after teardown.
    pub fn schedule(&mut self) -> Option<FrameToken> {
        match self.state {
            SurfaceState::Uninitialized | SurfaceState::TornDown => None,
            SurfaceState::Ready | SurfaceState::Running => {
                if let Some(token) = self.pending {
                    return Some(token);
                }
                self.sequence = self.sequence.wrapping_add(1);
                let token = FrameToken {
                    sequence: self.sequence,
                };
                self.pending = Some(token);
                Some(token)
            }
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Consumes the pending token if it matches. A stale token is refused.
    pub fn begin_frame(&mut self, token: FrameToken) -> bool {
        if self.state == SurfaceState::TornDown || self.pending != Some(token) {
            return false;
        }
        self.pending = None;
        self.state = SurfaceState::Running;
        true
    }

    pub fn finish_frame(&mut self) {
        if self.state == SurfaceState::Running {
            self.frames_drawn = self.frames_drawn.saturating_add(1);
        }
    }

    /// Cancels any pending frame. Safe to call repeatedly; returns whether this call tore down.
    pub fn tear_down(&mut self) -> bool {
        self.pending = None;
        if self.state == SurfaceState::TornDown {
            return false;
        }
        self.state = SurfaceState::TornDown;
        true
    }

    pub fn frames_drawn(&self) -> u64 {
        self.frames_drawn
    }
}

/// Frames per second over a rolling one-second window.
#[derive(Debug, Default)]
pub struct FpsCounter {
    frames: VecDeque<Instant>,
}

impl FpsCounter {
    const WINDOW: Duration = Duration::from_secs(1);

    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, now: Instant) {
        self.frames.push_back(now);
        self.evict(now);
    }

    pub fn fps(&mut self, now: Instant) -> u32 {
        self.evict(now);
        self.frames.len() as u32
    }

    fn evict(&mut self, now: Instant) {
        while let Some(oldest) = self.frames.front() {
            if now.saturating_duration_since(*oldest) >= Self::WINDOW {
                self.frames.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nothing_schedules_before_ready() {
        let mut frames = FrameLoop::new();
        assert_eq!(frames.schedule(), None);
        frames.mark_ready();
        assert!(frames.schedule().is_some());
    }

    #[test]
    fn one_pending_frame_at_a_time() {
        let mut frames = FrameLoop::new();
        frames.mark_ready();
        let first = frames.schedule().unwrap();
        assert_eq!(frames.schedule(), Some(first));
        assert!(frames.begin_frame(first));
        assert!(!frames.begin_frame(first));
        frames.finish_frame();
        assert_eq!(frames.state(), SurfaceState::Running);
        assert_eq!(frames.frames_drawn(), 1);
    }

    #[test]
    fn teardown_cancels_pending_frame() {
        let mut frames = FrameLoop::new();
        frames.mark_ready();
        let token = frames.schedule().unwrap();
        assert!(frames.tear_down());
        assert!(!frames.has_pending());
        assert!(!frames.begin_frame(token));
        assert_eq!(frames.schedule(), None);
    }

    #[test]
    fn teardown_is_idempotent_even_without_frames() {
        let mut frames = FrameLoop::new();
        assert!(frames.tear_down());
        assert!(!frames.tear_down());
        assert_eq!(frames.state(), SurfaceState::TornDown);
        assert_eq!(frames.frames_drawn(), 0);
        frames.mark_ready();
        assert_eq!(frames.state(), SurfaceState::TornDown);
    }

    #[test]
    fn fps_counts_rolling_window() {
        let start = Instant::now();
        let mut fps = FpsCounter::new();
        for frame in 0..30 {
            fps.record(start + Duration::from_millis(frame * 20));
        }
        assert_eq!(fps.fps(start + Duration::from_millis(600)), 30);
        assert_eq!(fps.fps(start + Duration::from_millis(1300)), 14);
        assert_eq!(fps.fps(start + Duration::from_secs(5)), 0);
    }
}
