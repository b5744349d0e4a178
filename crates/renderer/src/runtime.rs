use std::time::Instant;

/// Playback clock as seen by the shader's `u_time`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeState {
    /// Seconds since the clock started, scaled by `playback_speed`.
    pub current_time: f32,
    pub is_paused: bool,
    pub playback_speed: f32,
}

impl TimeState {
    pub fn at(seconds: f32) -> Self {
        Self {
            current_time: seconds,
            ..Self::default()
        }
    }
}

impl Default for TimeState {
    fn default() -> Self {
        Self {
            current_time: 0.0,
            is_paused: false,
            playback_speed: 1.0,
        }
    }
}

/// Snapshot of the time state supplied to the shader uniforms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeSample {
    /// Elapsed wall-clock or simulated time in seconds.
    pub seconds: f32,
    /// Monotonic frame counter for the running session.
    pub frame_index: u64,
}

impl TimeSample {
    pub fn new(seconds: f32, frame_index: u64) -> Self {
        Self {
            seconds,
            frame_index,
        }
    }
}

/// Abstraction over where time values originate from.
pub trait TimeSource: Send {
    /// Resets the source to its initial state.
    fn reset(&mut self);
    /// Produces a time sample for the frame drawn at `now`.
    fn sample(&mut self, now: Instant) -> TimeSample;
    /// Current playback state.
    fn state(&self) -> TimeState;
    /// Applies an external override (seek, pause, speed change).
    fn apply(&mut self, state: TimeState);
}

/// Wall-clock driven time that honours pause and playback speed.
///
/// Elapsed time accumulates frame to frame, so changing the speed or pausing
/// never makes `current_time` jump. Scrubbing goes through [`TimeSource::apply`].
#[derive(Debug, Clone)]
pub struct SystemTimeSource {
    state: TimeState,
    last_tick: Option<Instant>,
    frame: u64,
}

impl SystemTimeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: TimeState) -> Self {
        Self {
            state,
            last_tick: None,
            frame: 0,
        }
    }

    pub fn toggle_pause(&mut self) -> bool {
        self.state.is_paused = !self.state.is_paused;
        self.state.is_paused
    }
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self::with_state(TimeState::default())
    }
}

impl TimeSource for SystemTimeSource {
    fn reset(&mut self) {
        self.state.current_time = 0.0;
        self.last_tick = None;
        self.frame = 0;
    }

    fn sample(&mut self, now: Instant) -> TimeSample {
        if let Some(previous) = self.last_tick {
            if !self.state.is_paused {
                let delta = now.saturating_duration_since(previous).as_secs_f32();
                let advanced = self.state.current_time + delta * self.state.playback_speed;
                self.state.current_time = advanced.max(0.0);
            }
        }
        self.last_tick = Some(now);
        let sample = TimeSample::new(self.state.current_time, self.frame);
        self.frame = self.frame.saturating_add(1);
        sample
    }

    fn state(&self) -> TimeState {
        self.state
    }

    fn apply(&mut self, state: TimeState) {
        self.state = state;
    }
}

/// Time supplied by the host every tick (timeline scrubbing, lesson playback).
#[derive(Debug, Clone, Default)]
pub struct ControlledTimeSource {
    state: TimeState,
    frame: u64,
}

impl ControlledTimeSource {
    pub fn new(state: TimeState) -> Self {
        Self { state, frame: 0 }
    }
}

impl TimeSource for ControlledTimeSource {
    fn reset(&mut self) {
        self.frame = 0;
    }

    fn sample(&mut self, _now: Instant) -> TimeSample {
        let sample = TimeSample::new(self.state.current_time, self.frame);
        self.frame = self.frame.saturating_add(1);
        sample
    }

    fn state(&self) -> TimeState {
        self.state
    }

    fn apply(&mut self, state: TimeState) {
        self.state = state;
    }
}

/// Time source that always reports a fixed timestamp.
#[derive(Debug, Clone, Copy)]
pub struct FixedTimeSource {
    time: f32,
}

impl FixedTimeSource {
    pub fn new(time: f32) -> Self {
        Self { time }
    }

    pub fn time(&self) -> f32 {
        self.time
    }
}

impl TimeSource for FixedTimeSource {
    fn reset(&mut self) {}

    fn sample(&mut self, _now: Instant) -> TimeSample {
        TimeSample::new(self.time, 0)
    }

    fn state(&self) -> TimeState {
        TimeState {
            current_time: self.time,
            is_paused: true,
            playback_speed: 0.0,
        }
    }

    fn apply(&mut self, state: TimeState) {
        self.time = state.current_time;
    }
}

/// Convenient alias for owning time sources behind trait objects.
pub type BoxedTimeSource = Box<dyn TimeSource + Send>;

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn system_time_advances_and_scales() {
        let start = Instant::now();
        let mut clock = SystemTimeSource::new();
        assert_eq!(clock.sample(start).seconds, 0.0);
        assert!(approx(clock.sample(start + Duration::from_millis(500)).seconds, 0.5));

        clock.apply(TimeState {
            playback_speed: 2.0,
            ..clock.state()
        });
        let sample = clock.sample(start + Duration::from_millis(1000));
        assert!(approx(sample.seconds, 1.5));
        assert_eq!(sample.frame_index, 2);
    }

    #[test]
    fn pause_freezes_time_without_jumping() {
        let start = Instant::now();
        let mut clock = SystemTimeSource::new();
        clock.sample(start);
        clock.sample(start + Duration::from_secs(1));
        assert!(clock.toggle_pause());
        let paused = clock.sample(start + Duration::from_secs(5)).seconds;
        assert!(approx(paused, 1.0));
        clock.toggle_pause();
        let resumed = clock.sample(start + Duration::from_secs(6)).seconds;
        assert!(approx(resumed, 2.0));
    }

    #[test]
    fn time_is_monotonic_with_non_negative_speed() {
        let start = Instant::now();
        let mut clock = SystemTimeSource::with_state(TimeState {
            playback_speed: 0.25,
            ..TimeState::default()
        });
        let mut previous = 0.0;
        for step in 0..20 {
            let seconds = clock.sample(start + Duration::from_millis(37 * step)).seconds;
            assert!(seconds >= previous);
            previous = seconds;
        }
    }

    #[test]
    fn negative_speed_stops_at_zero() {
        let start = Instant::now();
        let mut clock = SystemTimeSource::with_state(TimeState {
            current_time: 0.5,
            is_paused: false,
            playback_speed: -1.0,
        });
        clock.sample(start);
        assert_eq!(clock.sample(start + Duration::from_secs(2)).seconds, 0.0);
    }

    #[test]
    fn controlled_time_follows_host() {
        let now = Instant::now();
        let mut clock = ControlledTimeSource::new(TimeState::at(3.0));
        assert_eq!(clock.sample(now).seconds, 3.0);
        clock.apply(TimeState::at(1.0));
        assert_eq!(clock.sample(now + Duration::from_secs(10)).seconds, 1.0);
    }

    #[test]
    fn fixed_time_ignores_wall_clock() {
        let now = Instant::now();
        let mut clock = FixedTimeSource::new(0.1);
        assert_eq!(clock.sample(now).seconds, 0.1);
        assert_eq!(clock.sample(now + Duration::from_secs(3)).seconds, 0.1);
    }
}
