use serde::{Deserialize, Serialize};
use tokio::time::Instant;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimerSnapshot {
    pub current_time: f64,
    pub duration: f64,
    pub progress: f64,
    pub is_running: bool,
}

/// Elapsed-time counter bounded by a duration, in seconds.
///
/// While running, the current time is `accumulated + (now - started_at)`;
/// `pause` folds the running span into `accumulated`.
#[derive(Debug, Clone, PartialEq)]
pub struct Timer {
    duration: f64,
    accumulated: f64,
    started_at: Option<Instant>,
}

impl Timer {
    pub fn new(duration: f64) -> Self {
        Self {
            duration: if duration.is_finite() { duration.max(0.0) } else { 0.0 },
            accumulated: 0.0,
            started_at: None,
        }
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn is_running(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn current_time(&self, now: Instant) -> f64 {
        let running = self
            .started_at
            .map_or(0.0, |started| now.saturating_duration_since(started).as_secs_f64());
        (self.accumulated + running).clamp(0.0, self.duration)
    }

    /// Percentage in `[0, 100]`; 0 for a zero-length timer.
    pub fn progress(&self, now: Instant) -> f64 {
        if self.duration <= 0.0 {
            return 0.0;
        }
        (self.current_time(now) / self.duration * 100.0).clamp(0.0, 100.0)
    }

    pub fn is_complete(&self, now: Instant) -> bool {
        self.current_time(now) >= self.duration
    }

    /// Returns false when already running.
    pub fn start(&mut self, now: Instant) -> bool {
        if self.is_running() {
            return false;
        }
        self.started_at = Some(now);
        true
    }

    /// Returns false when not running.
    pub fn pause(&mut self, now: Instant) -> bool {
        if !self.is_running() {
            return false;
        }
        self.accumulated = self.current_time(now);
        self.started_at = None;
        true
    }

    pub fn reset(&mut self) {
        self.accumulated = 0.0;
        self.started_at = None;
    }

    /// Negative or non-finite durations are ignored. The current time is
    /// clamped to the new duration.
    pub fn set_duration(&mut self, duration: f64, now: Instant) -> bool {
        if !duration.is_finite() || duration < 0.0 {
            return false;
        }
        let current = self.current_time(now);
        self.duration = duration;
        self.rebase(current.min(duration), now);
        true
    }

    /// Moves the current time by `seconds`, never below zero.
    pub fn add_time(&mut self, seconds: f64, now: Instant) {
        if !seconds.is_finite() {
            return;
        }
        let current = (self.current_time(now) + seconds).clamp(0.0, self.duration);
        self.rebase(current, now);
    }

    /// Stops the timer once it reaches its duration. Returns true on the
    /// sample that completes it.
    pub fn tick(&mut self, now: Instant) -> bool {
        if self.is_running() && self.is_complete(now) {
            self.accumulated = self.duration;
            self.started_at = None;
            return true;
        }
        false
    }

    pub fn snapshot(&self, now: Instant) -> TimerSnapshot {
        TimerSnapshot {
            current_time: self.current_time(now),
            duration: self.duration,
            progress: self.progress(now),
            is_running: self.is_running(),
        }
    }

    fn rebase(&mut self, current: f64, now: Instant) {
        self.accumulated = current;
        if self.started_at.is_some() {
            self.started_at = Some(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn start_pause_resume() {
        let t0 = Instant::now();
        let mut timer = Timer::new(30.0);
        assert!(timer.start(t0));
        assert!(!timer.start(t0));

        let t1 = t0 + Duration::from_secs(5);
        assert_eq!(timer.current_time(t1), 5.0);
        assert!(timer.pause(t1));
        assert!(!timer.pause(t1));

        // Paused time does not count.
        let t2 = t1 + Duration::from_secs(60);
        assert_eq!(timer.current_time(t2), 5.0);
        timer.start(t2);
        assert_eq!(timer.current_time(t2 + Duration::from_secs(3)), 8.0);
    }

    #[test]
    fn tick_completes_at_duration() {
        let t0 = Instant::now();
        let mut timer = Timer::new(2.0);
        timer.start(t0);
        assert!(!timer.tick(t0 + Duration::from_millis(1900)));
        assert!(timer.tick(t0 + Duration::from_millis(2050)));
        assert!(!timer.is_running());
        assert_eq!(timer.current_time(t0 + Duration::from_secs(10)), 2.0);
        assert_eq!(timer.progress(t0 + Duration::from_secs(10)), 100.0);
        assert!(!timer.tick(t0 + Duration::from_secs(11)));
    }

    #[test]
    fn progress_is_monotonic_and_bounded() {
        let t0 = Instant::now();
        let mut timer = Timer::new(3.0);
        timer.start(t0);
        let mut last = 0.0;
        for step in 0..50 {
            let p = timer.progress(t0 + Duration::from_millis(step * 100));
            assert!((0.0..=100.0).contains(&p));
            assert!(p >= last);
            last = p;
        }
        assert_eq!(last, 100.0);
    }

    #[test]
    fn zero_duration_has_zero_progress() {
        let t0 = Instant::now();
        let mut timer = Timer::new(0.0);
        timer.start(t0);
        assert_eq!(timer.progress(t0 + Duration::from_secs(1)), 0.0);
        assert!(timer.tick(t0));
    }

    #[test]
    fn set_duration_clamps_current_time() {
        let t0 = Instant::now();
        let mut timer = Timer::new(30.0);
        timer.start(t0);
        let t1 = t0 + Duration::from_secs(20);

        assert!(!timer.set_duration(-1.0, t1));
        assert_eq!(timer.duration(), 30.0);

        assert!(timer.set_duration(10.0, t1));
        assert_eq!(timer.current_time(t1), 10.0);
        assert!(timer.tick(t1));
    }

    #[test]
    fn add_time_never_goes_negative() {
        let t0 = Instant::now();
        let mut timer = Timer::new(30.0);
        timer.add_time(10.0, t0);
        assert_eq!(timer.current_time(t0), 10.0);
        timer.add_time(-25.0, t0);
        assert_eq!(timer.current_time(t0), 0.0);

        timer.start(t0);
        timer.add_time(5.0, t0 + Duration::from_secs(2));
        assert_eq!(timer.current_time(t0 + Duration::from_secs(3)), 8.0);
    }

    #[test]
    fn reset_stops_and_zeroes() {
        let t0 = Instant::now();
        let mut timer = Timer::new(30.0);
        timer.start(t0);
        timer.reset();
        assert!(!timer.is_running());
        assert_eq!(
            timer.snapshot(t0 + Duration::from_secs(5)),
            TimerSnapshot {
                current_time: 0.0,
                duration: 30.0,
                progress: 0.0,
                is_running: false
            }
        );
    }
}
