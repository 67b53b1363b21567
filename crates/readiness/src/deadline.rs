//! Adaptive deadline: pushed out while replicas keep coming up, never past a hard cap.

use tokio::time::{Duration, Instant};

use crate::ReadinessConfig;

#[derive(Debug, Clone)]
pub struct Deadline {
    start: Instant,
    initial: Instant,
    current: Instant,
    hard: Instant,
    extension: Duration,
    last_available: Option<i32>,
}

impl Deadline {
    pub fn new(start: Instant, cfg: &ReadinessConfig) -> Self {
        let initial = start + cfg.initial_timeout;
        let hard = start + cfg.max_timeout.max(cfg.initial_timeout);
        Self { start, initial, current: initial, hard, extension: cfg.extension, last_available: None }
    }

    pub fn current(&self) -> Instant { self.current }
    pub fn hard(&self) -> Instant { self.hard }
    pub fn start(&self) -> Instant { self.start }
    pub fn last_available(&self) -> Option<i32> { self.last_available }

    /// Current deadline as an offset from `start`.
    pub fn budget(&self) -> Duration { self.current - self.start }

    pub fn expired(&self, now: Instant) -> bool { now > self.current }

    /// Record an availability reading taken at `now`. Returns true when the
    /// deadline moved. The first reading counts as progress; it can only
    /// extend if `now + extension` already lies past the initial deadline.
    pub fn observe(&mut self, now: Instant, available: i32) -> bool {
        let increased = self.last_available.map_or(true, |last| available > last);
        if !increased {
            return false;
        }
        self.last_available = Some(available);
        let proposed = self.initial.max(now + self.extension);
        if proposed <= self.current {
            return false;
        }
        let next = proposed.min(self.hard);
        let moved = next > self.current;
        self.current = next;
        moved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN: Duration = Duration::from_secs(60);

    fn cfg() -> ReadinessConfig { ReadinessConfig::default() }

    #[test]
    fn zero_one_two_extends_to_seven_minutes() {
        let t = Instant::now();
        let mut d = Deadline::new(t, &cfg());
        assert_eq!(d.current(), t + 5 * MIN);

        assert!(!d.observe(t, 0));
        assert_eq!(d.current(), t + 5 * MIN);

        assert!(d.observe(t + 4 * MIN, 1));
        assert_eq!(d.current(), t + 6 * MIN);

        assert!(d.observe(t + 5 * MIN, 2));
        assert_eq!(d.current(), t + 7 * MIN);
    }

    #[test]
    fn flat_or_falling_availability_never_extends() {
        let t = Instant::now();
        let mut d = Deadline::new(t, &cfg());
        d.observe(t + 4 * MIN, 2);
        let before = d.current();
        assert!(!d.observe(t + 5 * MIN, 2));
        assert!(!d.observe(t + 5 * MIN, 1));
        assert_eq!(d.current(), before);
        assert_eq!(d.last_available(), Some(2));
    }

    #[test]
    fn capped_at_hard_limit() {
        let t = Instant::now();
        let mut d = Deadline::new(t, &cfg());
        let mut prev = d.current();
        for (i, minute) in (4..20u32).enumerate() {
            d.observe(t + minute * MIN, i as i32);
            assert!(d.current() >= prev);
            assert!(d.current() <= t + 15 * MIN);
            prev = d.current();
        }
        assert_eq!(d.current(), t + 15 * MIN);
        assert!(!d.observe(t + 30 * MIN, 100));
    }

    #[test]
    fn late_first_observation_extends() {
        let t = Instant::now();
        let mut d = Deadline::new(t, &cfg());
        assert!(d.observe(t + 4 * MIN, 0));
        assert_eq!(d.budget(), 6 * MIN);
    }
}
