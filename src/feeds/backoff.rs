//! Reconnect pacing shared by the streaming adapters.

use std::time::Duration;

use rand::Rng;

const BACKOFF_FLOOR: Duration = Duration::from_secs(1);
const BACKOFF_CEILING: Duration = Duration::from_secs(30);
const BACKOFF_MULTIPLIER: f64 = 2.0;
const JITTER_FACTOR: f64 = 0.3;

/// Exponential backoff from 1 s to 30 s with multiplicative x2 growth and
/// +/-30 % multiplicative jitter. Reset on a successful read.
#[derive(Debug)]
pub struct BackoffPolicy {
    attempt: u32,
}

impl BackoffPolicy {
    pub fn new() -> Self {
        Self { attempt: 0 }
    }

    /// Next delay; advances the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let base = BACKOFF_FLOOR.as_secs_f64() * BACKOFF_MULTIPLIER.powi(self.attempt as i32);
        let capped = base.min(BACKOFF_CEILING.as_secs_f64());
        let jitter = rand::thread_rng().gen_range(1.0 - JITTER_FACTOR..=1.0 + JITTER_FACTOR);
        self.attempt = self.attempt.saturating_add(1);
        Duration::from_secs_f64(capped * jitter)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Cycles through a list of endpoint URLs, one step per reconnect cycle.
#[derive(Debug)]
pub struct EndpointRotator {
    endpoints: Vec<String>,
    index: usize,
}

impl EndpointRotator {
    pub fn new(endpoints: Vec<String>) -> Self {
        debug_assert!(!endpoints.is_empty());
        Self { endpoints, index: 0 }
    }

    pub fn current(&self) -> &str {
        &self.endpoints[self.index]
    }

    pub fn rotate(&mut self) {
        self.index = (self.index + 1) % self.endpoints.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_within_jitter_bounds() {
        let mut backoff = BackoffPolicy::new();
        let first = backoff.next_delay().as_secs_f64();
        assert!(first >= 0.7 && first <= 1.3, "first delay {first}");
        let second = backoff.next_delay().as_secs_f64();
        assert!(second >= 1.4 && second <= 2.6, "second delay {second}");
        // Far along, the ceiling binds.
        for _ in 0..10 {
            backoff.next_delay();
        }
        let late = backoff.next_delay().as_secs_f64();
        assert!(late <= 30.0 * 1.3, "late delay {late}");
        assert!(late >= 30.0 * 0.7, "late delay {late}");
    }

    #[test]
    fn reset_returns_to_the_floor() {
        let mut backoff = BackoffPolicy::new();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        let delay = backoff.next_delay().as_secs_f64();
        assert!(delay <= 1.3);
    }

    #[test]
    fn rotator_cycles_endpoints() {
        let mut rotator = EndpointRotator::new(vec!["a".into(), "b".into()]);
        assert_eq!(rotator.current(), "a");
        rotator.rotate();
        assert_eq!(rotator.current(), "b");
        rotator.rotate();
        assert_eq!(rotator.current(), "a");
    }
}
