//! Randomization of retry delays, so instances that failed on the same shared
//! resource do not come back at the same instant.

use std::time::Duration;

use rand::Rng;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JitterPolicy {
    #[default]
    None,
    /// Uniform in `[0, delay]`.
    Full,
    /// Uniform in `[delay / 2, delay]`.
    Equal,
}

impl JitterPolicy {
    /// Fixed part and random span of the delay, both in milliseconds.
    fn window(self, ms: u64) -> (u64, u64) {
        match self {
            JitterPolicy::None => (ms, 0),
            JitterPolicy::Full => (0, ms),
            JitterPolicy::Equal => (ms / 2, ms - ms / 2),
        }
    }

    pub fn apply(&self, delay: Duration) -> Duration {
        let ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        match self.window(ms) {
            (_, 0) if *self == JitterPolicy::None => delay,
            (floor, 0) => Duration::from_millis(floor),
            (floor, span) => Duration::from_millis(floor + rand::rng().random_range(0..=span)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_keeps_sub_millisecond_precision() {
        let d = Duration::from_micros(2_500);
        assert_eq!(JitterPolicy::None.apply(d), d);
    }

    #[test]
    fn test_bounds() {
        let d = Duration::from_millis(101);
        for _ in 0..200 {
            assert!(JitterPolicy::Full.apply(d) <= d);
            let eq = JitterPolicy::Equal.apply(d);
            assert!(eq >= Duration::from_millis(50) && eq <= d, "got {eq:?}");
        }
    }

    #[test]
    fn test_zero_stays_zero() {
        for p in [JitterPolicy::Full, JitterPolicy::Equal] {
            assert_eq!(p.apply(Duration::ZERO), Duration::ZERO);
        }
    }
}
