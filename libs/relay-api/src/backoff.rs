use std::time::Duration;

// ═══════════════════════════════════════════════════════════════
//  Exponential backoff with full jitter
// ═══════════════════════════════════════════════════════════════

/// Retry delay generator: attempt `n` sleeps a uniform random duration
/// in `[0, min(cap, base * 2^n)]`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    attempt: u32,
    rng: Rng,
}

impl Backoff {
    pub const DEFAULT_BASE: Duration = Duration::from_secs(1);
    pub const DEFAULT_CAP: Duration = Duration::from_secs(30);

    pub fn new(base: Duration, cap: Duration) -> Self {
        Self::with_seed(base, cap, 0)
    }

    /// Deterministic jitter for tests. Seed 0 seeds from the clock.
    pub fn with_seed(base: Duration, cap: Duration, seed: u64) -> Self {
        Self { base, cap, attempt: 0, rng: Rng::new(seed) }
    }

    /// Upper bound of the delay for the current attempt.
    pub fn ceiling(&self) -> Duration {
        let factor = 1u32.checked_shl(self.attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Delay before the next retry; advances the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let ceiling = self.ceiling();
        self.attempt = self.attempt.saturating_add(1);
        ceiling.mul_f64(self.rng.next_f64())
    }

    /// Back to attempt 0 after a success.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Self::DEFAULT_BASE, Self::DEFAULT_CAP)
    }
}

// ═══════════════════════════════════════════════════════════════
//  RNG (xorshift64)
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
struct Rng {
    state: u64,
}

impl Rng {
    fn new(seed: u64) -> Self {
        let state = if seed == 0 {
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos() as u64
                | 1
        } else {
            seed
        };
        Self { state }
    }

    fn next_u64(&mut self) -> u64 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        self.state
    }

    /// Returns f64 in [0, 1)
    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / ((1u64 << 53) as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_stay_under_exponential_ceiling() {
        let base = Duration::from_secs(1);
        let cap = Duration::from_secs(30);
        let mut backoff = Backoff::with_seed(base, cap, 42);
        for n in 0..12u32 {
            let ceiling = base.saturating_mul(1 << n).min(cap);
            assert_eq!(backoff.ceiling(), ceiling);
            let delay = backoff.next_delay();
            assert!(delay <= ceiling, "attempt {n}: {delay:?} > {ceiling:?}");
        }
    }

    #[test]
    fn ceiling_saturates_at_cap() {
        let mut backoff = Backoff::with_seed(Duration::from_secs(1), Duration::from_secs(30), 7);
        for _ in 0..100 {
            backoff.next_delay();
        }
        assert_eq!(backoff.ceiling(), Duration::from_secs(30));
    }

    #[test]
    fn reset_restarts_from_base() {
        let mut backoff = Backoff::with_seed(Duration::from_millis(100), Duration::from_secs(5), 3);
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.attempt(), 2);
        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.ceiling(), Duration::from_millis(100));
    }

    #[test]
    fn jitter_is_not_constant() {
        let mut backoff = Backoff::with_seed(Duration::from_secs(30), Duration::from_secs(30), 99);
        let a = backoff.next_delay();
        backoff.reset();
        let b = backoff.next_delay();
        assert_ne!(a, b);
    }
}
