use rand::Rng;

/// Largest offset added to a source value before it is recorded.
pub const JITTER_MAX: i64 = 20;

/// Source of the random offset added to each observation.
pub trait JitterSource: Send + Sync {
    /// An integer in `[0, JITTER_MAX]`.
    fn next_jitter(&self) -> i64;
}

/// Uniform jitter over `[0, JITTER_MAX]`, both ends inclusive.
pub struct RandomJitter;

impl JitterSource for RandomJitter {
    fn next_jitter(&self) -> i64 {
        rand::rng().random_range(0..=JITTER_MAX)
    }
}

/// Always returns the same offset.
pub struct FixedJitter(pub i64);

impl JitterSource for FixedJitter {
    fn next_jitter(&self) -> i64 {
        self.0
    }
}
