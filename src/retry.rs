use std::sync::Arc;
use std::time::Duration;

use rand::RngExt;

type RetryDecider = Arc<dyn Fn(usize) -> bool + Send + Sync>;
type BackoffCalculator = Arc<dyn Fn(usize) -> Duration + Send + Sync>;

/// Decides, from the current attempt number, whether another attempt is allowed.
#[derive(Clone)]
pub enum RetryStrategy {
    Forever,
    MaxTotalTries(usize),
    Custom(RetryDecider),
}

impl std::fmt::Debug for RetryStrategy {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Forever => formatter.write_str("Forever"),
            Self::MaxTotalTries(max) => formatter.debug_tuple("MaxTotalTries").field(max).finish(),
            Self::Custom(_) => formatter.write_str("Custom(..)"),
        }
    }
}

impl RetryStrategy {
    pub fn forever() -> Self {
        Self::Forever
    }

    /// Allows attempts while the attempt number is below `max`; `1` means a
    /// single attempt.
    pub fn max_total_tries(max: usize) -> Self {
        Self::MaxTotalTries(max)
    }

    pub fn custom<F>(decider: F) -> Self
    where
        F: Fn(usize) -> bool + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(decider))
    }

    pub fn should_retry(&self, attempt: usize) -> bool {
        match self {
            Self::Forever => true,
            Self::MaxTotalTries(max) => attempt < *max,
            Self::Custom(decider) => decider(attempt),
        }
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::MaxTotalTries(1)
    }
}

/// Computes the wait before the next attempt from the attempt number that
/// just failed.
#[derive(Clone, Default)]
pub enum BackoffStrategy {
    #[default]
    None,
    Specified(Arc<[Duration]>),
    Exponential {
        base: Duration,
        max: Duration,
        jitter_ratio: f64,
    },
    Custom(BackoffCalculator),
}

impl std::fmt::Debug for BackoffStrategy {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => formatter.write_str("None"),
            Self::Specified(delays) => formatter.debug_tuple("Specified").field(delays).finish(),
            Self::Exponential {
                base,
                max,
                jitter_ratio,
            } => formatter
                .debug_struct("Exponential")
                .field("base", base)
                .field("max", max)
                .field("jitter_ratio", jitter_ratio)
                .finish(),
            Self::Custom(_) => formatter.write_str("Custom(..)"),
        }
    }
}

impl BackoffStrategy {
    pub fn none() -> Self {
        Self::None
    }

    /// Fixed delays in milliseconds; the last one repeats for later attempts.
    pub fn specified(delays_ms: &[u64]) -> Self {
        Self::Specified(
            delays_ms
                .iter()
                .copied()
                .map(Duration::from_millis)
                .collect(),
        )
    }

    pub fn exponential(base: Duration, max: Duration) -> Self {
        let base = base.max(Duration::from_millis(1));
        Self::Exponential {
            base,
            max: max.max(base),
            jitter_ratio: 0.0,
        }
    }

    /// Adds random jitter to an exponential strategy; other variants are
    /// returned unchanged.
    pub fn with_jitter(self, jitter_ratio: f64) -> Self {
        match self {
            Self::Exponential { base, max, .. } => Self::Exponential {
                base,
                max,
                jitter_ratio: if jitter_ratio.is_finite() {
                    jitter_ratio.clamp(0.0, 1.0)
                } else {
                    0.0
                },
            },
            other => other,
        }
    }

    pub fn custom<F>(calculator: F) -> Self
    where
        F: Fn(usize) -> Duration + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(calculator))
    }

    pub fn backoff(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        match self {
            Self::None => Duration::ZERO,
            Self::Specified(delays) => delays
                .get(attempt - 1)
                .or_else(|| delays.last())
                .copied()
                .unwrap_or(Duration::ZERO),
            Self::Exponential {
                base,
                max,
                jitter_ratio,
            } => {
                let capped_exponent = attempt.saturating_sub(1).min(31) as u32;
                let multiplier = 1_u128 << capped_exponent;
                let base_ms = base.as_millis().max(1);
                let max_ms = max.as_millis().max(base_ms);
                let delay_ms = base_ms
                    .saturating_mul(multiplier)
                    .min(max_ms)
                    .min(u64::MAX as u128) as u64;
                apply_jitter(
                    Duration::from_millis(delay_ms),
                    *max,
                    *jitter_ratio,
                )
            }
            Self::Custom(calculator) => calculator(attempt),
        }
    }
}

fn apply_jitter(backoff: Duration, max_backoff: Duration, jitter_ratio: f64) -> Duration {
    if jitter_ratio <= f64::EPSILON {
        return backoff;
    }

    let backoff_ms = backoff.as_millis().min(u64::MAX as u128) as u64;
    if backoff_ms <= 1 {
        return backoff;
    }
    let max_backoff_ms = max_backoff.as_millis().min(u64::MAX as u128) as u64;

    let jitter_span = ((backoff_ms as f64) * jitter_ratio).round().max(1.0) as u64;
    let low = backoff_ms.saturating_sub(jitter_span);
    let high = backoff_ms.saturating_add(jitter_span).max(low);
    let mut rng = rand::rng();
    let sampled_ms = rng.random_range(low..=high).min(max_backoff_ms.max(1));
    Duration::from_millis(sampled_ms)
}
