use std::time::Duration;

/// Retry schedule for a single endpoint delivery.
///
/// `max_retries` counts retries only, so a delivery makes at most
/// `max_retries + 1` attempts. The delay before retry `n` (1-based) is the
/// `n`-th entry of `delays`; retries past the end of the list reuse the last
/// entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryStrategy {
    max_retries: u32,

    delays: Vec<Duration>,
}

impl RetryStrategy {
    /// Default number of retries after the first attempt.
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    /// Default delays: 1s, 5s, 15s.
    pub const DEFAULT_DELAYS_MS: [u64; 3] = [1_000, 5_000, 15_000];

    /// Fallback delay when the schedule is empty.
    const FALLBACK_DELAY: Duration = Duration::from_secs(15);

    pub fn new(max_retries: u32, delays: Vec<Duration>) -> Self {
        Self {
            max_retries,
            delays,
        }
    }

    pub fn from_millis(max_retries: u32, delays_ms: &[u64]) -> Self {
        Self::new(
            max_retries,
            delays_ms.iter().copied().map(Duration::from_millis).collect(),
        )
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Total attempts including the first one.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Whether another attempt may follow the attempt with `retry_count`.
    pub fn should_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }

    /// Delay to wait before retry number `retry` (1-based).
    ///
    /// Returns `None` for `retry == 0` and for retries beyond `max_retries`.
    pub fn next_delay(&self, retry: u32) -> Option<Duration> {
        if retry == 0 || retry > self.max_retries {
            return None;
        }

        let index = (retry - 1) as usize;
        let delay = self
            .delays
            .get(index)
            .or_else(|| self.delays.last())
            .copied()
            .unwrap_or(Self::FALLBACK_DELAY);

        Some(delay)
    }

    /// Whether an HTTP status counts as a delivered webhook.
    pub fn is_success(status: u16) -> bool {
        (200..300).contains(&status)
    }

    /// Every delay in the schedule, in order.
    pub fn all_delays(&self) -> Vec<Duration> {
        (1..=self.max_retries)
            .filter_map(|retry| self.next_delay(retry))
            .collect()
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::from_millis(Self::DEFAULT_MAX_RETRIES, &Self::DEFAULT_DELAYS_MS)
    }
}
