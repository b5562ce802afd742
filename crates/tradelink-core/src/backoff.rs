//! Exponential backoff.

use std::time::Duration;

/// Delay before attempt `attempt` (1-based): `min(base * 2^(attempt-1), cap)`.
///
/// attempt=1 -> base
/// attempt=2 -> 2*base
/// attempt=3 -> 4*base
///
/// `attempt = 0` is treated as the first attempt.
pub fn backoff_delay(base: Duration, cap: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
    let delay_ms = base_ms.saturating_mul(1u64 << exponent);
    Duration::from_millis(delay_ms).min(cap)
}
