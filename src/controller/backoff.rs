//! Backoff between failed upgrade attempts.

use std::time::Duration;

use jiff::Timestamp;
use tracing::warn;

/// Delay before retrying after `attempts` failed upgrades.
///
/// `base * 2^(attempts - 1)`, capped at `max`. Zero or negative attempts
/// use the base delay.
pub fn upgrade_backoff(attempts: i32, base: Duration, max: Duration) -> Duration {
    let exponent = u32::try_from(attempts.saturating_sub(1)).unwrap_or(0).min(31);
    base.checked_mul(1u32 << exponent)
        .map_or(max, |delay| delay.min(max))
}

/// Time left before the next attempt, or `None` once the backoff elapsed.
///
/// A missing or unparsable failure time counts as elapsed.
pub fn backoff_remaining(
    last_failure: Option<&str>,
    backoff: Duration,
    now: Timestamp,
) -> Option<Duration> {
    let raw = last_failure?;
    let failed_at: Timestamp = match raw.parse() {
        Ok(ts) => ts,
        Err(e) => {
            warn!(
                value = %raw,
                error = %e,
                "Unparsable lastUpgradeFailureTime, treating backoff as elapsed"
            );
            return None;
        }
    };

    let elapsed_secs = now.as_second().saturating_sub(failed_at.as_second());
    let elapsed = Duration::from_secs(u64::try_from(elapsed_secs).unwrap_or(0));
    backoff.checked_sub(elapsed).filter(|left| !left.is_zero())
}
