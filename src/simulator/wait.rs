use std::time::Duration;

use serde::Deserialize;
use tokio::task::yield_now;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Returned when a wait was cut short by the run's cancellation token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitCancelled;

/// Sleeps for `delay` unless `token` fires first. A zero delay still yields
/// and still observes an already-cancelled token.
pub async fn sleep_with_cancellation(
    delay: Duration,
    token: &CancellationToken,
) -> Result<(), WaitCancelled> {
    if token.is_cancelled() {
        return Err(WaitCancelled);
    }

    if delay.is_zero() {
        yield_now().await;
        return if token.is_cancelled() {
            Err(WaitCancelled)
        } else {
            Ok(())
        };
    }

    tokio::select! {
        biased;
        _ = token.cancelled() => Err(WaitCancelled),
        _ = sleep(delay) => Ok(()),
    }
}

/// How the readiness poll spaces its status checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PollPolicy {
    /// Every check waits the configured poll interval.
    #[default]
    Fixed,
    /// The wait doubles after each pending answer, capped at `max_interval`.
    Exponential {
        #[serde(rename = "maxIntervalMs", deserialize_with = "millis::deserialize")]
        max_interval: Duration,
    },
}

impl PollPolicy {
    pub fn next_interval(&self, current: Duration, base: Duration) -> Duration {
        match self {
            PollPolicy::Fixed => base,
            PollPolicy::Exponential { max_interval } => {
                current.saturating_mul(2).min(*max_interval).max(base)
            }
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
