//! Deadline-bounded polling.
//!
//! [`poll_until`] runs an attempt, sleeps a fixed interval, and repeats
//! until the attempt yields a value, fails, or the deadline passes. The
//! readiness wait and the history poll are both built on it.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

/// Interval between readiness probes.
pub const READINESS_INTERVAL: Duration = Duration::from_secs(1);

/// Default time allowed for ComfyUI to come up.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(900);

/// Interval between history polls.
pub const HISTORY_INTERVAL: Duration = Duration::from_secs(2);

/// Default time allowed for an output file to appear.
pub const DEFAULT_OUTPUT_TIMEOUT: Duration = Duration::from_secs(1800);

/// Interval and overall deadline for one polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Delay between attempts.
    pub interval: Duration,
    /// Total time after which polling gives up.
    pub timeout: Duration,
}

impl PollConfig {
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Readiness probing: every second, up to `timeout`.
    pub const fn readiness(timeout: Duration) -> Self {
        Self::new(READINESS_INTERVAL, timeout)
    }

    /// History polling: every two seconds, up to `timeout`.
    pub const fn history(timeout: Duration) -> Self {
        Self::new(HISTORY_INTERVAL, timeout)
    }
}

/// Why a polling loop stopped without a value.
#[derive(Debug, thiserror::Error)]
pub enum PollError<E> {
    /// The deadline passed while attempts kept returning `None`.
    #[error("timed out after {elapsed:?}")]
    TimedOut { elapsed: Duration },

    /// An attempt failed; polling stops immediately.
    #[error("{0}")]
    Aborted(E),
}

/// Poll `attempt` until it yields `Some`, fails, or the deadline passes.
///
/// The attempt receives its 1-based attempt number. It always runs at
/// least once, and one last time at the deadline, so a result that lands
/// during the final sleep is still picked up.
pub async fn poll_until<T, E, F, Fut>(config: PollConfig, mut attempt: F) -> Result<T, PollError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let start = Instant::now();
    let mut attempt_no = 0u32;

    loop {
        attempt_no += 1;
        match attempt(attempt_no).await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {}
            Err(e) => return Err(PollError::Aborted(e)),
        }

        let elapsed = start.elapsed();
        if elapsed >= config.timeout {
            return Err(PollError::TimedOut { elapsed });
        }

        tokio::time::sleep(config.interval.min(config.timeout - elapsed)).await;
    }
}
