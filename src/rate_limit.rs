use std::cmp;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::time::sleep;

/// Wait cap so a misconfigured per-source interval cannot stall a fan-out
const DEFAULT_WAIT_CAP_MS: u64 = 50;

/// Advisory per-source request pacing.
///
/// One instance per registered source. Before each outbound request the
/// caller awaits `wait_turn()`: if less than the minimum interval has passed
/// since the last request, it sleeps for the remainder, capped at a small
/// bound. The timestamp is stamped unconditionally after waking, so this is
/// pacing, not mutual exclusion — concurrent callers may still overlap, and
/// last-writer-wins on the timestamp is acceptable.
pub struct RateLimiter {
    min_interval: Duration,
    wait_cap: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self::with_cap(min_interval, Duration::from_millis(DEFAULT_WAIT_CAP_MS))
    }

    pub fn with_cap(min_interval: Duration, wait_cap: Duration) -> Self {
        RateLimiter {
            min_interval,
            wait_cap,
            last_request: Mutex::new(None),
        }
    }

    /// Sleep out the remainder of the pacing interval, then stamp the clock
    pub async fn wait_turn(&self) {
        let wait = {
            let last = self.last_request.lock().unwrap();
            last.and_then(|at| {
                let elapsed = at.elapsed();
                if elapsed < self.min_interval {
                    Some(cmp::min(self.min_interval - elapsed, self.wait_cap))
                } else {
                    None
                }
            })
        };
        if let Some(delay) = wait {
            sleep(delay).await;
        }
        *self.last_request.lock().unwrap() = Some(Instant::now());
    }
}
