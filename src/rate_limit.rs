//! Minimum spacing between outbound model calls.

use std::sync::Mutex;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::debug;

/// Enforces a fixed delay between permitted calls. The timestamp is shared
/// by every caller on the same client; last writer wins, so the spacing is
/// best-effort under concurrency.
pub struct RateLimiter {
    delay: Duration,
    last_call: Mutex<Instant>,
}

impl RateLimiter {
    /// The timestamp starts primed at "now", so the very first call may wait.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            last_call: Mutex::new(Instant::now()),
        }
    }

    /// Suspend until at least `delay` has elapsed since the last permitted
    /// call, then record the new call time.
    pub async fn acquire(&self) {
        let wait = {
            let last = self.last_call.lock().unwrap();
            self.delay.saturating_sub(last.elapsed())
        };

        if !wait.is_zero() {
            debug!("Rate limiting: waiting for {:.2} seconds", wait.as_secs_f64());
            sleep(wait).await;
        }

        *self.last_call.lock().unwrap() = Instant::now();
    }
}
