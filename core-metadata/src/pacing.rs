//! Caller-side request pacing
//!
//! Providers publish limits such as "40 requests per 10 seconds". The pacer
//! spreads requests evenly inside that window by enforcing a minimum delay
//! between consecutive calls. Callers queue on the mutex, so concurrent
//! builders of different runs share one budget per provider.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::debug;

#[derive(Debug)]
pub struct RequestPacer {
    last_request: Mutex<Option<Instant>>,
    min_delay: Duration,
}

impl RequestPacer {
    /// `requests` calls per `window`
    pub fn per_window(requests: u32, window: Duration) -> Self {
        Self::with_min_delay(window / requests.max(1))
    }

    pub fn with_min_delay(min_delay: Duration) -> Self {
        Self {
            last_request: Mutex::new(None),
            min_delay,
        }
    }

    /// No pacing at all
    pub fn unlimited() -> Self {
        Self::with_min_delay(Duration::ZERO)
    }

    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }

    /// Wait until the next request may go out
    pub async fn wait_turn(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_delay {
                let wait = self.min_delay - elapsed;
                debug!("Rate limiting: waiting {:?}", wait);
                sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }
}
