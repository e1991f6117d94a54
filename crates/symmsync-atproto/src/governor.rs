//! Outbound call shaping.
//!
//! The PDS enforces per-5-minute and per-day write budgets; a burst can lock
//! an account out for 24 hours. Every outbound write goes through a governor:
//! a minimum inter-request interval, a rolling per-window cap, and
//! classify-and-retry for rate-limit rejections.

use std::future::Future;

use tokio::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, warn};

use symmsync_core::config::GovernorConfig;
use symmsync_core::SyncError;

struct GovernorState {
    window_start: Instant,
    window_count: u32,
    last_call: Option<Instant>,
}

/// Call-rate governor for one account.
pub struct RateGovernor {
    cfg: GovernorConfig,
    state: Mutex<GovernorState>,
}

impl RateGovernor {
    pub fn new(cfg: GovernorConfig) -> Self {
        Self {
            cfg,
            state: Mutex::new(GovernorState {
                window_start: Instant::now(),
                window_count: 0,
                last_call: None,
            }),
        }
    }

    /// Wait until the budgets allow another call, then account for it.
    async fn pace(&self, label: &str) {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        if now.duration_since(state.window_start) >= self.cfg.window {
            state.window_start = now;
            state.window_count = 0;
        }

        if state.window_count >= self.cfg.window_cap {
            let wait = self.cfg.window.saturating_sub(now.duration_since(state.window_start));
            warn!(label, wait_secs = wait.as_secs(), "window budget exhausted, sleeping");
            sleep(wait).await;
            state.window_start = Instant::now();
            state.window_count = 0;
        }

        if let Some(last) = state.last_call {
            let since = Instant::now().duration_since(last);
            if since < self.cfg.request_interval {
                sleep(self.cfg.request_interval - since).await;
            }
        }

        state.last_call = Some(Instant::now());
        state.window_count += 1;
    }

    /// Run `f` under the budgets. Rate-limit rejections are retried up to the
    /// configured count with doubling backoff; any other error propagates
    /// immediately.
    pub async fn execute<T, F, Fut>(&self, label: &str, f: F) -> Result<T, SyncError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        let mut delay = self.cfg.retry_base;
        let mut attempt = 0u32;
        loop {
            self.pace(label).await;
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_rate_limited() && attempt < self.cfg.max_retries => {
                    attempt += 1;
                    debug!(
                        label,
                        attempt,
                        max = self.cfg.max_retries,
                        delay_secs = delay.as_secs(),
                        "rate limit hit, backing off"
                    );
                    sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => {
                    if e.is_rate_limited() {
                        warn!(label, attempts = attempt + 1, "rate limit persists, giving up");
                    }
                    return Err(e);
                }
            }
        }
    }
}
