// Proactive renewal scheduling
// A single one-shot timer that asks the coordinator to renew ahead of expiry

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Default margin before expiry at which renewal fires (5 minutes)
pub const DEFAULT_RENEWAL_MARGIN: Duration = Duration::from_secs(300);

/// Default floor for the renewal delay
pub const DEFAULT_MIN_RENEWAL_DELAY: Duration = Duration::from_secs(60);

/// Default delay before the startup renewal of an expired session
pub const DEFAULT_STARTUP_RENEWAL_DELAY: Duration = Duration::from_millis(1000);

/// Receiver of timer firings
///
/// Implemented by the coordinator, which is the only component allowed to
/// start a renewal.
pub trait RenewalTrigger: Send + Sync {
    fn trigger_renewal(self: Arc<Self>);
}

/// Scheduler timing knobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenewalTiming {
    pub margin: Duration,
    pub min_delay: Duration,
    pub startup_delay: Duration,
}

impl Default for RenewalTiming {
    fn default() -> Self {
        Self {
            margin: DEFAULT_RENEWAL_MARGIN,
            min_delay: DEFAULT_MIN_RENEWAL_DELAY,
            startup_delay: DEFAULT_STARTUP_RENEWAL_DELAY,
        }
    }
}

/// What `restore` decided at process start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreAction {
    /// Stored token still live; renewal armed for the given delay
    Scheduled(Duration),
    /// Stored token expired; a renewal attempt is armed for the startup delay
    ImmediateRenewal(Duration),
    /// Nothing to renew
    Idle,
}

/// Compute `max(expires_in - margin, floor)` in whole seconds
pub fn renewal_delay(expires_in_secs: u64, margin: Duration, min_delay: Duration) -> Duration {
    let secs = expires_in_secs
        .saturating_sub(margin.as_secs())
        .max(min_delay.as_secs());
    Duration::from_secs(secs)
}

struct PendingTimer {
    handle: JoinHandle<()>,
    delay: Duration,
}

/// Owner of the single pending renewal timer
pub struct RenewalScheduler {
    timing: RenewalTiming,
    trigger: Weak<dyn RenewalTrigger>,
    pending: Mutex<Option<PendingTimer>>,
}

impl RenewalScheduler {
    /// Create a scheduler that fires into `trigger`
    pub fn new(timing: RenewalTiming, trigger: Weak<dyn RenewalTrigger>) -> Self {
        Self {
            timing,
            trigger,
            pending: Mutex::new(None),
        }
    }

    /// Timing in use
    pub fn timing(&self) -> RenewalTiming {
        self.timing
    }

    /// Arm the timer for a freshly stored token
    pub fn schedule(&self, expires_in_secs: u64) -> Duration {
        let delay = renewal_delay(expires_in_secs, self.timing.margin, self.timing.min_delay);
        tracing::debug!(
            "Token expires in {}s, scheduling renewal in {}s",
            expires_in_secs,
            delay.as_secs()
        );
        self.arm(delay);
        delay
    }

    /// Arm a one-shot timer, cancelling any pending one
    pub fn arm(&self, delay: Duration) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                tracing::warn!("No async runtime available, proactive renewal not scheduled");
                self.disarm();
                return;
            }
        };

        let trigger = self.trigger.clone();
        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            tracing::debug!("Renewal timer fired");
            if let Some(trigger) = trigger.upgrade() {
                trigger.trigger_renewal();
            }
        });

        let previous = self
            .lock()
            .replace(PendingTimer { handle, delay });
        if let Some(previous) = previous {
            previous.handle.abort();
        }
    }

    /// Cancel the pending timer, if any
    pub fn disarm(&self) {
        if let Some(previous) = self.lock().take() {
            previous.handle.abort();
            tracing::debug!("Renewal timer cancelled");
        }
    }

    /// Whether a timer is pending (armed and not yet fired)
    pub fn is_armed(&self) -> bool {
        self.pending_delay().is_some()
    }

    /// Delay the pending timer was armed with
    pub fn pending_delay(&self) -> Option<Duration> {
        self.lock()
            .as_ref()
            .filter(|timer| !timer.handle.is_finished())
            .map(|timer| timer.delay)
    }

    /// Re-arm from persisted state at process start
    pub fn restore(
        &self,
        expires_at_ms: Option<i64>,
        has_refresh_token: bool,
        now_ms: i64,
    ) -> RestoreAction {
        match expires_at_ms {
            Some(expires_at) if expires_at > now_ms => {
                let remaining_secs = ((expires_at - now_ms) / 1000) as u64;
                RestoreAction::Scheduled(self.schedule(remaining_secs))
            }
            _ if has_refresh_token => {
                let delay = self.timing.startup_delay;
                self.arm(delay);
                RestoreAction::ImmediateRenewal(delay)
            }
            _ => RestoreAction::Idle,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<PendingTimer>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for RenewalScheduler {
    fn drop(&mut self) {
        self.disarm();
    }
}
