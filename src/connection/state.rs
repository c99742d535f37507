//! Connection lifecycle state and reconnect bookkeeping

use std::fmt;
use std::future::pending;
use std::pin::Pin;
use std::time::Duration;

use tokio::time::{sleep, Sleep};

/// Lifecycle state of the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    Connecting,
    Connected,
    #[default]
    Disconnected,
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Error => "error",
        };
        f.write_str(label)
    }
}

/// Delay before reconnect attempt `attempt` (0-indexed): `base * 2^attempt`, capped at `max`
pub fn backoff_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(max).min(max)
}

/// Retry counter plus the single pending reconnect timer
#[derive(Debug, Default)]
pub struct ReconnectState {
    pub attempts: u32,
    timer: Option<Pin<Box<Sleep>>>,
}

impl ReconnectState {
    /// Arm the timer, replacing any pending one
    pub fn schedule(&mut self, delay: Duration) {
        self.timer = Some(Box::pin(sleep(delay)));
    }

    pub fn cancel(&mut self) {
        self.timer = None;
    }

    pub fn is_pending(&self) -> bool {
        self.timer.is_some()
    }

    /// Resolves when the pending timer fires, never if none is armed
    pub async fn fired(&mut self) {
        match self.timer.as_mut() {
            Some(timer) => {
                timer.as_mut().await;
                self.timer = None;
            }
            None => pending::<()>().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_millis(1_000);
    const MAX: Duration = Duration::from_millis(30_000);

    #[test]
    fn test_initial_state_is_disconnected() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
    }

    #[test]
    fn test_backoff_doubles_until_cap() {
        let delays: Vec<u64> = (0..7)
            .map(|n| backoff_delay(BASE, MAX, n).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1_000, 2_000, 4_000, 8_000, 16_000, 30_000, 30_000]);
    }

    #[test]
    fn test_backoff_is_monotonic_and_bounded() {
        let mut previous = Duration::ZERO;
        for attempt in 0..64 {
            let delay = backoff_delay(BASE, MAX, attempt);
            assert!(delay >= previous);
            assert!(delay <= MAX);
            previous = delay;
        }
        assert_eq!(backoff_delay(BASE, MAX, u32::MAX), MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_timer_fires_once() {
        let mut reconnect = ReconnectState::default();
        assert!(!reconnect.is_pending());

        reconnect.schedule(Duration::from_secs(2));
        assert!(reconnect.is_pending());
        reconnect.fired().await;
        assert!(!reconnect.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires() {
        let mut reconnect = ReconnectState::default();
        reconnect.schedule(Duration::from_secs(1));
        reconnect.cancel();

        let fired = tokio::time::timeout(Duration::from_secs(5), reconnect.fired()).await;
        assert!(fired.is_err());
    }
}
