//! Heartbeat monitor
//!
//! Keeps intermediaries from idling out the connection by ticking at a fixed period
//! while connected. Liveness itself is left to the transport's close/error events.

use std::future::pending;
use std::time::Duration;

use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// Fixed-period keepalive timer, armed only while connected
#[derive(Debug)]
pub struct HeartbeatMonitor {
    period: Duration,
    interval: Option<Interval>,
}

impl HeartbeatMonitor {
    /// Create a stopped monitor; a zero period disables heartbeats
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            interval: None,
        }
    }

    /// Arm the timer; the first tick comes one full period from now
    pub fn start(&mut self) {
        if self.period.is_zero() {
            return;
        }
        let mut interval = interval_at(Instant::now() + self.period, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.interval = Some(interval);
    }

    /// Disarm the timer
    pub fn stop(&mut self) {
        self.interval = None;
    }

    /// Check whether the timer is armed
    pub fn is_running(&self) -> bool {
        self.interval.is_some()
    }

    /// Resolves on the next tick, never while stopped
    pub async fn tick(&mut self) {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => pending::<()>().await,
        }
    }
}
