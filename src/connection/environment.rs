//! Environment watchers
//!
//! The host application reports visibility and network transitions through an
//! [`EnvironmentHandle`]. A [`NetworkProbe`] can stand in for the network half by
//! checking whether the endpoint host is reachable.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info};
use url::Url;

use super::controller::Command;

/// A visibility or network transition reported by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentEvent {
    /// The UI became visible to the user
    Visible,
    /// The UI was hidden
    Hidden,
    /// Network connectivity came back
    Online,
    /// Network connectivity was lost
    Offline,
}

/// Reports environment transitions to a running connection manager
///
/// Reports made after the manager shut down are dropped.
#[derive(Debug, Clone)]
pub struct EnvironmentHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl EnvironmentHandle {
    pub(crate) fn new(commands: mpsc::UnboundedSender<Command>) -> Self {
        Self { commands }
    }

    pub fn report(&self, event: EnvironmentEvent) {
        if self.commands.send(Command::Environment(event)).is_err() {
            debug!("Connection manager stopped, ignoring {:?}", event);
        }
    }

    pub fn visibility_changed(&self, visible: bool) {
        self.report(if visible {
            EnvironmentEvent::Visible
        } else {
            EnvironmentEvent::Hidden
        });
    }

    pub fn network_changed(&self, online: bool) {
        self.report(if online {
            EnvironmentEvent::Online
        } else {
            EnvironmentEvent::Offline
        });
    }
}

/// Periodically checks TCP reachability of the endpoint and reports transitions
#[derive(Debug, Clone)]
pub struct NetworkProbe {
    target: String,
    period: Duration,
    connect_timeout: Duration,
}

impl NetworkProbe {
    /// Probe the host and port of `endpoint`
    pub fn for_endpoint(endpoint: &Url, period: Duration) -> Option<Self> {
        let host = endpoint.host_str()?;
        let port = endpoint.port_or_known_default()?;
        Some(Self {
            target: format!("{}:{}", host, port),
            period,
            connect_timeout: Duration::from_secs(5),
        })
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    async fn is_reachable(&self) -> bool {
        matches!(
            timeout(self.connect_timeout, TcpStream::connect(&self.target)).await,
            Ok(Ok(_))
        )
    }

    /// Run the probe until aborted; only transitions are reported
    pub fn spawn(self, handle: EnvironmentHandle) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Network probe watching {}", self.target);
            let mut ticker = interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // Assume online at start; the first failed probe reports the drop
            let mut online = true;

            loop {
                ticker.tick().await;
                let reachable = self.is_reachable().await;
                if reachable != online {
                    online = reachable;
                    debug!("Network probe for {}: online={}", self.target, online);
                    handle.network_changed(online);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_maps_transitions() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = EnvironmentHandle::new(tx);

        handle.visibility_changed(true);
        handle.visibility_changed(false);
        handle.network_changed(true);
        handle.network_changed(false);

        let mut events = Vec::new();
        while let Ok(Command::Environment(event)) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(
            events,
            vec![
                EnvironmentEvent::Visible,
                EnvironmentEvent::Hidden,
                EnvironmentEvent::Online,
                EnvironmentEvent::Offline,
            ]
        );
    }

    #[test]
    fn test_report_after_shutdown_is_ignored() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        EnvironmentHandle::new(tx).network_changed(false);
    }

    #[test]
    fn test_probe_target_uses_default_ports() {
        let url = Url::parse("wss://dashboard.example.com/ws").unwrap();
        let probe = NetworkProbe::for_endpoint(&url, Duration::from_secs(10)).unwrap();
        assert_eq!(probe.target(), "dashboard.example.com:443");

        let url = Url::parse("ws://localhost:8000/ws").unwrap();
        let probe = NetworkProbe::for_endpoint(&url, Duration::from_secs(10)).unwrap();
        assert_eq!(probe.target(), "localhost:8000");
    }

    #[tokio::test]
    async fn test_probe_reports_offline_then_online() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let probe = NetworkProbe {
            target: addr.to_string(),
            period: Duration::from_millis(20),
            connect_timeout: Duration::from_millis(200),
        };
        let task = probe.spawn(EnvironmentHandle::new(tx));

        match rx.recv().await {
            Some(Command::Environment(event)) => assert_eq!(event, EnvironmentEvent::Offline),
            other => panic!("Expected offline report, got {:?}", other),
        }

        let _listener = tokio::net::TcpListener::bind(addr).await.unwrap();
        match rx.recv().await {
            Some(Command::Environment(event)) => assert_eq!(event, EnvironmentEvent::Online),
            other => panic!("Expected online report, got {:?}", other),
        }

        task.abort();
    }
}
