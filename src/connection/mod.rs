//! Real-time connection manager
//!
//! Opens, maintains and recovers the dashboard's WebSocket connection, buffers
//! outbound traffic across disconnects and fans inbound messages out to listeners.

mod controller;
mod environment;
mod heartbeat;
mod queue;
mod registry;
mod state;

pub use controller::ConnectionManager;
pub use environment::{EnvironmentEvent, EnvironmentHandle, NetworkProbe};
pub use heartbeat::HeartbeatMonitor;
pub use queue::OutboundQueue;
pub use registry::{DispatchReport, Listener, Subscription, SubscriptionRegistry};
pub use state::{backoff_delay, ConnectionState, ReconnectState};
