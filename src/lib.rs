//! Dashboard real-time client
//!
//! Keeps a persistent WebSocket connection to the analytics server, recovers it after
//! disconnects and routes inbound messages to interested listeners.

pub mod config;
pub mod connection;
pub mod notice;
pub mod protocol;
pub mod transport;

pub use config::ClientConfig;
pub use connection::{ConnectionManager, ConnectionState, EnvironmentEvent, Subscription};
pub use notice::{Notice, NoticeLevel, NoticeSink};
pub use protocol::{InboundMessage, InboundPayload, OutboundEnvelope, SystemEvent};
pub use transport::{Transport, TungsteniteTransport};
