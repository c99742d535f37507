//! Protocol module
//!
//! JSON envelopes exchanged with the dashboard's real-time endpoint.

mod message;

pub use message::*;
