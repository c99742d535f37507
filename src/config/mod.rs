//! Configuration module
//!
//! Handles loading client settings and reading the authentication token.

mod client;
mod token;

pub use client::*;
pub use token::*;
