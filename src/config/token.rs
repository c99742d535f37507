//! Authentication token storage
//!
//! The token is looked up on every connection attempt so a token written after
//! start-up is picked up by the next reconnect.

use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::warn;

/// Source of the optional authentication token
pub trait TokenStore: Send + Sync + 'static {
    fn load(&self) -> Option<String>;
}

/// No authentication
#[derive(Debug, Clone, Copy, Default)]
pub struct NoToken;

impl TokenStore for NoToken {
    fn load(&self) -> Option<String> {
        None
    }
}

/// A token fixed at start-up
#[derive(Debug, Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl TokenStore for StaticToken {
    fn load(&self) -> Option<String> {
        non_empty(&self.0)
    }
}

/// Token persisted in a file on the client machine
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Option<String> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => non_empty(&content),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                warn!("Failed to read token file {}: {}", self.path.display(), e);
                None
            }
        }
    }
}

fn non_empty(token: &str) -> Option<String> {
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}
