//! Application state management.

use crate::config::Config;
use crate::error::Result;
use crate::session::Session;

/// Shared application state.
#[derive(Clone, Debug)]
pub struct AppState {
    session: Session,
}

impl AppState {
    /// Wrap an existing session.
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    /// Create a session over fjall databases as described by `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(Session::from_config(config)?))
    }

    pub fn session(&self) -> &Session {
        &self.session
    }
}
