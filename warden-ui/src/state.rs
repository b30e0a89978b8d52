//! Shared application state for the UI server.

use std::sync::Arc;

use warden::io::config::WardenConfig;
use warden::io::events::EventBus;
use warden::session::SessionHost;

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Owner of the selected workspace session.
    pub host: Arc<SessionHost>,
    /// Bus every session publishes on; SSE clients subscribe here.
    pub events: EventBus,
}

impl AppState {
    pub fn new(config: WardenConfig) -> Self {
        let events = EventBus::new();
        Self {
            host: Arc::new(SessionHost::new(config, events.clone())),
            events,
        }
    }
}
