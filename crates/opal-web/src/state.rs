//! Shared application state.

use std::sync::Arc;

use dashmap::DashMap;

use opal_agent::Coordinator;

/// State shared by every request handler.
pub struct AppState {
    /// The agent coordinator (sessions, runs, events).
    pub coordinator: Arc<Coordinator>,

    /// Task id → owning session id, for cancellation by task.
    pub tasks: DashMap<String, String>,
}

impl AppState {
    /// Create state over a coordinator.
    pub fn new(coordinator: Arc<Coordinator>) -> Arc<Self> {
        Arc::new(Self {
            coordinator,
            tasks: DashMap::new(),
        })
    }
}
