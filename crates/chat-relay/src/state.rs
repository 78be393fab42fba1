use axum::extract::FromRef;
use std::sync::Arc;

use crate::config::Settings;
use crate::services::RelayService;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<RelayService>,
    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn new(relay: Arc<RelayService>, settings: Settings) -> Self {
        Self {
            relay,
            settings: Arc::new(settings),
        }
    }
}

impl FromRef<AppState> for Arc<RelayService> {
    fn from_ref(state: &AppState) -> Self {
        state.relay.clone()
    }
}

impl FromRef<AppState> for Arc<Settings> {
    fn from_ref(state: &AppState) -> Self {
        state.settings.clone()
    }
}
