use crate::config::Configuration;
use crate::domain::Collector;
use crate::governor::control_loop::ControlState;
use axum::extract::FromRef;
use prometheus::Registry;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tokio::time::Instant;

#[derive(Clone)]
pub struct AppState {
    pub configuration: Arc<Configuration>,
    pub registry: Registry,
    pub collectors: Arc<Vec<Box<dyn Collector>>>,
    pub last_collection: Arc<Mutex<Instant>>,
    pub governor_state: Arc<RwLock<ControlState>>,
}

impl FromRef<AppState> for Arc<Vec<Box<dyn Collector>>> {
    fn from_ref(state: &AppState) -> Self {
        state.collectors.clone()
    }
}

impl FromRef<AppState> for Registry {
    fn from_ref(state: &AppState) -> Self {
        state.registry.clone()
    }
}
