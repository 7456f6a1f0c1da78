use axum::extract::FromRef;

use crate::orchestrator::ExportOrchestrator;
use std::sync::Arc;
use std::time::Instant;

use super::ServerConfig;

pub type GuardedOrchestrator = Arc<ExportOrchestrator>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub hash: String,
    pub orchestrator: GuardedOrchestrator,
}

impl ServerState {
    pub fn new(config: ServerConfig, orchestrator: GuardedOrchestrator) -> Self {
        Self {
            config,
            start_time: Instant::now(),
            hash: env!("GIT_HASH").to_string(),
            orchestrator,
        }
    }
}

impl FromRef<ServerState> for GuardedOrchestrator {
    fn from_ref(input: &ServerState) -> Self {
        input.orchestrator.clone()
    }
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}
