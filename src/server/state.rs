use axum::extract::FromRef;

use crate::dump_manager::DumpManager;
use std::sync::Arc;
use std::time::Instant;

use super::auth::ActorDirectory;
use super::ServerConfig;

pub type GuardedDumpManager = Arc<DumpManager>;
pub type GuardedActorDirectory = Arc<ActorDirectory>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub dump_manager: GuardedDumpManager,
    pub actors: GuardedActorDirectory,
    pub hash: String,
}

impl FromRef<ServerState> for GuardedDumpManager {
    fn from_ref(input: &ServerState) -> Self {
        input.dump_manager.clone()
    }
}

impl FromRef<ServerState> for GuardedActorDirectory {
    fn from_ref(input: &ServerState) -> Self {
        input.actors.clone()
    }
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}
