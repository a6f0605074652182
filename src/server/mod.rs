pub mod auth;
pub mod config;
pub mod dump_routes;
mod http_layers;
pub mod metrics;
pub mod server;
pub mod state;

pub use auth::ActorDirectory;
pub use config::ServerConfig;
pub use http_layers::*;
pub use server::{make_app, run_server};
