//! Bearer-token resolution of HTTP callers to [`Actor`]s.

use super::state::ServerState;
use crate::config::ActorConfig;
use crate::dump_manager::Actor;

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, StatusCode},
    response::IntoResponse,
};
use std::collections::HashMap;
use tracing::debug;

/// Actors known to the server, keyed by token.
#[derive(Debug, Default)]
pub struct ActorDirectory {
    by_token: HashMap<String, Actor>,
}

impl ActorDirectory {
    pub fn from_configs(configs: &[ActorConfig]) -> Self {
        let by_token = configs
            .iter()
            .map(|c| (c.token.clone(), Actor::new(c.name.clone(), c.rights.iter().cloned())))
            .collect();
        Self { by_token }
    }

    pub fn resolve(&self, token: &str) -> Option<&Actor> {
        self.by_token.get(token)
    }

    pub fn len(&self) -> usize {
        self.by_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_token.is_empty()
    }
}

pub enum AuthError {
    Unauthorized,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> axum::response::Response {
        match self {
            AuthError::Unauthorized => StatusCode::UNAUTHORIZED.into_response(),
        }
    }
}

/// Token from `Authorization: Bearer <token>`; a bare token is accepted too.
fn extract_token_from_headers(parts: &Parts) -> Option<String> {
    let value = parts.headers.get(header::AUTHORIZATION)?.to_str().ok()?.trim_start();
    // The scheme is stripped before trimming so "Bearer " alone carries no token
    let token = match value.strip_prefix("Bearer") {
        Some(rest) if rest.is_empty() || rest.starts_with(char::is_whitespace) => rest.trim(),
        _ => value.trim(),
    };
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

impl FromRequestParts<ServerState> for Actor {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        ctx: &ServerState,
    ) -> Result<Self, Self::Rejection> {
        let Some(token) = extract_token_from_headers(parts) else {
            debug!("No token in headers.");
            return Err(AuthError::Unauthorized);
        };
        match ctx.actors.resolve(&token) {
            Some(actor) => Ok(actor.clone()),
            None => {
                debug!("Unknown token.");
                Err(AuthError::Unauthorized)
            }
        }
    }
}
