//! Application state for API handlers

use crate::auth::{LoginService, TokenIssuer};
use crate::engine::ResolutionEngine;
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Per-request resolution orchestrator
    pub engine: Arc<ResolutionEngine>,

    /// Honeypot login stub
    pub login: Arc<LoginService>,

    /// Token verification for mutating verbs
    pub tokens: TokenIssuer,
}

impl AppState {
    pub fn new(engine: Arc<ResolutionEngine>, login: Arc<LoginService>, tokens: TokenIssuer) -> Self {
        Self {
            engine,
            login,
            tokens,
        }
    }
}
