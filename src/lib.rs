//! # Ventra - AI Agent Gateway
//!
//! Ventra sits between clients and an upstream language-model agent service.
//! Every agent call goes through one gateway that:
//!
//! - **Rate limits** each identity with a sliding window
//! - **Classifies** every failure into one error taxonomy with a stable wire shape
//! - **Decodes** streamed replies incrementally, echoing chunks as they arrive
//! - **Records** conversation turns per session, only after a complete reply
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ventra::config::Settings;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Load configuration
//!     let settings = Settings::new()?;
//!
//!     // Server will start on configured host:port
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **Agents**: Gateway, domain types, provider capability, stream decoder, sessions
//! - **Adapters**: HTTP handlers and the rate limiter
//! - **Config**: Configuration management

pub mod adapters;
pub mod agents;
pub mod cli;
pub mod config;

use crate::adapters::api_handler::{self, ApiState};
use crate::adapters::health_handler::HealthHandler;
use crate::adapters::rate_limit::{create_limiter, rate_limit_middleware};
use crate::agents::config::SessionConfig;
use crate::agents::handler::AgentGateway;
use crate::agents::llm::AgentProvider;
use crate::agents::memory::InMemoryStore;
use crate::config::Settings;
use axum::{routing::get, routing::post, Router};
use std::sync::Arc;

/// Build the gateway described by `settings` around `provider`
pub fn create_gateway(settings: &Settings, provider: Arc<dyn AgentProvider>) -> Arc<AgentGateway> {
    let sessions: &SessionConfig = &settings.sessions;
    let store = InMemoryStore::new(sessions.max_retained_turns)
        .with_max_sessions(sessions.max_sessions)
        .with_default_mode(sessions.default_mode.as_str());
    let limiter = create_limiter(settings.rate_limit.agent, settings.rate_limit.sweep_probability);

    Arc::new(AgentGateway::new(limiter, provider, Arc::new(store), sessions.clone()))
}

/// Creates the Axum application router with all endpoints configured.
///
/// # Arguments
///
/// * `gateway` - Agent gateway serving the `/api/agents` routes
/// * `health_handler` - Health check handler
/// * `settings` - Application settings (the `api` rate-limit tier is read here)
///
/// # Returns
///
/// Configured Axum Router
pub fn create_app(gateway: Arc<AgentGateway>, health_handler: Arc<HealthHandler>, settings: &Settings) -> Router {
    // Public routes (never rate limited)
    let public_router = Router::new()
        .route("/health", get({
            let handler = health_handler.clone();
            move || {
                let h = handler.clone();
                async move { h.health().await }
            }
        }))
        .route("/health/live", get({
            let handler = health_handler.clone();
            move || {
                let h = handler.clone();
                async move { h.live().await }
            }
        }));

    let api_state = ApiState { gateway };

    let mut api_router = Router::new()
        .route("/agents/chat", post(api_handler::chat))
        .route("/agents/stream", post(api_handler::stream))
        .route(
            "/agents/sessions/:id",
            get(api_handler::get_session).delete(api_handler::clear_session),
        )
        .route("/agents/rate-limit", get(api_handler::rate_limit_status))
        .with_state(api_state);

    // Apply Rate Limiting to API routes if enabled
    if settings.rate_limit.enabled {
        let limiter = create_limiter(settings.rate_limit.api, settings.rate_limit.sweep_probability);
        api_router = api_router.layer(axum::middleware::from_fn_with_state(limiter, rate_limit_middleware));
    }

    let router = public_router.nest("/api", api_router);

    router.layer(
        tower_http::cors::CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any),
    )
}
