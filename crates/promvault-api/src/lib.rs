//! promvault-api — HTTP surface for promvault registries.
//!
//! Routes requests to registry instances held by a [`RegistryDirectory`].
//! Registries are activated on first use.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/metrics` | Prometheus exposition of the `default` registry |
//! | POST | `/flush` | Clear the `default` registry |
//! | GET | `/api/v1/registries` | List active registries |
//! | GET | `/api/v1/registries/{registry}/metrics` | Prometheus exposition |
//! | POST | `/api/v1/registries/{registry}/clear` | Clear a registry |
//! | POST | `/api/v1/registries/{registry}/record` | Apply one metric operation |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use promvault_registry::RegistryDirectory;

/// Registry served by the unprefixed `/metrics` and `/flush` routes.
pub const DEFAULT_REGISTRY: &str = "default";

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub directory: Arc<RegistryDirectory>,
}

/// Build the complete API router.
pub fn build_router(directory: Arc<RegistryDirectory>) -> Router {
    let state = ApiState { directory };

    let api_routes = Router::new()
        .route("/registries", get(handlers::list_registries))
        .route("/registries/{registry}/metrics", get(handlers::registry_metrics))
        .route("/registries/{registry}/clear", post(handlers::clear_registry))
        .route("/registries/{registry}/record", post(handlers::record))
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::default_metrics))
        .route("/flush", post(handlers::flush_default))
        .with_state(state)
}
