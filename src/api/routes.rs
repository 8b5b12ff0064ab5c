//! Route definitions.

use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use super::handlers;
use super::state::AppState;
use crate::ws;

/// Assemble the application router: REST under `/api`, the realtime
/// endpoint at `/ws`, and optional static SPA serving as the fallback.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/sessions",
            get(handlers::list_sessions).post(handlers::create_session),
        )
        .route(
            "/sessions/{id}",
            get(handlers::get_session).delete(handlers::delete_session),
        )
        .route("/sessions/{id}/prompt", axum::routing::post(handlers::send_prompt));

    let mut router = Router::new()
        .nest("/api", api)
        .route("/ws", get(ws::ws_handler));

    let static_dir = &state.config.server.static_dir;
    if !static_dir.is_empty() {
        router = router.fallback_service(ServeDir::new(static_dir));
    }

    router
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
