use super::{SharedState, handlers};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{IntoMakeService, post},
};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};
use tracing::Level;

pub fn create_app(state: SharedState) -> IntoMakeService<Router<()>> {
    create_router(state).into_make_service()
}

pub(super) fn create_router(state: SharedState) -> Router<()> {
    let max_upload_bytes = state.max_upload_bytes;

    Router::new()
        .route("/remove-background", post(handlers::remove_background))
        // Apply a layer to limit the maximum size of request bodies
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        // Any origin, method and header; no credentials; all response headers exposed
        .layer(CorsLayer::permissive())
        // Add tracing for HTTP requests and responses
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::new().level(Level::INFO)))
        // Provide the shared state
        .with_state(state)
}
