pub mod extract;
pub mod handler;

use axum::extract::DefaultBodyLimit;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use std::any::Any;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::ApiError;

pub use handler::AppState;

/// Room for multipart boundaries and the other form fields.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(handler::health))
        .route("/upload", post(handler::upload))
        .route("/chat", post(handler::chat))
        .route("/analyze", post(handler::chat))
        .route("/chat/reset", post(handler::reset))
        .route("/set-income", post(handler::set_income))
        .route("/set-budget", post(handler::set_budget))
        .route("/add-transaction", post(handler::add_transaction))
        .route("/summary", get(handler::summary))
        .route("/initial-analysis", get(handler::initial_analysis))
}

/// A panicking handler answers 500 with the usual JSON error body.
fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic payload".to_string()
    };
    ApiError::Internal(format!("handler panicked: {}", detail)).into_response()
}

/// Every route is served at the root and again under `/api`.
pub fn router(state: AppState) -> Router {
    let body_limit = state.config.max_upload_bytes + MULTIPART_OVERHEAD;
    let routes = routes();

    Router::new()
        .merge(routes.clone())
        .nest("/api", routes)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
