use std::sync::Arc;

use axum::{
    extract::Request,
    http::{HeaderValue, Method},
    middleware::{self, Next},
    response::Response,
    routing::{get, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::AppState;

pub mod handlers;

/// Build the public router with its middleware stack.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(|| async { "ok" }))
        // tokens
        .route("/get_token", get(handlers::get_token))
        .route("/get_svg", get(handlers::get_svg))
        .route("/get_tokens", get(handlers::get_tokens))
        .route("/put_token", put(handlers::put_token))
        // interactions
        .route("/request_interaction", get(handlers::request_interaction))
        .route("/deposit_interaction", get(handlers::deposit_interaction))
        .route("/update_interaction", get(handlers::update_interaction))
        .route("/interaction_updates", get(handlers::interaction_updates))
        .route(
            "/new_interaction_updates",
            get(handlers::new_interaction_updates),
        )
        .route("/waiting_interactions", get(handlers::waiting_interactions))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::PUT, Method::OPTIONS])
                .allow_headers(Any),
        )
        .layer(middleware::from_fn(request_id_middleware))
}

/// Middleware: injects a unique X-Request-Id into every response.
async fn request_id_middleware(req: Request, next: Next) -> Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}
