//! HTTP router assembly.

use axum::Router;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use tower_http::compression::CompressionLayer;

use crate::handlers;
use crate::middleware::{self, AccessLogLayer};
use crate::state::AppState;

pub(crate) fn router(state: AppState) -> Router {
    let security = state.security.clone();

    // axum layers: last .layer() = outermost; request flows outside-in
    let mut app = Router::new()
        .route("/", get(handlers::list_all))
        .route("/ping", get(handlers::ping))
        .route("/update/", post(handlers::update_json))
        .route("/updates/", post(handlers::updates_json))
        .route("/update/{kind}/{name}/{value}", post(handlers::update_path))
        .route("/value/", post(handlers::value_json))
        .route("/value/{kind}/{name}", get(handlers::value_path))
        .with_state(state)
        .layer(from_fn_with_state(security.clone(), middleware::unseal_request));

    if security.signer.is_some() {
        app = app.layer(from_fn_with_state(security.clone(), middleware::sign_response));
    }
    if security.trusted.is_some() {
        app = app.layer(from_fn_with_state(security, middleware::trusted_subnet));
    }

    app.layer(AccessLogLayer).layer(CompressionLayer::new())
}
