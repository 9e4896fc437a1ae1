use axum::Router;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::routes::kv_routes;
use crate::state::kv::SharedStore;

/// Build the complete application.
///
/// The KV dispatcher owns the whole path space (`/` for metrics,
/// everything else as a key), with request logging layered on top.
pub fn build_app(store: SharedStore) -> Router {
    Router::new()
        .merge(kv_routes::routes(store))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
}
