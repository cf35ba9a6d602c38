//! HTTP surface of a node.
//!
//! Every route answers GET; the mutating ones also accept POST. Parameters
//! travel in the query string so a request can be replayed verbatim on
//! another shard.

pub mod error;
pub mod handlers;
pub mod state;

use crate::replication::{DELETE_REPLICATION_KEY_PATH, NEXT_REPLICATION_KEY_PATH};
use axum::Router;
use axum::http::Method;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use error::{WebError, WebResult};
pub use state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/get", get(handlers::get_key))
        .route("/set", get(handlers::set_key).post(handlers::set_key))
        .route("/purge", get(handlers::purge).post(handlers::purge))
        .route(NEXT_REPLICATION_KEY_PATH, get(handlers::next_replication_key))
        .route(
            DELETE_REPLICATION_KEY_PATH,
            get(handlers::delete_replication_key).post(handlers::delete_replication_key),
        )
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST]),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
