//! Contains all HTTP endpoint handlers.
//!
//! Use [`routes`] to create a router with all endpoints.

use axum::Router;

use crate::state::ServiceState;

pub mod health;
mod invoker;

/// Builds the router serving the health probes and the invoker endpoint.
pub fn routes() -> Router<ServiceState> {
    Router::new()
        .merge(health::router())
        .merge(invoker::router())
}
