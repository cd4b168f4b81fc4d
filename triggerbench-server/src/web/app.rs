use std::net::SocketAddr;

use anyhow::Result;
use axum::ServiceExt;
use axum::extract::Request;
use sentry::integrations::tower::{NewSentryLayer, SentryHttpLayer};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::{DefaultOnFailure, TraceLayer};
use tracing::Level;

use crate::endpoints;
use crate::state::ServiceState;
use crate::web::middleware as m;

/// The invoker web application: routes plus middleware.
#[derive(Debug)]
pub struct App {
    router: axum::Router,
    graceful_shutdown: bool,
}

impl App {
    /// Creates the application for the given service state.
    ///
    /// Use [`serve`](Self::serve) to run the server future.
    pub fn new(state: ServiceState) -> Self {
        // Layers added first see the request first and the response last.
        let middleware = ServiceBuilder::new()
            .layer(axum::middleware::from_fn(m::emit_request_metrics))
            .layer(CatchPanicLayer::custom(m::handle_panic))
            .layer(m::set_server_header())
            .layer(NewSentryLayer::new_from_top())
            .layer(SentryHttpLayer::new().enable_transaction())
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(m::make_http_span)
                    .on_failure(DefaultOnFailure::new().level(Level::DEBUG)),
            );

        Self {
            router: endpoints::routes().layer(middleware).with_state(state),
            graceful_shutdown: false,
        }
    }

    /// Stops accepting connections once shutdown is requested through `elegant_departure`.
    ///
    /// Disabled by default.
    pub fn graceful_shutdown(mut self, enable: bool) -> Self {
        self.graceful_shutdown = enable;
        self
    }

    /// Serves requests on `listener` until the server stops.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let service =
            ServiceExt::<Request>::into_make_service_with_connect_info::<SocketAddr>(self.router);

        if self.graceful_shutdown {
            let guard = elegant_departure::get_shutdown_guard();
            axum::serve(listener, service)
                .with_graceful_shutdown(guard.wait_owned())
                .await?;
        } else {
            axum::serve(listener, service).await?;
        }

        Ok(())
    }
}
