use std::any::Any;
use std::net::SocketAddr;

use axum::RequestExt;
use axum::extract::{ConnectInfo, MatchedPath, Query, Request};
use axum::http::{HeaderValue, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tokio::time::Instant;
use tower_http::set_header::SetResponseHeaderLayer;

/// The value for the `Server` HTTP header.
const SERVER: &str = concat!("triggerbench/", env!("CARGO_PKG_VERSION"));

/// Create a `SetResponseHeaderLayer` that sets the `Server` header.
pub fn set_server_header() -> SetResponseHeaderLayer<HeaderValue> {
    SetResponseHeaderLayer::overriding(header::SERVER, HeaderValue::from_static(SERVER))
}

#[derive(Deserialize)]
struct TriggerParam {
    trigger: Option<String>,
}

/// Create a tracing span for an HTTP request.
///
/// Records the client IP address and the requested trigger type, if available.
pub fn make_http_span(request: &Request) -> tracing::Span {
    let span = tracing::debug_span!(
        "request",
        method = %request.method(),
        uri = %request.uri(),
        client_addr = tracing::field::Empty,
        trigger = tracing::field::Empty,
    );

    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        span.record("client_addr", tracing::field::display(addr.ip()));
    }

    if let Ok(Query(TriggerParam {
        trigger: Some(trigger),
    })) = Query::try_from_uri(request.uri())
    {
        span.record("trigger", trigger.as_str());
    }

    span
}

/// A panic handler that logs the panic and turns it into a 500 response.
///
/// Use with the [`CatchPanicLayer`](tower_http::catch_panic::CatchPanicLayer) middleware.
pub fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "no error details".to_owned()
    };

    tracing::error!("panic in web handler: {detail}");

    (StatusCode::INTERNAL_SERVER_ERROR, detail).into_response()
}

/// A middleware that records request counts and timings per route.
///
/// Use this with [`from_fn`](axum::middleware::from_fn).
pub async fn emit_request_metrics(mut request: Request, next: Next) -> Response {
    let matched_path = request.extract_parts::<MatchedPath>().await;
    let route = matched_path
        .as_ref()
        .map_or("unknown", |m| m.as_str())
        .to_owned();
    let start = Instant::now();

    let response = next.run(request).await;

    merni::distribution!(
        "server.requests.duration"@s: start.elapsed(),
        "route" => route.as_str(),
        "status" => response.status().as_u16()
    );
    response
}
