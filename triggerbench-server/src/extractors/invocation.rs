use std::collections::BTreeMap;
use std::convert::Infallible;

use axum::body::{Body, Bytes};
use axum::extract::{FromRequest, FromRequestParts, Path, Query, Request};
use axum::http::header::{HeaderMap, HeaderName, HeaderValue};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use triggerbench_service::{InvocationRequest, RequestSnapshot, TriggerResponse};

use crate::extractors::Xt;

impl<S> FromRequest<S> for Xt<InvocationRequest>
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request(request: Request, state: &S) -> Result<Self, Self::Rejection> {
        let (mut parts, body) = request.into_parts();

        let params = Path::<BTreeMap<String, String>>::from_request_parts(&mut parts, state)
            .await
            .map(|Path(params)| params)
            .unwrap_or_default();
        let query = Query::<BTreeMap<String, String>>::try_from_uri(&parts.uri)
            .map(|Query(query)| query)
            .unwrap_or_default();

        let snapshot = RequestSnapshot {
            method: parts.method.to_string(),
            url: path_and_query(&parts.uri),
            original_url: parts.uri.to_string(),
            headers: collect_headers(&parts.headers),
            query,
            params,
            raw_body: String::new(),
            body: serde_json::Value::Null,
        };

        // Unreadable bodies are echoed as empty instead of rejecting the invocation.
        let body = match Bytes::from_request(Request::from_parts(parts, body), state).await {
            Ok(body) => body,
            Err(rejection) => {
                tracing::warn!(
                    status = %rejection.status(),
                    reason = %rejection.body_text(),
                    "failed to read request body"
                );
                Bytes::new()
            }
        };
        let snapshot = RequestSnapshot {
            raw_body: String::from_utf8_lossy(&body).into_owned(),
            body: RequestSnapshot::body_value(&body),
            ..snapshot
        };

        Ok(Xt(InvocationRequest::from_snapshot(snapshot)))
    }
}

fn path_and_query(uri: &Uri) -> String {
    uri.path_and_query()
        .map_or_else(|| uri.path().to_owned(), |pq| pq.as_str().to_owned())
}

fn collect_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut collected = BTreeMap::<String, String>::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes());
        collected
            .entry(name.as_str().to_owned())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert_with(|| value.into_owned());
    }
    collected
}

impl IntoResponse for Xt<TriggerResponse> {
    fn into_response(self) -> Response {
        let Xt(response) = self;

        let mut builder = Response::builder()
            .status(StatusCode::from_u16(response.status).unwrap_or(StatusCode::OK));
        for (name, value) in &response.headers {
            match (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                (Ok(name), Ok(value)) => builder = builder.header(name, value),
                _ => tracing::warn!(name = name.as_str(), "dropping invalid response header"),
            }
        }

        match builder.body(Body::from(response.body)) {
            Ok(response) => response,
            Err(error) => {
                tracing::error!(
                    error = &error as &dyn std::error::Error,
                    "failed to build response"
                );
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::http::Method;

    use super::*;

    #[tokio::test]
    async fn snapshots_request() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/invoker?trigger=queue&input=queueA%2CaccountB&id=4")
            .header("x-test", "a")
            .header("x-test", "b")
            .body(Body::from(r#"{"hello":"world"}"#))
            .unwrap();

        let Xt(request) = Xt::<InvocationRequest>::from_request(request, &())
            .await
            .unwrap();

        assert_eq!(request.trigger.as_deref(), Some("queue"));
        assert_eq!(request.input.as_deref(), Some("queueA,accountB"));
        assert_eq!(request.iteration_id.as_deref(), Some("4"));

        let snapshot = &request.snapshot;
        assert_eq!(snapshot.method, "POST");
        assert_eq!(
            snapshot.url,
            "/api/invoker?trigger=queue&input=queueA%2CaccountB&id=4"
        );
        assert_eq!(snapshot.headers["x-test"], "a, b");
        assert_eq!(snapshot.raw_body, r#"{"hello":"world"}"#);
        assert_eq!(snapshot.body, serde_json::json!({ "hello": "world" }));
        assert!(snapshot.params.is_empty());
    }

    #[tokio::test]
    async fn oversized_body_is_not_rejected() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/invoker?trigger=ftp")
            .body(Body::from(vec![b'x'; 3 * 1024 * 1024]))
            .unwrap();

        // Without a router the default body limit of 2 MiB applies.
        let Xt(request) = Xt::<InvocationRequest>::from_request(request, &())
            .await
            .unwrap();

        assert_eq!(request.trigger.as_deref(), Some("ftp"));
        assert_eq!(request.snapshot.method, "POST");
        assert_eq!(request.snapshot.raw_body, "");
        assert_eq!(request.snapshot.body, serde_json::Value::Null);
    }

    #[tokio::test]
    async fn keeps_raw_body_text() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/invoker")
            .body(Body::from("not json"))
            .unwrap();

        let Xt(request) = Xt::<InvocationRequest>::from_request(request, &())
            .await
            .unwrap();

        assert_eq!(request.snapshot.raw_body, "not json");
        assert_eq!(request.snapshot.body, serde_json::json!("not json"));
    }

    #[test]
    fn renders_trigger_response() {
        let response = Xt(TriggerResponse::text("done").with_header("operationId", "abc"))
            .into_response();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "text/plain");
        assert_eq!(response.headers()["operationid"], "abc");
    }
}
