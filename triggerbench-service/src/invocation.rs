//! Request and response descriptors of the invoker endpoint.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::trigger::{Trigger, TriggerKind};

/// Query parameter selecting the trigger type.
pub const TRIGGER_PARAM: &str = "trigger";
/// Query parameter carrying the comma-delimited trigger input.
pub const INPUT_PARAM: &str = "input";
/// Query parameter carrying the iteration id of the experiment driver.
pub const ITERATION_ID_PARAM: &str = "id";
/// Query parameter describing the invocation mode, reported in telemetry only.
pub const INVOKE_MODE_PARAM: &str = "invokeMode";
/// Query parameter describing the invocation input, reported in telemetry only.
pub const INVOKE_INPUT_PARAM: &str = "invokeInput";

/// The incoming request as it is echoed back for unsupported invocations.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSnapshot {
    /// HTTP method.
    pub method: String,
    /// Path and query of the request.
    pub url: String,
    /// The url as received before any rewriting by the host.
    pub original_url: String,
    /// Request headers. Repeated headers are joined with `, `.
    pub headers: BTreeMap<String, String>,
    /// Decoded query parameters.
    pub query: BTreeMap<String, String>,
    /// Route parameters.
    pub params: BTreeMap<String, String>,
    /// The body as received, decoded lossily as UTF-8.
    pub raw_body: String,
    /// Request body: parsed JSON if possible, a string otherwise, `null` when empty.
    pub body: serde_json::Value,
}

impl RequestSnapshot {
    /// Interprets raw body bytes the way they are echoed.
    pub fn body_value(bytes: &[u8]) -> serde_json::Value {
        if bytes.is_empty() {
            return serde_json::Value::Null;
        }
        serde_json::from_slice(bytes)
            .unwrap_or_else(|_| String::from_utf8_lossy(bytes).into_owned().into())
    }
}

/// Describes one request to the invoker endpoint.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InvocationRequest {
    /// Raw trigger type name.
    pub trigger: Option<String>,
    /// Raw, comma-delimited trigger input.
    pub input: Option<String>,
    /// Iteration id of the experiment driver.
    pub iteration_id: Option<String>,
    /// Invocation mode, opaque to the invoker.
    pub invoke_mode: Option<String>,
    /// Invocation input, opaque to the invoker.
    pub invoke_input: Option<String>,
    /// The full request, for echoing.
    pub snapshot: RequestSnapshot,
}

impl InvocationRequest {
    /// Builds a request descriptor from a snapshot, reading the invoker's query parameters.
    pub fn from_snapshot(snapshot: RequestSnapshot) -> Self {
        let param = |name: &str| snapshot.query.get(name).cloned();
        Self {
            trigger: param(TRIGGER_PARAM),
            input: param(INPUT_PARAM),
            iteration_id: param(ITERATION_ID_PARAM),
            invoke_mode: param(INVOKE_MODE_PARAM),
            invoke_input: param(INVOKE_INPUT_PARAM),
            snapshot,
        }
    }

    /// Resolves the trigger this request asks for.
    ///
    /// Returns `None` if the trigger type is missing or unknown, or the input is missing, empty,
    /// or malformed for the trigger type.
    pub fn parse_trigger(&self) -> Option<Trigger> {
        let kind: TriggerKind = self.trigger.as_deref()?.parse().ok()?;
        Trigger::parse(kind, self.input.as_deref()?)
    }
}

/// Normalized invoker response.
#[derive(Clone, Debug, PartialEq)]
pub struct TriggerResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: BTreeMap<String, String>,
    /// Plain text body.
    pub body: String,
}

impl TriggerResponse {
    /// A `200 OK` plain text response.
    pub fn text(body: impl Into<String>) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_owned(), "text/plain".to_owned());
        Self {
            status: 200,
            headers,
            body: body.into(),
        }
    }

    /// Echoes the request back as JSON.
    pub fn echo(snapshot: &RequestSnapshot) -> Self {
        Self::text(serde_json::to_string(snapshot).unwrap_or_default())
    }

    /// Adds a response header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(query: &[(&str, &str)]) -> InvocationRequest {
        InvocationRequest::from_snapshot(RequestSnapshot {
            method: "GET".into(),
            query: query
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Default::default()
        })
    }

    #[test]
    fn reads_query_parameters() {
        let request = request(&[
            ("trigger", "queue"),
            ("input", "queueA,accountB"),
            ("id", "7"),
            ("invokeMode", "burst"),
            ("invokeInput", "10"),
        ]);

        assert_eq!(request.iteration_id.as_deref(), Some("7"));
        assert_eq!(request.invoke_mode.as_deref(), Some("burst"));
        assert_eq!(request.invoke_input.as_deref(), Some("10"));
        assert_eq!(
            request.parse_trigger(),
            Some(Trigger::Queue {
                queue: "queueA".into(),
                account: "accountB".into()
            })
        );
    }

    #[test]
    fn unresolvable_triggers() {
        assert_eq!(request(&[]).parse_trigger(), None);
        assert_eq!(request(&[("trigger", "queue")]).parse_trigger(), None);
        assert_eq!(request(&[("trigger", "ftp"), ("input", "x")]).parse_trigger(), None);
        assert_eq!(request(&[("trigger", "Queue"), ("input", "a,b")]).parse_trigger(), None);
        assert_eq!(request(&[("trigger", "queue"), ("input", "")]).parse_trigger(), None);
    }

    #[test]
    fn interprets_body() {
        assert_eq!(RequestSnapshot::body_value(b""), serde_json::Value::Null);
        assert_eq!(
            RequestSnapshot::body_value(br#"{"a":1}"#),
            serde_json::json!({ "a": 1 })
        );
        assert_eq!(RequestSnapshot::body_value(b"plain"), serde_json::json!("plain"));
    }

    #[test]
    fn echoes_snapshot_as_json() {
        let mut request = request(&[("trigger", "ftp")]);
        request.snapshot.raw_body = "a=1&b=2".into();
        request.snapshot.body = RequestSnapshot::body_value(b"a=1&b=2");
        let response = TriggerResponse::echo(&request.snapshot);

        assert_eq!(response.status, 200);
        assert_eq!(response.headers["content-type"], "text/plain");
        let echoed: serde_json::Value = serde_json::from_str(&response.body).unwrap();
        assert_eq!(echoed["method"], "GET");
        assert_eq!(echoed["query"]["trigger"], "ftp");
        assert_eq!(echoed["originalUrl"], "");
        assert_eq!(echoed["rawBody"], "a=1&b=2");
        assert_eq!(echoed["body"], "a=1&b=2");
    }
}
