//! Application Insights telemetry for invocations.
//!
//! The [`Telemetry`] trait records traces and dependency records for an operation. Records are
//! buffered in memory and sent in one request per invocation when [`Telemetry::flush`] is called.

use std::collections::BTreeMap;
use std::fmt;
use std::mem;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::context::OperationContext;

/// Ingestion endpoint used when the connection string does not name one.
pub const DEFAULT_INGESTION_ENDPOINT: &str = "https://dc.services.visualstudio.com";

/// Errors raised while setting up telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The connection string lacks an instrumentation key.
    #[error("connection string does not contain an InstrumentationKey")]
    MissingInstrumentationKey,

    /// A connection string segment is not a `key=value` pair.
    #[error("invalid connection string segment `{0}`")]
    InvalidSegment(String),
}

/// An outbound call as reported to Application Insights.
#[derive(Clone, Debug, PartialEq)]
pub struct Dependency {
    /// Name of the dependency, e.g. `CompletionTrackQueue`.
    pub name: String,
    /// Dependency id. Completion functions use it to correlate with the invocation.
    pub id: String,
    /// Dependency type, e.g. `HTTP`.
    pub kind: String,
    /// Reported result code.
    pub result_code: String,
    /// Reported duration.
    pub duration: Duration,
    /// Whether the call is reported as successful.
    pub success: bool,
}

/// Sink for invocation telemetry.
#[async_trait::async_trait]
pub trait Telemetry: fmt::Debug + Send + Sync + 'static {
    /// Records a trace message with custom properties.
    fn track_trace(
        &self,
        context: &OperationContext,
        message: &str,
        properties: BTreeMap<String, String>,
    );

    /// Records a dependency on an external service.
    fn track_dependency(&self, context: &OperationContext, dependency: Dependency);

    /// Sends all buffered records. Failures are logged and otherwise ignored.
    async fn flush(&self);
}

/// Telemetry that discards all records.
#[derive(Debug, Default)]
pub struct NoopTelemetry;

#[async_trait::async_trait]
impl Telemetry for NoopTelemetry {
    fn track_trace(&self, _: &OperationContext, _: &str, _: BTreeMap<String, String>) {}

    fn track_dependency(&self, _: &OperationContext, _: Dependency) {}

    async fn flush(&self) {}
}

/// Parsed `APPLICATIONINSIGHTS_CONNECTION_STRING`.
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectionString {
    /// The instrumentation key identifying the Application Insights resource.
    pub instrumentation_key: String,
    /// Base URL of the ingestion service.
    pub ingestion_endpoint: String,
}

impl ConnectionString {
    /// Parses a `Key=Value;Key=Value` connection string. Keys are case-insensitive.
    pub fn parse(s: &str) -> Result<Self, TelemetryError> {
        let mut instrumentation_key = None;
        let mut ingestion_endpoint = None;

        for segment in s.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            let (key, value) = segment
                .split_once('=')
                .ok_or_else(|| TelemetryError::InvalidSegment(segment.into()))?;

            if key.eq_ignore_ascii_case("InstrumentationKey") {
                instrumentation_key = Some(value.trim().to_owned());
            } else if key.eq_ignore_ascii_case("IngestionEndpoint") {
                ingestion_endpoint = Some(value.trim().trim_end_matches('/').to_owned());
            }
        }

        Ok(Self {
            instrumentation_key: instrumentation_key
                .filter(|key| !key.is_empty())
                .ok_or(TelemetryError::MissingInstrumentationKey)?,
            ingestion_endpoint: ingestion_endpoint
                .unwrap_or_else(|| DEFAULT_INGESTION_ENDPOINT.to_owned()),
        })
    }

    /// URL that envelopes are posted to.
    pub fn track_url(&self) -> String {
        format!("{}/v2.1/track", self.ingestion_endpoint)
    }
}

/// Sends telemetry to Application Insights through the ingestion REST API.
#[derive(Debug)]
pub struct AppInsights {
    client: reqwest::Client,
    connection: ConnectionString,
    role: Option<String>,
    buffer: Mutex<Vec<Envelope>>,
}

impl AppInsights {
    /// Creates a client for the given resource.
    ///
    /// `role` is reported as the cloud role name of all records.
    pub fn new(client: reqwest::Client, connection: ConnectionString, role: Option<String>) -> Self {
        Self {
            client,
            connection,
            role,
            buffer: Mutex::new(Vec::new()),
        }
    }

    fn push(&self, envelope: Envelope) {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(envelope);
    }

    fn envelope(&self, context: &OperationContext, kind: &str, data: Data) -> Envelope {
        let mut tags = BTreeMap::new();
        tags.insert("ai.operation.id", context.id.clone());
        tags.insert("ai.operation.parentId", context.parent_id.clone());
        if let Some(role) = &self.role {
            tags.insert("ai.cloud.role", role.clone());
        }

        let key = &self.connection.instrumentation_key;
        Envelope {
            name: format!("Microsoft.ApplicationInsights.{}.{kind}", key.replace('-', "")),
            time: Utc::now(),
            i_key: key.clone(),
            tags,
            data,
        }
    }
}

#[async_trait::async_trait]
impl Telemetry for AppInsights {
    fn track_trace(
        &self,
        context: &OperationContext,
        message: &str,
        properties: BTreeMap<String, String>,
    ) {
        let data = Data::MessageData(MessageData {
            ver: 2,
            message: message.to_owned(),
            severity_level: 1,
            properties,
        });
        self.push(self.envelope(context, "Message", data));
    }

    fn track_dependency(&self, context: &OperationContext, dependency: Dependency) {
        let data = Data::RemoteDependencyData(RemoteDependencyData {
            ver: 2,
            name: dependency.name,
            id: dependency.id,
            result_code: dependency.result_code,
            duration: format_duration(dependency.duration),
            success: dependency.success,
            data: String::new(),
            kind: dependency.kind,
        });
        self.push(self.envelope(context, "RemoteDependency", data));
    }

    async fn flush(&self) {
        let envelopes = mem::take(&mut *self.buffer.lock().unwrap_or_else(PoisonError::into_inner));
        if envelopes.is_empty() {
            return;
        }

        let count = envelopes.len();
        let result = self
            .client
            .post(self.connection.track_url())
            .json(&envelopes)
            .send()
            .await
            .and_then(|response| response.error_for_status());

        match result {
            Ok(_) => tracing::debug!(count, "flushed telemetry"),
            Err(error) => tracing::error!(
                error = &error as &dyn std::error::Error,
                count,
                "failed to flush telemetry"
            ),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    name: String,
    time: DateTime<Utc>,
    i_key: String,
    tags: BTreeMap<&'static str, String>,
    data: Data,
}

#[derive(Debug, Serialize)]
#[serde(tag = "baseType", content = "baseData")]
enum Data {
    MessageData(MessageData),
    RemoteDependencyData(RemoteDependencyData),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MessageData {
    ver: u8,
    message: String,
    severity_level: u8,
    properties: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RemoteDependencyData {
    ver: u8,
    name: String,
    id: String,
    result_code: String,
    duration: String,
    success: bool,
    data: String,
    #[serde(rename = "type")]
    kind: String,
}

/// Formats a duration as `[d.]hh:mm:ss.fff`.
fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    let (secs, millis) = (millis / 1000, millis % 1000);
    let (mins, secs) = (secs / 60, secs % 60);
    let (hours, mins) = (mins / 60, mins % 60);
    let (days, hours) = (hours / 24, hours % 24);

    let time = format!("{hours:02}:{mins:02}:{secs:02}.{millis:03}");
    if days > 0 {
        format!("{days}.{time}")
    } else {
        time
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;

    use super::*;

    #[test]
    fn parses_connection_string() {
        let parsed = ConnectionString::parse(
            "InstrumentationKey=0000-1111;IngestionEndpoint=https://westeurope-5.in.applicationinsights.azure.com/;LiveEndpoint=https://live",
        )
        .unwrap();

        assert_eq!(parsed.instrumentation_key, "0000-1111");
        assert_eq!(
            parsed.track_url(),
            "https://westeurope-5.in.applicationinsights.azure.com/v2.1/track"
        );
    }

    #[test]
    fn defaults_ingestion_endpoint() {
        let parsed = ConnectionString::parse("instrumentationkey=abc").unwrap();
        assert_eq!(parsed.track_url(), "https://dc.services.visualstudio.com/v2.1/track");
    }

    #[test]
    fn requires_instrumentation_key() {
        let err = ConnectionString::parse("IngestionEndpoint=https://x").unwrap_err();
        assert!(matches!(err, TelemetryError::MissingInstrumentationKey));

        let err = ConnectionString::parse("garbage").unwrap_err();
        assert!(matches!(err, TelemetryError::InvalidSegment(_)));
    }

    #[test]
    fn formats_durations() {
        assert_eq!(format_duration(Duration::from_millis(10)), "00:00:00.010");
        assert_eq!(
            format_duration(Duration::from_secs(86400 + 3661) + Duration::from_millis(5)),
            "1.01:01:01.005"
        );
    }

    #[tokio::test]
    async fn flushes_buffered_envelopes() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v2.1/track")
                    .body_contains("\"name\":\"Microsoft.ApplicationInsights.00001111.RemoteDependency\"")
                    .body_contains("\"baseType\":\"RemoteDependencyData\"")
                    .body_contains("\"name\":\"CompletionTrackQueue\"")
                    .body_contains("\"duration\":\"00:00:00.010\"")
                    .body_contains("\"ai.operation.parentId\":\"00f067aa0ba902b7\"")
                    .body_contains("\"baseType\":\"MessageData\"")
                    .body_contains("\"triggerType\":\"queue\"");
                then.status(200);
            })
            .await;

        let connection = ConnectionString::parse(&format!(
            "InstrumentationKey=0000-1111;IngestionEndpoint={}",
            server.base_url()
        ))
        .unwrap();
        let telemetry = AppInsights::new(reqwest::Client::new(), connection, None);
        let context = OperationContext {
            id: "4bf92f3577b34da6a3ce929d0e0e4736".into(),
            parent_id: "00f067aa0ba902b7".into(),
        };

        let properties = BTreeMap::from([("triggerType".to_owned(), "queue".to_owned())]);
        telemetry.track_trace(&context, "InvokerEndpoint details", properties);
        telemetry.track_dependency(
            &context,
            Dependency {
                name: "CompletionTrackQueue".into(),
                id: context.id.clone(),
                kind: "HTTP".into(),
                result_code: "200".into(),
                duration: Duration::from_millis(10),
                success: true,
            },
        );
        telemetry.flush().await;
        // Nothing left to send.
        telemetry.flush().await;

        mock.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn flush_failures_are_swallowed() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/v2.1/track");
                then.status(500);
            })
            .await;

        let connection = ConnectionString {
            instrumentation_key: "key".into(),
            ingestion_endpoint: server.base_url(),
        };
        let telemetry = AppInsights::new(reqwest::Client::new(), connection, None);
        telemetry.track_trace(&OperationContext::generate(), "message", BTreeMap::new());
        telemetry.flush().await;

        mock.assert_async().await;
    }
}
