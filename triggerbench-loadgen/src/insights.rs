//! A client for the Application Insights events API.
//!
//! Requests, dependencies and traces are fetched as raw [`Event`]s. See
//! <https://learn.microsoft.com/rest/api/application-insights/events/get-by-type>.

use std::collections::BTreeMap;
use std::fmt;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

/// The public Application Insights API.
pub const DEFAULT_ENDPOINT: &str = "https://api.applicationinsights.io";

/// Rows fetched per table. The API returns 500 rows unless asked for more.
pub const DEFAULT_TOP: usize = 10_000;

/// Only traces about function execution and operation id switches are relevant.
const TRACE_FILTER: &str = "contains(trace/message, 'exec') or contains(trace/message, 'custom')";

/// The event tables read by the analysis.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EventTable {
    /// Incoming function invocations.
    Requests,
    /// Outgoing calls, including the `CompletionTrack*` records of the invoker.
    Dependencies,
    /// Log messages.
    Traces,
}

impl EventTable {
    /// The path segment of this table.
    pub fn as_str(self) -> &'static str {
        match self {
            EventTable::Requests => "requests",
            EventTable::Dependencies => "dependencies",
            EventTable::Traces => "traces",
        }
    }
}

impl fmt::Display for EventTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct EventPage {
    value: Vec<Event>,
}

/// One row of an event table. Only the fields used by the analysis are read.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// When the event was recorded.
    pub timestamp: DateTime<Utc>,
    /// The operation the event belongs to.
    pub operation: Option<EventOperation>,
    /// Custom properties attached by the emitter.
    pub custom_dimensions: Option<BTreeMap<String, String>>,
    /// Set on rows of the requests table.
    pub request: Option<RequestDetails>,
    /// Set on rows of the dependencies table.
    pub dependency: Option<DependencyDetails>,
    /// Set on rows of the traces table.
    pub trace: Option<TraceDetails>,
}

impl Event {
    /// The operation id, empty if the event was recorded outside of an operation.
    pub fn operation_id(&self) -> &str {
        self.operation
            .as_ref()
            .and_then(|operation| operation.id.as_deref())
            .unwrap_or_default()
    }

    /// Looks up a custom dimension.
    pub fn dimension(&self, name: &str) -> Option<&str> {
        self.custom_dimensions.as_ref()?.get(name).map(String::as_str)
    }
}

#[allow(missing_docs)]
#[derive(Clone, Debug, Deserialize)]
pub struct EventOperation {
    pub id: Option<String>,
}

#[allow(missing_docs)]
#[derive(Clone, Debug, Deserialize)]
pub struct RequestDetails {
    pub name: Option<String>,
}

#[allow(missing_docs)]
#[derive(Clone, Debug, Deserialize)]
pub struct DependencyDetails {
    pub name: Option<String>,
    /// Duration in milliseconds.
    pub duration: Option<f64>,
}

#[allow(missing_docs)]
#[derive(Clone, Debug, Deserialize)]
pub struct TraceDetails {
    pub message: Option<String>,
}

/// Reads event tables of one Application Insights application.
#[derive(Debug)]
pub struct InsightsClient {
    client: reqwest::Client,
    endpoint: String,
    app_id: String,
    api_key: SecretString,
}

impl InsightsClient {
    /// Creates a client for the application `app_id`, authenticating with an API key.
    pub fn new(endpoint: &str, app_id: impl Into<String>, api_key: SecretString) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("triggerbench-loadgen")
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_owned(),
            app_id: app_id.into(),
            api_key,
        })
    }

    /// Fetches up to `top` events of `table` within `timespan`, an ISO 8601 duration or interval.
    pub async fn fetch(&self, table: EventTable, timespan: &str, top: usize) -> Result<Vec<Event>> {
        let url = format!("{}/v1/apps/{}/events/{table}", self.endpoint, self.app_id);
        let mut query = vec![("timespan", timespan.to_owned()), ("$top", top.to_string())];
        if table == EventTable::Traces {
            query.push(("$filter", TRACE_FILTER.to_owned()));
        }

        let response = self
            .client
            .get(&url)
            .header("x-api-key", self.api_key.expose_secret())
            .query(&query)
            .send()
            .await
            .with_context(|| format!("failed to fetch {table}"))?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            bail!("fetching {table} failed with {status}: {body}");
        }

        let page: EventPage =
            serde_json::from_str(&body).with_context(|| format!("failed to parse {table}"))?;
        Ok(page.value)
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;

    use super::*;

    fn client(server: &MockServer) -> InsightsClient {
        InsightsClient::new(&server.base_url(), "app", SecretString::from("key".to_owned())).unwrap()
    }

    #[tokio::test]
    async fn fetches_events() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/v1/apps/app/events/dependencies")
                    .header("x-api-key", "key")
                    .query_param("timespan", "P1D");
                then.status(200).json_body(serde_json::json!({
                    "value": [{
                        "id": "d1",
                        "timestamp": "2022-02-23T15:34:00.123Z",
                        "operation": { "id": "op1", "parentId": "op1" },
                        "customDimensions": null,
                        "dependency": { "name": "CompletionTrackQueue", "duration": 10 },
                    }],
                }));
            })
            .await;

        let events = client(&server)
            .fetch(EventTable::Dependencies, "P1D", 100)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].operation_id(), "op1");
        assert_eq!(events[0].dimension("FullName"), None);
        let dependency = events[0].dependency.as_ref().unwrap();
        assert_eq!(dependency.name.as_deref(), Some("CompletionTrackQueue"));
        assert_eq!(dependency.duration, Some(10.0));
        assert_eq!(
            events[0].timestamp.timestamp_millis(),
            DateTime::parse_from_rfc3339("2022-02-23T15:34:00.123Z")
                .unwrap()
                .timestamp_millis()
        );
    }

    #[tokio::test]
    async fn filters_traces() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/v1/apps/app/events/traces")
                    .query_param_exists("$filter");
                then.status(200).json_body(serde_json::json!({ "value": [] }));
            })
            .await;

        let events = client(&server)
            .fetch(EventTable::Traces, "P1D", 100)
            .await
            .unwrap();

        mock.assert_async().await;
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn rejected_key_is_an_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.path("/v1/apps/app/events/requests");
                then.status(403).body("invalid api key");
            })
            .await;

        let err = client(&server)
            .fetch(EventTable::Requests, "P1D", 100)
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "fetching requests failed with 403 Forbidden: invalid api key"
        );
    }
}
