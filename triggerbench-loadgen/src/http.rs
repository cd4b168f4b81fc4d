//! Contains a remote implementation using HTTP to talk to the invoker.

use std::time::Duration;

use anyhow::{Result, bail};

use crate::workload::Invocation;

/// How the invoker handled an invocation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// The outbound call succeeded.
    Started,
    /// The outbound call failed. Contains the first line of the response.
    FailedToStart(String),
    /// The invoker did not recognize the request and echoed it back.
    Echoed,
}

impl Outcome {
    /// Classifies an invoker response body.
    pub fn classify(body: &str) -> Self {
        if body.contains("failed to start") {
            let summary = body.lines().next().unwrap_or_default();
            Outcome::FailedToStart(summary.to_owned())
        } else if body.contains("successfully started") {
            Outcome::Started
        } else {
            Outcome::Echoed
        }
    }
}

/// A remote implementation using HTTP to talk to the invoker.
#[derive(Debug)]
pub struct HttpRemote {
    remote: String,
    client: reqwest::Client,
}

impl HttpRemote {
    /// Creates a new `HttpRemote` for the given invoker URL.
    pub fn new(remote: &str, timeout: Option<Duration>) -> Result<Self> {
        let mut builder = reqwest::Client::builder().user_agent("triggerbench-loadgen");
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            remote: remote.to_owned(),
            client: builder.build()?,
        })
    }

    /// Sends one invocation and classifies the response.
    pub async fn invoke(&self, invocation: &Invocation) -> Result<Outcome> {
        let response = self
            .client
            .get(&self.remote)
            .query(&invocation.query())
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            bail!("invoker responded with {status}: {body}");
        }

        Ok(Outcome::classify(&body))
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use triggerbench_service::TriggerKind;

    use super::*;
    use crate::workload::WorkloadMode;

    fn invocation() -> Invocation {
        Invocation {
            trigger: TriggerKind::Queue,
            input: "queueA,accountB".into(),
            iteration_id: 7,
            invoke_mode: WorkloadMode::Burst,
            invoke_input: 50,
        }
    }

    #[test]
    fn classifies_bodies() {
        assert_eq!(
            Outcome::classify("AZURE - Queue trigger benchmark successfully started"),
            Outcome::Started
        );
        assert_eq!(
            Outcome::classify("AZURE - Queue trigger benchmark failed to start\n\nError: boom"),
            Outcome::FailedToStart("AZURE - Queue trigger benchmark failed to start".into())
        );
        assert_eq!(Outcome::classify(r#"{"method":"GET"}"#), Outcome::Echoed);
    }

    #[tokio::test]
    async fn sends_invocation_parameters() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/invoker")
                    .query_param("trigger", "queue")
                    .query_param("input", "queueA,accountB")
                    .query_param("id", "7")
                    .query_param("invokeMode", "burst")
                    .query_param("invokeInput", "50");
                then.status(200)
                    .body("AZURE - Queue trigger benchmark successfully started");
            })
            .await;

        let remote = HttpRemote::new(&server.url("/api/invoker"), None).unwrap();
        let outcome = remote.invoke(&invocation()).await.unwrap();

        assert_eq!(outcome, Outcome::Started);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn error_status_is_an_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.path("/api/invoker");
                then.status(502).body("bad gateway");
            })
            .await;

        let remote = HttpRemote::new(&server.url("/api/invoker"), None).unwrap();
        let err = remote.invoke(&invocation()).await.unwrap_err();
        assert!(err.to_string().contains("502"));
    }
}
