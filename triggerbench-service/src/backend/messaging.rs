use reqwest::header::CONTENT_TYPE;
use serde::Serialize;

use super::azure::AzureBackend;
use super::common::{BackendError, BackendResult, MessagingService, ensure_success, service_url};
use crate::credential::{Token, TokenProvider};

/// API version of the batch send endpoint shared by Service Bus and Event Hubs.
const BATCH_API_VERSION: &str = "2014-01";

const BATCH_CONTENT_TYPE: &str = "application/vnd.microsoft.servicebus.json";

#[derive(Serialize)]
struct BatchMessage<'a> {
    #[serde(rename = "Body")]
    body: &'a str,
}

impl<T: TokenProvider> AzureBackend<T> {
    #[tracing::instrument(level = "trace", skip(self, bodies))]
    pub(super) async fn send_batch(
        &self,
        service: MessagingService,
        namespace: &str,
        entity: &str,
        bodies: &[String],
    ) -> BackendResult<()> {
        tracing::debug!(count = bodies.len(), "Sending message batch");
        let mut url = service_url(
            &self.config.endpoints.service_bus,
            "{namespace}",
            namespace,
            &[entity, "messages"],
        )?;
        url.query_pairs_mut()
            .append_pair("api-version", BATCH_API_VERSION);

        let batch: Vec<_> = bodies
            .iter()
            .map(|body| BatchMessage { body })
            .collect();
        let payload = serde_json::to_vec(&batch).map_err(|cause| BackendError::Serde {
            context: "serializing message batch".into(),
            cause,
        })?;

        let token = self.credential.get_token(service.scope()).await?;
        let response = self
            .client
            .post(url)
            .bearer_auth(token.as_str())
            .header(CONTENT_TYPE, BATCH_CONTENT_TYPE)
            .body(payload)
            .send()
            .await
            .map_err(|cause| BackendError::reqwest("sending batch", cause))?;

        ensure_success("sending batch", response).await?;
        Ok(())
    }
}
