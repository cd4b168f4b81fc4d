use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;

use super::azure::AzureBackend;
use super::common::{BackendError, BackendResult, ensure_success, http_date, service_url};
use crate::credential::{Token, TokenProvider};

/// OAuth scope for the blob and queue data planes.
const STORAGE_SCOPE: &str = "https://storage.azure.com/.default";

/// Storage REST API version sent with every request.
const STORAGE_API_VERSION: &str = "2021-08-06";

impl<T: TokenProvider> AzureBackend<T> {
    #[tracing::instrument(level = "trace", skip(self, content))]
    pub(super) async fn upload_blob(
        &self,
        account: &str,
        container: &str,
        blob_name: &str,
        content: &Bytes,
        operation_id: &str,
    ) -> BackendResult<()> {
        tracing::debug!("Uploading block blob");
        let url = service_url(
            &self.config.endpoints.blob,
            "{account}",
            account,
            &[container, blob_name],
        )?;
        let token = self.credential.get_token(STORAGE_SCOPE).await?;

        let response = self
            .client
            .put(url)
            .bearer_auth(token.as_str())
            .header("x-ms-version", STORAGE_API_VERSION)
            .header("x-ms-date", http_date())
            .header("x-ms-blob-type", "BlockBlob")
            .header("x-ms-meta-operationId", operation_id)
            .header(CONTENT_TYPE, "text/plain")
            .body(content.clone())
            .send()
            .await
            .map_err(|cause| BackendError::reqwest("uploading blob", cause))?;

        ensure_success("uploading blob", response).await?;
        Ok(())
    }

    #[tracing::instrument(level = "trace", skip(self, message_text))]
    pub(super) async fn send_queue_message(
        &self,
        account: &str,
        queue: &str,
        message_text: &str,
    ) -> BackendResult<()> {
        tracing::debug!("Sending queue message");
        let url = service_url(
            &self.config.endpoints.queue,
            "{account}",
            account,
            &[queue, "messages"],
        )?;
        let token = self.credential.get_token(STORAGE_SCOPE).await?;

        let response = self
            .client
            .post(url)
            .bearer_auth(token.as_str())
            .header("x-ms-version", STORAGE_API_VERSION)
            .header("x-ms-date", http_date())
            .header(CONTENT_TYPE, "application/xml")
            .body(queue_message_xml(message_text))
            .send()
            .await
            .map_err(|cause| BackendError::reqwest("sending queue message", cause))?;

        ensure_success("sending queue message", response).await?;
        Ok(())
    }
}

fn queue_message_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            c => escaped.push(c),
        }
    }
    format!("<QueueMessage><MessageText>{escaped}</MessageText></QueueMessage>")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_queue_message_text() {
        assert_eq!(
            queue_message_xml("a<b>&c"),
            "<QueueMessage><MessageText>a&lt;b&gt;&amp;c</MessageText></QueueMessage>"
        );
    }
}
