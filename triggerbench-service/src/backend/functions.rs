use reqwest::header::HeaderName;
use secrecy::ExposeSecret;

use super::azure::AzureBackend;
use super::common::{BackendError, BackendResult, ensure_success};
use crate::credential::TokenProvider;

const FUNCTIONS_KEY: HeaderName = HeaderName::from_static("x-functions-key");

impl<T: TokenProvider> AzureBackend<T> {
    #[tracing::instrument(level = "trace", skip(self))]
    pub(super) async fn invoke_http(&self, url: &str, operation_id: &str) -> BackendResult<()> {
        tracing::debug!("Invoking HTTP function");
        let response = self
            .client
            .get(url)
            .query(&[("operationId", operation_id)])
            .send()
            .await
            .map_err(|cause| BackendError::reqwest("invoking function", cause))?;

        ensure_success("invoking function", response).await?;
        Ok(())
    }

    #[tracing::instrument(level = "trace", skip(self))]
    pub(super) async fn invoke_timer(&self, url: &str, operation_id: &str) -> BackendResult<()> {
        tracing::debug!("Invoking timer function");
        let mut request = self
            .client
            .post(url)
            .json(&serde_json::json!({ "input": operation_id }));
        if let Some(key) = &self.config.timer_master_key {
            request = request.header(FUNCTIONS_KEY, key.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|cause| BackendError::reqwest("invoking timer", cause))?;

        ensure_success("invoking timer", response).await?;
        Ok(())
    }
}
