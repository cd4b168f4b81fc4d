//! Cosmos DB (SQL API) item creation with master key authorization.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

use super::azure::AzureBackend;
use super::common::{BackendError, BackendResult, ensure_success, http_date, service_url};
use crate::credential::TokenProvider;

/// Cosmos DB REST API version sent with every request.
const COSMOS_API_VERSION: &str = "2018-12-31";

/// A Cosmos DB account reachable with its primary key.
#[derive(Debug)]
pub struct CosmosAccount {
    /// Account endpoint, e.g. `https://name.documents.azure.com:443/` (`ACCOUNTDB_ENDPOINT`).
    pub endpoint: String,
    /// Base64 encoded primary key (`ACCOUNTDB_PRIMARYKEY`).
    pub key: SecretString,
}

/// Computes the url-encoded `authorization` header value for a master key request.
///
/// The signature is an HMAC-SHA256 over `verb`, `resource_type`, `resource_link` and `date`
/// keyed with the decoded account key.
pub fn master_key_authorization(
    verb: &str,
    resource_type: &str,
    resource_link: &str,
    date: &str,
    key: &str,
) -> BackendResult<String> {
    let key = STANDARD
        .decode(key)
        .map_err(|err| BackendError::Config(format!("invalid Cosmos DB key: {err}")))?;

    let payload = format!(
        "{}\n{}\n{}\n{}\n\n",
        verb.to_lowercase(),
        resource_type.to_lowercase(),
        resource_link,
        date.to_lowercase()
    );

    let mut mac = Hmac::<Sha256>::new_from_slice(&key)
        .map_err(|err| BackendError::Config(format!("invalid Cosmos DB key: {err}")))?;
    mac.update(payload.as_bytes());
    let signature = STANDARD.encode(mac.finalize().into_bytes());

    let token = format!("type=master&ver=1.0&sig={signature}");
    Ok(url::form_urlencoded::byte_serialize(token.as_bytes()).collect())
}

impl<T: TokenProvider> AzureBackend<T> {
    #[tracing::instrument(level = "trace", skip(self, item))]
    pub(super) async fn create_item(
        &self,
        database: &str,
        container: &str,
        item: &serde_json::Value,
        partition_key: &str,
    ) -> BackendResult<()> {
        tracing::debug!("Creating Cosmos DB item");
        let account = self.config.cosmos.as_ref().ok_or_else(|| {
            BackendError::Config("ACCOUNTDB_ENDPOINT and ACCOUNTDB_PRIMARYKEY must be set".into())
        })?;

        let url = service_url(
            &account.endpoint,
            "{account}",
            "",
            &["dbs", database, "colls", container, "docs"],
        )?;
        let resource_link = format!("dbs/{database}/colls/{container}");
        let date = http_date();
        let authorization = master_key_authorization(
            "POST",
            "docs",
            &resource_link,
            &date,
            account.key.expose_secret(),
        )?;

        let partition_key =
            serde_json::to_string(&[partition_key]).map_err(|cause| BackendError::Serde {
                context: "serializing partition key".into(),
                cause,
            })?;
        let body = serde_json::to_vec(item).map_err(|cause| BackendError::Serde {
            context: "serializing item".into(),
            cause,
        })?;

        let response = self
            .client
            .post(url)
            .header(AUTHORIZATION, authorization)
            .header("x-ms-date", date)
            .header("x-ms-version", COSMOS_API_VERSION)
            .header("x-ms-documentdb-partitionkey", partition_key)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|cause| BackendError::reqwest("creating item", cause))?;

        ensure_success("creating item", response).await?;
        Ok(())
    }
}
