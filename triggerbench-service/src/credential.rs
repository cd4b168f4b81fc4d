//! Microsoft Entra ID credentials for the storage and messaging data planes.
//!
//! [`EnvironmentCredential`] authenticates a service principal with a client secret, read from
//! the usual `AZURE_TENANT_ID`, `AZURE_CLIENT_ID` and `AZURE_CLIENT_SECRET` settings. Tokens are
//! cached per scope and refreshed shortly before they expire.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Default Microsoft Entra ID authority.
pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

/// Tokens are refreshed this long before they expire.
const REFRESH_MARGIN: Duration = Duration::from_secs(300);

/// A bearer token usable in an `Authorization` header.
pub trait Token: Send + Sync {
    /// The raw token string.
    fn as_str(&self) -> &str;
}

/// Hands out bearer tokens for a resource scope.
pub trait TokenProvider: fmt::Debug + Send + Sync + 'static {
    /// Returns a valid token for the given scope, e.g. `https://storage.azure.com/.default`.
    fn get_token(
        &self,
        scope: &str,
    ) -> impl Future<Output = Result<impl Token, CredentialError>> + Send;
}

/// Errors raised while acquiring a token.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// A required credential setting is missing.
    #[error("credential is not configured: {0} is not set")]
    Unconfigured(&'static str),

    /// The token request could not be sent or its response could not be parsed.
    #[error("token request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The token endpoint rejected the request.
    #[error("token endpoint returned status {status}: {message}")]
    Status {
        /// The response status.
        status: StatusCode,
        /// The response body.
        message: String,
    },
}

/// Settings for [`EnvironmentCredential`].
#[derive(Debug, Default)]
pub struct ClientSecretConfig {
    /// Directory (tenant) id, `AZURE_TENANT_ID`.
    pub tenant_id: Option<String>,
    /// Application (client) id, `AZURE_CLIENT_ID`.
    pub client_id: Option<String>,
    /// Client secret, `AZURE_CLIENT_SECRET`.
    pub client_secret: Option<SecretString>,
    /// Authority host, `AZURE_AUTHORITY_HOST`. Defaults to [`DEFAULT_AUTHORITY_HOST`].
    pub authority_host: Option<String>,
}

/// An access token with its refresh deadline.
pub struct AccessToken {
    secret: SecretString,
    refresh_at: Instant,
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("refresh_at", &self.refresh_at)
            .finish_non_exhaustive()
    }
}

impl Token for Arc<AccessToken> {
    fn as_str(&self) -> &str {
        self.secret.expose_secret()
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// A service principal credential using the OAuth 2.0 client credentials flow.
#[derive(Debug)]
pub struct EnvironmentCredential {
    client: reqwest::Client,
    config: ClientSecretConfig,
    cache: Mutex<HashMap<String, Arc<AccessToken>>>,
}

impl EnvironmentCredential {
    /// Creates a credential that sends token requests through `client`.
    pub fn new(client: reqwest::Client, config: ClientSecretConfig) -> Self {
        Self {
            client,
            config,
            cache: Mutex::new(HashMap::new()),
        }
    }

    async fn request_token(&self, scope: &str) -> Result<AccessToken, CredentialError> {
        let tenant_id = self
            .config
            .tenant_id
            .as_deref()
            .ok_or(CredentialError::Unconfigured("AZURE_TENANT_ID"))?;
        let client_id = self
            .config
            .client_id
            .as_deref()
            .ok_or(CredentialError::Unconfigured("AZURE_CLIENT_ID"))?;
        let client_secret = self
            .config
            .client_secret
            .as_ref()
            .ok_or(CredentialError::Unconfigured("AZURE_CLIENT_SECRET"))?;

        let authority = self
            .config
            .authority_host
            .as_deref()
            .unwrap_or(DEFAULT_AUTHORITY_HOST)
            .trim_end_matches('/');
        let url = format!("{authority}/{tenant_id}/oauth2/v2.0/token");

        tracing::debug!(scope, "requesting access token");
        let requested_at = Instant::now();
        let response = self
            .client
            .post(url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", client_id),
                ("client_secret", client_secret.expose_secret()),
                ("scope", scope),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(CredentialError::Status { status, message });
        }

        let token: TokenResponse = response.json().await?;
        let lifetime = Duration::from_secs(token.expires_in);
        Ok(AccessToken {
            secret: token.access_token.into(),
            refresh_at: requested_at + lifetime.saturating_sub(REFRESH_MARGIN),
        })
    }
}

impl TokenProvider for EnvironmentCredential {
    #[allow(refining_impl_trait)]
    async fn get_token(&self, scope: &str) -> Result<Arc<AccessToken>, CredentialError> {
        // Holding the lock while fetching collapses concurrent refreshes into one request.
        let mut cache = self.cache.lock().await;
        if let Some(token) = cache.get(scope)
            && token.refresh_at > Instant::now()
        {
            return Ok(Arc::clone(token));
        }

        let token = Arc::new(self.request_token(scope).await?);
        cache.insert(scope.to_owned(), Arc::clone(&token));
        Ok(token)
    }
}
