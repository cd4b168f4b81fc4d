use std::error::Error;
use std::fmt::Debug;
use std::time::Duration;

use bytes::Bytes;
use reqwest::StatusCode;
use thiserror::Error;
use url::Url;

use crate::credential::CredentialError;

/// User agent string used for outgoing requests.
pub const USER_AGENT: &str = concat!("triggerbench/", env!("CARGO_PKG_VERSION"));

/// A type-erased [`Backend`] instance.
pub type BoxedBackend = Box<dyn Backend>;

/// The messaging service a batch is sent to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MessagingService {
    /// Azure Service Bus topics and queues.
    ServiceBus,
    /// Azure Event Hubs.
    EventHubs,
}

impl MessagingService {
    /// OAuth scope for data plane access to this service.
    pub fn scope(self) -> &'static str {
        match self {
            MessagingService::ServiceBus => "https://servicebus.azure.net/.default",
            MessagingService::EventHubs => "https://eventhubs.azure.net/.default",
        }
    }
}

/// The single external call that fires a trigger.
#[derive(Clone, Debug, PartialEq)]
pub enum Operation {
    /// `GET {url}?operationId={operation_id}`.
    InvokeHttp {
        /// Target URL.
        url: String,
        /// Passed as the `operationId` query parameter.
        operation_id: String,
    },
    /// Upload a block blob tagged with `operationId` metadata.
    UploadBlob {
        /// Storage account name.
        account: String,
        /// Container name.
        container: String,
        /// Name of the blob to create.
        blob_name: String,
        /// Blob contents.
        content: Bytes,
        /// Stored as blob metadata.
        operation_id: String,
    },
    /// Put one message onto a storage queue.
    SendQueueMessage {
        /// Storage account name.
        account: String,
        /// Queue name.
        queue: String,
        /// Message text, already encoded.
        message_text: String,
    },
    /// Create one item in a Cosmos DB container.
    CreateItem {
        /// Database name.
        database: String,
        /// Container name.
        container: String,
        /// The JSON document to insert.
        item: serde_json::Value,
        /// Value of the container's partition key for this item.
        partition_key: String,
    },
    /// `POST {url}` with `{ "input": operation_id }` and the functions master key.
    InvokeTimer {
        /// Admin endpoint of the timer function.
        url: String,
        /// Sent as the `input` field.
        operation_id: String,
    },
    /// Send a batch of messages to a Service Bus entity or an event hub.
    SendBatch {
        /// Target service.
        service: MessagingService,
        /// Namespace name.
        namespace: String,
        /// Topic, queue or event hub name.
        entity: String,
        /// Message bodies in the batch.
        bodies: Vec<String>,
    },
}

impl Operation {
    /// Fails with [`BackendError::MissingInput`] if a resource name the call addresses is empty.
    pub fn validate(&self) -> BackendResult<()> {
        let required: Vec<(&'static str, &str)> = match self {
            Operation::InvokeHttp { url, .. } | Operation::InvokeTimer { url, .. } => {
                vec![("url", url.as_str())]
            }
            Operation::UploadBlob {
                account, container, ..
            } => vec![("storage account", account.as_str()), ("container", container.as_str())],
            Operation::SendQueueMessage { account, queue, .. } => {
                vec![("storage account", account.as_str()), ("queue", queue.as_str())]
            }
            Operation::CreateItem {
                database,
                container,
                ..
            } => vec![("database", database.as_str()), ("container", container.as_str())],
            Operation::SendBatch {
                namespace, entity, ..
            } => vec![("namespace", namespace.as_str()), ("entity", entity.as_str())],
        };

        match required.into_iter().find(|(_, value)| value.is_empty()) {
            Some((name, _)) => Err(BackendError::MissingInput(name)),
            None => Ok(()),
        }
    }
}

/// Executes trigger [`Operation`]s against external services.
#[async_trait::async_trait]
pub trait Backend: Debug + Send + Sync + 'static {
    /// The backend name, used for diagnostics.
    fn name(&self) -> &'static str;

    /// Performs exactly one external call for the given operation.
    async fn execute(&self, operation: &Operation) -> BackendResult<()>;
}

/// Errors raised while performing an outbound call.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Sending the request failed or the response could not be read.
    #[error("{context}: {cause}")]
    Reqwest {
        /// What the backend was doing.
        context: String,
        /// The underlying client error.
        #[source]
        cause: reqwest::Error,
    },

    /// The service answered with a non-success status code.
    #[error("{context} failed with status {status}: {message}")]
    Status {
        /// What the backend was doing.
        context: String,
        /// The response status.
        status: StatusCode,
        /// The response body, if any.
        message: String,
    },

    /// Errors related to de/serialization.
    #[error("serde error: {context}")]
    Serde {
        /// What was being de/serialized.
        context: String,
        /// The underlying error.
        #[source]
        cause: serde_json::Error,
    },

    /// Obtaining an access token failed.
    #[error("authentication failed: {0}")]
    Credential(#[from] CredentialError),

    /// A setting required for this operation is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// The trigger input did not name a resource the call needs.
    #[error("invalid input: {0} name is empty")]
    MissingInput(&'static str),
}

impl BackendError {
    pub(crate) fn reqwest(context: impl Into<String>, cause: reqwest::Error) -> Self {
        Self::Reqwest {
            context: context.into(),
            cause,
        }
    }
}

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Creates a reqwest client with required defaults.
pub fn reqwest_client(timeout: Option<Duration>) -> reqwest::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().user_agent(USER_AGENT);
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder.build()
}

/// Fails with [`BackendError::Status`] unless the response has a success status.
pub(crate) async fn ensure_success(
    context: &str,
    response: reqwest::Response,
) -> BackendResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().await.unwrap_or_default();
    Err(BackendError::Status {
        context: context.into(),
        status,
        message: message.trim().to_owned(),
    })
}

/// Formats the current time as an RFC 1123 date, as required by the `x-ms-date` header.
pub(crate) fn http_date() -> String {
    chrono::Utc::now()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

/// Resolves an endpoint template and appends the given path segments.
///
/// `placeholder` (e.g. `{account}`) in the template is replaced by `name`.
pub(crate) fn service_url(
    template: &str,
    placeholder: &str,
    name: &str,
    segments: &[&str],
) -> BackendResult<Url> {
    let base = template.replace(placeholder, name);
    let mut url = Url::parse(&base)
        .map_err(|err| BackendError::Config(format!("invalid endpoint `{base}`: {err}")))?;
    url.path_segments_mut()
        .map_err(|()| BackendError::Config(format!("invalid endpoint `{base}`: not a base URL")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Renders an error and its chain of sources into a single line.
pub fn error_message(error: &(dyn Error + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let cause_message = cause.to_string();
        if !message.contains(&cause_message) {
            message.push_str(": ");
            message.push_str(&cause_message);
        }
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_endpoint_templates() {
        let url = service_url(
            "https://{account}.blob.core.windows.net",
            "{account}",
            "accountb",
            &["containerA", "1650000000123.txt"],
        )
        .unwrap();
        assert_eq!(
            url.as_str(),
            "https://accountb.blob.core.windows.net/containerA/1650000000123.txt"
        );

        let url = service_url(
            "http://127.0.0.1:8080/blob/{account}",
            "{account}",
            "accountB",
            &["container with space"],
        )
        .unwrap();
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:8080/blob/accountB/container%20with%20space"
        );

        assert!(service_url("not a url", "{account}", "a", &[]).is_err());
    }

    #[test]
    fn rejects_operations_with_empty_names() {
        let send = |namespace: &str, entity: &str| Operation::SendBatch {
            service: MessagingService::ServiceBus,
            namespace: namespace.into(),
            entity: entity.into(),
            bodies: vec!["op".into()],
        };

        assert!(send("ns", "topic").validate().is_ok());
        assert!(matches!(
            send("ns", "").validate(),
            Err(BackendError::MissingInput("entity"))
        ));
        assert!(matches!(
            send("", "").validate(),
            Err(BackendError::MissingInput("namespace"))
        ));

        let queue = Operation::SendQueueMessage {
            account: String::new(),
            queue: "orders".into(),
            message_text: "b3A=".into(),
        };
        let error = queue.validate().unwrap_err();
        assert_eq!(error.to_string(), "invalid input: storage account name is empty");
    }

    #[test]
    fn error_message_skips_repeated_causes() {
        let error = BackendError::Credential(CredentialError::Unconfigured("AZURE_TENANT_ID"));
        assert_eq!(
            error_message(&error),
            "authentication failed: credential is not configured: AZURE_TENANT_ID is not set"
        );
    }
}
