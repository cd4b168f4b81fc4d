use secrecy::SecretString;

use super::common::{Backend, BackendResult, Operation};
use super::cosmos::CosmosAccount;
use crate::credential::TokenProvider;

/// Service endpoint templates.
///
/// `{account}` is replaced by the storage account name and `{namespace}` by the Service Bus or
/// Event Hubs namespace name. Override these to target emulators or mock servers.
#[derive(Clone, Debug)]
pub struct Endpoints {
    /// Blob service endpoint, `https://{account}.blob.core.windows.net` by default.
    pub blob: String,
    /// Queue service endpoint, `https://{account}.queue.core.windows.net` by default.
    pub queue: String,
    /// Service Bus and Event Hubs endpoint, `https://{namespace}.servicebus.windows.net` by
    /// default.
    pub service_bus: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            blob: "https://{account}.blob.core.windows.net".into(),
            queue: "https://{account}.queue.core.windows.net".into(),
            service_bus: "https://{namespace}.servicebus.windows.net".into(),
        }
    }
}

/// Settings for [`AzureBackend`].
#[derive(Debug, Default)]
pub struct AzureConfig {
    /// Service endpoint templates.
    pub endpoints: Endpoints,
    /// The Cosmos DB account used by the database trigger.
    pub cosmos: Option<CosmosAccount>,
    /// Functions master key sent with timer invocations, `AZURE_TIMER_MASTERKEY`.
    pub timer_master_key: Option<SecretString>,
}

/// Fires triggers through the Azure REST APIs.
///
/// Storage and messaging calls authenticate with tokens from `T`, Cosmos DB calls with the
/// account master key, and timer invocations with the functions master key.
#[derive(Debug)]
pub struct AzureBackend<T> {
    pub(super) client: reqwest::Client,
    pub(super) credential: T,
    pub(super) config: AzureConfig,
}

impl<T: TokenProvider> AzureBackend<T> {
    /// Creates a backend sending requests through `client`.
    pub fn new(client: reqwest::Client, credential: T, config: AzureConfig) -> Self {
        Self {
            client,
            credential,
            config,
        }
    }
}

#[async_trait::async_trait]
impl<T: TokenProvider> Backend for AzureBackend<T> {
    fn name(&self) -> &'static str {
        "azure"
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn execute(&self, operation: &Operation) -> BackendResult<()> {
        operation.validate()?;
        match operation {
            Operation::InvokeHttp { url, operation_id } => {
                self.invoke_http(url, operation_id).await
            }
            Operation::UploadBlob {
                account,
                container,
                blob_name,
                content,
                operation_id,
            } => {
                self.upload_blob(account, container, blob_name, content, operation_id)
                    .await
            }
            Operation::SendQueueMessage {
                account,
                queue,
                message_text,
            } => self.send_queue_message(account, queue, message_text).await,
            Operation::CreateItem {
                database,
                container,
                item,
                partition_key,
            } => {
                self.create_item(database, container, item, partition_key)
                    .await
            }
            Operation::InvokeTimer { url, operation_id } => {
                self.invoke_timer(url, operation_id).await
            }
            Operation::SendBatch {
                service,
                namespace,
                entity,
                bodies,
            } => self.send_batch(*service, namespace, entity, bodies).await,
        }
    }
}
